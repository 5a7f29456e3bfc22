#![allow(dead_code)]
use std::sync::Arc;

use mpc::LoopbackDevice;
use tfc::{Config, ScopeConfig, SimpleCodec, TableModel, Tfc};

pub const BUCKETS: u16 = 64;

pub fn config(scope: ScopeConfig) -> Config {
    let mut c = Config::default();
    c.mpc.ring_depth = 64;
    c.mpc.retry_budget = 1_000;
    c.mpc.poll_delay_us = 0;
    c.scope = scope;
    c
}

pub fn small_scope() -> ScopeConfig {
    ScopeConfig {
        tsid: 3,
        max_pools: 2,
        lkup_pool_size_exp: 4,
        act_pool_size_exp: 4,
        lkup_max_contig: 4,
        act_max_contig: 4,
    }
}

pub struct Rig {
    pub tfc: Tfc,
    pub model: TableModel,
    pub dev: Arc<LoopbackDevice>,
}

pub fn open_with(scope: ScopeConfig) -> Rig {
    let model = TableModel::new(BUCKETS);
    let dev = Arc::new(model.device());
    let tfc = Tfc::open(&config(scope), dev.clone(), SimpleCodec).unwrap();
    Rig { tfc, model, dev }
}

pub fn open() -> Rig {
    open_with(small_scope())
}
