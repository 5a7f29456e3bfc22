use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use mpc::MpcConfig;

/// Geometry of the table scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScopeConfig {
    pub tsid: u8,
    /// Pools per table and direction.
    pub max_pools: u16,
    /// log2 of the records in one lookup pool.
    pub lkup_pool_size_exp: u8,
    pub act_pool_size_exp: u8,
    /// Largest run of records a single allocation may take.
    pub lkup_max_contig: u32,
    pub act_max_contig: u32,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        ScopeConfig {
            tsid: 1,
            max_pools: 8,
            lkup_pool_size_exp: 10,
            act_pool_size_exp: 10,
            lkup_max_contig: 8,
            act_max_contig: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub log_level: String,
    pub mpc: MpcConfig,
    pub scope: ScopeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: String::from("info"),
            mpc: MpcConfig::default(),
            scope: ScopeConfig::default(),
        }
    }
}

impl Config {
    pub fn new(config: Option<&str>) -> anyhow::Result<Self> {
        let config = toml::from_str(config.unwrap_or(""))?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}
