//! Record pools of one table scope.
//!
//! Each direction has a lookup and an action table, each carved into up to
//! `max_pools` pools of `2^pool_size_exp` records. A pool is bound to a
//! fresh [`RecordPool`] the first time it is needed and released again once
//! its last record is freed. Offsets handed out are scope-wide:
//! `pool << pool_size_exp | record`.
use cpm::{Cpm, PoolId, PoolInfo, RecordPool};

use crate::config::ScopeConfig;
use crate::error::{Error, Result};
use crate::log;
use crate::types::{Dir, TableType};

#[derive(Debug, Clone, Copy)]
struct Geometry {
    size_exp: u8,
    max_contig: u32,
}

#[derive(Debug)]
struct Table {
    cpm: Cpm<RecordPool>,
    geo: Geometry,
}

impl Table {
    fn open(max_pools: u16, geo: Geometry) -> Result<Self> {
        let mut cpm = Cpm::open(max_pools as usize)?;
        cpm.set_pool_capacity(1 << geo.size_exp);
        Ok(Table { cpm, geo })
    }

    /// Pool and pool-relative record of a scope-wide offset. Pool bits
    /// beyond the table's pools are rejected.
    #[inline]
    fn split(&self, offset: u32) -> Result<(PoolId, u32)> {
        let exp = self.geo.size_exp;
        let pool = PoolId::try_from(offset >> exp)
            .ok()
            .filter(|p| (*p as usize) < self.cpm.max_pools())
            .ok_or(Error::InvalidHandle("offset is outside the table's pools"))?;
        Ok((pool, offset & ((1 << exp) - 1)))
    }

    #[inline]
    fn join(&self, pool: PoolId, record: u32) -> u32 {
        (pool as u32) << self.geo.size_exp | record
    }

    fn bind_new(&mut self) -> Result<Option<PoolId>> {
        let Some(pool) = (0..self.cpm.max_pools() as PoolId).find(|p| !self.cpm.is_bound(*p))
        else {
            return Ok(None);
        };
        let records = RecordPool::new(self.cpm.pool_capacity(), self.geo.max_contig)?;
        self.cpm.bind(pool, Some(records))?;
        Ok(Some(pool))
    }

    fn alloc(&mut self, count: u32) -> Result<Option<u32>> {
        // the best-fit pool can still be too fragmented for an aligned run
        let candidates: Vec<PoolId> = self
            .cpm
            .iter_ranked()
            .take_while(|p| !p.all_used)
            .map(|p| p.id)
            .collect();
        for pool in candidates {
            match self.cpm.alloc_from(pool, count) {
                Ok(a) => return Ok(Some(self.join(pool, a.offset))),
                Err(cpm::Error::Exhausted(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let Some(pool) = self.bind_new()? else {
            return Ok(None);
        };
        let a = self.cpm.alloc_from(pool, count)?;
        Ok(Some(self.join(pool, a.offset)))
    }

    fn free(&mut self, offset: u32, count: u32) -> Result<()> {
        let (pool, record) = self.split(offset)?;
        self.cpm.free_to(pool, record, count)?;
        if self.cpm.pool_info(pool)?.used_count == 0 {
            self.cpm.bind(pool, None)?;
            log::debug!("pool {} released", pool);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct TableScope {
    tsid: u8,
    // [dir][table]
    tables: [[Table; 2]; 2],
}

fn check_geometry(max_pools: u16, geo: Geometry) -> Result<()> {
    if max_pools == 0 {
        return Err(Error::InvalidConfig("max_pools must be positive"));
    }
    let pool_bits = 16 - (max_pools - 1).leading_zeros();
    if geo.size_exp as u32 + pool_bits > 32 || geo.size_exp > 31 {
        return Err(Error::InvalidConfig("pool offsets do not fit in 32 bits"));
    }
    if !geo.max_contig.is_power_of_two() || geo.max_contig > u8::MAX as u32 {
        return Err(Error::InvalidConfig(
            "max_contig must be a power of two below 256",
        ));
    }
    if geo.max_contig > 1 << geo.size_exp {
        return Err(Error::InvalidConfig("max_contig exceeds the pool size"));
    }
    Ok(())
}

impl TableScope {
    pub fn open(config: &ScopeConfig) -> Result<Self> {
        let lkup = Geometry {
            size_exp: config.lkup_pool_size_exp,
            max_contig: config.lkup_max_contig,
        };
        let act = Geometry {
            size_exp: config.act_pool_size_exp,
            max_contig: config.act_max_contig,
        };
        check_geometry(config.max_pools, lkup)?;
        check_geometry(config.max_pools, act)?;

        let dir = || -> Result<[Table; 2]> {
            Ok([
                Table::open(config.max_pools, act)?,
                Table::open(config.max_pools, lkup)?,
            ])
        };
        let tables = [dir()?, dir()?];
        log::info!(
            "table scope {} opened: {} pools per table, {} lookup / {} action records per pool",
            config.tsid,
            config.max_pools,
            1u64 << lkup.size_exp,
            1u64 << act.size_exp
        );
        Ok(TableScope {
            tsid: config.tsid,
            tables,
        })
    }

    #[inline]
    pub fn tsid(&self) -> u8 {
        self.tsid
    }

    #[inline]
    fn table(&self, dir: Dir, table: TableType) -> &Table {
        &self.tables[dir.index()][table as usize]
    }

    #[inline]
    fn table_mut(&mut self, dir: Dir, table: TableType) -> &mut Table {
        &mut self.tables[dir.index()][table as usize]
    }

    /// Allocates `next_pow2(num_contig)` records. Returns the scope-wide
    /// offset and the record count.
    pub fn alloc(&mut self, dir: Dir, table: TableType, num_contig: u32) -> Result<(u32, u8)> {
        if num_contig == 0 {
            return Err(cpm::Error::InvalidCount(0).into());
        }
        let count = num_contig
            .checked_next_power_of_two()
            .ok_or(cpm::Error::InvalidCount(num_contig))?;
        if count > self.table(dir, table).geo.max_contig {
            return Err(cpm::Error::InvalidCount(count).into());
        }
        match self.table_mut(dir, table).alloc(count)? {
            Some(offset) => {
                log::trace!("{} {} records {:#x}..+{}", dir, table, offset, count);
                Ok((offset, count as u8))
            }
            None => {
                log::warn!("{} {} table has no room for {} records", dir, table, count);
                Err(Error::NoRecords { dir, table })
            }
        }
    }

    pub fn free(&mut self, dir: Dir, table: TableType, offset: u32, records: u8) -> Result<()> {
        self.table_mut(dir, table).free(offset, records as u32)
    }

    /// Ranked usage of the bound pools of one table.
    pub fn pools(&self, dir: Dir, table: TableType) -> Vec<PoolInfo> {
        self.table(dir, table).cpm.iter_ranked().collect()
    }

    /// Records in use in one table.
    pub fn used(&self, dir: Dir, table: TableType) -> u32 {
        self.table(dir, table)
            .cpm
            .iter_ranked()
            .map(|p| p.used_count)
            .sum()
    }

    /// Releases every pool still bound. Returns how many were.
    pub fn close(self) -> usize {
        let tsid = self.tsid;
        let released: usize = self
            .tables
            .into_iter()
            .flatten()
            .map(|t| t.cpm.close().len())
            .sum();
        if released > 0 {
            log::warn!("table scope {} closed with {} pools in use", tsid, released);
        }
        released
    }
}
