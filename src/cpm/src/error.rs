use thiserror::Error;

use crate::manager::PoolId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Pool {pool} out of range, {max} pools")]
    InvalidPool { pool: PoolId, max: usize },
    #[error("Pool count {0} out of range")]
    InvalidPoolCount(usize),
    #[error("Pool {0} already bound")]
    AlreadyBound(PoolId),
    #[error("Pool {0} not bound")]
    NotBound(PoolId),
    #[error("Usage {used} exceeds pool capacity {capacity}")]
    UsageExceedsCapacity { used: u32, capacity: u32 },
    #[error("Invalid record pool geometry: {max_records} records, {max_contig} contiguous")]
    InvalidGeometry { max_records: u32, max_contig: u32 },
    #[error("Invalid record count {0}")]
    InvalidCount(u32),
    #[error("No free run of {0} records")]
    Exhausted(u32),
    #[error("Records {offset}..+{count} are not allocated")]
    NotAllocated { offset: u32, count: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
