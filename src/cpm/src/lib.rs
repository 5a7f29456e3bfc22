//! Capacity pool management.
//!
//! Record space is carved into fixed-size pools. [`Cpm`] keeps the bound
//! pools ranked by fill level so that a pool with room can be found in
//! constant time, while [`cmm::RecordPool`] hands out aligned runs of records
//! inside one pool.
pub extern crate tracing;
// alias
pub extern crate tracing as log;

pub mod cmm;
pub mod error;
pub mod manager;

pub use cmm::{Allocation, RecordPool, SubAllocator, Usage};
pub use error::{Error, Result};
pub use manager::{Cpm, PoolId, PoolInfo, SearchMode};
