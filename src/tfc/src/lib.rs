//! Table-scope client for the flow-table accelerator.
//!
//! Action records and exact-match entries live in record pools managed per
//! direction by [`cpm`]; reads, writes and exact-match updates travel over
//! the mid-path channels of [`mpc`], either one at a time or collected in a
//! batch.
pub extern crate tracing;
// alias
pub extern crate tracing as log;

pub mod act;
pub mod batch;
pub mod client;
pub mod codec;
pub mod config;
pub mod em;
pub mod error;
pub mod logging;
pub mod scope;
pub mod sim;
pub mod types;

pub use batch::{BatchOutput, BatchResult, PendingOp, TfcBatch};
pub use client::Tfc;
pub use codec::{MpcCodec, MpcOp, MpcStatus, Reply, ReplyBody, Request, SimpleCodec};
pub use config::{Config, ScopeConfig};
pub use error::{Error, Result};
pub use scope::TableScope;
pub use sim::TableModel;
pub use types::{ActionHandle, Dir, FlowHandle, Submitted, TableType};
