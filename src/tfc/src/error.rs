use thiserror::Error;

use crate::codec::{MpcOp, MpcStatus};
use crate::types::{Dir, TableType};

#[derive(Debug, Error)]
pub enum Error {
    #[error("MPC: {0}")]
    Mpc(#[from] mpc::Error),
    #[error("Pool manager: {0}")]
    Cpm(#[from] cpm::Error),
    #[error("{op} failed with status {status}")]
    Status { op: MpcOp, status: MpcStatus },
    #[error("Malformed {op} reply: {reason}")]
    BadReply { op: MpcOp, reason: &'static str },
    #[error("No free {table} records for {dir}")]
    NoRecords { dir: Dir, table: TableType },
    #[error("Invalid handle: {0}")]
    InvalidHandle(&'static str),
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("Invalid scope config: {0}")]
    InvalidConfig(&'static str),
    #[error("{0} bytes do not fit in one command")]
    TooLarge(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
