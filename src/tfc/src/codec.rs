//! Building mid-path commands and parsing their completions.
//!
//! The transport only needs opaque bytes; the field layout belongs to a
//! hardware generation and lives behind [`MpcCodec`].
use std::fmt;

use mpc::wire::MAX_MSG_LEN;
use mpc::CompletionType;

use crate::error::{Error, Result};
use crate::types::TableType;

/// Table records are read and written in words of this size.
pub const BYTES_PER_WORD: usize = 32;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MpcOp {
    TableRead = 0,
    TableWrite = 1,
    TableReadClear = 2,
    EmInsert = 3,
    EmDelete = 4,
}

impl MpcOp {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => MpcOp::TableRead,
            1 => MpcOp::TableWrite,
            2 => MpcOp::TableReadClear,
            3 => MpcOp::EmInsert,
            4 => MpcOp::EmDelete,
            _ => return None,
        })
    }

    /// Writes answer with a short completion, everything else with a long one.
    pub fn completion(self) -> CompletionType {
        match self {
            MpcOp::TableWrite => CompletionType::Short,
            _ => CompletionType::Long,
        }
    }
}

impl fmt::Display for MpcOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MpcOp::TableRead => "READ",
            MpcOp::TableWrite => "WRITE",
            MpcOp::TableReadClear => "READ_CLR",
            MpcOp::EmInsert => "EM_INSERT",
            MpcOp::EmDelete => "EM_DELETE",
        };
        f.write_str(name)
    }
}

/// Completion status reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpcStatus {
    Ok,
    Unsupported,
    Format,
    Scope,
    Address,
    Cache,
    EmMiss,
    EmDuplicate,
    EmEventCollection,
    EmAbort,
    Unknown(u8),
}

impl MpcStatus {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => MpcStatus::Ok,
            1 => MpcStatus::Unsupported,
            2 => MpcStatus::Format,
            3 => MpcStatus::Scope,
            4 => MpcStatus::Address,
            5 => MpcStatus::Cache,
            6 => MpcStatus::EmMiss,
            7 => MpcStatus::EmDuplicate,
            8 => MpcStatus::EmEventCollection,
            9 => MpcStatus::EmAbort,
            other => MpcStatus::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            MpcStatus::Ok => 0,
            MpcStatus::Unsupported => 1,
            MpcStatus::Format => 2,
            MpcStatus::Scope => 3,
            MpcStatus::Address => 4,
            MpcStatus::Cache => 5,
            MpcStatus::EmMiss => 6,
            MpcStatus::EmDuplicate => 7,
            MpcStatus::EmEventCollection => 8,
            MpcStatus::EmAbort => 9,
            MpcStatus::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for MpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MpcStatus::Unknown(raw) => write!(f, "UNKNOWN({})", raw),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A command in device-independent form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    Read {
        table: TableType,
        offset: u32,
        words: u16,
        /// Bus address the device writes the words to.
        host: u64,
        clear: bool,
    },
    Write {
        table: TableType,
        offset: u32,
        data: &'a [u8],
    },
    EmInsert {
        offset: u32,
        records: u8,
        key: &'a [u8],
    },
    EmDelete {
        offset: u32,
        records: u8,
    },
}

impl<'a> Request<'a> {
    pub fn op(&self) -> MpcOp {
        match self {
            Request::Read { clear: false, .. } => MpcOp::TableRead,
            Request::Read { clear: true, .. } => MpcOp::TableReadClear,
            Request::Write { .. } => MpcOp::TableWrite,
            Request::EmInsert { .. } => MpcOp::EmInsert,
            Request::EmDelete { .. } => MpcOp::EmDelete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyBody {
    Read { words: u16 },
    Write,
    EmInsert { hash: u32, bucket: u16, replaced: bool },
    EmDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub status: MpcStatus,
    pub body: ReplyBody,
}

impl Reply {
    /// The body, or the status as an error.
    pub fn ok(self, op: MpcOp) -> Result<ReplyBody> {
        match self.status {
            MpcStatus::Ok => Ok(self.body),
            status => Err(Error::Status { op, status }),
        }
    }
}

pub trait MpcCodec: Send {
    fn build(&self, tsid: u8, req: &Request<'_>) -> Result<Vec<u8>>;

    fn parse(&self, op: MpcOp, cmpl: &[u8]) -> Result<Reply>;
}

/// Command layout:
///
/// | bytes  | field                               |
/// |--------|-------------------------------------|
/// | 0      | opcode                              |
/// | 1      | table type                          |
/// | 2      | table scope                         |
/// | 3      | reserved                            |
/// | 4..8   | record offset                       |
/// | 8..10  | words (read/write), records (EM)    |
/// | 10..16 | reserved                            |
/// | 16..   | host address (read), data or key    |
///
/// Completion layout, on top of the transport-owned type, opaque and valid
/// bits: status at byte 2, opcode echo at byte 3, words or hash at 12..16,
/// bucket at 16..18 and the replaced flag at byte 18.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleCodec;

pub(crate) const CMD_HDR_LEN: usize = 16;
pub const MAX_PAYLOAD: usize = MAX_MSG_LEN - CMD_HDR_LEN;

pub(crate) mod layout {
    pub const OPCODE: usize = 0;
    pub const TABLE: usize = 1;
    pub const TSID: usize = 2;
    pub const OFFSET: usize = 4;
    pub const COUNT: usize = 8;
    pub const PAYLOAD: usize = 16;

    pub const STATUS: usize = 2;
    pub const OP_ECHO: usize = 3;
    pub const INFO: usize = 12;
    pub const BUCKET: usize = 16;
    pub const REPLACED: usize = 18;
}

fn le_u32(b: &[u8], at: usize) -> u32 {
    let mut w = [0u8; 4];
    w.copy_from_slice(&b[at..at + 4]);
    u32::from_le_bytes(w)
}

fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

impl MpcCodec for SimpleCodec {
    fn build(&self, tsid: u8, req: &Request<'_>) -> Result<Vec<u8>> {
        use layout::*;

        let (table, offset, count, payload_len) = match req {
            Request::Read {
                table,
                offset,
                words,
                ..
            } => (*table, *offset, *words, 8),
            Request::Write {
                table,
                offset,
                data,
            } => {
                let words = (data.len() + BYTES_PER_WORD - 1) / BYTES_PER_WORD;
                (*table, *offset, words as u16, words * BYTES_PER_WORD)
            }
            Request::EmInsert {
                offset,
                records,
                key,
            } => (TableType::Lookup, *offset, *records as u16, key.len()),
            Request::EmDelete { offset, records } => {
                (TableType::Lookup, *offset, *records as u16, 0)
            }
        };
        if payload_len > MAX_PAYLOAD {
            return Err(Error::TooLarge(payload_len));
        }

        let mut msg = vec![0u8; CMD_HDR_LEN + payload_len];
        msg[OPCODE] = req.op() as u8;
        msg[TABLE] = table as u8;
        msg[TSID] = tsid;
        msg[OFFSET..OFFSET + 4].copy_from_slice(&offset.to_le_bytes());
        msg[COUNT..COUNT + 2].copy_from_slice(&count.to_le_bytes());
        match req {
            Request::Read { host, .. } => {
                msg[PAYLOAD..PAYLOAD + 8].copy_from_slice(&host.to_le_bytes())
            }
            Request::Write { data, .. } => msg[PAYLOAD..PAYLOAD + data.len()].copy_from_slice(data),
            Request::EmInsert { key, .. } => msg[PAYLOAD..PAYLOAD + key.len()].copy_from_slice(key),
            Request::EmDelete { .. } => {}
        }
        Ok(msg)
    }

    fn parse(&self, op: MpcOp, cmpl: &[u8]) -> Result<Reply> {
        use layout::*;

        if cmpl.len() < op.completion().len() {
            return Err(Error::BadReply {
                op,
                reason: "completion too short",
            });
        }
        if cmpl[OP_ECHO] != op as u8 {
            return Err(Error::BadReply {
                op,
                reason: "opcode mismatch",
            });
        }
        let status = MpcStatus::from_raw(cmpl[STATUS]);
        let body = match op {
            MpcOp::TableRead | MpcOp::TableReadClear => ReplyBody::Read {
                words: le_u32(cmpl, INFO) as u16,
            },
            MpcOp::TableWrite => ReplyBody::Write,
            MpcOp::EmInsert => ReplyBody::EmInsert {
                hash: le_u32(cmpl, INFO),
                bucket: le_u16(cmpl, BUCKET),
                replaced: cmpl[REPLACED] != 0,
            },
            MpcOp::EmDelete => ReplyBody::EmDelete,
        };
        Ok(Reply { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_pads_to_words() {
        let data = [0xaa; 40];
        let msg = SimpleCodec
            .build(
                7,
                &Request::Write {
                    table: TableType::Action,
                    offset: 0x102,
                    data: &data,
                },
            )
            .unwrap();
        assert_eq!(msg.len(), 16 + 64);
        assert_eq!(msg[0], MpcOp::TableWrite as u8);
        assert_eq!(msg[2], 7);
        assert_eq!(&msg[4..8], &[2, 1, 0, 0]);
        assert_eq!(&msg[8..10], &[2, 0]);
        assert_eq!(msg[16 + 39], 0xaa);
        assert_eq!(msg[16 + 40], 0);
    }

    #[test]
    fn oversized_payload() {
        let data = vec![0u8; MAX_PAYLOAD + 1];
        let req = Request::EmInsert {
            offset: 0,
            records: 1,
            key: &data,
        };
        assert!(matches!(SimpleCodec.build(1, &req), Err(Error::TooLarge(_))));
    }

    #[test]
    fn parse_checks_echo_and_status() {
        let mut c = [0u8; 32];
        c[3] = MpcOp::EmInsert as u8;
        c[2] = 7;
        c[12..16].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        c[16..18].copy_from_slice(&0x42u16.to_le_bytes());
        let r = SimpleCodec.parse(MpcOp::EmInsert, &c).unwrap();
        assert_eq!(r.status, MpcStatus::EmDuplicate);
        assert_eq!(
            r.body,
            ReplyBody::EmInsert {
                hash: 0x1234_5678,
                bucket: 0x42,
                replaced: false
            }
        );
        assert!(matches!(
            r.ok(MpcOp::EmInsert),
            Err(Error::Status {
                status: MpcStatus::EmDuplicate,
                ..
            })
        ));
        assert!(matches!(
            SimpleCodec.parse(MpcOp::EmDelete, &c),
            Err(Error::BadReply { .. })
        ));
        assert!(matches!(
            SimpleCodec.parse(MpcOp::EmInsert, &c[..16]),
            Err(Error::BadReply { .. })
        ));
    }
}
