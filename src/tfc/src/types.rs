use std::fmt;

use mpc::ChannelId;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dir {
    Rx,
    Tx,
}

impl Dir {
    pub const ALL: [Dir; 2] = [Dir::Rx, Dir::Tx];

    /// Transmit tables sit behind the TE_CFA channel, receive tables behind RE_CFA.
    #[inline]
    pub fn channel(self) -> ChannelId {
        match self {
            Dir::Rx => ChannelId::ReCfa,
            Dir::Tx => ChannelId::TeCfa,
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Dir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dir::Rx => f.write_str("rx"),
            Dir::Tx => f.write_str("tx"),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableType {
    Action = 0,
    Lookup = 1,
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableType::Action => f.write_str("action"),
            TableType::Lookup => f.write_str("lookup"),
        }
    }
}

/// Result of an operation that may have been queued on a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted<T> {
    Done(T),
    /// Position of the command in the batch.
    Queued(usize),
}

impl<T> Submitted<T> {
    pub fn done(self) -> Option<T> {
        match self {
            Submitted::Done(t) => Some(t),
            Submitted::Queued(_) => None,
        }
    }
}

const OFFSET_MASK: u64 = 0xffff_ffff;
const RECORDS_SHIFT: u32 = 32;
const TSID_SHIFT: u32 = 40;
const BUCKET_SHIFT: u32 = 48;

/// Records holding an action, addressed by their scope-wide offset.
///
/// Packed as `tsid[47:40] | records[39:32] | offset[31:0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionHandle {
    pub tsid: u8,
    pub records: u8,
    pub offset: u32,
}

impl ActionHandle {
    pub fn to_raw(self) -> u64 {
        (self.tsid as u64) << TSID_SHIFT | (self.records as u64) << RECORDS_SHIFT | self.offset as u64
    }

    pub fn from_raw(raw: u64) -> Result<Self> {
        if raw >> BUCKET_SHIFT != 0 {
            return Err(Error::InvalidHandle("action handle has bucket bits"));
        }
        let h = ActionHandle {
            tsid: (raw >> TSID_SHIFT) as u8,
            records: (raw >> RECORDS_SHIFT) as u8,
            offset: (raw & OFFSET_MASK) as u32,
        };
        if h.records == 0 {
            return Err(Error::InvalidHandle("zero records"));
        }
        Ok(h)
    }
}

/// An exact-match entry.
///
/// Packed as `bucket[63:48] | tsid[47:40] | records[39:32] | offset[31:0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowHandle {
    pub tsid: u8,
    pub records: u8,
    pub offset: u32,
    /// Static bucket the entry hashed to.
    pub bucket: u16,
    /// Hash reported by the device; not part of the packed form.
    pub hash: u32,
}

impl FlowHandle {
    pub fn to_raw(self) -> u64 {
        (self.bucket as u64) << BUCKET_SHIFT
            | (self.tsid as u64) << TSID_SHIFT
            | (self.records as u64) << RECORDS_SHIFT
            | self.offset as u64
    }

    pub fn from_raw(raw: u64) -> Result<Self> {
        let h = FlowHandle {
            tsid: (raw >> TSID_SHIFT) as u8,
            records: (raw >> RECORDS_SHIFT) as u8,
            offset: (raw & OFFSET_MASK) as u32,
            bucket: (raw >> BUCKET_SHIFT) as u16,
            hash: 0,
        };
        if h.records == 0 {
            return Err(Error::InvalidHandle("zero records"));
        }
        Ok(h)
    }
}
