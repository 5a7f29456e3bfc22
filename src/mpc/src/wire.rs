//! Slot layouts shared with the device.
//!
//! Slots are handled as pairs of little-endian 64-bit words so that the last
//! word of a completion, which carries the valid bit, can be published with a
//! single release store.
use std::fmt;

use crate::error::{Error, Result};

/// Size of one command BD and of one completion slot.
pub const BD_SIZE: usize = 16;
pub const SLOT_WORDS: usize = BD_SIZE / 8;

/// Five bits of BD count, header included.
pub const MAX_BDS: u32 = 31;
pub const MAX_MSG_LEN: usize = (MAX_BDS as usize - 1) * BD_SIZE;

pub const TX_BD_MP_CMD: u16 = 0x08;
const TX_BD_TYPE_MASK: u16 = 0x3f;
const TX_BD_CNT_SHIFT: u16 = 8;
const TX_BD_CNT_MASK: u16 = 0x1f << TX_BD_CNT_SHIFT;

const CMPL_TYPE_MASK: u16 = 0x3f;
const CMPL_V: u32 = 0x1;

/// Header BD of a mid-path command.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxBdMpCmd {
    pub flags_type: u16,
    pub len: u16,
    pub opaque: u32,
    pub unused: u64,
}

impl TxBdMpCmd {
    pub fn new(bd_cnt: u32, len: usize, opaque: u32) -> Self {
        TxBdMpCmd {
            flags_type: TX_BD_MP_CMD | ((bd_cnt as u16) << TX_BD_CNT_SHIFT),
            len: len as u16,
            opaque,
            unused: 0,
        }
    }

    #[inline]
    pub fn bd_type(&self) -> u16 {
        self.flags_type & TX_BD_TYPE_MASK
    }

    #[inline]
    pub fn bd_cnt(&self) -> u32 {
        ((self.flags_type & TX_BD_CNT_MASK) >> TX_BD_CNT_SHIFT) as u32
    }

    pub fn to_words(self) -> [u64; SLOT_WORDS] {
        [
            self.flags_type as u64 | (self.len as u64) << 16 | (self.opaque as u64) << 32,
            self.unused,
        ]
    }

    pub fn from_words(w: [u64; SLOT_WORDS]) -> Self {
        TxBdMpCmd {
            flags_type: w[0] as u16,
            len: (w[0] >> 16) as u16,
            opaque: (w[0] >> 32) as u32,
            unused: w[1],
        }
    }
}

/// Number of BDs a message of `msg_len` bytes occupies, header included.
#[inline]
pub fn nr_bds(msg_len: usize) -> u32 {
    ((msg_len + BD_SIZE - 1) / BD_SIZE + 1) as u32
}

/// The `i`-th inline BD of `msg`, zero padded.
pub fn inline_bd(msg: &[u8], i: usize) -> [u64; SLOT_WORDS] {
    let mut chunk = [0u8; BD_SIZE];
    let start = i * BD_SIZE;
    let end = msg.len().min(start + BD_SIZE);
    chunk[..end - start].copy_from_slice(&msg[start..end]);
    let mut lo = [0u8; 8];
    let mut hi = [0u8; 8];
    lo.copy_from_slice(&chunk[..8]);
    hi.copy_from_slice(&chunk[8..]);
    [u64::from_le_bytes(lo), u64::from_le_bytes(hi)]
}

/// First completion slot.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CmplBase {
    pub type_: u16,
    pub info1: u16,
    pub info2: u32,
    pub info3_v: u32,
    pub info4: u32,
}

impl CmplBase {
    #[inline]
    pub fn cmpl_type(&self) -> u8 {
        (self.type_ & CMPL_TYPE_MASK) as u8
    }

    #[inline]
    pub fn valid(&self) -> bool {
        self.info3_v & CMPL_V != 0
    }

    pub fn to_words(self) -> [u64; SLOT_WORDS] {
        [
            self.type_ as u64 | (self.info1 as u64) << 16 | (self.info2 as u64) << 32,
            self.info3_v as u64 | (self.info4 as u64) << 32,
        ]
    }

    pub fn from_words(w: [u64; SLOT_WORDS]) -> Self {
        CmplBase {
            type_: w[0] as u16,
            info1: (w[0] >> 16) as u16,
            info2: (w[0] >> 32) as u32,
            info3_v: w[1] as u32,
            info4: (w[1] >> 32) as u32,
        }
    }
}

/// The valid bit of any completion slot sits in bit 0 of its second word.
#[inline]
pub fn slot_valid(second_word: u64) -> bool {
    second_word as u32 & CMPL_V != 0
}

#[inline]
pub fn with_valid(second_word: u64, v: bool) -> u64 {
    (second_word & !(CMPL_V as u64)) | v as u64
}

/// Completion shapes a mid-path command can be answered with.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionType {
    Short = 0x1e,
    Long = 0x1f,
}

impl CompletionType {
    pub fn from_raw(raw: u8) -> Result<Self> {
        match raw {
            0x1e => Ok(CompletionType::Short),
            0x1f => Ok(CompletionType::Long),
            other => Err(Error::InvalidCompletionType(other)),
        }
    }

    #[inline]
    pub fn slots(self) -> u32 {
        slots_of(self as u8)
    }

    #[inline]
    pub fn len(self) -> usize {
        self.slots() as usize * BD_SIZE
    }
}

impl fmt::Display for CompletionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionType::Short => f.write_str("MID_PATH_SHORT"),
            CompletionType::Long => f.write_str("MID_PATH_LONG"),
        }
    }
}

/// Odd completion types are 32 bytes wide.
#[inline]
pub fn slots_of(raw_type: u8) -> u32 {
    if raw_type & 1 == 1 {
        2
    } else {
        1
    }
}

#[inline]
pub fn is_mid_path(raw_type: u8) -> bool {
    CompletionType::from_raw(raw_type).is_ok()
}

/// A completion copied out of the completion ring.
#[derive(Clone, Copy)]
pub struct Completion {
    cmp_type: CompletionType,
    data: [u8; 2 * BD_SIZE],
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("cmp_type", &self.cmp_type)
            .field("opaque", &self.opaque())
            .finish()
    }
}

impl Completion {
    pub(crate) fn from_words(cmp_type: CompletionType, words: &[u64]) -> Self {
        let mut data = [0u8; 2 * BD_SIZE];
        for (i, w) in words.iter().enumerate().take(cmp_type.len() / 8) {
            data[i * 8..i * 8 + 8].copy_from_slice(&w.to_le_bytes());
        }
        Completion { cmp_type, data }
    }

    #[inline]
    pub fn cmp_type(&self) -> CompletionType {
        self.cmp_type
    }

    /// Raw bytes as written by the device, 16 or 32 of them.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.cmp_type.len()]
    }

    #[inline]
    pub fn base(&self) -> CmplBase {
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&self.data[..8]);
        hi.copy_from_slice(&self.data[8..16]);
        CmplBase::from_words([u64::from_le_bytes(lo), u64::from_le_bytes(hi)])
    }

    #[inline]
    pub fn opaque(&self) -> u32 {
        self.base().info2
    }
}

mod sa {
    use super::*;
    use static_assertions::const_assert_eq;
    use std::mem::size_of;
    const_assert_eq!(size_of::<TxBdMpCmd>(), BD_SIZE);
    const_assert_eq!(size_of::<CmplBase>(), BD_SIZE);
}
