//! The seam between the transport and the hardware.
use std::fmt;
use std::sync::Arc;

use crate::dma::DmaRegion;
use crate::error::Result;

/// Mid-path channels exposed by the accelerator.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    Tce = 0,
    Rce = 1,
    TeCfa = 2,
    ReCfa = 3,
    Primate = 4,
}

pub const CHANNEL_MAX: usize = 5;

impl ChannelId {
    pub const ALL: [ChannelId; CHANNEL_MAX] = [
        ChannelId::Tce,
        ChannelId::Rce,
        ChannelId::TeCfa,
        ChannelId::ReCfa,
        ChannelId::Primate,
    ];

    /// Only the flow-table channels are ever opened.
    pub const ENABLED_MASK: u8 = 1 << ChannelId::TeCfa as u8 | 1 << ChannelId::ReCfa as u8;

    #[inline]
    pub fn bit(self) -> u8 {
        1 << self as u8
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelId::Tce => "TCE",
            ChannelId::Rce => "RCE",
            ChannelId::TeCfa => "TE_CFA",
            ChannelId::ReCfa => "RE_CFA",
            ChannelId::Primate => "PRIMATE",
        };
        f.write_str(name)
    }
}

/// Map index used when configuring a channel's rings on the device.
#[inline]
pub fn chnl_map(chnl: ChannelId, idx: u16) -> u16 {
    (chnl as u16) << 8 | idx
}

/// Logical queue id of `chnl`: its rank among the capable channels, after
/// `offset` regular completion rings. `None` if `chnl` is not capable.
pub fn logical_id(caps: u8, chnl: ChannelId, offset: u16) -> Option<u16> {
    if caps & chnl.bit() == 0 {
        return None;
    }
    let below = caps & (chnl.bit() - 1);
    Some(below.count_ones() as u16 + offset)
}

/// Memory backing one ring.
#[derive(Debug, Clone)]
pub struct RingMem {
    pub region: Arc<DmaRegion>,
    pub slot_count: u32,
    pub slot_size: usize,
}

impl RingMem {
    #[inline]
    pub fn mask(&self) -> u32 {
        self.slot_count - 1
    }

    #[inline]
    fn word_index(&self, idx: u32, w: usize) -> usize {
        (idx & self.mask()) as usize * (self.slot_size / 8) + w
    }

    /// Word `w` of slot `idx`; `idx` may be a raw, unmasked index.
    #[inline]
    pub fn read(&self, idx: u32, w: usize) -> u64 {
        self.region.read_word(self.word_index(idx, w))
    }

    #[inline]
    pub fn write(&self, idx: u32, w: usize, val: u64) {
        self.region.write_word(self.word_index(idx, w), val)
    }

    pub fn read_slot<const N: usize>(&self, idx: u32) -> [u64; N] {
        let mut out = [0u64; N];
        for (w, val) in out.iter_mut().enumerate() {
            *val = self.read(idx, w);
        }
        out
    }

    /// Writes words in order, so the last word is published last.
    pub fn write_slot(&self, idx: u32, words: &[u64]) {
        for (w, val) in words.iter().enumerate() {
            self.write(idx, w, *val);
        }
    }
}

/// What the device needs to service a channel.
#[derive(Debug, Clone)]
pub struct RingPair {
    pub logical_id: u16,
    pub map_index: u16,
    pub cmd: RingMem,
    pub cmpl: RingMem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorbellKind {
    /// New command BDs up to `index`.
    Submit,
    /// Completions consumed up to `index`.
    CmplAck,
}

/// A doorbell write: masked index plus epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Doorbell {
    pub chnl: ChannelId,
    pub kind: DoorbellKind,
    pub index: u32,
    pub epoch: bool,
}

/// Hardware operations the transport relies on.
pub trait MpcDevice: Send + Sync {
    fn ring_alloc(&self, chnl: ChannelId, rings: RingPair) -> Result<()>;

    fn ring_free(&self, chnl: ChannelId);

    fn doorbell(&self, db: Doorbell);

    /// The device needs a reset; nothing may be submitted.
    fn in_error(&self) -> bool;

    /// Makes `region` reachable by device DMA and returns its bus address.
    fn dma_map(&self, region: Arc<DmaRegion>) -> Result<u64>;

    fn dma_unmap(&self, iova: u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_index() {
        assert_eq!(chnl_map(ChannelId::TeCfa, 0), 0x200);
        assert_eq!(chnl_map(ChannelId::ReCfa, 5), 0x305);
    }

    #[test]
    fn logical_ids_follow_caps() {
        let caps = ChannelId::ENABLED_MASK;
        assert_eq!(logical_id(caps, ChannelId::TeCfa, 1), Some(1));
        assert_eq!(logical_id(caps, ChannelId::ReCfa, 1), Some(2));
        assert_eq!(logical_id(caps, ChannelId::Tce, 1), None);
        let only_rx = ChannelId::ReCfa.bit();
        assert_eq!(logical_id(only_rx, ChannelId::ReCfa, 0), Some(0));
    }
}
