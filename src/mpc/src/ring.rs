use std::sync::Arc;

use crate::device::RingMem;
use crate::dma::DmaRegion;
use crate::error::{Error, Result};

/// A descriptor ring in DMA memory.
///
/// Raw indices run unbounded (wrapping at `u32::MAX`) and are masked on use.
/// Each side keeps an epoch bit that flips whenever its masked index wraps
/// past the last slot.
#[derive(Debug)]
pub struct Ring {
    mem: RingMem,
    raw_prod: u32,
    raw_cons: u32,
    epoch: bool,
    cons_epoch: bool,
}

#[inline]
fn wraps(raw: u32, mask: u32, n: u32) -> bool {
    (raw & mask) + n > mask
}

impl Ring {
    pub fn new(slot_count: u32, slot_size: usize) -> Result<Self> {
        if slot_count == 0 || !slot_count.is_power_of_two() {
            return Err(Error::InvalidRingSize(slot_count));
        }
        if slot_size == 0 || slot_size % 8 != 0 {
            return Err(Error::InvalidSlotSize(slot_size));
        }
        let region = Arc::new(DmaRegion::new(slot_count as usize * slot_size)?);
        Ok(Ring {
            mem: RingMem {
                region,
                slot_count,
                slot_size,
            },
            raw_prod: 0,
            raw_cons: 0,
            epoch: false,
            cons_epoch: false,
        })
    }

    /// Description handed to the device at ring allocation.
    pub fn mem(&self) -> RingMem {
        self.mem.clone()
    }

    #[inline]
    pub fn slot_count(&self) -> u32 {
        self.mem.slot_count
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        self.mem.mask()
    }

    #[inline]
    pub fn raw_producer(&self) -> u32 {
        self.raw_prod
    }

    #[inline]
    pub fn raw_consumer(&self) -> u32 {
        self.raw_cons
    }

    #[inline]
    pub fn producer(&self) -> u32 {
        self.raw_prod & self.mask()
    }

    #[inline]
    pub fn consumer(&self) -> u32 {
        self.raw_cons & self.mask()
    }

    /// Producer epoch.
    #[inline]
    pub fn epoch(&self) -> bool {
        self.epoch
    }

    #[inline]
    pub fn cons_epoch(&self) -> bool {
        self.cons_epoch
    }

    #[inline]
    pub fn in_use(&self) -> u32 {
        self.raw_prod.wrapping_sub(self.raw_cons)
    }

    #[inline]
    pub fn free_slots(&self) -> u32 {
        self.mem.slot_count - self.in_use()
    }

    /// Claims `n` slots and returns the masked index of the first one. Does
    /// not check for overrun.
    pub fn reserve(&mut self, n: u32) -> u32 {
        let start = self.producer();
        if wraps(self.raw_prod, self.mask(), n) {
            self.epoch = !self.epoch;
        }
        self.raw_prod = self.raw_prod.wrapping_add(n);
        start
    }

    pub fn advance_consumer(&mut self, n: u32) {
        if wraps(self.raw_cons, self.mask(), n) {
            self.cons_epoch = !self.cons_epoch;
        }
        self.raw_cons = self.raw_cons.wrapping_add(n);
    }

    /// Parity the valid bit must carry for a slot written in the consumer's
    /// current pass. The ring starts zeroed, so the first pass expects 1.
    #[inline]
    pub fn expected_valid(&self) -> bool {
        !self.cons_epoch
    }

    /// Word `w` of slot `idx`, where `idx` may run past the mask.
    #[inline]
    pub fn read(&self, idx: u32, w: usize) -> u64 {
        self.mem.read(idx, w)
    }

    #[inline]
    pub fn write_slot(&self, idx: u32, words: &[u64]) {
        self.mem.write_slot(idx, words)
    }
}
