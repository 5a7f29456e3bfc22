//! Record allocation inside a single pool.
use crate::error::{Error, Result};
use crate::log;

/// Records in use after an allocation or free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub used: u32,
    pub all_used: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// First record, relative to the pool.
    pub offset: u32,
    pub usage: Usage,
}

/// A fixed-capacity allocator bound to one pool.
pub trait SubAllocator {
    fn alloc(&mut self, count: u32) -> Result<Allocation>;

    fn free(&mut self, offset: u32, count: u32) -> Result<Usage>;

    fn usage(&self) -> Usage;
}

/// Hands out naturally aligned, power-of-two runs of records.
#[derive(Debug, Clone)]
pub struct RecordPool {
    bits: Vec<u64>,
    // first record of every live run
    starts: Vec<u64>,
    max_records: u32,
    max_contig: u32,
    in_use: u32,
}

impl RecordPool {
    /// `max_records` is rounded up to a multiple of `max_contig`, which must
    /// be a power of two.
    pub fn new(max_records: u32, max_contig: u32) -> Result<Self> {
        if max_records == 0 || max_contig == 0 || !max_contig.is_power_of_two() {
            return Err(Error::InvalidGeometry {
                max_records,
                max_contig,
            });
        }
        let max_records = max_records
            .checked_add(max_contig - 1)
            .map(|n| n / max_contig * max_contig)
            .ok_or(Error::InvalidGeometry {
                max_records,
                max_contig,
            })?;
        let words = (max_records as usize + 63) / 64;
        Ok(RecordPool {
            bits: vec![0; words],
            starts: vec![0; words],
            max_records,
            max_contig,
            in_use: 0,
        })
    }

    #[inline]
    pub fn max_records(&self) -> u32 {
        self.max_records
    }

    #[inline]
    pub fn max_contig(&self) -> u32 {
        self.max_contig
    }

    fn check_count(&self, count: u32) -> Result<()> {
        if count == 0 || !count.is_power_of_two() || count > self.max_contig {
            return Err(Error::InvalidCount(count));
        }
        Ok(())
    }

    #[inline]
    fn test(map: &[u64], rec: u32) -> bool {
        map[rec as usize / 64] & (1 << (rec % 64)) != 0
    }

    #[inline]
    fn put(map: &mut [u64], rec: u32, on: bool) {
        let w = &mut map[rec as usize / 64];
        if on {
            *w |= 1 << (rec % 64);
        } else {
            *w &= !(1 << (rec % 64));
        }
    }

    #[inline]
    fn is_set(&self, rec: u32) -> bool {
        Self::test(&self.bits, rec)
    }

    #[inline]
    fn is_start(&self, rec: u32) -> bool {
        Self::test(&self.starts, rec)
    }

    fn run_free(&self, offset: u32, count: u32) -> bool {
        (offset..offset + count).all(|r| !self.is_set(r))
    }

    /// True if `offset..offset + count` is exactly one live run: it starts
    /// a run, every record is in use, no other run starts inside it and the
    /// run does not continue past its end.
    fn is_run(&self, offset: u32, count: u32) -> bool {
        let Some(end) = offset.checked_add(count).filter(|&e| e <= self.max_records) else {
            return false;
        };
        offset % count == 0
            && self.is_start(offset)
            && (offset..end).all(|r| self.is_set(r))
            && (offset + 1..end).all(|r| !self.is_start(r))
            && (end == self.max_records || !self.is_set(end) || self.is_start(end))
    }

    fn mark(&mut self, offset: u32, count: u32, used: bool) {
        for r in offset..offset + count {
            Self::put(&mut self.bits, r, used);
        }
        Self::put(&mut self.starts, offset, used);
    }
}

impl SubAllocator for RecordPool {
    fn alloc(&mut self, count: u32) -> Result<Allocation> {
        self.check_count(count)?;
        let offset = (0..self.max_records)
            .step_by(count as usize)
            .find(|&off| self.run_free(off, count))
            .ok_or(Error::Exhausted(count))?;
        self.mark(offset, count, true);
        self.in_use += count;
        log::trace!("records {}..+{} allocated, {} in use", offset, count, self.in_use);
        Ok(Allocation {
            offset,
            usage: self.usage(),
        })
    }

    fn free(&mut self, offset: u32, count: u32) -> Result<Usage> {
        self.check_count(count)?;
        if !self.is_run(offset, count) {
            return Err(Error::NotAllocated { offset, count });
        }
        self.mark(offset, count, false);
        self.in_use -= count;
        Ok(self.usage())
    }

    fn usage(&self) -> Usage {
        Usage {
            used: self.in_use,
            all_used: self.in_use >= self.max_records,
        }
    }
}
