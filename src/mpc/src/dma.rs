//! Host memory shared with the device.
//!
//! A region is an anonymous, zero-filled mapping addressed as little-endian
//! 64-bit words. Every access goes through an atomic so the host and a device
//! model on another thread can touch the same slots; publication order is
//! expressed with `Release` stores and `Acquire` loads.
use std::fmt;
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};

use crate::error::Result;

pub struct DmaRegion {
    // keeps the mapping alive, never accessed through a reference
    _mmap: MmapMut,
    base: NonNull<AtomicU64>,
    words: usize,
}

// SAFETY: all accesses go through `AtomicU64`, the mapping is owned.
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

impl fmt::Debug for DmaRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaRegion")
            .field("base", &self.base)
            .field("len", &self.len())
            .finish()
    }
}

impl DmaRegion {
    /// Maps `nbytes` of zeroed memory, rounded up to whole words.
    pub fn new(nbytes: usize) -> Result<Self> {
        let words = (nbytes.max(1) + 7) / 8;
        let mut mmap = MmapOptions::new().len(words * 8).map_anon()?;
        // anonymous mappings are page aligned
        let base = NonNull::new(mmap.as_mut_ptr().cast::<AtomicU64>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "null mapping"))?;
        Ok(DmaRegion {
            _mmap: mmap,
            base,
            words,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.words * 8
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words == 0
    }

    #[inline]
    fn word(&self, idx: usize) -> &AtomicU64 {
        assert!(idx < self.words, "word {} out of {}", idx, self.words);
        // SAFETY: in bounds, aligned, and the mapping lives as long as self
        unsafe { &*self.base.as_ptr().add(idx) }
    }

    #[inline]
    pub fn read_word(&self, idx: usize) -> u64 {
        u64::from_le(self.word(idx).load(Ordering::Acquire))
    }

    #[inline]
    pub fn write_word(&self, idx: usize, val: u64) {
        self.word(idx).store(val.to_le(), Ordering::Release);
    }

    /// Copies `buf` to byte offset `off`. Partial words are merged.
    pub fn write_bytes(&self, off: usize, buf: &[u8]) {
        for (i, b) in buf.iter().enumerate() {
            let pos = off + i;
            let shift = (pos % 8) * 8;
            let w = self.word(pos / 8);
            let old = u64::from_le(w.load(Ordering::Relaxed));
            let new = (old & !(0xffu64 << shift)) | ((*b as u64) << shift);
            w.store(new.to_le(), Ordering::Release);
        }
    }

    pub fn read_bytes(&self, off: usize, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            let pos = off + i;
            *b = (self.read_word(pos / 8) >> ((pos % 8) * 8)) as u8;
        }
    }
}
