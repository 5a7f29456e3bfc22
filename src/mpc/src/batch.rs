//! Batched submission.
//!
//! While a batch is accumulating, commands are written and doorbelled but
//! nobody polls for them. [`Batch::end`] then drains the completions in
//! submission order and hands each one to a [`CompletionHandler`]. A batch
//! must always be ended once started; there is no way to discard one.
use std::fmt;

use arrayvec::ArrayVec;

use crate::device::ChannelId;
use crate::error::{Error, Result};
use crate::log;
use crate::set::ChannelSet;
use crate::wire::{Completion, CompletionType};

/// Commands a batch can hold.
pub const BATCH_MAX: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Accumulating,
}

/// A command sent but not yet polled for.
#[derive(Debug, Clone)]
pub struct InFlightEntry<K> {
    pub chnl: ChannelId,
    pub expected: CompletionType,
    pub tag: u16,
    pub kind: K,
}

/// Turns a drained completion into the caller's result.
pub trait CompletionHandler<K> {
    type Output;
    type Error;

    fn handle(
        &mut self,
        index: usize,
        kind: &K,
        cmpl: &Completion,
    ) -> std::result::Result<Self::Output, Self::Error>;

    /// Called instead of [`handle`](Self::handle) when no completion
    /// arrived for the entry.
    fn abandon(&mut self, _index: usize, _kind: &K, _err: &Error) {}
}

/// Why one entry of a batch failed.
#[derive(Debug)]
pub enum EntryError<E> {
    /// No completion, or the channel went away.
    Transport(Error),
    Handler(E),
}

impl<E: fmt::Display> fmt::Display for EntryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryError::Transport(e) => write!(f, "transport: {}", e),
            EntryError::Handler(e) => write!(f, "handler: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for EntryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EntryError::Transport(e) => Some(e),
            EntryError::Handler(e) => Some(e),
        }
    }
}

pub type EntryResult<T, E> = std::result::Result<T, EntryError<E>>;

#[derive(Debug)]
pub struct Batch<K> {
    state: BatchState,
    entries: ArrayVec<InFlightEntry<K>, BATCH_MAX>,
    error: bool,
}

impl<K> Default for Batch<K> {
    fn default() -> Self {
        Batch {
            state: BatchState::Idle,
            entries: ArrayVec::new(),
            error: false,
        }
    }
}

impl<K> Batch<K> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn state(&self) -> BatchState {
        self.state
    }

    #[inline]
    pub fn is_accumulating(&self) -> bool {
        self.state == BatchState::Accumulating
    }

    /// Accumulating with at least one command queued.
    #[inline]
    pub fn started(&self) -> bool {
        self.is_accumulating() && !self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry of the last ended batch failed.
    #[inline]
    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn entries(&self) -> &[InFlightEntry<K>] {
        &self.entries
    }

    pub fn start(&mut self) -> Result<()> {
        if self.is_accumulating() {
            return Err(Error::BatchBusy);
        }
        self.state = BatchState::Accumulating;
        self.entries.clear();
        self.error = false;
        Ok(())
    }

    /// Submits `msg` on `chnl` without waiting. The ring is left untouched
    /// if the batch is full.
    pub fn enqueue(
        &mut self,
        set: &mut ChannelSet,
        chnl: ChannelId,
        msg: &[u8],
        expected: CompletionType,
        kind: K,
    ) -> Result<u16> {
        if !self.is_accumulating() {
            return Err(Error::BatchIdle);
        }
        if self.entries.is_full() {
            return Err(Error::BatchFull(self.entries.len()));
        }
        let tag = set.channel_mut(chnl)?.xmit(msg)?;
        self.entries.push(InFlightEntry {
            chnl,
            expected,
            tag,
            kind,
        });
        Ok(tag)
    }

    /// Drains every queued completion in submission order. Per-entry
    /// failures are reported in the returned vector and raise the batch
    /// error flag; the batch is idle afterwards either way.
    pub fn end<H>(
        &mut self,
        set: &mut ChannelSet,
        handler: &mut H,
    ) -> Result<Vec<EntryResult<H::Output, H::Error>>>
    where
        H: CompletionHandler<K>,
    {
        if !self.is_accumulating() {
            return Err(Error::BatchIdle);
        }
        if self.entries.is_empty() {
            self.state = BatchState::Idle;
            return Ok(Vec::new());
        }

        let poller = set.poller();
        // small batches are unlikely to have completed yet
        if self.entries.len() < BATCH_MAX / 4 {
            poller.pause(poller.delay * 4);
        }

        let mut results = Vec::with_capacity(self.entries.len());
        for (i, entry) in self.entries.drain(..).enumerate() {
            let res = match set
                .channel_mut(entry.chnl)
                .and_then(|ch| ch.wait(entry.expected, entry.tag))
            {
                Ok(cmpl) => handler
                    .handle(i, &entry.kind, &cmpl)
                    .map_err(EntryError::Handler),
                Err(e) => {
                    log::error!("batch entry {} on {} failed: {}", i, entry.chnl, e);
                    handler.abandon(i, &entry.kind, &e);
                    Err(EntryError::Transport(e))
                }
            };
            if res.is_err() {
                self.error = true;
            }
            results.push(res);
        }

        self.state = BatchState::Idle;
        Ok(results)
    }
}
