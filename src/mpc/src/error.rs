use std::io;

use thiserror::Error;

use crate::device::ChannelId;
use crate::wire::MAX_MSG_LEN;

#[derive(Debug, Error)]
pub enum Error {
    #[error("DMA memory: {0}")]
    Io(#[from] io::Error),
    #[error("Ring size {0} is not a power of two")]
    InvalidRingSize(u32),
    #[error("Slot size {0} is not a non-zero multiple of 8")]
    InvalidSlotSize(usize),
    #[error("Completion type {0:#04x} is not a mid-path type")]
    InvalidCompletionType(u8),
    #[error("Channel {0} is not open")]
    ChannelNotOpen(ChannelId),
    #[error("Channel {0} is in error")]
    ChannelInError(ChannelId),
    #[error("Device is in error")]
    DeviceInError,
    #[error("Command of {0} bytes exceeds {MAX_MSG_LEN} bytes")]
    CommandTooLarge(usize),
    #[error("Command ring of {chnl} full: {need} slots needed, {free} free")]
    RingFull {
        chnl: ChannelId,
        need: u32,
        free: u32,
    },
    #[error("No completion on {0} after {1} polls")]
    Timeout(ChannelId, u32),
    #[error("Batch is already accumulating")]
    BatchBusy,
    #[error("Batch is not accumulating")]
    BatchIdle,
    #[error("Batch already holds {0} entries")]
    BatchFull(usize),
    #[error("Device rejected ring for {0}: {1}")]
    RingAlloc(ChannelId, String),
    #[error("IOVA {0:#x} is not mapped")]
    BadIova(u64),
}

pub type Result<T> = std::result::Result<T, Error>;
