//! Mid-path channel transport.
//!
//! A mid-path channel is a pair of DMA rings shared with the flow-table
//! accelerator: the host writes commands into the command ring and rings a
//! doorbell, the device answers by writing completion records into the
//! completion ring. This crate owns ring memory, producer/consumer indices,
//! epoch tracking, correlation tags, the synchronous send/poll path and the
//! batch coordinator that defers polling until a batch is ended.
pub extern crate tracing;
// alias
pub extern crate tracing as log;

pub mod batch;
pub mod channel;
pub mod config;
pub mod device;
pub mod dma;
pub mod error;
pub mod loopback;
pub mod ring;
pub mod set;
pub mod wire;

pub use batch::{
    Batch, BatchState, CompletionHandler, EntryError, EntryResult, InFlightEntry, BATCH_MAX,
};
pub use channel::Channel;
pub use config::{MpcConfig, PollMode};
pub use device::{ChannelId, Doorbell, DoorbellKind, MpcDevice, RingMem, RingPair};
pub use dma::DmaRegion;
pub use error::{Error, Result};
pub use loopback::{Command, LoopbackDevice, Response};
pub use ring::Ring;
pub use set::ChannelSet;
pub use wire::{Completion, CompletionType};
