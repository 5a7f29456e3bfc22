#![allow(dead_code)]
use std::sync::Arc;

use mpc::{ChannelSet, CompletionType, LoopbackDevice, MpcConfig, Response};

/// First message byte picks the answer: 0 short, 1 long, 0xff none.
pub const SHORT: u8 = 0;
pub const LONG: u8 = 1;
pub const SILENT: u8 = 0xff;

/// Answers every command, echoing the message after the shape byte into
/// the completion bytes the device does not own.
pub fn echo_device() -> Arc<LoopbackDevice> {
    Arc::new(LoopbackDevice::new(|_chnl, cmd, _dma| {
        let shape = cmd.data.first().copied().unwrap_or(SHORT);
        let mut body = [0u8; 32];
        let echo = &cmd.data[1.min(cmd.data.len())..];
        // bytes 12..16 and 16..24 are free in both slots
        let n = echo.len().min(4);
        body[12..12 + n].copy_from_slice(&echo[..n]);
        match shape {
            SHORT => Some(Response::new(CompletionType::Short, &body)),
            LONG => {
                let m = echo.len().saturating_sub(4).min(8);
                body[16..16 + m].copy_from_slice(&echo[4..4 + m]);
                Some(Response::new(CompletionType::Long, &body))
            }
            _ => None,
        }
    }))
}

pub fn config(ring_depth: u32, retry_budget: u32) -> MpcConfig {
    MpcConfig {
        ring_depth,
        retry_budget,
        poll_delay_us: 0,
        ..Default::default()
    }
}

pub fn open(dev: &Arc<LoopbackDevice>, cfg: &MpcConfig) -> ChannelSet {
    ChannelSet::open(dev.clone(), cfg).unwrap()
}
