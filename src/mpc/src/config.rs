use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::ChannelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollMode {
    /// Yield the thread between polls.
    Sleep,
    /// Busy-wait on the TSC between polls.
    Spin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MpcConfig {
    /// Slots per command and completion ring, a power of two.
    pub ring_depth: u32,
    /// Polls before a synchronous send gives up.
    pub retry_budget: u32,
    pub poll_delay_us: u64,
    pub poll_mode: PollMode,
    /// Regular TX completion rings preceding the mid-path ones.
    pub tx_cp_nr_rings: u16,
    /// Channel capability bits reported by firmware.
    pub chnls_cap: u8,
}

impl Default for MpcConfig {
    fn default() -> Self {
        MpcConfig {
            ring_depth: 128,
            retry_budget: 100_000,
            poll_delay_us: 1,
            poll_mode: PollMode::Sleep,
            tx_cp_nr_rings: 1,
            chnls_cap: ChannelId::ENABLED_MASK,
        }
    }
}

impl MpcConfig {
    #[inline]
    pub fn poll_delay(&self) -> Duration {
        Duration::from_micros(self.poll_delay_us)
    }

    pub(crate) fn poller(&self) -> Poller {
        Poller {
            budget: self.retry_budget,
            delay: self.poll_delay(),
            mode: self.poll_mode,
        }
    }
}

/// Retry budget and the way to wait between polls.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Poller {
    pub(crate) budget: u32,
    pub(crate) delay: Duration,
    pub(crate) mode: PollMode,
}

impl Poller {
    pub(crate) fn pause(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        match self.mode {
            PollMode::Sleep => thread::sleep(d),
            PollMode::Spin => {
                let start = minstant::Instant::now();
                while start.elapsed() < d {
                    std::hint::spin_loop();
                }
            }
        }
    }
}
