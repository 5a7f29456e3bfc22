use std::sync::Arc;

use crate::channel::Channel;
use crate::config::{MpcConfig, Poller};
use crate::device::{logical_id, ChannelId, MpcDevice, CHANNEL_MAX};
use crate::error::{Error, Result};
use crate::log;
use crate::wire::{Completion, CompletionType};

/// The mid-path channels of one device.
pub struct ChannelSet {
    chnls: [Option<Channel>; CHANNEL_MAX],
    enabled: u8,
    poller: Poller,
    device: Arc<dyn MpcDevice>,
}

impl ChannelSet {
    /// Opens every capable flow-table channel. Channels opened before a
    /// failure are released again.
    pub fn open(device: Arc<dyn MpcDevice>, config: &MpcConfig) -> Result<Self> {
        let caps = config.chnls_cap & ChannelId::ENABLED_MASK;
        let mut chnls: [Option<Channel>; CHANNEL_MAX] = Default::default();
        for id in ChannelId::ALL {
            let Some(lid) = logical_id(caps, id, config.tx_cp_nr_rings) else {
                continue;
            };
            match Channel::open(id, lid, Arc::clone(&device), config) {
                Ok(ch) => chnls[id.index()] = Some(ch),
                Err(e) => {
                    log::error!("MPC ring {} alloc failed: {}", id, e);
                    return Err(e);
                }
            }
        }
        if caps == 0 {
            log::warn!("no mid-path channel capability in {:#x}", config.chnls_cap);
        } else {
            log::info!("MPC channels enabled: {:#04x}", caps);
        }
        Ok(ChannelSet {
            chnls,
            enabled: caps,
            poller: config.poller(),
            device,
        })
    }

    pub fn close(self) {
        log::debug!("closing MPC channels {:#04x}", self.enabled);
    }

    #[inline]
    pub fn enabled(&self) -> u8 {
        self.enabled
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn MpcDevice> {
        &self.device
    }

    pub fn channel(&self, id: ChannelId) -> Result<&Channel> {
        self.chnls[id.index()]
            .as_ref()
            .ok_or(Error::ChannelNotOpen(id))
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Result<&mut Channel> {
        self.chnls[id.index()]
            .as_mut()
            .ok_or(Error::ChannelNotOpen(id))
    }

    pub fn send_and_wait(
        &mut self,
        id: ChannelId,
        msg: &[u8],
        expected: CompletionType,
    ) -> Result<Completion> {
        self.channel_mut(id)?.send_and_wait(msg, expected)
    }

    pub(crate) fn poller(&self) -> Poller {
        self.poller
    }
}
