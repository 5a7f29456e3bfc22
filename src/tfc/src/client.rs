use std::fmt;
use std::sync::Arc;

use mpc::{ChannelSet, DmaRegion, MpcDevice};

use crate::batch::{PendingOp, Target, TfcBatch};
use crate::codec::{MpcCodec, MpcOp, ReplyBody, SimpleCodec};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::log;
use crate::scope::TableScope;
use crate::types::{Dir, Submitted};

/// A host buffer the device can write table reads into. Unmapped on drop.
pub(crate) struct HostBuf {
    region: Arc<DmaRegion>,
    iova: u64,
    device: Arc<dyn MpcDevice>,
}

impl HostBuf {
    pub(crate) fn new(device: &Arc<dyn MpcDevice>, len: usize) -> Result<Self> {
        let region = Arc::new(DmaRegion::new(len)?);
        let iova = device.dma_map(Arc::clone(&region))?;
        Ok(HostBuf {
            region,
            iova,
            device: Arc::clone(device),
        })
    }

    #[inline]
    pub(crate) fn iova(&self) -> u64 {
        self.iova
    }

    pub(crate) fn read(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len.min(self.region.len())];
        self.region.read_bytes(0, &mut out);
        out
    }
}

impl fmt::Debug for HostBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuf")
            .field("iova", &format_args!("{:#x}", self.iova))
            .field("len", &self.region.len())
            .finish()
    }
}

impl Drop for HostBuf {
    fn drop(&mut self) {
        self.device.dma_unmap(self.iova);
    }
}

/// Client of one table scope.
pub struct Tfc<C: MpcCodec = SimpleCodec> {
    pub(crate) chnls: ChannelSet,
    pub(crate) scope: TableScope,
    pub(crate) codec: C,
}

impl<C: MpcCodec> fmt::Debug for Tfc<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tfc")
            .field("tsid", &self.scope.tsid())
            .field("channels", &format_args!("{:#04x}", self.chnls.enabled()))
            .finish()
    }
}

impl<C: MpcCodec> Tfc<C> {
    pub fn open(config: &Config, device: Arc<dyn MpcDevice>, codec: C) -> Result<Self> {
        // validate the scope before any ring reaches the device
        let scope = TableScope::open(&config.scope)?;
        let chnls = ChannelSet::open(device, &config.mpc)?;
        for dir in Dir::ALL {
            if chnls.channel(dir.channel()).is_err() {
                log::warn!("no {} channel, {} tables are unreachable", dir.channel(), dir);
            }
        }
        Ok(Tfc {
            chnls,
            scope,
            codec,
        })
    }

    /// Closes the channels and releases every pool.
    pub fn close(self) {
        let tsid = self.scope.tsid();
        self.scope.close();
        self.chnls.close();
        log::info!("table scope {} client closed", tsid);
    }

    #[inline]
    pub fn tsid(&self) -> u8 {
        self.scope.tsid()
    }

    #[inline]
    pub fn scope(&self) -> &TableScope {
        &self.scope
    }

    #[inline]
    pub fn channels(&self) -> &ChannelSet {
        &self.chnls
    }

    pub(crate) fn check_tsid(&self, tsid: u8) -> Result<()> {
        if tsid != self.scope.tsid() {
            return Err(Error::InvalidHandle("handle belongs to another table scope"));
        }
        Ok(())
    }

    /// Sends `msg` and waits for its completion.
    pub(crate) fn call(&mut self, dir: Dir, op: MpcOp, msg: &[u8]) -> Result<ReplyBody> {
        let cmpl = self
            .chnls
            .send_and_wait(dir.channel(), msg, op.completion())?;
        let body = self.codec.parse(op, cmpl.bytes())?.ok(op)?;
        Ok(body)
    }

    /// Queues `msg` on `batch`; the outcome is reported by `batch_end`.
    pub(crate) fn enqueue<T>(
        &mut self,
        batch: &mut TfcBatch,
        dir: Dir,
        op: MpcOp,
        msg: &[u8],
        target: Target,
    ) -> Result<Submitted<T>> {
        batch.enqueue(
            &mut self.chnls,
            dir.channel(),
            msg,
            op.completion(),
            PendingOp::new(op, dir, target),
        )?;
        Ok(Submitted::Queued(batch.len() - 1))
    }
}
