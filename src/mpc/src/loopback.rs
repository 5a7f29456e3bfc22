//! A software device that services mid-path rings in the doorbell path.
//!
//! Each submitted command is decoded from the command ring and handed to a
//! responder closure; whatever the responder returns is written back into
//! the completion ring with the valid bit set for the host's current pass.
//! Responses that do not fit in the completion ring are queued until the
//! host acknowledges what it consumed.
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spin::Mutex;

use crate::device::{ChannelId, Doorbell, DoorbellKind, MpcDevice, RingMem, RingPair, CHANNEL_MAX};
use crate::dma::DmaRegion;
use crate::error::{Error, Result};
use crate::log;
use crate::wire::{
    slots_of, with_valid, CmplBase, CompletionType, TxBdMpCmd, BD_SIZE, SLOT_WORDS, TX_BD_MP_CMD,
};

/// A command as the device sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opaque: u32,
    pub data: Vec<u8>,
}

/// A completion to post. The device fills in the type, the opaque and the
/// valid bits; everything else in `body` is passed through.
#[derive(Debug, Clone, Copy)]
pub struct Response {
    pub cmp_type: u8,
    pub body: [u8; 2 * BD_SIZE],
}

impl Response {
    pub fn new(cmp_type: CompletionType, body: &[u8]) -> Self {
        Self::raw(cmp_type as u8, body)
    }

    /// A completion of any type, mid-path or not.
    pub fn raw(cmp_type: u8, body: &[u8]) -> Self {
        let mut buf = [0u8; 2 * BD_SIZE];
        let n = body.len().min(slots_of(cmp_type) as usize * BD_SIZE);
        buf[..n].copy_from_slice(&body[..n]);
        Response {
            cmp_type,
            body: buf,
        }
    }

    fn slot_words(&self, slot: usize) -> [u64; SLOT_WORDS] {
        let mut out = [0u64; SLOT_WORDS];
        for (w, val) in out.iter_mut().enumerate() {
            let off = slot * BD_SIZE + w * 8;
            let mut b = [0u8; 8];
            b.copy_from_slice(&self.body[off..off + 8]);
            *val = u64::from_le_bytes(b);
        }
        out
    }
}

/// Host buffers mapped for device DMA.
#[derive(Debug, Default)]
pub struct DmaSpace {
    maps: BTreeMap<u64, Arc<DmaRegion>>,
    next: u64,
}

const IOVA_BASE: u64 = 0x1_0000_0000;
const IOVA_ALIGN: u64 = 4096;

impl DmaSpace {
    fn map(&mut self, region: Arc<DmaRegion>) -> u64 {
        if self.next == 0 {
            self.next = IOVA_BASE;
        }
        let iova = self.next;
        let len = region.len() as u64;
        self.next += (len + IOVA_ALIGN - 1) / IOVA_ALIGN * IOVA_ALIGN;
        self.maps.insert(iova, region);
        iova
    }

    fn lookup(&self, iova: u64, len: usize) -> Result<(&DmaRegion, usize)> {
        let (base, region) = self
            .maps
            .range(..=iova)
            .next_back()
            .ok_or(Error::BadIova(iova))?;
        let off = (iova - base) as usize;
        if off + len > region.len() {
            return Err(Error::BadIova(iova));
        }
        Ok((region, off))
    }

    pub fn write(&self, iova: u64, buf: &[u8]) -> Result<()> {
        let (region, off) = self.lookup(iova, buf.len())?;
        region.write_bytes(off, buf);
        Ok(())
    }

    pub fn read(&self, iova: u64, buf: &mut [u8]) -> Result<()> {
        let (region, off) = self.lookup(iova, buf.len())?;
        region.read_bytes(off, buf);
        Ok(())
    }
}

pub type Responder = Box<dyn FnMut(ChannelId, &Command, &DmaSpace) -> Option<Response> + Send>;

struct DevChannel {
    rings: RingPair,
    // raw index of the next command BD to fetch
    cmd_cons: u32,
    // raw index of the next completion slot to write
    cmpl_prod: u32,
    // host completion consumer as reported by the last ack, in [0, 2N)
    host_cons_pos: u32,
    pending: VecDeque<(Response, u32)>,
    commands: u64,
}

/// Position of a raw index within two passes of an `n`-slot ring; the pass
/// parity is the epoch.
#[inline]
fn pos(raw: u32, n: u32) -> u32 {
    raw % (2 * n)
}

#[inline]
fn db_pos(index: u32, epoch: bool, n: u32) -> u32 {
    epoch as u32 * n + index
}

impl DevChannel {
    fn new(rings: RingPair) -> Self {
        DevChannel {
            rings,
            cmd_cons: 0,
            cmpl_prod: 0,
            host_cons_pos: 0,
            pending: VecDeque::new(),
            commands: 0,
        }
    }

    /// Decodes every command between the device consumer and `db`.
    fn fetch(&mut self, db: Doorbell) -> Vec<Command> {
        let ring: &RingMem = &self.rings.cmd;
        let n = ring.slot_count;
        let mut avail = (db_pos(db.index, db.epoch, n) + 2 * n - pos(self.cmd_cons, n)) % (2 * n);
        let mut cmds = Vec::new();
        while avail > 0 {
            let hdr = TxBdMpCmd::from_words(ring.read_slot::<SLOT_WORDS>(self.cmd_cons));
            let cnt = hdr.bd_cnt();
            if hdr.bd_type() != TX_BD_MP_CMD || cnt == 0 || cnt > avail {
                log::warn!(
                    "{}: malformed command BD {:?}, dropping {} slots",
                    db.chnl,
                    hdr,
                    avail
                );
                self.cmd_cons = self.cmd_cons.wrapping_add(avail);
                break;
            }
            let mut data = Vec::with_capacity((cnt as usize - 1) * BD_SIZE);
            for i in 1..cnt {
                for w in ring.read_slot::<SLOT_WORDS>(self.cmd_cons.wrapping_add(i)) {
                    data.extend_from_slice(&w.to_le_bytes());
                }
            }
            data.truncate(hdr.len as usize);
            self.cmd_cons = self.cmd_cons.wrapping_add(cnt);
            self.commands += 1;
            avail -= cnt;
            cmds.push(Command {
                opaque: hdr.opaque,
                data,
            });
        }
        cmds
    }

    fn cmpl_free(&self) -> u32 {
        let n = self.rings.cmpl.slot_count;
        let in_use = (pos(self.cmpl_prod, n) + 2 * n - self.host_cons_pos) % (2 * n);
        n - in_use
    }

    /// Writes queued responses while the completion ring has room.
    fn flush(&mut self) {
        while let Some((resp, opaque)) = self.pending.front().copied() {
            let slots = slots_of(resp.cmp_type);
            if self.cmpl_free() < slots {
                break;
            }
            self.post(&resp, opaque);
            self.pending.pop_front();
        }
    }

    fn post(&mut self, resp: &Response, opaque: u32) {
        let ring = &self.rings.cmpl;
        let n = ring.slot_count;
        let raw = self.cmpl_prod;
        // the host expects V=1 on even passes
        let parity = |r: u32| (r / n) & 1 == 0;

        let mut base = CmplBase::from_words(resp.slot_words(0));
        base.type_ = (base.type_ & !0x3f) | resp.cmp_type as u16;
        base.info2 = opaque;
        let mut first = base.to_words();
        first[1] = with_valid(first[1], parity(raw));

        let slots = slots_of(resp.cmp_type);
        if slots == 2 {
            let next = raw.wrapping_add(1);
            let mut second = resp.slot_words(1);
            second[1] = with_valid(second[1], parity(next));
            ring.write_slot(next, &second);
        }
        // valid word of the first slot goes last
        ring.write_slot(raw, &first);
        self.cmpl_prod = raw.wrapping_add(slots);
    }
}

struct Inner {
    chnls: [Option<DevChannel>; CHANNEL_MAX],
    dma: DmaSpace,
    responder: Responder,
    hold: bool,
}

/// In-process stand-in for the accelerator.
pub struct LoopbackDevice {
    inner: Mutex<Inner>,
    in_error: AtomicBool,
}

impl LoopbackDevice {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(ChannelId, &Command, &DmaSpace) -> Option<Response> + Send + 'static,
    {
        LoopbackDevice {
            inner: Mutex::new(Inner {
                chnls: Default::default(),
                dma: DmaSpace::default(),
                responder: Box::new(responder),
                hold: false,
            }),
            in_error: AtomicBool::new(false),
        }
    }

    pub fn set_in_error(&self, in_error: bool) {
        self.in_error.store(in_error, Ordering::Release);
    }

    /// While held, responses are queued instead of posted.
    pub fn set_hold(&self, hold: bool) {
        let mut inner = self.inner.lock();
        inner.hold = hold;
        if !hold {
            for ch in inner.chnls.iter_mut().flatten() {
                ch.flush();
            }
        }
    }

    /// Posts a completion that no command asked for.
    pub fn inject(&self, chnl: ChannelId, resp: Response, opaque: u32) {
        let mut inner = self.inner.lock();
        let hold = inner.hold;
        if let Some(ch) = inner.chnls[chnl.index()].as_mut() {
            ch.pending.push_back((resp, opaque));
            if !hold {
                ch.flush();
            }
        }
    }

    /// Commands fetched from `chnl` so far.
    pub fn commands(&self, chnl: ChannelId) -> u64 {
        self.inner.lock().chnls[chnl.index()]
            .as_ref()
            .map_or(0, |ch| ch.commands)
    }

    /// Responses waiting for completion ring space or for release.
    pub fn pending(&self, chnl: ChannelId) -> usize {
        self.inner.lock().chnls[chnl.index()]
            .as_ref()
            .map_or(0, |ch| ch.pending.len())
    }

    pub fn is_allocated(&self, chnl: ChannelId) -> bool {
        self.inner.lock().chnls[chnl.index()].is_some()
    }
}

impl MpcDevice for LoopbackDevice {
    fn ring_alloc(&self, chnl: ChannelId, rings: RingPair) -> Result<()> {
        let mut inner = self.inner.lock();
        let slot = &mut inner.chnls[chnl.index()];
        if slot.is_some() {
            return Err(Error::RingAlloc(chnl, "already allocated".to_string()));
        }
        if rings.cmd.slot_size != BD_SIZE || rings.cmpl.slot_size != BD_SIZE {
            return Err(Error::RingAlloc(chnl, "slot size".to_string()));
        }
        *slot = Some(DevChannel::new(rings));
        Ok(())
    }

    fn ring_free(&self, chnl: ChannelId) {
        self.inner.lock().chnls[chnl.index()] = None;
    }

    fn doorbell(&self, db: Doorbell) {
        let mut guard = self.inner.lock();
        let Inner {
            chnls,
            dma,
            responder,
            hold,
        } = &mut *guard;
        let Some(ch) = chnls[db.chnl.index()].as_mut() else {
            log::warn!("doorbell on unallocated channel {}", db.chnl);
            return;
        };
        match db.kind {
            DoorbellKind::Submit => {
                for cmd in ch.fetch(db) {
                    if let Some(resp) = responder(db.chnl, &cmd, dma) {
                        ch.pending.push_back((resp, cmd.opaque));
                    }
                }
            }
            DoorbellKind::CmplAck => {
                ch.host_cons_pos = db_pos(db.index, db.epoch, ch.rings.cmpl.slot_count);
            }
        }
        if !*hold {
            ch.flush();
        }
    }

    fn in_error(&self) -> bool {
        self.in_error.load(Ordering::Acquire)
    }

    fn dma_map(&self, region: Arc<DmaRegion>) -> Result<u64> {
        Ok(self.inner.lock().dma.map(region))
    }

    fn dma_unmap(&self, iova: u64) {
        self.inner.lock().dma.maps.remove(&iova);
    }
}
