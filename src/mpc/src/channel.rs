use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::{MpcConfig, Poller};
use crate::device::{chnl_map, ChannelId, Doorbell, DoorbellKind, MpcDevice, RingPair};
use crate::error::{Error, Result};
use crate::log;
use crate::ring::Ring;
use crate::wire::{
    inline_bd, is_mid_path, nr_bds, slot_valid, slots_of, CmplBase, Completion, CompletionType,
    TxBdMpCmd, BD_SIZE, MAX_MSG_LEN, SLOT_WORDS,
};

#[derive(Debug, Clone, Copy)]
struct InFlight {
    tag: u16,
    bds: u32,
    done: bool,
}

/// One mid-path channel: a command ring, its completion ring and the tag
/// sequence used to correlate them.
pub struct Channel {
    id: ChannelId,
    logical_id: u16,
    map_index: u16,
    cmd: Ring,
    cmpl: Ring,
    seq: u16,
    in_error: bool,
    // commands whose completion has not been consumed, oldest first
    inflight: VecDeque<InFlight>,
    poller: Poller,
    device: Arc<dyn MpcDevice>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("logical_id", &self.logical_id)
            .field("cmd", &self.cmd)
            .field("cmpl", &self.cmpl)
            .field("seq", &self.seq)
            .field("in_error", &self.in_error)
            .finish()
    }
}

impl Channel {
    pub fn open(
        id: ChannelId,
        logical_id: u16,
        device: Arc<dyn MpcDevice>,
        config: &MpcConfig,
    ) -> Result<Self> {
        // a long completion needs two slots
        if config.ring_depth < 2 {
            return Err(Error::InvalidRingSize(config.ring_depth));
        }
        let cmd = Ring::new(config.ring_depth, BD_SIZE)?;
        let cmpl = Ring::new(config.ring_depth, BD_SIZE)?;
        let map_index = chnl_map(id, logical_id);
        device.ring_alloc(
            id,
            RingPair {
                logical_id,
                map_index,
                cmd: cmd.mem(),
                cmpl: cmpl.mem(),
            },
        )?;
        log::debug!(
            "MPC channel {} opened, logical id {}, map index {:#06x}, depth {}",
            id,
            logical_id,
            map_index,
            config.ring_depth
        );
        Ok(Channel {
            id,
            logical_id,
            map_index,
            cmd,
            cmpl,
            seq: 0,
            in_error: false,
            inflight: VecDeque::with_capacity(config.ring_depth as usize),
            poller: config.poller(),
            device,
        })
    }

    #[inline]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    #[inline]
    pub fn logical_id(&self) -> u16 {
        self.logical_id
    }

    #[inline]
    pub fn map_index(&self) -> u16 {
        self.map_index
    }

    #[inline]
    pub fn cmd_ring(&self) -> &Ring {
        &self.cmd
    }

    #[inline]
    pub fn cmpl_ring(&self) -> &Ring {
        &self.cmpl
    }

    /// Tag the next command will carry.
    #[inline]
    pub fn next_tag(&self) -> u16 {
        self.seq
    }

    #[inline]
    pub fn in_error(&self) -> bool {
        self.in_error
    }

    pub fn set_in_error(&mut self, in_error: bool) {
        self.in_error = in_error;
    }

    /// Commands submitted whose completion has not been consumed yet.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.inflight.iter().filter(|c| !c.done).count()
    }

    /// Writes `msg` into the command ring and rings the doorbell. Returns
    /// the correlation tag carried in the header. Nothing is touched when
    /// this fails.
    pub fn xmit(&mut self, msg: &[u8]) -> Result<u16> {
        if self.in_error {
            return Err(Error::ChannelInError(self.id));
        }
        if self.device.in_error() {
            return Err(Error::DeviceInError);
        }
        if msg.len() > MAX_MSG_LEN {
            return Err(Error::CommandTooLarge(msg.len()));
        }
        let nr = nr_bds(msg.len());
        let free = self.cmd.free_slots();
        if free < nr {
            return Err(Error::RingFull {
                chnl: self.id,
                need: nr,
                free,
            });
        }

        let tag = self.seq;
        self.seq = self.seq.wrapping_add(1);

        let start = self.cmd.raw_producer();
        self.cmd
            .write_slot(start, &TxBdMpCmd::new(nr, msg.len(), tag as u32).to_words());
        for i in 0..nr - 1 {
            self.cmd
                .write_slot(start.wrapping_add(1 + i), &inline_bd(msg, i as usize));
        }
        self.cmd.reserve(nr);
        self.inflight.push_back(InFlight {
            tag,
            bds: nr,
            done: false,
        });

        log::trace!(
            "{}: tag {} bds {} prod {} epoch {}",
            self.id,
            tag,
            nr,
            self.cmd.raw_producer(),
            self.cmd.epoch()
        );
        self.device.doorbell(Doorbell {
            chnl: self.id,
            kind: DoorbellKind::Submit,
            index: self.cmd.producer(),
            epoch: self.cmd.epoch(),
        });
        Ok(tag)
    }

    /// Scans the completion ring once. Valid records of another type are
    /// consumed and dropped; the first record of `expected` type is returned.
    pub fn cmd_cmpl(&mut self, expected: CompletionType) -> Option<Completion> {
        let mask = self.cmpl.mask();
        let mut consumed = 0;
        let mut found = None;

        while consumed < self.cmpl.slot_count() {
            let cons = self.cmpl.raw_consumer();
            let valid = self.cmpl.expected_valid();
            let q1 = self.cmpl.read(cons, 1);
            if slot_valid(q1) != valid {
                break;
            }
            let q0 = self.cmpl.read(cons, 0);
            let base = CmplBase::from_words([q0, q1]);
            let raw_type = base.cmpl_type();
            let slots = slots_of(raw_type);

            let mut words = [q0, q1, 0, 0];
            if slots == 2 {
                let next = cons.wrapping_add(1);
                // the second slot is in the next pass if consuming it wraps
                let valid2 = if (next & mask) < (cons & mask) {
                    !valid
                } else {
                    valid
                };
                let n1 = self.cmpl.read(next, 1);
                if slot_valid(n1) != valid2 {
                    break;
                }
                words[SLOT_WORDS] = self.cmpl.read(next, 0);
                words[SLOT_WORDS + 1] = n1;
            }

            self.cmpl.advance_consumer(slots);
            consumed += slots;
            if is_mid_path(raw_type) {
                self.retire(base.info2 as u16);
            }

            if raw_type == expected as u8 {
                found = Some(Completion::from_words(expected, &words));
                break;
            }
            log::debug!("{}: Unhandled CMP type {:#04x}", self.id, raw_type);
        }

        if consumed > 0 {
            self.device.doorbell(Doorbell {
                chnl: self.id,
                kind: DoorbellKind::CmplAck,
                index: self.cmpl.consumer(),
                epoch: self.cmpl.cons_epoch(),
            });
        }
        found
    }

    /// Marks the command tagged `tag` complete. Command slots are given
    /// back in submission order, so the consumer only moves over the leading
    /// run of completed commands.
    fn retire(&mut self, tag: u16) {
        let Some(cmd) = self
            .inflight
            .iter_mut()
            .find(|c| c.tag == tag && !c.done)
        else {
            log::warn!("{}: completion with opaque {} matches no command", self.id, tag);
            return;
        };
        cmd.done = true;
        while let Some(cmd) = self.inflight.front() {
            if !cmd.done {
                break;
            }
            self.cmd.advance_consumer(cmd.bds);
            self.inflight.pop_front();
        }
    }

    /// Polls for the completion of the command tagged `tag`. A completion
    /// with another tag is still returned, after logging the mismatch.
    pub fn wait(&mut self, expected: CompletionType, tag: u16) -> Result<Completion> {
        let poller = self.poller;
        for _ in 0..poller.budget {
            poller.pause(poller.delay);
            if let Some(cmpl) = self.cmd_cmpl(expected) {
                let got = cmpl.opaque() as u16;
                if got != tag {
                    log::warn!(
                        "{}: Out of order completion. Opaque Expected:{} Got:{}",
                        self.id,
                        tag,
                        got
                    );
                }
                return Ok(cmpl);
            }
        }
        log::error!(
            "{}: no {} completion for tag {} after {} polls",
            self.id,
            expected,
            tag,
            poller.budget
        );
        Err(Error::Timeout(self.id, poller.budget))
    }

    pub fn send_and_wait(&mut self, msg: &[u8], expected: CompletionType) -> Result<Completion> {
        let tag = self.xmit(msg)?;
        self.wait(expected, tag)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let outstanding = self.outstanding();
        if outstanding > 0 {
            log::warn!(
                "{}: closing with {} commands outstanding",
                self.id,
                outstanding
            );
        }
        self.device.ring_free(self.id);
    }
}
