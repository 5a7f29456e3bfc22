//! Batched table operations.
//!
//! Operations given a batch are submitted right away and answered with
//! their position in it. [`Tfc::batch_end`] waits for every one of them and
//! finishes each the way the synchronous call would have: read data is
//! copied out, inserted entries get their flow handle, deleted entries give
//! their records back, and inserts that failed free the records they took.
use mpc::{Completion, CompletionHandler, EntryError};

use crate::client::{HostBuf, Tfc};
use crate::codec::{MpcCodec, MpcOp, ReplyBody, BYTES_PER_WORD};
use crate::error::{Error, Result};
use crate::log;
use crate::scope::TableScope;
use crate::types::{Dir, FlowHandle, TableType};

pub type TfcBatch = mpc::Batch<PendingOp>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutput {
    Written,
    Read(Vec<u8>),
    Inserted(FlowHandle),
    Deleted,
}

pub type BatchResult = std::result::Result<BatchOutput, EntryError<Error>>;

#[derive(Debug)]
pub(crate) enum Target {
    Write,
    Read { buf: HostBuf, words: u16 },
    Insert { offset: u32, records: u8 },
    Delete { flow: FlowHandle },
}

/// What a queued command needs once its completion arrives.
#[derive(Debug)]
pub struct PendingOp {
    op: MpcOp,
    dir: Dir,
    target: Target,
}

impl PendingOp {
    pub(crate) fn new(op: MpcOp, dir: Dir, target: Target) -> Self {
        PendingOp { op, dir, target }
    }

    #[inline]
    pub fn op(&self) -> MpcOp {
        self.op
    }

    #[inline]
    pub fn dir(&self) -> Dir {
        self.dir
    }
}

struct Dispatcher<'a, C> {
    tsid: u8,
    scope: &'a mut TableScope,
    codec: &'a C,
}

impl<'a, C: MpcCodec> Dispatcher<'a, C> {
    /// Gives back the records of an insert that did not happen.
    fn release(&mut self, index: usize, pending: &PendingOp) {
        if let Target::Insert { offset, records } = pending.target {
            if let Err(e) = self
                .scope
                .free(pending.dir, TableType::Lookup, offset, records)
            {
                log::error!("batch entry {}: releasing records failed: {}", index, e);
            }
        }
    }

    fn finish(&mut self, pending: &PendingOp, cmpl: &Completion) -> Result<BatchOutput> {
        let op = pending.op;
        let body = self.codec.parse(op, cmpl.bytes())?.ok(op)?;
        let out = match (&pending.target, body) {
            (Target::Write, ReplyBody::Write) => BatchOutput::Written,
            (Target::Read { buf, words }, ReplyBody::Read { .. }) => {
                BatchOutput::Read(buf.read(*words as usize * BYTES_PER_WORD))
            }
            (Target::Insert { offset, records }, ReplyBody::EmInsert { hash, bucket, .. }) => {
                BatchOutput::Inserted(FlowHandle {
                    tsid: self.tsid,
                    records: *records,
                    offset: *offset,
                    bucket,
                    hash,
                })
            }
            (Target::Delete { flow }, ReplyBody::EmDelete) => {
                self.scope
                    .free(pending.dir, TableType::Lookup, flow.offset, flow.records)?;
                BatchOutput::Deleted
            }
            _ => {
                return Err(Error::BadReply {
                    op,
                    reason: "reply does not match the command",
                })
            }
        };
        Ok(out)
    }
}

impl<'a, C: MpcCodec> CompletionHandler<PendingOp> for Dispatcher<'a, C> {
    type Output = BatchOutput;
    type Error = Error;

    fn handle(
        &mut self,
        index: usize,
        pending: &PendingOp,
        cmpl: &Completion,
    ) -> Result<BatchOutput> {
        let res = self.finish(pending, cmpl);
        if let Err(e) = &res {
            log::warn!("batch entry {} ({} on {}): {}", index, pending.op, pending.dir, e);
            self.release(index, pending);
        }
        res
    }

    fn abandon(&mut self, index: usize, pending: &PendingOp, _err: &mpc::Error) {
        self.release(index, pending);
    }
}

impl<C: MpcCodec> Tfc<C> {
    pub fn batch_start(&self, batch: &mut TfcBatch) -> Result<()> {
        batch.start()?;
        Ok(())
    }

    /// Waits for every queued operation. Results are in submission order;
    /// the batch is idle afterwards.
    pub fn batch_end(&mut self, batch: &mut TfcBatch) -> Result<Vec<BatchResult>> {
        let mut dispatcher = Dispatcher {
            tsid: self.scope.tsid(),
            scope: &mut self.scope,
            codec: &self.codec,
        };
        let results = batch.end(&mut self.chnls, &mut dispatcher)?;
        if batch.has_error() {
            let failed = results.iter().filter(|r| r.is_err()).count();
            log::warn!("batch of {} ended with {} failures", results.len(), failed);
        }
        Ok(results)
    }
}
