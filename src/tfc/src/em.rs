//! Exact-match entries.
use crate::batch::{Target, TfcBatch};
use crate::client::Tfc;
use crate::codec::{MpcCodec, ReplyBody, Request, BYTES_PER_WORD};
use crate::error::{Error, Result};
use crate::log;
use crate::types::{Dir, FlowHandle, Submitted, TableType};

impl<C: MpcCodec> Tfc<C> {
    /// Installs `key` in lookup records of its own. Records are given back
    /// if the insert fails, including when no completion arrives.
    pub fn em_insert(
        &mut self,
        batch: Option<&mut TfcBatch>,
        dir: Dir,
        key: &[u8],
    ) -> Result<Submitted<FlowHandle>> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("empty key"));
        }
        let num_records = ((key.len() + BYTES_PER_WORD - 1) / BYTES_PER_WORD) as u32;
        let (offset, records) = self.scope.alloc(dir, TableType::Lookup, num_records)?;

        let res = self.insert_at(batch, dir, key, offset, records);
        if res.is_err() {
            if let Err(e) = self.scope.free(dir, TableType::Lookup, offset, records) {
                log::error!("{} lookup records {:#x} leaked: {}", dir, offset, e);
            }
        }
        res
    }

    fn insert_at(
        &mut self,
        batch: Option<&mut TfcBatch>,
        dir: Dir,
        key: &[u8],
        offset: u32,
        records: u8,
    ) -> Result<Submitted<FlowHandle>> {
        let tsid = self.scope.tsid();
        let req = Request::EmInsert {
            offset,
            records,
            key,
        };
        let op = req.op();
        let msg = self.codec.build(tsid, &req)?;
        if let Some(batch) = batch {
            return self.enqueue(batch, dir, op, &msg, Target::Insert { offset, records });
        }
        match self.call(dir, op, &msg)? {
            ReplyBody::EmInsert { hash, bucket, .. } => {
                let flow = FlowHandle {
                    tsid,
                    records,
                    offset,
                    bucket,
                    hash,
                };
                log::debug!("{} flow {:#x} inserted, hash {:#010x}", dir, flow.to_raw(), hash);
                Ok(Submitted::Done(flow))
            }
            _ => Err(Error::BadReply {
                op,
                reason: "reply does not match the command",
            }),
        }
    }

    /// Removes the entry of `flow` and frees its records once the device
    /// confirms.
    pub fn em_delete(
        &mut self,
        batch: Option<&mut TfcBatch>,
        dir: Dir,
        flow: FlowHandle,
    ) -> Result<Submitted<()>> {
        self.check_tsid(flow.tsid)?;
        let req = Request::EmDelete {
            offset: flow.offset,
            records: flow.records,
        };
        let op = req.op();
        let msg = self.codec.build(flow.tsid, &req)?;
        match batch {
            Some(batch) => self.enqueue(batch, dir, op, &msg, Target::Delete { flow }),
            None => {
                self.call(dir, op, &msg)?;
                self.scope
                    .free(dir, TableType::Lookup, flow.offset, flow.records)?;
                log::debug!("{} flow {:#x} deleted", dir, flow.to_raw());
                Ok(Submitted::Done(()))
            }
        }
    }
}
