//! Action records.
use crate::batch::{Target, TfcBatch};
use crate::client::{HostBuf, Tfc};
use crate::codec::{MpcCodec, Request, BYTES_PER_WORD};
use crate::error::{Error, Result};
use crate::log;
use crate::types::{ActionHandle, Dir, Submitted, TableType};

impl<C: MpcCodec> Tfc<C> {
    /// Reserves room for an action of `num_contig` records, rounded up to a
    /// power of two.
    pub fn act_alloc(&mut self, dir: Dir, num_contig: u32) -> Result<ActionHandle> {
        let (offset, records) = self.scope.alloc(dir, TableType::Action, num_contig)?;
        let handle = ActionHandle {
            tsid: self.scope.tsid(),
            records,
            offset,
        };
        log::debug!("{} action {:#x} allocated", dir, handle.to_raw());
        Ok(handle)
    }

    pub fn act_free(&mut self, dir: Dir, handle: ActionHandle) -> Result<()> {
        self.check_tsid(handle.tsid)?;
        self.scope
            .free(dir, TableType::Action, handle.offset, handle.records)?;
        log::debug!("{} action {:#x} freed", dir, handle.to_raw());
        Ok(())
    }

    /// Writes `data` to the records of `handle`, padded to whole words.
    pub fn act_set(
        &mut self,
        batch: Option<&mut TfcBatch>,
        dir: Dir,
        handle: ActionHandle,
        data: &[u8],
    ) -> Result<Submitted<()>> {
        self.check_tsid(handle.tsid)?;
        if data.is_empty() {
            return Err(Error::InvalidArgument("empty action"));
        }
        if data.len() > handle.records as usize * BYTES_PER_WORD {
            return Err(Error::InvalidArgument("action larger than its records"));
        }
        let req = Request::Write {
            table: TableType::Action,
            offset: handle.offset,
            data,
        };
        let op = req.op();
        let msg = self.codec.build(handle.tsid, &req)?;
        match batch {
            Some(batch) => self.enqueue(batch, dir, op, &msg, Target::Write),
            None => {
                self.call(dir, op, &msg)?;
                Ok(Submitted::Done(()))
            }
        }
    }

    /// Reads `words` words from the records of `handle`, clearing them in
    /// the table if `clear` is set.
    pub fn act_get(
        &mut self,
        batch: Option<&mut TfcBatch>,
        dir: Dir,
        handle: ActionHandle,
        words: u16,
        clear: bool,
    ) -> Result<Submitted<Vec<u8>>> {
        self.check_tsid(handle.tsid)?;
        if words == 0 || words > handle.records as u16 {
            return Err(Error::InvalidArgument("read outside the action records"));
        }
        let len = words as usize * BYTES_PER_WORD;
        let buf = HostBuf::new(self.chnls.device(), len)?;
        let req = Request::Read {
            table: TableType::Action,
            offset: handle.offset,
            words,
            host: buf.iova(),
            clear,
        };
        let op = req.op();
        let msg = self.codec.build(handle.tsid, &req)?;
        match batch {
            Some(batch) => self.enqueue(batch, dir, op, &msg, Target::Read { buf, words }),
            None => {
                self.call(dir, op, &msg)?;
                Ok(Submitted::Done(buf.read(len)))
            }
        }
    }
}
