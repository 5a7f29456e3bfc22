//! A table model behind the loopback device.
//!
//! Serves the commands [`SimpleCodec`](crate::codec::SimpleCodec) builds:
//! table words are kept per channel, reads are written to the host buffer
//! named in the command, and exact-match entries are tracked by key.
use std::hash::Hasher;
use std::sync::Arc;

use fnv::{FnvHashMap as HashMap, FnvHasher};
use spin::Mutex;

use mpc::loopback::DmaSpace;
use mpc::{ChannelId, Command, CompletionType, LoopbackDevice, Response};

use crate::codec::{layout, MpcOp, MpcStatus, BYTES_PER_WORD};
use crate::log;
use crate::types::{Dir, TableType};

type Word = [u8; BYTES_PER_WORD];

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<(ChannelId, TableType, u32), Word>,
    em_keys: HashMap<(ChannelId, Vec<u8>), u32>,
    em_offsets: HashMap<(ChannelId, u32), Vec<u8>>,
    fail_next: Option<MpcStatus>,
    silent: bool,
}

#[derive(Debug, Clone)]
pub struct TableModel {
    tables: Arc<Mutex<Tables>>,
    buckets: u16,
}

impl Default for TableModel {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn le_u32(b: &[u8], at: usize) -> u32 {
    let mut w = [0u8; 4];
    w.copy_from_slice(&b[at..at + 4]);
    u32::from_le_bytes(w)
}

fn em_hash(key: &[u8]) -> u32 {
    let mut h = FnvHasher::default();
    h.write(key);
    h.finish() as u32
}

fn reply(op: MpcOp, status: MpcStatus) -> [u8; 32] {
    let mut body = [0u8; 32];
    body[layout::STATUS] = status.to_raw();
    body[layout::OP_ECHO] = op as u8;
    body
}

impl TableModel {
    pub fn new(buckets: u16) -> Self {
        TableModel {
            tables: Arc::new(Mutex::new(Tables::default())),
            buckets: buckets.max(1),
        }
    }

    /// A device answering from this model. The model stays shared with the
    /// returned device.
    pub fn device(&self) -> LoopbackDevice {
        let model = self.clone();
        LoopbackDevice::new(move |chnl, cmd, dma| model.serve(chnl, cmd, dma))
    }

    pub fn row(&self, dir: Dir, table: TableType, offset: u32) -> Option<Word> {
        self.tables
            .lock()
            .rows
            .get(&(dir.channel(), table, offset))
            .copied()
    }

    /// Exact-match entries installed for `dir`.
    pub fn em_entries(&self, dir: Dir) -> usize {
        let chnl = dir.channel();
        self.tables
            .lock()
            .em_offsets
            .keys()
            .filter(|(c, _)| *c == chnl)
            .count()
    }

    /// Answers the next command with `status` and leaves the tables alone.
    pub fn fail_next(&self, status: MpcStatus) {
        self.tables.lock().fail_next = Some(status);
    }

    /// While silent, commands are consumed without a completion.
    pub fn set_silent(&self, silent: bool) {
        self.tables.lock().silent = silent;
    }

    fn serve(&self, chnl: ChannelId, cmd: &Command, dma: &DmaSpace) -> Option<Response> {
        let data = &cmd.data;
        if data.len() < layout::PAYLOAD {
            log::warn!("{}: short table command of {} bytes", chnl, data.len());
            return None;
        }
        let Some(op) = MpcOp::from_raw(data[layout::OPCODE]) else {
            let mut body = [0u8; 32];
            body[layout::STATUS] = MpcStatus::Unsupported.to_raw();
            body[layout::OP_ECHO] = data[layout::OPCODE];
            return Some(Response::new(CompletionType::Short, &body));
        };

        let mut t = self.tables.lock();
        if t.silent {
            return None;
        }
        if let Some(status) = t.fail_next.take() {
            return Some(Response::new(op.completion(), &reply(op, status)));
        }

        let table = match data[layout::TABLE] {
            0 => TableType::Action,
            _ => TableType::Lookup,
        };
        let offset = le_u32(data, layout::OFFSET);
        let count = u16::from_le_bytes([data[layout::COUNT], data[layout::COUNT + 1]]) as u32;
        let payload = &data[layout::PAYLOAD..];

        let body = match op {
            MpcOp::TableWrite => {
                for (i, chunk) in payload.chunks(BYTES_PER_WORD).take(count as usize).enumerate() {
                    let mut word = [0u8; BYTES_PER_WORD];
                    word[..chunk.len()].copy_from_slice(chunk);
                    t.rows.insert((chnl, table, offset + i as u32), word);
                }
                reply(op, MpcStatus::Ok)
            }
            MpcOp::TableRead | MpcOp::TableReadClear => {
                if payload.len() < 8 {
                    return Some(Response::new(op.completion(), &reply(op, MpcStatus::Format)));
                }
                let mut iova = [0u8; 8];
                iova.copy_from_slice(&payload[..8]);
                let host = u64::from_le_bytes(iova);
                let mut status = MpcStatus::Ok;
                for i in 0..count {
                    let key = (chnl, table, offset + i);
                    let word = t.rows.get(&key).copied().unwrap_or_default();
                    if dma
                        .write(host + (i as usize * BYTES_PER_WORD) as u64, &word)
                        .is_err()
                    {
                        status = MpcStatus::Address;
                        break;
                    }
                    if op == MpcOp::TableReadClear {
                        t.rows.remove(&key);
                    }
                }
                let mut body = reply(op, status);
                body[layout::INFO..layout::INFO + 4].copy_from_slice(&count.to_le_bytes());
                body
            }
            MpcOp::EmInsert => {
                let key = payload.to_vec();
                if t.em_keys.contains_key(&(chnl, key.clone())) {
                    reply(op, MpcStatus::EmDuplicate)
                } else {
                    let hash = em_hash(&key);
                    let bucket = (hash % self.buckets as u32) as u16;
                    t.em_keys.insert((chnl, key.clone()), offset);
                    t.em_offsets.insert((chnl, offset), key);
                    let mut body = reply(op, MpcStatus::Ok);
                    body[layout::INFO..layout::INFO + 4].copy_from_slice(&hash.to_le_bytes());
                    body[layout::BUCKET..layout::BUCKET + 2].copy_from_slice(&bucket.to_le_bytes());
                    body
                }
            }
            MpcOp::EmDelete => match t.em_offsets.remove(&(chnl, offset)) {
                Some(key) => {
                    t.em_keys.remove(&(chnl, key));
                    reply(op, MpcStatus::Ok)
                }
                None => reply(op, MpcStatus::EmMiss),
            },
        };
        Some(Response::new(op.completion(), &body))
    }
}
