#![forbid(unsafe_code)]
//! Redo sink for mini-transactions.
//!
//! Every [`crate::primitives::mtr::Mtr`] commit appends one [`RedoBatch`]:
//! a header carrying the batch LSN and a CRC32 over header and payload,
//! followed by varint-framed [`RedoRecord`]s. The log is never replayed by
//! this crate; batches are retained up to a byte budget so callers and tests
//! can inspect what a mutation logged.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::primitives::bytes::{buf::Cursor, var};
use crate::types::page::PageKind;
use crate::types::{Checksum, Crc32Fast, LobError, Lsn, PageNo, Result};

const BATCH_MAGIC: [u8; 4] = *b"SLRB";
const BATCH_HEADER_LEN: usize = 24;

const TAG_INIT_PAGE: u8 = 1;
const TAG_WRITE: u8 = 2;
const TAG_FREE_PAGE: u8 = 3;

/// Configuration for the in-memory redo log.
#[derive(Clone, Debug)]
pub struct RedoOptions {
    /// Bytes of buffered redo after which `Mtr::flush_check` commits and restarts.
    pub log_margin_bytes: usize,
    /// Retained batch bytes before the oldest batches are checkpointed away.
    pub capacity_bytes: usize,
}

impl Default for RedoOptions {
    fn default() -> Self {
        Self {
            log_margin_bytes: 256 * 1024,
            capacity_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Physical change recorded by a mini-transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RedoRecord {
    /// A page was allocated and its header initialised.
    InitPage {
        /// Allocated page.
        page: PageNo,
        /// Kind written into the header.
        kind: PageKind,
    },
    /// Bytes written at `offset` within `page`.
    Write {
        /// Written page.
        page: PageNo,
        /// First byte written.
        offset: u16,
        /// New contents.
        bytes: Vec<u8>,
    },
    /// A page was returned to the page store.
    FreePage {
        /// Freed page.
        page: PageNo,
    },
}

impl RedoRecord {
    /// Upper bound of the encoded size, used for margin accounting.
    pub fn encoded_len(&self) -> usize {
        match self {
            RedoRecord::InitPage { .. } => 1 + 5 + 1,
            RedoRecord::Write { bytes, .. } => 1 + 5 + 3 + 5 + bytes.len(),
            RedoRecord::FreePage { .. } => 1 + 5,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            RedoRecord::InitPage { page, kind } => {
                out.push(TAG_INIT_PAGE);
                var::encode_u64(page.0 as u64, out);
                out.push(kind.as_u8());
            }
            RedoRecord::Write {
                page,
                offset,
                bytes,
            } => {
                out.push(TAG_WRITE);
                var::encode_u64(page.0 as u64, out);
                var::encode_u64(*offset as u64, out);
                var::encode_u64(bytes.len() as u64, out);
                out.extend_from_slice(bytes);
            }
            RedoRecord::FreePage { page } => {
                out.push(TAG_FREE_PAGE);
                var::encode_u64(page.0 as u64, out);
            }
        }
    }

    fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let page_no = |v: u64| -> Result<PageNo> {
            u32::try_from(v)
                .map(PageNo)
                .map_err(|_| LobError::Corruption("redo page number overflow"))
        };
        match cur.u8()? {
            TAG_INIT_PAGE => {
                let page = page_no(cur.varint()?)?;
                let kind = PageKind::try_from(cur.u8()?)?;
                Ok(RedoRecord::InitPage { page, kind })
            }
            TAG_WRITE => {
                let page = page_no(cur.varint()?)?;
                let offset = u16::try_from(cur.varint()?)
                    .map_err(|_| LobError::Corruption("redo offset overflow"))?;
                let len = usize::try_from(cur.varint()?)
                    .map_err(|_| LobError::Corruption("redo length overflow"))?;
                let bytes = cur.take(len)?.to_vec();
                Ok(RedoRecord::Write {
                    page,
                    offset,
                    bytes,
                })
            }
            TAG_FREE_PAGE => Ok(RedoRecord::FreePage {
                page: page_no(cur.varint()?)?,
            }),
            _ => Err(LobError::Corruption("unknown redo record tag")),
        }
    }
}

/// One committed mini-transaction in its on-log encoding.
#[derive(Clone, Debug)]
pub struct RedoBatch {
    lsn: Lsn,
    bytes: Vec<u8>,
}

impl RedoBatch {
    fn encode(lsn: Lsn, records: &[RedoRecord]) -> Self {
        let mut payload = Vec::with_capacity(records.iter().map(RedoRecord::encoded_len).sum());
        for record in records {
            record.encode(&mut payload);
        }
        let mut bytes = Vec::with_capacity(BATCH_HEADER_LEN + payload.len());
        bytes.extend_from_slice(&BATCH_MAGIC);
        bytes.extend_from_slice(&lsn.0.to_be_bytes());
        bytes.extend_from_slice(&(records.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(&payload);
        let crc = batch_crc32(&bytes);
        bytes[20..24].copy_from_slice(&crc.to_be_bytes());
        Self { lsn, bytes }
    }

    /// Parses a batch from its encoding, verifying the checksum.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < BATCH_HEADER_LEN {
            return Err(LobError::Corruption("redo batch truncated"));
        }
        if src[0..4] != BATCH_MAGIC {
            return Err(LobError::Corruption("redo batch magic mismatch"));
        }
        let mut lsn = [0u8; 8];
        lsn.copy_from_slice(&src[4..12]);
        let batch = Self {
            lsn: Lsn(u64::from_be_bytes(lsn)),
            bytes: src.to_vec(),
        };
        batch.verify()?;
        Ok(batch)
    }

    /// LSN assigned to the batch.
    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    /// Raw encoding of the batch.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn field_u32(&self, at: usize) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[at..at + 4]);
        u32::from_be_bytes(raw)
    }

    /// Checks payload length and CRC32.
    pub fn verify(&self) -> Result<()> {
        if self.bytes.len() < BATCH_HEADER_LEN {
            return Err(LobError::Corruption("redo batch truncated"));
        }
        let payload_len = self.field_u32(16) as usize;
        if self.bytes.len() != BATCH_HEADER_LEN + payload_len {
            return Err(LobError::Corruption("redo batch length mismatch"));
        }
        let stored = self.field_u32(20);
        if batch_crc32(&self.bytes) != stored {
            return Err(LobError::Corruption("redo batch crc mismatch"));
        }
        Ok(())
    }

    /// Decodes the records of this batch.
    pub fn records(&self) -> Result<Vec<RedoRecord>> {
        self.verify()?;
        let count = self.field_u32(12) as usize;
        let mut cur = Cursor::new(&self.bytes[BATCH_HEADER_LEN..]);
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            records.push(RedoRecord::decode(&mut cur)?);
        }
        if cur.remaining() != 0 {
            return Err(LobError::Corruption("redo batch has trailing bytes"));
        }
        Ok(records)
    }
}

fn batch_crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32Fast::default();
    hasher.update(&bytes[..20]);
    hasher.update(&[0u8; 4]);
    hasher.update(&bytes[BATCH_HEADER_LEN..]);
    hasher.finalize()
}

/// Counters describing redo traffic.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RedoStats {
    /// Batches appended since the log was created.
    pub batches_appended: u64,
    /// Records across those batches.
    pub records_appended: u64,
    /// Encoded bytes across those batches.
    pub bytes_appended: u64,
    /// Checkpoints taken, explicit or triggered by capacity.
    pub checkpoints: u64,
    /// Encoded bytes currently retained.
    pub retained_bytes: u64,
}

struct RedoInner {
    next_lsn: Lsn,
    batches: VecDeque<RedoBatch>,
    retained_bytes: usize,
    stats: RedoStats,
}

/// Append-only, bounded, in-memory redo log.
pub struct RedoLog {
    options: RedoOptions,
    inner: Mutex<RedoInner>,
}

impl RedoLog {
    /// Empty log whose first batch gets LSN 1.
    pub fn new(options: RedoOptions) -> Self {
        Self {
            options,
            inner: Mutex::new(RedoInner {
                next_lsn: Lsn(1),
                batches: VecDeque::new(),
                retained_bytes: 0,
                stats: RedoStats::default(),
            }),
        }
    }

    /// Capacity and margin settings.
    pub fn options(&self) -> &RedoOptions {
        &self.options
    }

    /// Assigns the next LSN and appends the encoded batch.
    pub fn append(&self, records: &[RedoRecord]) -> Lsn {
        let mut inner = self.inner.lock();
        let lsn = inner.next_lsn;
        inner.next_lsn = Lsn(lsn.0 + 1);
        let batch = RedoBatch::encode(lsn, records);
        let len = batch.bytes.len();
        inner.retained_bytes += len;
        inner.stats.batches_appended += 1;
        inner.stats.records_appended += records.len() as u64;
        inner.stats.bytes_appended += len as u64;
        inner.batches.push_back(batch);
        trace!(lsn = lsn.0, records = records.len(), bytes = len, "redo.append");
        if inner.retained_bytes > self.options.capacity_bytes {
            Self::checkpoint_locked(&mut inner, self.options.capacity_bytes / 2);
        }
        lsn
    }

    /// Drops retained batches. Pages live in memory, so every committed batch
    /// is already reflected in the page store.
    pub fn checkpoint(&self) {
        let mut inner = self.inner.lock();
        Self::checkpoint_locked(&mut inner, 0);
    }

    fn checkpoint_locked(inner: &mut RedoInner, keep_bytes: usize) {
        let mut dropped = 0usize;
        while inner.retained_bytes > keep_bytes {
            let Some(batch) = inner.batches.pop_front() else {
                break;
            };
            inner.retained_bytes -= batch.bytes.len();
            dropped += 1;
        }
        inner.stats.checkpoints += 1;
        debug!(
            dropped,
            retained = inner.retained_bytes,
            "redo.checkpoint"
        );
    }

    /// LSN that the next appended batch will receive.
    pub fn next_lsn(&self) -> Lsn {
        self.inner.lock().next_lsn
    }

    /// Clones the retained batches, oldest first.
    pub fn batches(&self) -> Vec<RedoBatch> {
        self.inner.lock().batches.iter().cloned().collect()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> RedoStats {
        let inner = self.inner.lock();
        let mut stats = inner.stats.clone();
        stats.retained_bytes = inner.retained_bytes as u64;
        stats
    }
}

impl Default for RedoLog {
    fn default() -> Self {
        Self::new(RedoOptions::default())
    }
}
