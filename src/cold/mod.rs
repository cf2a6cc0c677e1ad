//! Cold Tier Module
//!
//! Immutable archived batches. A batch is created once by promotion and is
//! only ever removed by deleting its stream.
//!
//! ## Batch Layout
//! ```text
//!   stream key ──► [0, B) ──► [B, 2B) ──► [2B, 3B) ──► ...   (cold)
//!                                                   └─► hot tail
//! ```
//! Batches of one stream are contiguous from index 0, so the batch holding
//! index `i` is found by its start and the first index past the archive is
//! the `end` of the last batch.
//!
//! Every batch records the generation of the stream key that cut it. The
//! first batch archived for a newer generation purges whatever an older
//! generation left behind.

mod file;
mod index;
mod memory;
mod record;

pub use file::{ColdVerifyReport, FileColdStore};
pub use index::MetaIndex;
pub use memory::MemoryColdStore;
pub use record::{decode_header, decode_record, encode_record, FORMAT_VERSION, RECORD_HEADER_SIZE, RECORD_MAGIC};

use crate::datapoint::{find_time_index, Datapoint, Scope, StreamKey};
use crate::error::{Result, TierError};
use crate::hot::BatchRef;

/// Descriptor of a stored batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchMeta {
    pub key: StreamKey,
    pub start: i64,
    pub end: i64,
    /// Timestamp of the last datapoint in the batch
    pub end_time: f64,
    /// Blob encoding version
    pub version: u8,
    /// Encoded blob size in bytes
    pub blob_len: u32,
    pub generation: u64,
}

impl BatchMeta {
    pub fn count(&self) -> i64 {
        self.end - self.start
    }

    pub fn reference(&self) -> BatchRef {
        BatchRef::new(self.key.clone(), self.start, self.end).in_generation(self.generation)
    }
}

/// A batch ready to be archived
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub key: StreamKey,
    pub start: i64,
    pub end: i64,
    pub generation: u64,
    pub points: Vec<Datapoint>,
}

impl Batch {
    /// Pair a reference with its datapoints; the count must match
    pub fn new(reference: &BatchRef, points: Vec<Datapoint>) -> Result<Self> {
        if points.len() as i64 != reference.len() {
            return Err(TierError::Consistency(format!(
                "Batch {} needs {} datapoints, got {}",
                reference,
                reference.len(),
                points.len()
            )));
        }
        Ok(Self {
            key: reference.key.clone(),
            start: reference.start,
            end: reference.end,
            generation: reference.generation,
            points,
        })
    }

    pub fn end_time(&self) -> f64 {
        self.points.last().map(|dp| dp.timestamp).unwrap_or(0.0)
    }

    pub fn reference(&self) -> BatchRef {
        BatchRef::new(self.key.clone(), self.start, self.end).in_generation(self.generation)
    }
}

/// Storage for archived batches
///
/// Implementations are internally synchronized and never retry; retry
/// policy belongs to the promotion pipeline.
pub trait ColdStore: Send + Sync {
    /// Store a batch.
    ///
    /// The same `(key, start, end)` in the same generation is
    /// `DuplicateBatch`. Batches of older generations of the key are removed
    /// first. A batch older than what is stored is a `Consistency` error.
    fn insert(&self, batch: &Batch) -> Result<()>;

    /// True if this exact batch, generation included, is stored
    fn contains(&self, reference: &BatchRef) -> bool;

    /// Decode one stored batch
    fn read_batch(&self, meta: &BatchMeta) -> Result<Vec<Datapoint>>;

    /// Every batch of a stream, in index order
    fn batches(&self, key: &StreamKey) -> Vec<BatchMeta>;

    /// The batch holding logical `index`
    fn batch_containing(&self, key: &StreamKey, index: i64) -> Option<BatchMeta>;

    /// The first batch whose end time is after `t`
    fn first_batch_after_time(&self, key: &StreamKey, t: f64) -> Option<BatchMeta>;

    /// First index past the archived data (0 if nothing is archived)
    fn end_index(&self, key: &StreamKey) -> i64;

    /// Remove every batch in scope. Returns how many were removed.
    fn delete(&self, scope: &Scope) -> Result<usize>;

    /// Remove the batches of `key` from generations below `generation`
    fn delete_before(&self, key: &StreamKey, generation: u64) -> Result<usize>;

    /// Total batches stored
    fn batch_count(&self) -> usize;

    /// Every stream key with at least one batch
    fn keys(&self) -> Vec<StreamKey>;

    /// Datapoints `[i1, i2)` from the archive, clipped to what is archived
    fn read_range(&self, key: &StreamKey, i1: i64, i2: i64) -> Result<Vec<Datapoint>> {
        let mut out = Vec::new();
        for meta in self.batches(key) {
            if meta.end <= i1 {
                continue;
            }
            if meta.start >= i2 {
                break;
            }
            let points = self.read_batch(&meta)?;
            let from = (i1.max(meta.start) - meta.start) as usize;
            let to = (i2.min(meta.end) - meta.start) as usize;
            out.extend(points.into_iter().take(to).skip(from));
        }
        Ok(out)
    }

    /// Archived datapoints with `t1 < timestamp <= t2`
    fn read_time_range(&self, key: &StreamKey, t1: f64, t2: f64) -> Result<Vec<Datapoint>> {
        let mut out = Vec::new();
        let first = match self.first_batch_after_time(key, t1) {
            Some(meta) => meta,
            None => return Ok(out),
        };
        for meta in self.batches(key).into_iter().filter(|m| m.start >= first.start) {
            let points = self.read_batch(&meta)?;
            let skip = find_time_index(&points, t1).unwrap_or(points.len());
            for dp in points.into_iter().skip(skip) {
                if dp.timestamp > t2 {
                    return Ok(out);
                }
                out.push(dp);
            }
        }
        Ok(out)
    }
}
