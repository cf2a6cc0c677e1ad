//! Non-durable cold store
//!
//! Same semantics as the file store, with records held in memory. Also lets
//! tests inject backend failures.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::config::Compression;
use crate::datapoint::{Datapoint, Scope, StreamKey};
use crate::error::{Result, TierError};
use crate::hot::BatchRef;

use super::index::MetaIndex;
use super::record::{decode_header, decode_record, encode_record};
use super::{Batch, BatchMeta, ColdStore};

pub struct MemoryColdStore {
    compression: Compression,
    index: MetaIndex,
    records: RwLock<HashMap<BatchRef, Vec<u8>>>,
    /// Inserts left to fail with an I/O error
    failing_inserts: AtomicUsize,
}

impl MemoryColdStore {
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            index: MetaIndex::new(),
            records: RwLock::new(HashMap::new()),
            failing_inserts: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` inserts fail with an I/O error
    pub fn fail_next_inserts(&self, count: usize) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }
}

impl Default for MemoryColdStore {
    fn default() -> Self {
        Self::new(Compression::Zstd { level: 3 })
    }
}

impl ColdStore for MemoryColdStore {
    fn insert(&self, batch: &Batch) -> Result<()> {
        let injected = self
            .failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TierError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected cold store failure",
            )));
        }

        let reference = batch.reference();
        let bytes = encode_record(batch, self.compression)?;
        let meta = decode_header(&bytes)?.into_meta(batch.key.clone());

        let mut records = self.records.write();
        if let Some(newest) = self.index.newest_generation(&batch.key) {
            if newest > batch.generation {
                return Err(TierError::Consistency(format!(
                    "Batch {} is older than archived generation {}",
                    reference, newest
                )));
            }
            if newest < batch.generation {
                for stale in self.index.remove_before(&batch.key, batch.generation) {
                    records.remove(&stale.reference());
                }
            }
        }
        if records.contains_key(&reference) || !self.index.insert(meta) {
            return Err(TierError::DuplicateBatch(reference.to_string()));
        }
        records.insert(reference, bytes);
        Ok(())
    }

    fn contains(&self, reference: &BatchRef) -> bool {
        self.index.contains(reference)
    }

    fn read_batch(&self, meta: &BatchMeta) -> Result<Vec<Datapoint>> {
        let records = self.records.read();
        let bytes = records
            .get(&meta.reference())
            .ok_or_else(|| TierError::Consistency(format!("Batch {} is not stored", meta.reference())))?;
        Ok(decode_record(bytes)?.1)
    }

    fn batches(&self, key: &StreamKey) -> Vec<BatchMeta> {
        self.index.batches(key)
    }

    fn batch_containing(&self, key: &StreamKey, index: i64) -> Option<BatchMeta> {
        self.index.batch_containing(key, index)
    }

    fn first_batch_after_time(&self, key: &StreamKey, t: f64) -> Option<BatchMeta> {
        self.index.first_batch_after_time(key, t)
    }

    fn end_index(&self, key: &StreamKey) -> i64 {
        self.index.end_index(key)
    }

    fn delete(&self, scope: &Scope) -> Result<usize> {
        let mut records = self.records.write();
        let removed = self.index.remove_scope(scope);
        for meta in &removed {
            records.remove(&meta.reference());
        }
        Ok(removed.len())
    }

    fn delete_before(&self, key: &StreamKey, generation: u64) -> Result<usize> {
        let mut records = self.records.write();
        let removed = self.index.remove_before(key, generation);
        for meta in &removed {
            records.remove(&meta.reference());
        }
        Ok(removed.len())
    }

    fn batch_count(&self) -> usize {
        self.index.batch_count()
    }

    fn keys(&self) -> Vec<StreamKey> {
        self.index.keys()
    }
}
