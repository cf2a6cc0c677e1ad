//! In-memory batch index shared by the cold store implementations

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::datapoint::{Scope, StreamKey};
use crate::hot::BatchRef;

use super::BatchMeta;

/// Batch descriptors per stream, ordered by start index
#[derive(Default)]
pub struct MetaIndex {
    streams: RwLock<BTreeMap<StreamKey, BTreeMap<i64, BatchMeta>>>,
}

impl MetaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a batch. Returns false if its start index is already taken.
    pub fn insert(&self, meta: BatchMeta) -> bool {
        let mut streams = self.streams.write();
        let batches = streams.entry(meta.key.clone()).or_default();
        if batches.contains_key(&meta.start) {
            return false;
        }
        batches.insert(meta.start, meta);
        true
    }

    pub fn contains(&self, reference: &BatchRef) -> bool {
        self.streams
            .read()
            .get(&reference.key)
            .and_then(|b| b.get(&reference.start))
            .map_or(false, |m| m.end == reference.end && m.generation == reference.generation)
    }

    /// Newest generation with a batch stored for `key`
    pub fn newest_generation(&self, key: &StreamKey) -> Option<u64> {
        self.streams
            .read()
            .get(key)
            .and_then(|b| b.values().map(|m| m.generation).max())
    }

    pub fn batches(&self, key: &StreamKey) -> Vec<BatchMeta> {
        self.streams
            .read()
            .get(key)
            .map(|b| b.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn batch_containing(&self, key: &StreamKey, index: i64) -> Option<BatchMeta> {
        let streams = self.streams.read();
        let (_, meta) = streams.get(key)?.range(..=index).next_back()?;
        if index < meta.end {
            Some(meta.clone())
        } else {
            None
        }
    }

    /// Binary search over end times (non-decreasing across a stream's batches)
    pub fn first_batch_after_time(&self, key: &StreamKey, t: f64) -> Option<BatchMeta> {
        let batches = self.batches(key);
        let pos = batches.partition_point(|m| m.end_time <= t);
        batches.into_iter().nth(pos)
    }

    pub fn end_index(&self, key: &StreamKey) -> i64 {
        self.streams
            .read()
            .get(key)
            .and_then(|b| b.values().next_back())
            .map_or(0, |m| m.end)
    }

    /// Drop and return every descriptor in scope
    pub fn remove_scope(&self, scope: &Scope) -> Vec<BatchMeta> {
        let mut streams = self.streams.write();
        let keys: Vec<StreamKey> = streams.keys().filter(|k| scope.contains(k)).cloned().collect();
        keys.into_iter()
            .filter_map(|k| streams.remove(&k))
            .flat_map(|b| b.into_values())
            .collect()
    }

    /// Drop and return the descriptors of `key` older than `generation`
    pub fn remove_before(&self, key: &StreamKey, generation: u64) -> Vec<BatchMeta> {
        let mut streams = self.streams.write();
        let batches = match streams.get_mut(key) {
            Some(batches) => batches,
            None => return Vec::new(),
        };
        let stale: Vec<i64> = batches
            .values()
            .filter(|m| m.generation < generation)
            .map(|m| m.start)
            .collect();
        let removed = stale.iter().filter_map(|start| batches.remove(start)).collect();
        if batches.is_empty() {
            streams.remove(key);
        }
        removed
    }

    pub fn batch_count(&self) -> usize {
        self.streams.read().values().map(|b| b.len()).sum()
    }

    pub fn keys(&self) -> Vec<StreamKey> {
        self.streams.read().keys().cloned().collect()
    }
}
