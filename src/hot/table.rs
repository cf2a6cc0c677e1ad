//! Per-stream hot state
//!
//! One `HotStream` holds the unarchived tail of a single stream key plus its
//! metadata record. Every method assumes the caller holds the stream's lock;
//! `HotCache` is responsible for that.
//!
//! Inserts are split into `prepare_insert` (validate, restamp, compute batch
//! references; no mutation) and `apply_insert` (infallible mutation), so the
//! WAL record can be written in between and a failed write leaves the stream
//! untouched.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::datapoint::{Datapoint, StreamKey};
use crate::error::{Result, TierError};

use super::queue::BatchRef;
use super::HotRange;

/// Added to an integral end time when restamping, so restamped datapoints
/// compare strictly after the datapoint that set the end time.
pub const RESTAMP_EPSILON: f64 = 0.00001;

/// The metadata record of one stream key
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMeta {
    /// Total datapoints ever accepted
    pub length: i64,
    /// Timestamp of the first datapoint ever accepted
    pub start_time: f64,
    /// Timestamp of the newest datapoint
    pub end_time: f64,
    /// Index up to which whole batches have been queued
    pub batch_cursor: i64,
    /// Encoded bytes ever accepted
    pub size_bytes: u64,
    /// Bumped each time the key is deleted and created again
    pub generation: u64,
}

/// A validated insert, ready to be logged and applied
#[derive(Debug)]
pub struct PreparedInsert {
    pub points: Vec<Datapoint>,
    pub size: u64,
    pub batches: Vec<BatchRef>,
    pub restamped: usize,
}

/// Result of a timestamp lookup against the hot list
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeLookup {
    /// The answer is this index
    Index(i64),
    /// Every hot datapoint is newer than the lookup time, so the answer is in
    /// the cold tier or is `floor` itself
    BeforeFloor { floor: i64 },
}

/// Hot tier state for one stream key
#[derive(Debug, Default)]
pub struct HotStream {
    meta: StreamMeta,
    points: VecDeque<Datapoint>,
    /// Set when the stream is deleted while a caller still holds the slot
    pub(super) deleted: bool,
}

impl HotStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, empty stream in the given generation of its key
    pub fn with_generation(generation: u64) -> Self {
        let mut stream = Self::default();
        stream.meta.generation = generation;
        stream
    }

    /// Rebuild from checkpointed state
    pub fn restore(meta: StreamMeta, points: Vec<Datapoint>) -> Self {
        Self {
            meta,
            points: points.into(),
            deleted: false,
        }
    }

    pub fn meta(&self) -> &StreamMeta {
        &self.meta
    }

    pub fn length(&self) -> i64 {
        self.meta.length
    }

    pub fn generation(&self) -> u64 {
        self.meta.generation
    }

    /// Number of datapoints still held in the hot tier
    pub fn hot_len(&self) -> usize {
        self.points.len()
    }

    /// Logical index of the oldest datapoint still held
    pub fn floor(&self) -> i64 {
        self.meta.length - self.points.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.meta.length == 0
    }

    pub fn points(&self) -> impl Iterator<Item = &Datapoint> {
        self.points.iter()
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Validate an insert against the stream's end time and compute its effects.
    ///
    /// `points` must be non-empty and timestamp ordered. `size` is their
    /// encoded size. Nothing is mutated.
    pub fn prepare_insert(
        &self,
        key: &StreamKey,
        mut points: Vec<Datapoint>,
        size: u64,
        restamp: bool,
        batch_size: i64,
        max_stream_bytes: u64,
    ) -> Result<PreparedInsert> {
        let first = match points.first() {
            Some(dp) => dp.timestamp,
            None => {
                return Ok(PreparedInsert {
                    points,
                    size: 0,
                    batches: Vec::new(),
                    restamped: 0,
                })
            }
        };

        if max_stream_bytes > 0 && self.meta.size_bytes + size > max_stream_bytes {
            return Err(TierError::SizeLimit("Exceeded stream size limit".to_string()));
        }

        let mut restamped = 0;
        let end_time = self.meta.end_time;
        if self.meta.length > 0 && end_time > first {
            if !restamp {
                return Err(TierError::TimestampOrder);
            }

            let stamp = if end_time.fract() == 0.0 {
                end_time + RESTAMP_EPSILON
            } else {
                end_time
            };

            for dp in points.iter_mut() {
                if dp.timestamp > stamp {
                    break;
                }
                dp.timestamp = stamp;
                restamped += 1;
            }
        }

        let new_length = self.meta.length + points.len() as i64;
        let mut batches = Vec::new();
        let mut cursor = self.meta.batch_cursor;
        while new_length - cursor >= batch_size {
            batches.push(
                BatchRef::new(key.clone(), cursor, cursor + batch_size).in_generation(self.meta.generation),
            );
            cursor += batch_size;
        }

        Ok(PreparedInsert {
            points,
            size,
            batches,
            restamped,
        })
    }

    /// Apply an insert produced by `prepare_insert` (or replayed from the WAL)
    pub fn apply_insert(&mut self, points: Vec<Datapoint>, size: u64, batches: &[BatchRef]) -> i64 {
        if let (Some(first), Some(last)) = (points.first(), points.last()) {
            if self.meta.length == 0 {
                self.meta.start_time = first.timestamp;
            }
            self.meta.end_time = last.timestamp;
        }
        self.meta.length += points.len() as i64;
        self.meta.size_bytes += size;
        if let Some(last) = batches.last() {
            self.meta.batch_cursor = last.end;
        }
        self.points.extend(points);
        self.meta.length
    }

    // =========================================================================
    // Range
    // =========================================================================

    /// Resolve python-style indices against the stream length.
    ///
    /// `i1 < 0` counts from the end, `i2 <= 0` counts from the end (so `0`
    /// means "through the newest datapoint"). Both are clamped to
    /// `[0, length]`.
    pub fn resolve(&self, i1: i64, i2: i64) -> Result<(i64, i64)> {
        resolve_indices(self.meta.length, i1, i2)
    }

    /// Read `[i1, i2)` if the hot tier still holds it
    pub fn range(&self, i1: i64, i2: i64) -> Result<(HotRange, i64, i64)> {
        let (r1, r2) = self.resolve(i1, i2)?;
        let floor = self.floor();
        if r1 < floor {
            return Ok((HotRange::Cold, r1, r2));
        }
        let from = (r1 - floor) as usize;
        let to = (r2 - floor) as usize;
        let data = self.points.range(from..to).cloned().collect();
        Ok((HotRange::Data(data), r1, r2))
    }

    // =========================================================================
    // Trim
    // =========================================================================

    /// Drop hot datapoints below logical `index`. Returns how many were dropped.
    pub fn trim(&mut self, index: i64) -> usize {
        let floor = self.floor();
        if index <= floor {
            return 0;
        }
        let count = ((index - floor) as usize).min(self.points.len());
        self.points.drain(..count);
        count
    }

    // =========================================================================
    // Time Lookup
    // =========================================================================

    /// Find the index of the first datapoint with a timestamp after `t`
    pub fn find_time(&self, t: f64) -> TimeLookup {
        let floor = self.floor();
        match self.points.front() {
            None => TimeLookup::BeforeFloor { floor },
            Some(first) if first.timestamp > t => TimeLookup::BeforeFloor { floor },
            Some(_) => {
                let pos = self.points.partition_point(|dp| dp.timestamp <= t);
                TimeLookup::Index(floor + pos as i64)
            }
        }
    }
}

/// Python slice resolution shared by the hot tier and the read paths
pub fn resolve_indices(length: i64, i1: i64, i2: i64) -> Result<(i64, i64)> {
    let r1 = if i1 < 0 { length + i1 } else { i1 }.clamp(0, length);
    let r2 = if i2 <= 0 { length + i2 } else { i2 }.clamp(0, length);
    if r2 < r1 {
        return Err(TierError::InvalidRange(format!(
            "[{}, {}) resolves to [{}, {}) for length {}",
            i1, i2, r1, r2, length
        )));
    }
    Ok((r1, r2))
}
