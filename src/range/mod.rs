//! Range Module
//!
//! Single-pass iterators over a stream's datapoints in ascending index
//! order, whichever tier currently holds them.
//!
//! ## Construction
//! ```text
//!   hot.range(i1, i2) ── Data(points) ──► ArrayRange
//!                     └─ Cold ──────────► TieredRange  (cold batches, then hot tail)
//!
//!   time range (t1, t2] = time_to_index(t1) ──► index range to the end
//!                          ──► TimeRange(t2) ──► LimitRange(limit)
//! ```

mod derived;
mod tiered;

use std::collections::VecDeque;
use std::sync::Arc;

pub use derived::{LimitRange, MergeRange, SkipRange, TimeRange};
pub use tiered::TieredRange;

use crate::cold::ColdStore;
use crate::datapoint::{find_time_index, Datapoint, StreamKey};
use crate::error::Result;
use crate::hot::{HotCache, HotRange, TimeLookup};

/// A finite, single-pass iterator over datapoints
pub trait DataRange: Iterator<Item = Result<Datapoint>> + Send {
    /// Logical index of the next datapoint the range would yield
    fn index(&self) -> i64;

    /// Release the range. Idempotent; afterwards `next` returns `None`.
    fn close(&mut self);
}

impl<R: DataRange + ?Sized> DataRange for Box<R> {
    fn index(&self) -> i64 {
        (**self).index()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// A range with nothing in it
#[derive(Debug, Default)]
pub struct EmptyRange {
    index: i64,
}

impl EmptyRange {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty range positioned at `index`
    pub fn at(index: i64) -> Self {
        Self { index }
    }
}

impl Iterator for EmptyRange {
    type Item = Result<Datapoint>;

    fn next(&mut self) -> Option<Self::Item> {
        None
    }
}

impl DataRange for EmptyRange {
    fn index(&self) -> i64 {
        self.index
    }

    fn close(&mut self) {}
}

/// Datapoints already in memory, starting at logical index `start`
#[derive(Debug)]
pub struct ArrayRange {
    points: VecDeque<Datapoint>,
    index: i64,
}

impl ArrayRange {
    pub fn new(points: Vec<Datapoint>, start: i64) -> Self {
        Self {
            points: points.into(),
            index: start,
        }
    }
}

impl Iterator for ArrayRange {
    type Item = Result<Datapoint>;

    fn next(&mut self) -> Option<Self::Item> {
        let dp = self.points.pop_front()?;
        self.index += 1;
        Some(Ok(dp))
    }
}

impl DataRange for ArrayRange {
    fn index(&self) -> i64 {
        self.index
    }

    fn close(&mut self) {
        self.points.clear();
    }
}

// =============================================================================
// Construction
// =============================================================================

/// Iterate `[i1, i2)` of a stream (python slice semantics)
pub fn index_range(
    hot: &Arc<HotCache>,
    cold: &Arc<dyn ColdStore>,
    key: &StreamKey,
    i1: i64,
    i2: i64,
) -> Result<Box<dyn DataRange>> {
    let (answer, r1, r2) = hot.range(key, i1, i2)?;
    if r1 == r2 {
        return Ok(Box::new(EmptyRange::at(r1)));
    }
    match answer {
        HotRange::Data(points) => Ok(Box::new(ArrayRange::new(points, r1))),
        HotRange::Cold => Ok(Box::new(TieredRange::new(
            key.clone(),
            Arc::clone(hot),
            Arc::clone(cold),
            r1,
            r2,
        ))),
    }
}

/// Index of the first datapoint with a timestamp after `t`, or the stream
/// length if there is none.
pub fn time_to_index(
    hot: &HotCache,
    cold: &dyn ColdStore,
    key: &StreamKey,
    t: f64,
) -> Result<i64> {
    let floor = match hot.find_time(key, t) {
        None => return Ok(0),
        Some(TimeLookup::Index(i)) => return Ok(i),
        Some(TimeLookup::BeforeFloor { floor }) => floor,
    };

    let meta = match cold.first_batch_after_time(key, t) {
        Some(meta) if meta.start < floor => meta,
        _ => return Ok(floor),
    };
    let points = cold.read_batch(&meta)?;
    let pos = find_time_index(&points, t).unwrap_or(points.len());
    Ok(meta.start + pos as i64)
}

/// Iterate datapoints with `t1 < timestamp <= t2` (`t2 <= 0` is unbounded),
/// at most `limit` of them (`0` is unbounded).
pub fn time_range(
    hot: &Arc<HotCache>,
    cold: &Arc<dyn ColdStore>,
    key: &StreamKey,
    t1: f64,
    t2: f64,
    limit: usize,
) -> Result<Box<dyn DataRange>> {
    let start = time_to_index(hot, cold.as_ref(), key, t1)?;
    let length = hot.length(key);
    if start >= length {
        return Ok(Box::new(EmptyRange::at(length)));
    }

    let inner = index_range(hot, cold, key, start, length)?;
    let timed: Box<dyn DataRange> = Box::new(TimeRange::new(inner, t2));
    if limit > 0 {
        Ok(Box::new(LimitRange::new(timed, limit)))
    } else {
        Ok(timed)
    }
}
