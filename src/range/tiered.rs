//! Range spanning the cold archive and the hot tail
//!
//! Each refill asks the cold tier first and the hot tier second. Promotion
//! only ever moves data from hot to cold (archive first, trim after), so a
//! datapoint missing from the hot tier is in the cold tier by the time the
//! hot tier stops returning it.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::cold::ColdStore;
use crate::datapoint::{Datapoint, StreamKey};
use crate::error::{Result, TierError};
use crate::hot::{HotCache, HotRange};

use super::DataRange;

pub struct TieredRange {
    key: StreamKey,
    hot: Arc<HotCache>,
    cold: Arc<dyn ColdStore>,
    /// Index of the next datapoint to yield
    next: i64,
    /// Exclusive upper bound
    end: i64,
    buffer: VecDeque<Datapoint>,
    closed: bool,
}

impl TieredRange {
    /// Iterate resolved indices `[start, end)`
    pub fn new(key: StreamKey, hot: Arc<HotCache>, cold: Arc<dyn ColdStore>, start: i64, end: i64) -> Self {
        Self {
            key,
            hot,
            cold,
            next: start,
            end,
            buffer: VecDeque::new(),
            closed: false,
        }
    }

    /// Load the next run of datapoints starting at `self.next`
    fn refill(&mut self) -> Result<()> {
        let buffered = self.next + self.buffer.len() as i64;
        if buffered >= self.end {
            return Ok(());
        }

        if self.load_cold(buffered)? {
            return Ok(());
        }

        match self.hot.range(&self.key, buffered, self.end)? {
            (HotRange::Data(points), _, _) if !points.is_empty() => {
                self.buffer.extend(points);
                Ok(())
            }
            (HotRange::Data(_), _, _) => Err(TierError::Consistency(format!(
                "{} has no datapoints at [{}, {})",
                self.key, buffered, self.end
            ))),
            // promoted and trimmed since the cold lookup
            (HotRange::Cold, _, _) => {
                if self.load_cold(buffered)? {
                    Ok(())
                } else {
                    Err(TierError::Consistency(format!(
                        "Index {} of {} is in neither tier",
                        buffered, self.key
                    )))
                }
            }
        }
    }

    /// Buffer the part of the cold batch holding `index`, if archived
    fn load_cold(&mut self, index: i64) -> Result<bool> {
        let meta = match self.cold.batch_containing(&self.key, index) {
            Some(meta) => meta,
            None => return Ok(false),
        };
        let points = self.cold.read_batch(&meta)?;
        let from = (index - meta.start) as usize;
        let to = (self.end.min(meta.end) - meta.start) as usize;
        self.buffer.extend(points.into_iter().take(to).skip(from));
        Ok(true)
    }
}

impl Iterator for TieredRange {
    type Item = Result<Datapoint>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed || self.next >= self.end {
            return None;
        }
        if self.buffer.is_empty() {
            if let Err(e) = self.refill() {
                self.close();
                return Some(Err(e));
            }
        }

        let dp = self.buffer.pop_front()?;
        self.next += 1;
        Some(Ok(dp))
    }
}

impl DataRange for TieredRange {
    fn index(&self) -> i64 {
        self.next
    }

    fn close(&mut self) {
        self.closed = true;
        self.buffer.clear();
    }
}
