//! Ranges built on top of other ranges

use crate::datapoint::Datapoint;
use crate::error::Result;

use super::DataRange;

/// Yields at most `limit` datapoints
pub struct LimitRange {
    inner: Box<dyn DataRange>,
    remaining: usize,
}

impl LimitRange {
    pub fn new(inner: Box<dyn DataRange>, limit: usize) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }
}

impl Iterator for LimitRange {
    type Item = Result<Datapoint>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.inner.next()?;
        self.remaining -= 1;
        Some(item)
    }
}

impl DataRange for LimitRange {
    fn index(&self) -> i64 {
        self.inner.index()
    }

    fn close(&mut self) {
        self.remaining = 0;
        self.inner.close();
    }
}

/// Drops the first `skip` datapoints
pub struct SkipRange {
    inner: Box<dyn DataRange>,
    skip: usize,
}

impl SkipRange {
    pub fn new(inner: Box<dyn DataRange>, skip: usize) -> Self {
        Self { inner, skip }
    }
}

impl Iterator for SkipRange {
    type Item = Result<Datapoint>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.skip > 0 {
            self.skip -= 1;
            match self.inner.next()? {
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }
        }
        self.inner.next()
    }
}

impl DataRange for SkipRange {
    fn index(&self) -> i64 {
        self.inner.index()
    }

    fn close(&mut self) {
        self.skip = 0;
        self.inner.close();
    }
}

/// Stops at the first datapoint after `t2`. `t2 <= 0` never stops.
pub struct TimeRange {
    inner: Box<dyn DataRange>,
    t2: f64,
    done: bool,
}

impl TimeRange {
    pub fn new(inner: Box<dyn DataRange>, t2: f64) -> Self {
        Self {
            inner,
            t2,
            done: false,
        }
    }
}

impl Iterator for TimeRange {
    type Item = Result<Datapoint>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next()? {
            Ok(dp) if self.t2 > 0.0 && dp.timestamp > self.t2 => {
                self.close();
                None
            }
            other => Some(other),
        }
    }
}

impl DataRange for TimeRange {
    fn index(&self) -> i64 {
        self.inner.index()
    }

    fn close(&mut self) {
        self.done = true;
        self.inner.close();
    }
}

/// Merges several ranges by ascending timestamp.
///
/// Ties go to the range listed first. `index` counts datapoints yielded.
pub struct MergeRange {
    inputs: Vec<Box<dyn DataRange>>,
    heads: Vec<Option<Datapoint>>,
    primed: bool,
    yielded: i64,
    closed: bool,
}

impl MergeRange {
    pub fn new(inputs: Vec<Box<dyn DataRange>>) -> Self {
        let heads = inputs.iter().map(|_| None).collect();
        Self {
            inputs,
            heads,
            primed: false,
            yielded: 0,
            closed: false,
        }
    }

    /// Pull the next datapoint of input `i` into its head slot
    fn advance(&mut self, i: usize) -> Result<()> {
        self.heads[i] = match self.inputs[i].next() {
            Some(item) => Some(item?),
            None => None,
        };
        Ok(())
    }

    fn step(&mut self) -> Result<Option<Datapoint>> {
        if !self.primed {
            for i in 0..self.inputs.len() {
                self.advance(i)?;
            }
            self.primed = true;
        }

        let mut best: Option<usize> = None;
        for (i, head) in self.heads.iter().enumerate() {
            if let Some(dp) = head {
                let better = match best.and_then(|b| self.heads[b].as_ref()) {
                    Some(current) => dp.timestamp < current.timestamp,
                    None => true,
                };
                if better {
                    best = Some(i);
                }
            }
        }

        match best {
            None => Ok(None),
            Some(i) => {
                let dp = self.heads[i].take();
                self.advance(i)?;
                Ok(dp)
            }
        }
    }
}

impl Iterator for MergeRange {
    type Item = Result<Datapoint>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        match self.step() {
            Ok(Some(dp)) => {
                self.yielded += 1;
                Some(Ok(dp))
            }
            Ok(None) => None,
            Err(e) => {
                self.close();
                Some(Err(e))
            }
        }
    }
}

impl DataRange for MergeRange {
    fn index(&self) -> i64 {
        self.yielded
    }

    fn close(&mut self) {
        self.closed = true;
        self.heads.iter_mut().for_each(|h| *h = None);
        for input in &mut self.inputs {
            input.close();
        }
    }
}
