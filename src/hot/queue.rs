//! Batch queue
//!
//! Two named channels shared by every stream:
//!
//! ```text
//!   insert ──► pending (FIFO) ──dequeue──► processing ──ack──► (gone)
//!                  ▲                            │
//!                  └──────── lease expired ─────┘
//! ```
//!
//! A dequeue moves a reference into processing in one step under the queue
//! lock, so a reference is handed to exactly one worker. At most one
//! reference per stream key is in processing at a time: batches of one stream
//! are promoted in index order, which is what makes trimming safe.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::datapoint::{Scope, StreamKey};

/// Names a completed batch `[start, end)` of one stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchRef {
    pub key: StreamKey,
    pub start: i64,
    pub end: i64,
    /// Generation of the stream key that cut the batch
    pub generation: u64,
}

impl BatchRef {
    /// A reference in the first generation of `key`
    pub fn new(key: StreamKey, start: i64, end: i64) -> Self {
        Self {
            key,
            start,
            end,
            generation: 0,
        }
    }

    pub fn in_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Number of datapoints in the batch
    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl fmt::Display for BatchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.key, self.start, self.end)?;
        if self.generation > 0 {
            write!(f, "@{}", self.generation)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Lease {
    acquired: Instant,
    heartbeat: Instant,
}

impl Lease {
    fn now() -> Self {
        let now = Instant::now();
        Self {
            acquired: now,
            heartbeat: now,
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<BatchRef>,
    /// In-flight reference per stream key
    processing: HashMap<StreamKey, (BatchRef, Lease)>,
    shutdown: bool,
}

impl QueueState {
    /// Remove and return the oldest pending reference whose stream is idle
    fn take_ready(&mut self) -> Option<BatchRef> {
        let pos = self
            .pending
            .iter()
            .position(|r| !self.processing.contains_key(&r.key))?;
        let reference = self.pending.remove(pos)?;
        self.processing
            .insert(reference.key.clone(), (reference.clone(), Lease::now()));
        Some(reference)
    }

    /// Move the given keys' in-flight references back to the front of pending
    fn requeue(&mut self, keys: Vec<StreamKey>) -> usize {
        let mut moved: Vec<BatchRef> = keys
            .into_iter()
            .filter_map(|k| self.processing.remove(&k).map(|(r, _)| r))
            .collect();
        moved.sort();
        let count = moved.len();
        for reference in moved.into_iter().rev() {
            self.pending.push_front(reference);
        }
        count
    }
}

/// Pending/processing queue pair with blocking dequeue and leases
pub struct BatchQueue {
    pending_name: String,
    processing_name: String,
    state: Mutex<QueueState>,
    available: Condvar,
}

impl BatchQueue {
    pub fn new(pending_name: impl Into<String>, processing_name: impl Into<String>) -> Self {
        Self {
            pending_name: pending_name.into(),
            processing_name: processing_name.into(),
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
        }
    }

    pub fn pending_name(&self) -> &str {
        &self.pending_name
    }

    pub fn processing_name(&self) -> &str {
        &self.processing_name
    }

    /// Push references onto the tail of pending
    pub fn enqueue(&self, refs: impl IntoIterator<Item = BatchRef>) {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.extend(refs);
        if state.pending.len() > before {
            self.available.notify_all();
        }
    }

    /// Move the next ready reference into processing and return it.
    ///
    /// Blocks while nothing is ready. `timeout = None` waits indefinitely.
    /// Returns `None` on timeout or once the queue is shut down.
    pub fn dequeue(&self, timeout: Option<Duration>) -> Option<BatchRef> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        loop {
            if state.shutdown {
                return None;
            }
            if let Some(reference) = state.take_ready() {
                return Some(reference);
            }
            match deadline {
                None => self.available.wait(&mut state),
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        if state.shutdown {
                            return None;
                        }
                        return state.take_ready();
                    }
                }
            }
        }
    }

    /// Non-blocking dequeue. Unaffected by `shutdown`.
    pub fn try_dequeue(&self) -> Option<BatchRef> {
        self.state.lock().take_ready()
    }

    /// Refresh the lease of an in-flight reference
    pub fn heartbeat(&self, reference: &BatchRef) -> bool {
        let mut state = self.state.lock();
        match state.processing.get_mut(&reference.key) {
            Some((r, lease)) if r == reference => {
                lease.heartbeat = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Remove a finished reference from processing.
    ///
    /// Returns false if the reference was not in flight (already acked,
    /// requeued after lease expiry, or dropped by a delete).
    pub fn ack(&self, reference: &BatchRef) -> bool {
        let mut state = self.state.lock();
        let matches = matches!(state.processing.get(&reference.key), Some((r, _)) if r == reference);
        if matches {
            state.processing.remove(&reference.key);
            // the stream may have further batches waiting on it
            self.available.notify_all();
        }
        matches
    }

    /// Requeue in-flight references whose last heartbeat is older than `lease_timeout`
    pub fn requeue_stale(&self, lease_timeout: Duration) -> usize {
        let mut state = self.state.lock();
        let stale: Vec<StreamKey> = state
            .processing
            .iter()
            .filter(|(_, (_, lease))| lease.heartbeat.elapsed() >= lease_timeout)
            .map(|(k, _)| k.clone())
            .collect();
        if stale.is_empty() {
            return 0;
        }
        for key in &stale {
            if let Some((r, lease)) = state.processing.get(key) {
                tracing::warn!(
                    "Lease expired for batch {} after {:?}, requeueing",
                    r,
                    lease.acquired.elapsed()
                );
            }
        }
        let count = state.requeue(stale);
        self.available.notify_all();
        count
    }

    /// Requeue every in-flight reference (used when workers are restarted)
    pub fn requeue_all_processing(&self) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<StreamKey> = state.processing.keys().cloned().collect();
        let count = state.requeue(keys);
        if count > 0 {
            self.available.notify_all();
        }
        count
    }

    /// Drop every reference belonging to a deleted scope
    pub fn remove_scope(&self, scope: &Scope) -> usize {
        let mut state = self.state.lock();
        let before = state.pending.len() + state.processing.len();
        state.pending.retain(|r| !scope.contains(&r.key));
        state.processing.retain(|k, _| !scope.contains(k));
        let removed = before - (state.pending.len() + state.processing.len());
        if removed > 0 {
            self.available.notify_all();
        }
        removed
    }

    /// Wake every blocked dequeuer; subsequent dequeues return `None`
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.available.notify_all();
    }

    /// Allow dequeues again after a shutdown
    pub fn reopen(&self) {
        self.state.lock().shutdown = false;
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shutdown
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn processing_len(&self) -> usize {
        self.state.lock().processing.len()
    }

    /// Snapshot of pending references in queue order
    pub fn pending(&self) -> Vec<BatchRef> {
        self.state.lock().pending.iter().cloned().collect()
    }

    /// Snapshot of in-flight references, sorted
    pub fn processing(&self) -> Vec<BatchRef> {
        let state = self.state.lock();
        let mut refs: Vec<BatchRef> = state.processing.values().map(|(r, _)| r.clone()).collect();
        refs.sort();
        refs
    }

    /// Every outstanding reference in the order it would be replayed:
    /// in-flight first, then pending.
    pub fn outstanding(&self) -> Vec<BatchRef> {
        let state = self.state.lock();
        let mut refs: Vec<BatchRef> = state.processing.values().map(|(r, _)| r.clone()).collect();
        refs.sort();
        refs.extend(state.pending.iter().cloned());
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn key(name: &str) -> StreamKey {
        StreamKey::primary("dev", name)
    }

    fn queue() -> BatchQueue {
        BatchQueue::new("BATCHLIST", "BATCHPROCESSING")
    }

    #[test]
    fn test_dequeue_moves_to_processing() {
        let q = queue();
        q.enqueue([BatchRef::new(key("a"), 0, 2)]);

        let r = q.try_dequeue().unwrap();
        assert_eq!(r, BatchRef::new(key("a"), 0, 2));
        assert_eq!(q.pending_len(), 0);
        assert_eq!(q.processing(), vec![r.clone()]);

        assert!(q.ack(&r));
        assert!(!q.ack(&r));
        assert_eq!(q.processing_len(), 0);
    }

    #[test]
    fn test_one_in_flight_per_stream() {
        let q = queue();
        q.enqueue([
            BatchRef::new(key("a"), 0, 2),
            BatchRef::new(key("a"), 2, 4),
            BatchRef::new(key("b"), 0, 2),
        ]);

        let first = q.try_dequeue().unwrap();
        let second = q.try_dequeue().unwrap();
        assert_eq!(first.key, key("a"));
        assert_eq!(second.key, key("b"));
        assert!(q.try_dequeue().is_none());

        q.ack(&first);
        assert_eq!(q.try_dequeue().unwrap(), BatchRef::new(key("a"), 2, 4));
    }

    #[test]
    fn test_requeue_stale_goes_to_front() {
        let q = queue();
        q.enqueue([BatchRef::new(key("a"), 0, 2), BatchRef::new(key("b"), 0, 2)]);
        let r = q.try_dequeue().unwrap();

        assert_eq!(q.requeue_stale(Duration::from_secs(3600)), 0);
        assert_eq!(q.requeue_stale(Duration::ZERO), 1);
        assert_eq!(q.pending()[0], r);
        assert!(!q.heartbeat(&r));
    }

    #[test]
    fn test_dequeue_timeout() {
        let q = queue();
        assert!(q.dequeue(Some(Duration::from_millis(20))).is_none());
    }

    #[test]
    fn test_shutdown_unblocks_dequeue() {
        let q = Arc::new(queue());
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.dequeue(None));

        thread::sleep(Duration::from_millis(50));
        q.shutdown();
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn test_remove_scope() {
        let q = queue();
        q.enqueue([
            BatchRef::new(key("a"), 0, 2),
            BatchRef::new(StreamKey::downlink("dev", "a"), 0, 2),
            BatchRef::new(StreamKey::primary("other", "a"), 0, 2),
        ]);
        q.try_dequeue();

        let removed = q.remove_scope(&Scope::Stream {
            owner: "dev".into(),
            stream: "a".into(),
        });
        assert_eq!(removed, 2);
        assert_eq!(q.outstanding(), vec![BatchRef::new(StreamKey::primary("other", "a"), 0, 2)]);
    }
}
