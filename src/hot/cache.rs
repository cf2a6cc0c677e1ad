//! Hot Cache
//!
//! The atomic hot tier: per-stream slots, the batch queue, and (when
//! durability is enabled) the WAL and checkpoint that make both survive a
//! restart.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::datapoint::codec::encoded_size;
use crate::datapoint::{is_timestamp_ordered, Datapoint, Scope, StreamKey};
use crate::error::{Result, TierError};
use crate::wal::{Operation, WalRecovery, WalWriter};

use super::queue::{BatchQueue, BatchRef};
use super::snapshot::{HotSnapshot, StreamState};
use super::table::{resolve_indices, HotStream, StreamMeta, TimeLookup};
use super::HotRange;

type Slot = Arc<Mutex<HotStream>>;

/// Settings the hot tier reads from `Config`
#[derive(Debug, Clone)]
struct HotSettings {
    batch_size: i64,
    max_owner_bytes: u64,
    max_stream_bytes: u64,
    checkpoint_bytes: u64,
}

/// State rebuilt from the checkpoint and the WAL
#[derive(Default)]
struct Recovered {
    streams: BTreeMap<StreamKey, HotStream>,
    retired: HashMap<StreamKey, u64>,
    outstanding: Vec<BatchRef>,
    last_lsn: u64,
}

/// The hot tier
pub struct HotCache {
    settings: HotSettings,

    /// Shared by mutators, exclusive for checkpoints
    gate: RwLock<()>,

    streams: RwLock<BTreeMap<StreamKey, Slot>>,

    /// Generation the next incarnation of a deleted key starts in. Only
    /// written while `streams` is write-locked.
    retired: RwLock<HashMap<StreamKey, u64>>,

    /// Encoded bytes per owner, reserved before an insert is applied
    owners: RwLock<HashMap<String, Arc<AtomicU64>>>,

    queue: BatchQueue,

    /// None when hot durability is disabled
    wal: Option<Mutex<WalWriter>>,
    snapshot_path: Option<PathBuf>,
}

impl HotCache {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "hot.wal";
    const SNAPSHOT_FILENAME: &'static str = "hot.snapshot";

    /// Open the hot tier, recovering checkpointed and logged state.
    ///
    /// Every batch reference that was pending or in flight is placed back on
    /// the pending queue, in-flight ones first.
    pub fn open(config: &Config) -> Result<Self> {
        let settings = HotSettings {
            batch_size: config.batch_size as i64,
            max_owner_bytes: config.max_owner_bytes,
            max_stream_bytes: config.max_stream_bytes,
            checkpoint_bytes: config.wal_checkpoint_bytes,
        };
        let queue = BatchQueue::new(config.pending_queue.clone(), config.processing_queue.clone());

        if !config.hot_durability {
            return Ok(Self::assemble(settings, Recovered::default(), queue, None, None));
        }

        fs::create_dir_all(&config.data_dir)?;
        let wal_path = config.data_dir.join(Self::WAL_FILENAME);
        let snapshot_path = config.data_dir.join(Self::SNAPSHOT_FILENAME);

        let mut recovered = Self::recover(&snapshot_path, &wal_path, config)?;

        let outstanding = std::mem::take(&mut recovered.outstanding);
        if !outstanding.is_empty() {
            tracing::info!(
                "Requeued {} outstanding batch references onto {}",
                outstanding.len(),
                queue.pending_name()
            );
        }
        queue.enqueue(outstanding);

        let wal = WalWriter::open(&wal_path, config.wal_sync_strategy, recovered.last_lsn)?;
        Ok(Self::assemble(
            settings,
            recovered,
            queue,
            Some(Mutex::new(wal)),
            Some(snapshot_path),
        ))
    }

    fn assemble(
        settings: HotSettings,
        recovered: Recovered,
        queue: BatchQueue,
        wal: Option<Mutex<WalWriter>>,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        let Recovered { streams, retired, .. } = recovered;
        let mut owners: HashMap<String, Arc<AtomicU64>> = HashMap::new();
        for (key, stream) in &streams {
            owners
                .entry(key.owner.clone())
                .or_default()
                .fetch_add(stream.meta().size_bytes, Ordering::Relaxed);
        }

        let streams = streams
            .into_iter()
            .map(|(k, s)| (k, Arc::new(Mutex::new(s))))
            .collect();

        Self {
            settings,
            gate: RwLock::new(()),
            streams: RwLock::new(streams),
            retired: RwLock::new(retired),
            owners: RwLock::new(owners),
            queue,
            wal,
            snapshot_path,
        }
    }

    /// Rebuild streams and outstanding references from snapshot + WAL
    fn recover(snapshot_path: &Path, wal_path: &Path, config: &Config) -> Result<Recovered> {
        let mut streams = BTreeMap::new();
        let mut retired = HashMap::new();
        let mut outstanding = Vec::new();
        let mut last_lsn = 0;

        if let Some(snapshot) = HotSnapshot::read(snapshot_path)? {
            if snapshot.pending_queue != config.pending_queue
                || snapshot.processing_queue != config.processing_queue
            {
                tracing::warn!(
                    "Snapshot queues ({}, {}) differ from configured ({}, {})",
                    snapshot.pending_queue,
                    snapshot.processing_queue,
                    config.pending_queue,
                    config.processing_queue
                );
            }
            last_lsn = snapshot.last_lsn;
            for state in snapshot.streams {
                streams.insert(state.key, HotStream::restore(state.meta, state.points));
            }
            retired.extend(snapshot.retired);
            outstanding = snapshot.outstanding;
            tracing::info!(
                "Loaded hot snapshot: {} streams, last_lsn={}",
                streams.len(),
                last_lsn
            );
        }

        if !wal_path.exists() {
            return Ok(Recovered {
                streams,
                retired,
                outstanding,
                last_lsn,
            });
        }

        let (entries, result) = WalRecovery::recover(wal_path)?;
        if result.entries_recovered > 0 || result.entries_corrupted > 0 {
            tracing::info!(
                "WAL recovery: {} entries recovered, {} corrupted, last_lsn={}",
                result.entries_recovered,
                result.entries_corrupted,
                result.last_lsn
            );
        }

        let mut replayed = 0;
        for entry in entries {
            if entry.lsn <= last_lsn {
                continue;
            }
            last_lsn = entry.lsn;
            replayed += 1;

            match entry.operation {
                Operation::Insert {
                    key,
                    generation,
                    points,
                    size,
                    batches,
                } => {
                    let stream = streams
                        .entry(key)
                        .or_insert_with(|| HotStream::with_generation(generation));
                    stream.apply_insert(points, size, &batches);
                    outstanding.extend(batches);
                }
                Operation::Trim { key, index } => {
                    if let Some(stream) = streams.get_mut(&key) {
                        stream.trim(index);
                    }
                }
                Operation::Delete { scope } => {
                    let keys: Vec<StreamKey> =
                        streams.keys().filter(|k| scope.contains(k)).cloned().collect();
                    for key in keys {
                        if let Some(stream) = streams.remove(&key) {
                            retired.insert(key, stream.generation() + 1);
                        }
                    }
                    outstanding.retain(|r| !scope.contains(&r.key));
                }
                Operation::Ack { batch } => {
                    if let Some(pos) = outstanding.iter().position(|r| *r == batch) {
                        outstanding.remove(pos);
                    }
                }
            }
        }
        tracing::debug!("Replayed {} WAL entries", replayed);

        Ok(Recovered {
            streams,
            retired,
            outstanding,
            last_lsn,
        })
    }

    // =========================================================================
    // Slots
    // =========================================================================

    fn slot(&self, key: &StreamKey) -> Option<Slot> {
        self.streams.read().get(key).cloned()
    }

    fn slot_or_create(&self, key: &StreamKey) -> Slot {
        if let Some(slot) = self.slot(key) {
            return slot;
        }
        let mut streams = self.streams.write();
        streams
            .entry(key.clone())
            .or_insert_with(|| {
                let generation = self.retired.read().get(key).copied().unwrap_or(0);
                Arc::new(Mutex::new(HotStream::with_generation(generation)))
            })
            .clone()
    }

    /// Remove a slot whose lock the caller holds.
    ///
    /// With `retire`, the key's next incarnation starts one generation later.
    fn unlink(&self, key: &StreamKey, stream: &mut HotStream, retire: bool) {
        stream.deleted = true;
        let mut streams = self.streams.write();
        if retire {
            self.retired.write().insert(key.clone(), stream.generation() + 1);
        }
        streams.remove(key);
    }

    fn owner_counter(&self, owner: &str) -> Arc<AtomicU64> {
        if let Some(counter) = self.owners.read().get(owner) {
            return Arc::clone(counter);
        }
        Arc::clone(self.owners.write().entry(owner.to_string()).or_default())
    }

    fn reserve(&self, counter: &AtomicU64, size: u64) -> Result<()> {
        let limit = self.settings.max_owner_bytes;
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if limit > 0 && current + size > limit {
                    None
                } else {
                    Some(current + size)
                }
            })
            .map(|_| ())
            .map_err(|_| TierError::SizeLimit("Exceeded owner size limit".to_string()))
    }

    fn release(counter: &AtomicU64, size: u64) {
        let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some(current.saturating_sub(size))
        });
    }

    /// Append to the WAL. Returns whether a checkpoint is due.
    fn log(&self, operation: &Operation) -> Result<bool> {
        match &self.wal {
            None => Ok(false),
            Some(wal) => {
                let mut wal = wal.lock();
                wal.append(operation)?;
                Ok(self.settings.checkpoint_bytes > 0 && wal.size() >= self.settings.checkpoint_bytes)
            }
        }
    }

    fn checkpoint_if(&self, due: bool) {
        if due {
            if let Err(e) = self.checkpoint() {
                tracing::warn!("Automatic checkpoint failed: {}", e);
            }
        }
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Append datapoints to a stream. Returns the new stream length.
    ///
    /// Validation, the WAL record, the append and the enqueueing of any
    /// completed batches happen under the stream's lock; a rejected insert
    /// changes nothing.
    pub fn insert(&self, key: &StreamKey, points: Vec<Datapoint>, restamp: bool) -> Result<i64> {
        if points.is_empty() {
            return Ok(self.length(key));
        }
        if let Some(dp) = points.iter().find(|dp| !dp.timestamp.is_finite()) {
            return Err(TierError::InvalidTimestamp(dp.timestamp));
        }
        if !is_timestamp_ordered(&points) {
            return Err(TierError::UnorderedInput);
        }
        let mut size = 0u64;
        for dp in &points {
            size += encoded_size(dp)?;
        }

        let (length, due) = {
            let _gate = self.gate.read();
            let owner = self.owner_counter(&key.owner);

            loop {
                let slot = self.slot_or_create(key);
                let mut stream = slot.lock();
                if stream.deleted {
                    // lost a race with a delete; look the slot up again
                    continue;
                }

                if let Err(e) = self.reserve(&owner, size) {
                    if stream.is_empty() {
                        self.unlink(key, &mut stream, false);
                    }
                    return Err(e);
                }

                let prepared = match stream.prepare_insert(
                    key,
                    points,
                    size,
                    restamp,
                    self.settings.batch_size,
                    self.settings.max_stream_bytes,
                ) {
                    Ok(prepared) => prepared,
                    Err(e) => {
                        Self::release(&owner, size);
                        if stream.is_empty() {
                            self.unlink(key, &mut stream, false);
                        }
                        return Err(e);
                    }
                };

                if prepared.restamped > 0 {
                    tracing::debug!("Restamped {} datapoints of {}", prepared.restamped, key);
                }

                let operation = Operation::Insert {
                    key: key.clone(),
                    generation: stream.generation(),
                    points: prepared.points,
                    size,
                    batches: prepared.batches,
                };
                let due = match self.log(&operation) {
                    Ok(due) => due,
                    Err(e) => {
                        Self::release(&owner, size);
                        if stream.is_empty() {
                            self.unlink(key, &mut stream, false);
                        }
                        return Err(e);
                    }
                };

                let length = match operation {
                    Operation::Insert { points, batches, .. } => {
                        let length = stream.apply_insert(points, size, &batches);
                        if !batches.is_empty() {
                            tracing::debug!("{} completed {} batches", key, batches.len());
                            self.queue.enqueue(batches);
                        }
                        length
                    }
                    _ => stream.length(),
                };
                break (length, due);
            }
        };

        self.checkpoint_if(due);
        Ok(length)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read `[i1, i2)` of a stream if the hot tier still holds it.
    ///
    /// Returns the resolved indices with the answer.
    pub fn range(&self, key: &StreamKey, i1: i64, i2: i64) -> Result<(HotRange, i64, i64)> {
        match self.slot(key) {
            Some(slot) => slot.lock().range(i1, i2),
            None if i1 <= 0 => Ok((HotRange::Data(Vec::new()), 0, 0)),
            None => Err(TierError::InvalidRange(format!(
                "{} does not exist, index {} is out of range",
                key, i1
            ))),
        }
    }

    /// Resolve indices against the current length without reading data
    pub fn resolve(&self, key: &StreamKey, i1: i64, i2: i64) -> Result<(i64, i64)> {
        match self.slot(key) {
            Some(slot) => slot.lock().resolve(i1, i2),
            None => resolve_indices(0, i1, i2),
        }
    }

    /// Timestamp lookup against the hot list. `None` for unknown streams.
    pub fn find_time(&self, key: &StreamKey, t: f64) -> Option<TimeLookup> {
        self.slot(key).map(|slot| slot.lock().find_time(t))
    }

    /// Copy of the datapoints still held for a stream
    pub fn hot_points(&self, key: &StreamKey) -> Vec<Datapoint> {
        match self.slot(key) {
            Some(slot) => slot.lock().points().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.streams.read().contains_key(key)
    }

    // =========================================================================
    // Generations
    // =========================================================================

    /// Generation of the live stream, `None` if the key does not exist
    pub fn generation(&self, key: &StreamKey) -> Option<u64> {
        let slot = self.slot(key)?;
        let stream = slot.lock();
        if stream.deleted {
            None
        } else {
            Some(stream.generation())
        }
    }

    /// Generation the key has now, or will have when it is next created.
    ///
    /// Every generation below this one belongs to a deleted incarnation.
    pub fn next_generation(&self, key: &StreamKey) -> u64 {
        // a deleted slot has already recorded its successor in `retired`
        self.generation(key)
            .unwrap_or_else(|| self.retired.read().get(key).copied().unwrap_or(0))
    }

    /// Make sure the key's next incarnation starts at `generation` or later.
    ///
    /// Used for keys found in the cold tier with no live hot stream. A live
    /// stream is left alone.
    pub fn reserve_generation(&self, key: &StreamKey, generation: u64) {
        let streams = self.streams.write();
        if streams.contains_key(key) {
            return;
        }
        let mut retired = self.retired.write();
        let next = retired.entry(key.clone()).or_insert(0);
        *next = (*next).max(generation);
    }

    /// Read the datapoints of a batch reference.
    ///
    /// `None` if the reference's generation of the stream no longer exists.
    pub fn read_batch(&self, reference: &BatchRef) -> Result<Option<HotRange>> {
        let slot = match self.slot(&reference.key) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let stream = slot.lock();
        if stream.deleted || stream.generation() != reference.generation {
            return Ok(None);
        }
        let (answer, _, _) = stream.range(reference.start, reference.end)?;
        Ok(Some(answer))
    }

    /// Run `f` while holding the stream's lock, if the reference's generation
    /// of the stream still exists.
    ///
    /// The stream cannot be deleted or recreated while `f` runs. Returns
    /// `None` without running `f` if it already was.
    pub fn while_current<T>(&self, reference: &BatchRef, f: impl FnOnce() -> Result<T>) -> Result<Option<T>> {
        let slot = match self.slot(&reference.key) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let stream = slot.lock();
        if stream.deleted || stream.generation() != reference.generation {
            return Ok(None);
        }
        f().map(Some)
    }

    /// Total datapoints ever accepted (0 for unknown streams)
    pub fn length(&self, key: &StreamKey) -> i64 {
        self.slot(key).map(|slot| slot.lock().length()).unwrap_or(0)
    }

    pub fn metadata(&self, key: &StreamKey) -> Option<StreamMeta> {
        self.slot(key).map(|slot| *slot.lock().meta())
    }

    /// Datapoints currently held in the hot tier
    pub fn hot_len(&self, key: &StreamKey) -> usize {
        self.slot(key).map(|slot| slot.lock().hot_len()).unwrap_or(0)
    }

    /// Logical index of the oldest hot datapoint
    pub fn hot_floor(&self, key: &StreamKey) -> i64 {
        self.slot(key).map(|slot| slot.lock().floor()).unwrap_or(0)
    }

    pub fn stream_size(&self, key: &StreamKey) -> u64 {
        self.slot(key)
            .map(|slot| slot.lock().meta().size_bytes)
            .unwrap_or(0)
    }

    pub fn owner_size(&self, owner: &str) -> u64 {
        self.owners
            .read()
            .get(owner)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Every stream key, or only those in `scope`
    pub fn keys(&self, scope: Option<&Scope>) -> Vec<StreamKey> {
        self.streams
            .read()
            .keys()
            .filter(|k| scope.map_or(true, |s| s.contains(k)))
            .cloned()
            .collect()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Drop hot datapoints below `index`. Returns how many were dropped.
    pub fn trim(&self, key: &StreamKey, index: i64) -> Result<usize> {
        Ok(self.trim_in(key, None, index)?.unwrap_or(0))
    }

    /// Trim a promoted batch out of the hot tier.
    ///
    /// `None` if the reference's generation of the stream no longer exists;
    /// nothing is trimmed then.
    pub fn trim_batch(&self, reference: &BatchRef) -> Result<Option<usize>> {
        self.trim_in(&reference.key, Some(reference.generation), reference.end)
    }

    fn trim_in(&self, key: &StreamKey, generation: Option<u64>, index: i64) -> Result<Option<usize>> {
        let (dropped, due) = {
            let _gate = self.gate.read();
            let slot = match self.slot(key) {
                Some(slot) => slot,
                None => return Ok(None),
            };
            let mut stream = slot.lock();
            if stream.deleted || generation.map_or(false, |g| g != stream.generation()) {
                return Ok(None);
            }
            if index <= stream.floor() {
                return Ok(Some(0));
            }

            let due = self.log(&Operation::Trim {
                key: key.clone(),
                index,
            })?;
            let dropped = stream.trim(index);
            tracing::debug!("Trimmed {} hot datapoints of {} below {}", dropped, key, index);
            (dropped, due)
        };

        self.checkpoint_if(due);
        Ok(Some(dropped))
    }

    /// Remove every stream in `scope` and its queued references.
    ///
    /// Each key is removed atomically; a wildcard scope is not atomic as a
    /// whole, so an insert racing the delete may recreate a key that was
    /// already visited.
    pub fn delete(&self, scope: &Scope) -> Result<usize> {
        let mut removed = 0;
        let mut due = false;
        {
            let _gate = self.gate.read();
            for key in self.keys(Some(scope)) {
                let slot = match self.slot(&key) {
                    Some(slot) => slot,
                    None => continue,
                };
                let mut stream = slot.lock();
                if stream.deleted {
                    continue;
                }

                due |= self.log(&Operation::Delete {
                    scope: Scope::Substream(key.clone()),
                })?;
                self.unlink(&key, &mut stream, true);
                Self::release(&self.owner_counter(&key.owner), stream.meta().size_bytes);
                self.queue.remove_scope(&Scope::Substream(key.clone()));
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!("Deleted {} hot streams in {}", removed, scope);
        }
        self.checkpoint_if(due);
        Ok(removed)
    }

    // =========================================================================
    // Batch Queue
    // =========================================================================

    pub fn queue(&self) -> &BatchQueue {
        &self.queue
    }

    /// Blocking dequeue of the next batch reference
    pub fn dequeue(&self, timeout: Option<Duration>) -> Option<BatchRef> {
        self.queue.dequeue(timeout)
    }

    pub fn heartbeat(&self, reference: &BatchRef) -> bool {
        self.queue.heartbeat(reference)
    }

    /// Finish a reference: remove it from processing and log the ack
    pub fn ack(&self, reference: &BatchRef) -> Result<bool> {
        let due = {
            let _gate = self.gate.read();
            match &self.wal {
                None => return Ok(self.queue.ack(reference)),
                Some(wal) => {
                    let mut wal = wal.lock();
                    if !self.queue.ack(reference) {
                        return Ok(false);
                    }
                    wal.append(&Operation::Ack {
                        batch: reference.clone(),
                    })?;
                    self.settings.checkpoint_bytes > 0 && wal.size() >= self.settings.checkpoint_bytes
                }
            }
        };

        self.checkpoint_if(due);
        Ok(true)
    }

    pub fn requeue_stale(&self, lease_timeout: Duration) -> usize {
        self.queue.requeue_stale(lease_timeout)
    }

    /// Wake blocked dequeuers; they return `None`
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    // =========================================================================
    // Durability
    // =========================================================================

    /// Write a snapshot of the hot tier and truncate the WAL.
    ///
    /// No-op when hot durability is disabled.
    pub fn checkpoint(&self) -> Result<()> {
        let (wal, path) = match (&self.wal, &self.snapshot_path) {
            (Some(wal), Some(path)) => (wal, path),
            _ => return Ok(()),
        };

        let _gate = self.gate.write();
        let mut wal = wal.lock();

        let streams = self
            .streams
            .read()
            .iter()
            .map(|(key, slot)| {
                let stream = slot.lock();
                StreamState {
                    key: key.clone(),
                    meta: *stream.meta(),
                    points: stream.points().cloned().collect(),
                }
            })
            .collect();

        let snapshot = HotSnapshot {
            last_lsn: wal.last_lsn(),
            pending_queue: self.queue.pending_name().to_string(),
            processing_queue: self.queue.processing_name().to_string(),
            streams,
            outstanding: self.queue.outstanding(),
            retired: self
                .retired
                .read()
                .iter()
                .map(|(key, generation)| (key.clone(), *generation))
                .collect(),
        };
        snapshot.write(path)?;
        wal.truncate()?;

        tracing::info!(
            "Checkpointed {} hot streams at lsn {}",
            snapshot.streams.len(),
            snapshot.last_lsn
        );
        Ok(())
    }

    /// Flush buffered WAL entries to disk
    pub fn sync(&self) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.lock().sync()?;
        }
        Ok(())
    }

    /// Size of the WAL file in bytes (0 without durability)
    pub fn wal_size(&self) -> u64 {
        self.wal.as_ref().map(|w| w.lock().size()).unwrap_or(0)
    }

    pub fn is_durable(&self) -> bool {
        self.wal.is_some()
    }
}
