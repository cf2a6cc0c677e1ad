//! Engine Module
//!
//! `StreamDb` ties the hot tier, the cold tier and the promotion pipeline
//! together behind the stream API.
//!
//! ## Responsibilities
//! - Open both tiers under one data directory and recover the hot tier
//! - Route writes to the hot tier and reads through the range module
//! - Delete from both tiers, sparing a stream recreated in the meantime
//! - Start the promotion pipeline and checkpoint on close

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::cold::{ColdStore, FileColdStore, MemoryColdStore};
use crate::config::Config;
use crate::datapoint::{Datapoint, Scope, StreamKey};
use crate::error::Result;
use crate::hot::{HotCache, StreamMeta};
use crate::pipeline::{PipelineHandle, Promoter};
use crate::range::{self, DataRange};

/// The stream database
///
/// ## Concurrency Model
/// - Every method takes `&self`; share it behind an `Arc`.
/// - Writes to one stream key are serialized by that key's lock in the hot
///   tier; writes to different keys run in parallel.
/// - Reads never block promotion. A range that starts below the hot floor
///   reads archived batches and then the hot tail.
pub struct StreamDb {
    config: Config,
    hot: Arc<HotCache>,
    cold: Arc<dyn ColdStore>,
}

impl StreamDb {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const COLD_DIR: &'static str = "cold";

    /// Open or create a database with the given config
    ///
    /// On startup:
    /// 1. Validate the config and create the data directory
    /// 2. Open the cold store (rebuilds its batch index)
    /// 3. Recover the hot tier from snapshot + WAL, requeueing references
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let cold_dir = config.data_dir.join(Self::COLD_DIR);
        let cold: Arc<dyn ColdStore> = Arc::new(FileColdStore::open(&cold_dir, config.compression)?);
        Self::with_cold_store(config, cold)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let mut config = Config::default();
        config.data_dir = path.to_path_buf();
        Self::open(config)
    }

    /// A database that keeps everything in memory
    pub fn in_memory(mut config: Config) -> Result<Self> {
        config.hot_durability = false;
        let cold: Arc<dyn ColdStore> = Arc::new(MemoryColdStore::new(config.compression));
        Self::with_cold_store(config, cold)
    }

    /// Use a caller-supplied cold store
    pub fn with_cold_store(config: Config, cold: Arc<dyn ColdStore>) -> Result<Self> {
        config.validate()?;
        let hot = Arc::new(HotCache::open(&config)?);

        // archived keys the hot tier no longer knows are recreated in a
        // newer generation than anything stored for them
        for key in cold.keys() {
            if let Some(newest) = cold.batches(&key).iter().map(|m| m.generation).max() {
                hot.reserve_generation(&key, newest + 1);
            }
        }

        tracing::info!(
            "Opened stream db at {} ({} hot streams, {} cold batches, durability={})",
            config.data_dir.display(),
            hot.keys(None).len(),
            cold.batch_count(),
            hot.is_durable()
        );
        Ok(Self { config, hot, cold })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Append datapoints to a stream; returns the new length.
    ///
    /// With `restamp`, datapoints older than the stream's newest one are moved
    /// forward to just after it instead of rejecting the insert.
    pub fn insert(&self, key: &StreamKey, points: Vec<Datapoint>, restamp: bool) -> Result<i64> {
        self.hot.insert(key, points, restamp)
    }

    /// Delete every substream of `stream`
    pub fn delete_stream(&self, owner: &str, stream: &str) -> Result<()> {
        self.delete(&Scope::Stream {
            owner: owner.to_string(),
            stream: stream.to_string(),
        })
    }

    /// Delete one substream
    pub fn delete_substream(&self, key: &StreamKey) -> Result<()> {
        self.delete(&Scope::Substream(key.clone()))
    }

    /// Delete everything under an owner
    pub fn delete_owner(&self, owner: &str) -> Result<()> {
        self.delete(&Scope::Owner(owner.to_string()))
    }

    fn delete(&self, scope: &Scope) -> Result<()> {
        // hot first so the pipeline stops archiving into the scope
        self.hot.delete(scope)?;
        for key in self.cold.keys().into_iter().filter(|k| scope.contains(k)) {
            // a stream recreated since the hot delete keeps its batches
            self.cold.delete_before(&key, self.hot.next_generation(&key))?;
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Total datapoints ever inserted (0 for unknown streams)
    pub fn length_of(&self, key: &StreamKey) -> Result<i64> {
        Ok(self.hot.length(key))
    }

    /// Iterate `[i1, i2)` with python slice semantics
    pub fn get_index_range(&self, key: &StreamKey, i1: i64, i2: i64) -> Result<Box<dyn DataRange>> {
        range::index_range(&self.hot, &self.cold, key, i1, i2)
    }

    /// Iterate datapoints with `t1 < timestamp <= t2`
    ///
    /// `t2 <= 0` reads to the end; `limit = 0` is unlimited.
    pub fn get_time_range(
        &self,
        key: &StreamKey,
        t1: f64,
        t2: f64,
        limit: usize,
    ) -> Result<Box<dyn DataRange>> {
        range::time_range(&self.hot, &self.cold, key, t1, t2, limit)
    }

    /// Index of the first datapoint after `t`, or the length if none
    pub fn time_to_index(&self, key: &StreamKey, t: f64) -> Result<i64> {
        range::time_to_index(&self.hot, self.cold.as_ref(), key, t)
    }

    /// Encoded bytes ever accepted for a stream
    pub fn stream_size(&self, key: &StreamKey) -> u64 {
        self.hot.stream_size(key)
    }

    /// Encoded bytes ever accepted across an owner's streams
    pub fn owner_size(&self, owner: &str) -> u64 {
        self.hot.owner_size(owner)
    }

    pub fn metadata(&self, key: &StreamKey) -> Option<StreamMeta> {
        self.hot.metadata(key)
    }

    /// Every known stream key
    pub fn streams(&self) -> Vec<StreamKey> {
        self.hot.keys(None)
    }

    // =========================================================================
    // Pipeline & Lifecycle
    // =========================================================================

    /// Start background promotion. Dropping the handle stops it.
    pub fn start_pipeline(&self) -> Result<PipelineHandle> {
        PipelineHandle::start(self.promoter(), &self.config)
    }

    /// Promoter for running promotions on the calling thread
    pub fn promoter(&self) -> Promoter {
        Promoter::new(Arc::clone(&self.hot), Arc::clone(&self.cold))
    }

    /// Snapshot the hot tier and truncate its WAL
    pub fn checkpoint(&self) -> Result<()> {
        self.hot.checkpoint()
    }

    /// Close the database gracefully
    ///
    /// Wakes blocked pipeline workers and checkpoints the hot tier.
    pub fn close(self) -> Result<()> {
        self.hot.shutdown();
        self.hot.sync()?;
        self.hot.checkpoint()?;
        tracing::info!("Closed stream db at {}", self.config.data_dir.display());
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn hot(&self) -> &Arc<HotCache> {
        &self.hot
    }

    pub fn cold(&self) -> &Arc<dyn ColdStore> {
        &self.cold
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }
}
