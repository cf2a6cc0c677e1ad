//! Configuration for tierstream
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, TierError};

/// Main configuration for a tierstream instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── hot.wal          (hot tier write-ahead log)
    ///     ├── hot.snapshot     (last hot tier checkpoint)
    ///     └── cold/            (immutable batch files)
    pub data_dir: PathBuf,

    /// Datapoints per promoted batch
    pub batch_size: u64,

    /// Name of the queue holding batches waiting for promotion
    pub pending_queue: String,

    /// Name of the queue holding batches currently being promoted
    pub processing_queue: String,

    // -------------------------------------------------------------------------
    // Hot Tier Durability
    // -------------------------------------------------------------------------
    /// Log hot tier mutations to a WAL (false = memory only)
    pub hot_durability: bool,

    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// WAL size (bytes) after which the hot tier is checkpointed
    pub wal_checkpoint_bytes: u64,

    // -------------------------------------------------------------------------
    // Cold Tier Configuration
    // -------------------------------------------------------------------------
    /// Encoding for batch blobs
    pub compression: Compression,

    // -------------------------------------------------------------------------
    // Promotion Pipeline Configuration
    // -------------------------------------------------------------------------
    /// Number of promotion worker threads
    pub pipeline_workers: usize,

    /// A processing entry without heartbeat for this long is requeued
    pub lease_timeout: Duration,

    /// How often the lease sweeper runs
    pub lease_sweep_interval: Duration,

    /// Initial backoff after a backend failure
    pub retry_backoff: Duration,

    /// Backoff ceiling
    pub max_backoff: Duration,

    // -------------------------------------------------------------------------
    // Limits
    // -------------------------------------------------------------------------
    /// Max bytes per owner (0 = unlimited)
    pub max_owner_bytes: u64,

    /// Max bytes per stream key (0 = unlimited)
    pub max_stream_bytes: u64,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Cold tier blob encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Plain bincode datapoint array
    None,

    /// Zstd-compressed bincode datapoint array
    Zstd { level: i32 },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tierstream_data"),
            batch_size: 250,
            pending_queue: "BATCHLIST".to_string(),
            processing_queue: "BATCHPROCESSING".to_string(),
            hot_durability: true,
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            wal_checkpoint_bytes: 64 * 1024 * 1024, // 64 MB
            compression: Compression::Zstd { level: 3 },
            pipeline_workers: 1,
            lease_timeout: Duration::from_secs(60),
            lease_sweep_interval: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            max_owner_bytes: 0,
            max_stream_bytes: 0,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TierError::Config("batch_size must be at least 1".to_string()));
        }
        if self.pending_queue == self.processing_queue {
            return Err(TierError::Config(format!(
                "pending and processing queues share the name {:?}",
                self.pending_queue
            )));
        }
        if let Compression::Zstd { level } = self.compression {
            if !(1..=22).contains(&level) {
                return Err(TierError::Config(format!("zstd level {} out of range 1..=22", level)));
            }
        }
        if self.lease_timeout.is_zero() {
            return Err(TierError::Config("lease_timeout must be non-zero".to_string()));
        }
        if self.lease_sweep_interval.is_zero() {
            return Err(TierError::Config("lease_sweep_interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the number of datapoints per batch
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the pending and processing queue names
    pub fn queue_names(mut self, pending: impl Into<String>, processing: impl Into<String>) -> Self {
        self.config.pending_queue = pending.into();
        self.config.processing_queue = processing.into();
        self
    }

    /// Enable or disable the hot tier WAL
    pub fn hot_durability(mut self, enabled: bool) -> Self {
        self.config.hot_durability = enabled;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the WAL size that triggers a checkpoint
    pub fn wal_checkpoint_bytes(mut self, bytes: u64) -> Self {
        self.config.wal_checkpoint_bytes = bytes;
        self
    }

    /// Set the cold tier blob encoding
    pub fn compression(mut self, compression: Compression) -> Self {
        self.config.compression = compression;
        self
    }

    /// Set the number of promotion workers
    pub fn pipeline_workers(mut self, count: usize) -> Self {
        self.config.pipeline_workers = count;
        self
    }

    /// Set the processing lease timeout
    pub fn lease_timeout(mut self, timeout: Duration) -> Self {
        self.config.lease_timeout = timeout;
        self
    }

    /// Set the lease sweep interval
    pub fn lease_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.lease_sweep_interval = interval;
        self
    }

    /// Set the initial and maximum retry backoff
    pub fn retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.retry_backoff = initial;
        self.config.max_backoff = max;
        self
    }

    /// Set the per-owner byte limit (0 = unlimited)
    pub fn max_owner_bytes(mut self, bytes: u64) -> Self {
        self.config.max_owner_bytes = bytes;
        self
    }

    /// Set the per-stream byte limit (0 = unlimited)
    pub fn max_stream_bytes(mut self, bytes: u64) -> Self {
        self.config.max_stream_bytes = bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
