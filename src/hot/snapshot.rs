//! Hot tier checkpoint file
//!
//! A checkpoint captures every stream's metadata and hot datapoints plus the
//! outstanding batch references, tagged with the last LSN it covers. After a
//! checkpoint is durable the WAL is truncated; recovery loads the checkpoint
//! and replays only WAL entries with a higher LSN.
//!
//! ## File Format
//! ```text
//! ┌───────────┬─────────────┬──────────┬──────────┬──────────────────┐
//! │ Magic (4) │ Version (2) │ CRC (4)  │ Len (8)  │ bincode body     │
//! └───────────┴─────────────┴──────────┴──────────┴──────────────────┘
//! ```
//! Written to a temp file, fsynced, then renamed over the previous checkpoint.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::datapoint::{Datapoint, StreamKey};
use crate::error::{Result, TierError};

use super::queue::BatchRef;
use super::table::StreamMeta;

const MAGIC: &[u8; 4] = b"TSHS";
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 4 + 2 + 4 + 8;

/// One stream as stored in a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    pub key: StreamKey,
    pub meta: StreamMeta,
    pub points: Vec<Datapoint>,
}

/// Hot tier state at one LSN
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HotSnapshot {
    /// Highest WAL entry reflected in this snapshot
    pub last_lsn: u64,
    pub pending_queue: String,
    pub processing_queue: String,
    pub streams: Vec<StreamState>,
    /// References not yet acked, in-flight ones first
    pub outstanding: Vec<BatchRef>,
    /// Generation the next incarnation of each deleted key will use
    pub retired: Vec<(StreamKey, u64)>,
}

impl HotSnapshot {
    /// Durably replace the checkpoint at `path`
    pub fn write(&self, path: &Path) -> Result<()> {
        let body = bincode::serialize(self)?;
        let crc = crc32fast::hash(&body);

        let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
        buf.put_slice(MAGIC);
        buf.put_u16_le(VERSION);
        buf.put_u32_le(crc);
        buf.put_u64_le(body.len() as u64);
        buf.put_slice(&body);

        let tmp = path.with_extension("snapshot.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        if let Some(dir) = path.parent() {
            // persist the rename
            if let Ok(handle) = File::open(dir) {
                let _ = handle.sync_all();
            }
        }
        Ok(())
    }

    /// Load the checkpoint at `path`, `None` if there is none
    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let mut raw = Vec::new();
        File::open(path)?.read_to_end(&mut raw)?;

        if raw.len() < HEADER_SIZE || &raw[0..4] != MAGIC {
            return Err(TierError::WalCorruption(format!(
                "{} is not a hot tier snapshot",
                path.display()
            )));
        }
        let mut header = &raw[4..HEADER_SIZE];
        let version = header.get_u16_le();
        let crc = header.get_u32_le();
        let len = header.get_u64_le() as usize;

        if version != VERSION {
            return Err(TierError::WalCorruption(format!(
                "Unsupported snapshot version {}",
                version
            )));
        }
        let body = raw
            .get(HEADER_SIZE..HEADER_SIZE + len)
            .ok_or_else(|| TierError::WalCorruption("Snapshot truncated".to_string()))?;
        if crc32fast::hash(body) != crc {
            return Err(TierError::WalCorruption("Snapshot CRC mismatch".to_string()));
        }

        Ok(Some(bincode::deserialize(body)?))
    }
}
