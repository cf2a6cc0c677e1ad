//! WAL Entry definitions
//!
//! One entry per hot tier mutation. Inserts log the datapoints after
//! restamping together with the batch references they completed, so replay
//! never re-runs validation.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::datapoint::{Datapoint, Scope, StreamKey};
use crate::error::{Result, TierError};
use crate::hot::BatchRef;

/// Frame header: LSN (8) + CRC (4) + data length (4)
pub const HEADER_SIZE: usize = 16;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number, strictly increasing
    pub lsn: u64,

    /// The mutation
    pub operation: Operation,

    /// Unix millis when the entry was created
    pub timestamp: u64,
}

/// Hot tier mutations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Datapoints appended to a stream, and the batches the append completed
    Insert {
        key: StreamKey,
        /// Generation of the key; replay creates the stream in it
        generation: u64,
        points: Vec<Datapoint>,
        size: u64,
        batches: Vec<BatchRef>,
    },

    /// Hot datapoints below `index` dropped after promotion
    Trim { key: StreamKey, index: i64 },

    /// Stream keys removed
    Delete { scope: Scope },

    /// A batch reference left the processing queue
    Ack { batch: BatchRef },
}

impl Operation {
    /// Stream key the operation applies to, if it names exactly one
    pub fn key(&self) -> Option<&StreamKey> {
        match self {
            Operation::Insert { key, .. } | Operation::Trim { key, .. } => Some(key),
            Operation::Ack { batch } => Some(&batch.key),
            Operation::Delete { scope: Scope::Substream(key) } => Some(key),
            Operation::Delete { .. } => None,
        }
    }
}

impl WalEntry {
    pub fn new(lsn: u64, operation: Operation) -> Self {
        Self {
            lsn,
            operation,
            timestamp: now_millis(),
        }
    }

    /// Encode as a frame: `[lsn][crc][len][bincode(operation, timestamp)]`.
    ///
    /// The CRC covers the LSN, the length and the data.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode_frame(self.lsn, &self.operation, self.timestamp)
    }

    /// Decode one complete frame.
    ///
    /// Returns `WalCorruption` for short buffers and checksum mismatches.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::parse(bytes)?;
        let end = HEADER_SIZE + header.len as usize;
        if bytes.len() < end {
            return Err(TierError::WalCorruption(format!(
                "Entry {} truncated: need {} bytes, have {}",
                header.lsn,
                end,
                bytes.len()
            )));
        }

        let data = &bytes[HEADER_SIZE..end];
        let actual = frame_crc(header.lsn, header.len, data);
        if actual != header.crc {
            return Err(TierError::WalCorruption(format!(
                "CRC mismatch at LSN {}: stored {:08x}, computed {:08x}",
                header.lsn, header.crc, actual
            )));
        }

        let (operation, timestamp): (Operation, u64) = bincode::deserialize(data)
            .map_err(|e| TierError::WalCorruption(format!("Undecodable entry {}: {}", header.lsn, e)))?;
        Ok(Self {
            lsn: header.lsn,
            operation,
            timestamp,
        })
    }

    /// Size of the encoded frame
    pub fn serialized_size(&self) -> Result<usize> {
        let data = bincode::serialized_size(&(&self.operation, self.timestamp))?;
        Ok(HEADER_SIZE + data as usize)
    }

    /// CRC the frame would carry
    pub fn compute_crc(&self) -> Result<u32> {
        let data = bincode::serialize(&(&self.operation, self.timestamp))?;
        Ok(frame_crc(self.lsn, data.len() as u32, &data))
    }
}

/// Fixed-size frame header
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub lsn: u64,
    pub crc: u32,
    pub len: u32,
}

impl FrameHeader {
    pub(crate) fn parse(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(TierError::WalCorruption(format!(
                "Header needs {} bytes, have {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        Ok(Self {
            lsn: bytes.get_u64_le(),
            crc: bytes.get_u32_le(),
            len: bytes.get_u32_le(),
        })
    }
}

/// Encode a frame for a borrowed operation
pub(crate) fn encode_frame(lsn: u64, operation: &Operation, timestamp: u64) -> Result<Vec<u8>> {
    let data = bincode::serialize(&(operation, timestamp))?;
    let len = u32::try_from(data.len())
        .map_err(|_| TierError::Serialization("WAL entry exceeds 4 GiB".to_string()))?;
    let crc = frame_crc(lsn, len, &data);

    let mut buf = Vec::with_capacity(HEADER_SIZE + data.len());
    buf.put_u64_le(lsn);
    buf.put_u32_le(crc);
    buf.put_u32_le(len);
    buf.put_slice(&data);
    Ok(buf)
}

/// Unix millis, 0 if the clock is before the epoch
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn frame_crc(lsn: u64, len: u32, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_le_bytes());
    hasher.update(&len.to_le_bytes());
    hasher.update(data);
    hasher.finalize()
}
