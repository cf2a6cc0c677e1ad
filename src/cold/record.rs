//! Batch record format
//!
//! ```text
//! ┌───────────┬─────────────┬──────────────┬───────────┬───────────┬─────────┐
//! │ Magic (4) │ Format (2)  │ Encoding (1) │ Count (4) │ Start (8) │ End (8) │
//! ├───────────┴──────┬──────┴──────────────┴───┬───────┴──────┬────┴─────────┤
//! │ End time f64 (8) │ Generation (8)          │ Blob len (4) │ Blob CRC (4) │
//! ├──────────────────┴─────────────────────────┴──────────────┴──────────────┤
//! │ Blob (encoded datapoint array)                                           │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//! Integers are little endian. The header alone is enough to rebuild the
//! batch index; the blob is only read on demand.

use bytes::{Buf, BufMut};

use crate::config::Compression;
use crate::datapoint::codec::{decode_array, encode_array};
use crate::datapoint::{Datapoint, StreamKey};
use crate::error::{Result, TierError};

use super::{Batch, BatchMeta};

pub const RECORD_MAGIC: &[u8; 4] = b"TSBT";
pub const FORMAT_VERSION: u16 = 1;
pub const RECORD_HEADER_SIZE: usize = 4 + 2 + 1 + 4 + 8 + 8 + 8 + 8 + 4 + 4;

/// Header fields of a record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordHeader {
    pub version: u8,
    pub count: u32,
    pub start: i64,
    pub end: i64,
    pub end_time: f64,
    pub generation: u64,
    pub blob_len: u32,
    pub crc: u32,
}

impl RecordHeader {
    pub fn into_meta(self, key: StreamKey) -> BatchMeta {
        BatchMeta {
            key,
            start: self.start,
            end: self.end,
            end_time: self.end_time,
            version: self.version,
            blob_len: self.blob_len,
            generation: self.generation,
        }
    }
}

/// Encode a batch as header + blob
pub fn encode_record(batch: &Batch, compression: Compression) -> Result<Vec<u8>> {
    let (version, blob) = encode_array(&batch.points, compression)?;
    let blob_len = u32::try_from(blob.len())
        .map_err(|_| TierError::Serialization(format!("Batch {} blob exceeds 4 GiB", batch.reference())))?;

    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + blob.len());
    buf.put_slice(RECORD_MAGIC);
    buf.put_u16_le(FORMAT_VERSION);
    buf.put_u8(version);
    buf.put_u32_le(batch.points.len() as u32);
    buf.put_u64_le(batch.start as u64);
    buf.put_u64_le(batch.end as u64);
    buf.put_f64_le(batch.end_time());
    buf.put_u64_le(batch.generation);
    buf.put_u32_le(blob_len);
    buf.put_u32_le(crc32fast::hash(&blob));
    buf.put_slice(&blob);
    Ok(buf)
}

/// Parse and check a record header
pub fn decode_header(bytes: &[u8]) -> Result<RecordHeader> {
    if bytes.len() < RECORD_HEADER_SIZE {
        return Err(TierError::BatchCorruption(format!(
            "Header needs {} bytes, have {}",
            RECORD_HEADER_SIZE,
            bytes.len()
        )));
    }
    if &bytes[0..4] != RECORD_MAGIC {
        return Err(TierError::BatchCorruption("Bad magic".to_string()));
    }

    let mut buf = &bytes[4..RECORD_HEADER_SIZE];
    let format = buf.get_u16_le();
    if format != FORMAT_VERSION {
        return Err(TierError::BatchCorruption(format!(
            "Unsupported record format {}",
            format
        )));
    }
    let header = RecordHeader {
        version: buf.get_u8(),
        count: buf.get_u32_le(),
        start: buf.get_u64_le() as i64,
        end: buf.get_u64_le() as i64,
        end_time: buf.get_f64_le(),
        generation: buf.get_u64_le(),
        blob_len: buf.get_u32_le(),
        crc: buf.get_u32_le(),
    };
    if header.end - header.start != header.count as i64 {
        return Err(TierError::BatchCorruption(format!(
            "Range [{}, {}) does not match count {}",
            header.start, header.end, header.count
        )));
    }
    Ok(header)
}

/// Decode a whole record, verifying the blob checksum
pub fn decode_record(bytes: &[u8]) -> Result<(RecordHeader, Vec<Datapoint>)> {
    let header = decode_header(bytes)?;
    let blob = bytes
        .get(RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + header.blob_len as usize)
        .ok_or_else(|| {
            TierError::BatchCorruption(format!(
                "Blob of [{}, {}) truncated",
                header.start, header.end
            ))
        })?;
    if crc32fast::hash(blob) != header.crc {
        return Err(TierError::BatchCorruption(format!(
            "CRC mismatch in batch [{}, {})",
            header.start, header.end
        )));
    }

    let points = decode_array(blob, header.version)?;
    if points.len() != header.count as usize {
        return Err(TierError::BatchCorruption(format!(
            "Batch [{}, {}) decoded {} datapoints",
            header.start,
            header.end,
            points.len()
        )));
    }
    Ok((header, points))
}
