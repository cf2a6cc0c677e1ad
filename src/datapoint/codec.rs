//! Datapoint codec
//!
//! Single datapoints travel through the hot tier and the WAL as bincode.
//! Arrays of datapoints are stored in cold batches as a versioned blob:
//!
//! | Version | Blob                                 |
//! |---------|--------------------------------------|
//! | 1       | bincode `Vec<Datapoint>`             |
//! | 2       | zstd-compressed bincode `Vec<Datapoint>` |

use crate::config::Compression;
use crate::error::{Result, TierError};

use super::Datapoint;

/// Blob version for plain bincode arrays
pub const PLAIN_VERSION: u8 = 1;

/// Blob version for zstd-compressed bincode arrays
pub const ZSTD_VERSION: u8 = 2;

// =============================================================================
// Single Datapoints
// =============================================================================

/// Encode one datapoint to its wire bytes
pub fn encode_datapoint(dp: &Datapoint) -> Result<Vec<u8>> {
    Ok(bincode::serialize(dp)?)
}

/// Decode one datapoint from its wire bytes
pub fn decode_datapoint(bytes: &[u8]) -> Result<Datapoint> {
    Ok(bincode::deserialize(bytes)?)
}

/// Encoded size of a datapoint in bytes (used for size accounting)
pub fn encoded_size(dp: &Datapoint) -> Result<u64> {
    Ok(bincode::serialized_size(dp)?)
}

// =============================================================================
// Datapoint Arrays
// =============================================================================

/// Encode an array according to the configured compression.
///
/// Returns the blob version together with the bytes.
pub fn encode_array(points: &[Datapoint], compression: Compression) -> Result<(u8, Vec<u8>)> {
    let raw = bincode::serialize(points)?;
    match compression {
        Compression::None => Ok((PLAIN_VERSION, raw)),
        Compression::Zstd { level } => {
            let compressed = zstd::encode_all(raw.as_slice(), level)
                .map_err(|e| TierError::Compression(format!("Zstd compression failed: {}", e)))?;
            Ok((ZSTD_VERSION, compressed))
        }
    }
}

/// Decode an array blob of the given version
pub fn decode_array(blob: &[u8], version: u8) -> Result<Vec<Datapoint>> {
    match version {
        PLAIN_VERSION => Ok(bincode::deserialize(blob)?),
        ZSTD_VERSION => {
            let raw = zstd::decode_all(blob)
                .map_err(|e| TierError::Compression(format!("Zstd decompression failed: {}", e)))?;
            Ok(bincode::deserialize(&raw)?)
        }
        other => Err(TierError::Serialization(format!(
            "Unrecognized blob version: {}",
            other
        ))),
    }
}
