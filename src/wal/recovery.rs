//! WAL Recovery
//!
//! Reads every intact entry and cuts the file back to the end of the last
//! one. Replay stops at the first corrupt entry: anything after it cannot be
//! trusted to be in order.

use std::fs::{self, OpenOptions};
use std::path::Path;

use crate::error::{Result, TierError};

use super::{WalEntry, WalReader};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted entries found (replay stops at the first)
    pub entries_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether bytes past the last valid entry were (or would be) removed
    pub was_truncated: bool,
}

impl WalRecovery {
    /// Recover entries from a WAL file, truncating any torn or corrupt tail
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let (entries, result, valid_len) = Self::scan(path)?;

        if result.was_truncated {
            tracing::warn!(
                "Truncating WAL {} to {} bytes after entry {}",
                path.display(),
                valid_len,
                result.last_lsn
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        Ok((entries, result))
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let (_, result, _) = Self::scan(path)?;
        Ok(result)
    }

    fn scan(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult, u64)> {
        let file_len = fs::metadata(path)?.len();
        let mut reader = WalReader::open(path)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    result.entries_recovered += 1;
                    result.last_lsn = entry.lsn;
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(TierError::WalCorruption(reason)) => {
                    tracing::warn!("WAL {}: {}", path.display(), reason);
                    result.entries_corrupted += 1;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let valid_len = reader.position();
        result.was_truncated = valid_len < file_len;
        Ok((entries, result, valid_len))
    }
}
