//! WAL Writer
//!
//! Appends framed entries to the WAL file and fsyncs according to the
//! configured strategy.
//!
//! A failed append leaves the file as it was before the append: a torn frame
//! or an unsynced frame is cut off again. If that cut fails too, the writer
//! refuses every later append, since anything written after a torn frame
//! would be lost on replay.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{Result, TierError};

use super::entry::{encode_frame, now_millis};
use super::Operation;

/// Writes entries to the WAL file
pub struct WalWriter {
    path: PathBuf,
    file: File,
    /// LSN the next append receives
    next_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Appends since the last fsync
    unsynced: usize,
    /// Bytes currently in the file
    size: u64,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
    #[cfg(test)]
    fault: Option<Fault>,
}

impl WalWriter {
    /// Open or create a WAL file.
    ///
    /// `last_lsn` is the highest LSN already durable (in the file or in a
    /// checkpoint); numbering continues after it.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy, last_lsn: u64) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            next_lsn: last_lsn + 1,
            sync_strategy,
            unsynced: 0,
            size,
            poisoned: false,
            #[cfg(test)]
            fault: None,
        })
    }

    /// Append an operation; returns the LSN it was logged under.
    ///
    /// On error nothing was logged and the LSN is not consumed.
    pub fn append(&mut self, operation: &Operation) -> Result<u64> {
        if self.poisoned {
            return Err(TierError::WalCorruption(format!(
                "{} holds a torn entry that could not be removed",
                self.path.display()
            )));
        }

        let lsn = self.next_lsn;
        let bytes = encode_frame(lsn, operation, now_millis())?;
        let previous = self.size;

        if let Err(e) = self.write_and_sync(&bytes) {
            self.roll_back(previous);
            return Err(e);
        }

        self.size += bytes.len() as u64;
        self.next_lsn += 1;
        Ok(lsn)
    }

    fn write_and_sync(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_frame(bytes)?;
        self.unsynced += 1;

        let due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count.max(1),
        };
        if due {
            self.sync()?;
        }
        Ok(())
    }

    /// Cut the file back to `previous` bytes after a failed append
    fn roll_back(&mut self, previous: u64) {
        match self.file.set_len(previous).and_then(|_| self.file.sync_data()) {
            Ok(()) => {
                self.size = previous;
                self.unsynced = 0;
            }
            Err(e) => {
                tracing::error!(
                    "Could not cut {} back to {} bytes, refusing further appends: {}",
                    self.path.display(),
                    previous,
                    e
                );
                self.poisoned = true;
            }
        }
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        if self.unsynced > 0 {
            self.sync_file()?;
            self.unsynced = 0;
        }
        Ok(())
    }

    /// Empty the file after a checkpoint. LSN numbering is not reset.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.size = 0;
        self.unsynced = 0;
        self.poisoned = false;
        Ok(())
    }

    /// LSN the next append will receive
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// LSN of the most recent append (0 if none)
    pub fn last_lsn(&self) -> u64 {
        self.next_lsn - 1
    }

    /// Bytes currently held in the WAL file
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    // =========================================================================
    // File Access
    // =========================================================================

    #[cfg(not(test))]
    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)
    }

    #[cfg(not(test))]
    fn sync_file(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    #[cfg(test)]
    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.fault.take() {
            Some(Fault::TornWrite { written }) => {
                self.file.write_all(&bytes[..written.min(bytes.len())])?;
                Err(io::Error::new(io::ErrorKind::Other, "injected torn write"))
            }
            other => {
                self.fault = other;
                self.file.write_all(bytes)
            }
        }
    }

    #[cfg(test)]
    fn sync_file(&mut self) -> io::Result<()> {
        match self.fault.take() {
            Some(Fault::Sync) => Err(io::Error::new(io::ErrorKind::Other, "injected sync failure")),
            other => {
                self.fault = other;
                self.file.sync_data()
            }
        }
    }
}

/// Failure injected into the next write or sync
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Write only the first `written` bytes of the frame, then fail
    TornWrite { written: usize },
    Sync,
}
