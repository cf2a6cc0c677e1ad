//! WAL Reader
//!
//! Sequential reader over framed entries. A short header or short data at
//! the end of the file is treated as a torn write and ends the stream; a
//! checksum mismatch is reported as `WalCorruption`.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{Result, TierError};

use super::entry::FrameHeader;
use super::{WalEntry, HEADER_SIZE};

/// Reads entries from the WAL file
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset just past the last complete entry returned
    position: u64,
    file_len: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            file_len,
        })
    }

    /// Read the next entry.
    ///
    /// `Ok(None)` at a clean end of file or at a partial trailing frame.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        let mut header = [0u8; HEADER_SIZE];
        if !read_full(&mut self.reader, &mut header)? {
            return Ok(None);
        }
        let parsed = FrameHeader::parse(&header)?;

        // a length running past the end of the file is a torn write
        let frame_end = self.position + (HEADER_SIZE as u64) + parsed.len as u64;
        if frame_end > self.file_len {
            return Ok(None);
        }

        let mut frame = Vec::with_capacity(HEADER_SIZE + parsed.len as usize);
        frame.extend_from_slice(&header);
        frame.resize(HEADER_SIZE + parsed.len as usize, 0);
        if !read_full(&mut self.reader, &mut frame[HEADER_SIZE..])? {
            return Ok(None);
        }

        let entry = WalEntry::deserialize(&frame)?;
        self.position += frame.len() as u64;
        Ok(Some(entry))
    }

    /// Offset just past the last complete entry read
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Iterate over entries until the end or the first error
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }
}

/// Fill `buf` completely. Returns false if the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TierError::Io(e)),
        }
    }
    Ok(true)
}

/// Iterator over WAL entries
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
