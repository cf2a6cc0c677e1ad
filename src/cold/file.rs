//! File-backed cold store
//!
//! One file per batch:
//! ```text
//!   {cold_dir}/
//!     └── o{hex owner}/
//!           └── s{hex stream}/
//!                 └── u{hex substream}/
//!                       ├── batch_000000000000_000000000250.blk
//!                       └── batch_000000000250_000000000500.blk
//! ```
//! Names are hex encoded so any owner or stream name (including the empty
//! primary substream) is a valid path component.
//!
//! A record is written to a temp file, fsynced, then hard-linked to its
//! final name. The link fails if the name exists, which is how duplicate
//! batches are detected. Files left by an older generation of the key are
//! removed before the first batch of a newer one is linked.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::Compression;
use crate::datapoint::{Datapoint, Scope, StreamKey};
use crate::error::{Result, TierError};
use crate::hot::BatchRef;

use super::index::MetaIndex;
use super::record::{decode_header, decode_record, encode_record, RECORD_HEADER_SIZE};
use super::{Batch, BatchMeta, ColdStore};

const OWNER_PREFIX: char = 'o';
const STREAM_PREFIX: char = 's';
const SUBSTREAM_PREFIX: char = 'u';
const TMP_PREFIX: &str = ".tmp_";

/// Outcome of [`FileColdStore::verify`]
#[derive(Debug, Default)]
pub struct ColdVerifyReport {
    /// Batch files read and decoded
    pub checked: usize,
    /// Batch files that failed to decode, with the error
    pub unreadable: Vec<(PathBuf, String)>,
    /// Temp files left by interrupted inserts
    pub abandoned_tmp: usize,
}

/// Durable batch store on the local filesystem
pub struct FileColdStore {
    dir: PathBuf,
    compression: Compression,
    index: MetaIndex,
    /// Distinguishes temp files of concurrent writers
    next_tmp: AtomicU64,
}

impl FileColdStore {
    /// Open or create a store, rebuilding the batch index from disk
    pub fn open(dir: &Path, compression: Compression) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let store = Self {
            dir: dir.to_path_buf(),
            compression,
            index: MetaIndex::new(),
            next_tmp: AtomicU64::new(0),
        };

        let mut loaded = 0;
        for (stream_dir, key) in stream_dirs(dir)? {
            loaded += store.load_stream(&stream_dir, &key)?;
        }

        tracing::info!("Opened cold store at {} with {} batches", dir.display(), loaded);
        Ok(store)
    }

    /// Index every batch file of one stream directory
    fn load_stream(&self, dir: &Path, key: &StreamKey) -> Result<usize> {
        let mut loaded = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };

            if name.starts_with(TMP_PREFIX) {
                tracing::debug!("Removing abandoned temp file {}", path.display());
                let _ = fs::remove_file(&path);
                continue;
            }
            if parse_batch_name(&name).is_none() {
                continue;
            }

            match read_meta(&path, key) {
                Ok(meta) => {
                    if self.index.insert(meta) {
                        loaded += 1;
                    }
                }
                Err(e) => tracing::warn!("Skipping unreadable batch {}: {}", path.display(), e),
            }
        }
        Ok(loaded)
    }

    /// Check every batch file under `dir` without changing anything on
    /// disk. Temp files are counted, not removed; a missing directory is an
    /// empty store.
    pub fn verify(dir: &Path) -> Result<ColdVerifyReport> {
        let mut report = ColdVerifyReport::default();
        if !dir.exists() {
            return Ok(report);
        }

        for (stream_dir, _) in stream_dirs(dir)? {
            for entry in fs::read_dir(&stream_dir)? {
                let path = entry?.path();
                let name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                if name.starts_with(TMP_PREFIX) {
                    report.abandoned_tmp += 1;
                    continue;
                }
                if parse_batch_name(&name).is_none() {
                    continue;
                }

                report.checked += 1;
                let mut bytes = Vec::new();
                let decoded = File::open(&path)
                    .and_then(|mut file| file.read_to_end(&mut bytes))
                    .map_err(TierError::from)
                    .and_then(|_| decode_record(&bytes));
                if let Err(e) = decoded {
                    report.unreadable.push((path, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stream_dir(&self, key: &StreamKey) -> PathBuf {
        self.dir
            .join(encode_component(OWNER_PREFIX, &key.owner))
            .join(encode_component(STREAM_PREFIX, &key.stream))
            .join(encode_component(SUBSTREAM_PREFIX, &key.substream))
    }

    /// Path of the file holding `[start, end)` of a stream
    pub fn batch_path(&self, key: &StreamKey, start: i64, end: i64) -> PathBuf {
        self.stream_dir(key).join(batch_name(start, end))
    }

    /// Remove the files of unindexed batches, then prune now-empty
    /// substream, stream and owner directories
    fn remove_files(&self, removed: &[BatchMeta]) -> Result<()> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for meta in removed {
            let path = self.batch_path(&meta.key, meta.start, meta.end);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            let dir = self.stream_dir(&meta.key);
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }

        for dir in dirs {
            let mut current = Some(dir.as_path());
            while let Some(d) = current {
                if d == self.dir || fs::remove_dir(d).is_err() {
                    break;
                }
                current = d.parent();
            }
        }
        Ok(())
    }
}

impl ColdStore for FileColdStore {
    fn insert(&self, batch: &Batch) -> Result<()> {
        let reference = batch.reference();
        if self.index.contains(&reference) {
            return Err(TierError::DuplicateBatch(reference.to_string()));
        }
        if let Some(newest) = self.index.newest_generation(&batch.key) {
            if newest > batch.generation {
                return Err(TierError::Consistency(format!(
                    "Batch {} is older than archived generation {}",
                    reference, newest
                )));
            }
            if newest < batch.generation {
                let stale = self.index.remove_before(&batch.key, batch.generation);
                tracing::info!("Removing {} cold batches of earlier generations of {}", stale.len(), batch.key);
                self.remove_files(&stale)?;
            }
        }

        let bytes = encode_record(batch, self.compression)?;
        let meta = decode_header(&bytes)?.into_meta(batch.key.clone());

        let dir = self.stream_dir(&batch.key);
        fs::create_dir_all(&dir)?;
        let target = dir.join(batch_name(batch.start, batch.end));
        let tmp = dir.join(format!(
            "{}{}_{}",
            TMP_PREFIX,
            std::process::id(),
            self.next_tmp.fetch_add(1, Ordering::Relaxed)
        ));

        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }

        let linked = fs::hard_link(&tmp, &target);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(TierError::DuplicateBatch(reference.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        sync_dir(&dir);

        if !self.index.insert(meta) {
            return Err(TierError::DuplicateBatch(reference.to_string()));
        }
        tracing::debug!("Archived batch {} ({} bytes)", reference, bytes.len());
        Ok(())
    }

    fn contains(&self, reference: &BatchRef) -> bool {
        self.index.contains(reference)
    }

    fn read_batch(&self, meta: &BatchMeta) -> Result<Vec<Datapoint>> {
        let path = self.batch_path(&meta.key, meta.start, meta.end);
        let mut bytes = Vec::new();
        File::open(&path)?.read_to_end(&mut bytes)?;
        Ok(decode_record(&bytes)?.1)
    }

    fn batches(&self, key: &StreamKey) -> Vec<BatchMeta> {
        self.index.batches(key)
    }

    fn batch_containing(&self, key: &StreamKey, index: i64) -> Option<BatchMeta> {
        self.index.batch_containing(key, index)
    }

    fn first_batch_after_time(&self, key: &StreamKey, t: f64) -> Option<BatchMeta> {
        self.index.first_batch_after_time(key, t)
    }

    fn end_index(&self, key: &StreamKey) -> i64 {
        self.index.end_index(key)
    }

    fn delete(&self, scope: &Scope) -> Result<usize> {
        let removed = self.index.remove_scope(scope);
        self.remove_files(&removed)?;
        if !removed.is_empty() {
            tracing::info!("Deleted {} cold batches in {}", removed.len(), scope);
        }
        Ok(removed.len())
    }

    fn delete_before(&self, key: &StreamKey, generation: u64) -> Result<usize> {
        let removed = self.index.remove_before(key, generation);
        self.remove_files(&removed)?;
        if !removed.is_empty() {
            tracing::info!(
                "Deleted {} cold batches of {} below generation {}",
                removed.len(),
                key,
                generation
            );
        }
        Ok(removed.len())
    }

    fn batch_count(&self) -> usize {
        self.index.batch_count()
    }

    fn keys(&self) -> Vec<StreamKey> {
        self.index.keys()
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

/// "batch_000000000250_000000000500.blk"
fn batch_name(start: i64, end: i64) -> String {
    format!("batch_{:012}_{:012}.blk", start, end)
}

/// "batch_000000000250_000000000500.blk" → Some((250, 500))
fn parse_batch_name(name: &str) -> Option<(i64, i64)> {
    let stem = name.strip_prefix("batch_")?.strip_suffix(".blk")?;
    let (start, end) = stem.split_once('_')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

fn encode_component(prefix: char, name: &str) -> String {
    format!("{}{}", prefix, hex::encode(name.as_bytes()))
}

fn decode_component(path: &Path, prefix: char) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let encoded = name.strip_prefix(prefix)?;
    String::from_utf8(hex::decode(encoded).ok()?).ok()
}

/// Every `owner/stream/substream` directory under `dir` with its key
fn stream_dirs(dir: &Path) -> Result<Vec<(PathBuf, StreamKey)>> {
    let mut found = Vec::new();
    for owner_dir in subdirs(dir)? {
        let owner = match decode_component(&owner_dir, OWNER_PREFIX) {
            Some(owner) => owner,
            None => continue,
        };
        for stream_dir in subdirs(&owner_dir)? {
            let stream = match decode_component(&stream_dir, STREAM_PREFIX) {
                Some(stream) => stream,
                None => continue,
            };
            for substream_dir in subdirs(&stream_dir)? {
                if let Some(substream) = decode_component(&substream_dir, SUBSTREAM_PREFIX) {
                    let key = StreamKey::new(owner.clone(), stream.clone(), substream);
                    found.push((substream_dir, key));
                }
            }
        }
    }
    Ok(found)
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Read just the header of a batch file and check it against the file size
fn read_meta(path: &Path, key: &StreamKey) -> Result<BatchMeta> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut header = [0u8; RECORD_HEADER_SIZE];
    file.read_exact(&mut header)?;
    let header = decode_header(&header)?;

    let expected = (RECORD_HEADER_SIZE + header.blob_len as usize) as u64;
    if file_len != expected {
        return Err(TierError::BatchCorruption(format!(
            "{} is {} bytes, header says {}",
            path.display(),
            file_len,
            expected
        )));
    }
    Ok(header.into_meta(key.clone()))
}

fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}
