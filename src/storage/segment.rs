//! Segment
//!
//! One append-only log file plus its in-memory hash index.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::record::read_value;

use super::recovery::{self, RecoveryResult};

/// A segment file and its key → offset index
///
/// ## Concurrency:
/// - `index`: RwLock (lookups share, inserts from the write path are exclusive)
/// - `reader`: Mutex around one pooled read handle; seek + read is a unit
///
/// The read handle is opened once and kept for the segment's lifetime, so a
/// segment that compaction has retired stays readable for in-flight gets even
/// after its path has been replaced or unlinked (on Unix).
#[derive(Debug)]
pub struct Segment {
    /// Numeric file-name suffix, strictly increasing with creation order
    id: u64,
    /// Path of the backing file
    path: PathBuf,
    /// In-memory index: key → offset of the newest record for that key
    index: RwLock<HashMap<Vec<u8>, u64>>,
    /// Pooled read handle
    reader: Mutex<BufReader<File>>,
}

impl Segment {
    /// Open a segment over an existing file with a prebuilt index
    pub fn open(id: u64, path: &Path, index: HashMap<Vec<u8>, u64>) -> Result<Self> {
        let file = File::open(path)?;

        Ok(Self {
            id,
            path: path.to_path_buf(),
            index: RwLock::new(index),
            reader: Mutex::new(BufReader::new(file)),
        })
    }

    /// Replay an existing file and open a segment over it
    pub fn load(id: u64, path: &Path) -> Result<(Self, RecoveryResult)> {
        let mut result = recovery::replay(path)?;
        let index = std::mem::take(&mut result.index);
        let segment = Self::open(id, path, index)?;
        Ok((segment, result))
    }

    /// Get the segment id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the record holding `key`, if this segment indexes it
    pub fn lookup(&self, key: &[u8]) -> Option<u64> {
        self.index.read().get(key).copied()
    }

    /// Check if this segment indexes `key`
    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.read().contains_key(key)
    }

    /// Number of indexed keys
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Read the value of the record starting at `offset`
    pub fn read_value_at(&self, offset: u64) -> Result<Vec<u8>> {
        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(offset))?;
        read_value(&mut *reader)
    }

    /// Size of the file behind the read handle
    pub fn file_size(&self) -> Result<u64> {
        let reader = self.reader.lock();
        Ok(reader.get_ref().metadata()?.len())
    }

    /// Register `key` at `offset`, replacing any earlier mapping
    pub(crate) fn insert(&self, key: Vec<u8>, offset: u64) {
        self.index.write().insert(key, offset);
    }

    /// Copy of the index, ordered by file offset
    pub(crate) fn entries(&self) -> Vec<(Vec<u8>, u64)> {
        let mut entries: Vec<(Vec<u8>, u64)> = self
            .index
            .read()
            .iter()
            .map(|(key, offset)| (key.clone(), *offset))
            .collect();
        entries.sort_by_key(|(_, offset)| *offset);
        entries
    }
}
