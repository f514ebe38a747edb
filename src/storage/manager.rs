//! Segment Manager
//!
//! Owns the ordered segment list and the segment files on disk.
//!
//! ## Responsibilities
//! - Discover and replay existing segments on startup
//! - Search segments newest → oldest for reads
//! - Create new segment files with never-reused ids
//! - Swap in compaction output atomically

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, SeglogError};

use super::Segment;

/// Immutable snapshot of the segment list, ordered oldest → newest
pub type SegmentList = Arc<Vec<Arc<Segment>>>;

/// Manages the segment list
///
/// ## Concurrency:
/// - `segments`: RwLock around an `Arc` snapshot. Readers clone the `Arc`
///   and release the lock; structural changes (rotation push, compaction
///   install) build a new list under the write lock and swap it in whole.
/// - `next_segment_id`: Atomic counter (lock-free)
/// - All methods use `&self` (no exclusive access needed)
pub struct SegmentManager {
    /// Directory where segment files are stored
    data_dir: PathBuf,

    /// Segments ordered oldest → newest; the last one is active
    segments: RwLock<SegmentList>,

    /// Next id for creating new segments (atomic, lock-free)
    next_segment_id: AtomicU64,
}

impl SegmentManager {
    const SEGMENT_PREFIX: &'static str = "segment_";
    const SEGMENT_EXTENSION: &'static str = "log";
    const COMPACTION_EXTENSION: &'static str = "compact";

    /// Open or create segment storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Remove leftover compaction temp files
    /// 3. Replay every segment file, oldest first
    /// 4. Trim a torn tail off the newest segment, which becomes active
    /// 5. Create segment 0 if the directory held none
    ///
    /// Returns the manager and its active segment.
    pub fn open(path: &Path) -> Result<(Self, Arc<Segment>)> {
        fs::create_dir_all(path)?;

        let mut segment_ids: Vec<u64> = Vec::new();

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let file_path = entry.path();

            if !file_path.is_file() {
                continue;
            }
            if Self::is_compaction_temp(&file_path) {
                tracing::info!(path = %file_path.display(), "Removing unfinished compaction output");
                fs::remove_file(&file_path)?;
                continue;
            }
            if let Some(id) = Self::parse_segment_id(&file_path) {
                segment_ids.push(id);
            }
        }

        // Oldest first (lowest id first)
        segment_ids.sort_unstable();

        let mut segments = Vec::with_capacity(segment_ids.len().max(1));
        for (pos, id) in segment_ids.iter().enumerate() {
            let segment_path = Self::segment_path_with_dir(path, *id);
            let (segment, recovery) = Segment::load(*id, &segment_path)?;

            tracing::debug!(
                id,
                records = recovery.records_recovered,
                keys = segment.len(),
                bytes = recovery.valid_len,
                "Replayed segment"
            );

            // Only the newest segment takes further appends; drop its torn
            // tail so they land right after the well-formed prefix
            if recovery.was_truncated && pos + 1 == segment_ids.len() {
                let file = OpenOptions::new().write(true).open(&segment_path)?;
                file.set_len(recovery.valid_len)?;
                file.sync_all()?;
                tracing::warn!(
                    id,
                    valid_len = recovery.valid_len,
                    "Trimmed partial record from active segment"
                );
            }

            segments.push(Arc::new(segment));
        }

        // Next ID = max + 1, or 0 if no segments exist
        let next_id = segment_ids.last().map(|&id| id + 1).unwrap_or(0);

        let manager = Self {
            data_dir: path.to_path_buf(),
            segments: RwLock::new(Arc::new(segments)),
            next_segment_id: AtomicU64::new(next_id),
        };

        let active = match manager.snapshot().last() {
            Some(segment) => Arc::clone(segment),
            None => {
                let (segment, _file) = manager.create_segment()?;
                manager.push(Arc::clone(&segment));
                segment
            }
        };

        Ok((manager, active))
    }

    /// Current segment list (oldest → newest)
    pub fn snapshot(&self) -> SegmentList {
        Arc::clone(&self.segments.read())
    }

    /// Get a value by key (searches all segments newest → oldest)
    ///
    /// Returns:
    /// - `Ok(Some(value))` : key found
    /// - `Ok(None)` : key not indexed by any segment
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let segments = self.snapshot();

        for segment in segments.iter().rev() {
            if let Some(offset) = segment.lookup(key) {
                return segment.read_value_at(offset).map(Some);
            }
        }

        Ok(None)
    }

    /// Create a new, empty segment file with the next id
    ///
    /// Returns the segment and an append handle to its file. The segment is
    /// not part of the list until `push` is called.
    pub fn create_segment(&self) -> Result<(Arc<Segment>, File)> {
        let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let path = self.segment_path(id);

        // create_new: never append onto a file left by an earlier run
        let file = OpenOptions::new().create_new(true).append(true).open(&path)?;
        let segment = Segment::open(id, &path, HashMap::new())?;

        Ok((Arc::new(segment), file))
    }

    /// Append a segment as the new newest; returns the new segment count
    pub fn push(&self, segment: Arc<Segment>) -> usize {
        let mut segments = self.segments.write();
        let mut next = Vec::with_capacity(segments.len() + 1);
        next.extend(segments.iter().cloned());
        next.push(segment);
        *segments = Arc::new(next);
        segments.len()
    }

    /// Replace `inputs` (a prefix of the current list) with `merged`
    ///
    /// Segments pushed after the compaction snapshot was taken are kept
    /// behind the merged segment.
    pub fn install_compacted(&self, inputs: &[Arc<Segment>], merged: Arc<Segment>) -> Result<()> {
        let mut segments = self.segments.write();

        let prefix_matches = segments.len() > inputs.len()
            && segments
                .iter()
                .zip(inputs)
                .all(|(current, input)| Arc::ptr_eq(current, input));
        if !prefix_matches {
            return Err(SeglogError::Compaction(
                "Segment list changed under compaction".to_string(),
            ));
        }

        let mut next = Vec::with_capacity(segments.len() - inputs.len() + 1);
        next.push(merged);
        next.extend(segments[inputs.len()..].iter().cloned());
        *segments = Arc::new(next);

        Ok(())
    }

    /// Get the number of segments
    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next segment ID (for testing/debugging)
    pub fn next_segment_id(&self) -> u64 {
        self.next_segment_id.load(Ordering::SeqCst)
    }

    /// Generate the file path for a segment with given ID
    pub fn segment_path(&self, id: u64) -> PathBuf {
        Self::segment_path_with_dir(&self.data_dir, id)
    }

    /// Path compaction writes to before renaming over segment `id`
    pub fn compaction_temp_path(&self, id: u64) -> PathBuf {
        let mut path = self.segment_path(id).into_os_string();
        path.push(".");
        path.push(Self::COMPACTION_EXTENSION);
        PathBuf::from(path)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Generate segment path given a directory and ID
    fn segment_path_with_dir(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!(
            "{}{:06}.{}",
            Self::SEGMENT_PREFIX,
            id,
            Self::SEGMENT_EXTENSION
        ))
    }

    /// Parse segment ID from filename
    /// "segment_000042.log" → Some(42)
    fn parse_segment_id(path: &Path) -> Option<u64> {
        if path.extension()?.to_str()? != Self::SEGMENT_EXTENSION {
            return None;
        }
        let name = path.file_stem()?.to_str()?;
        let id_str = name.strip_prefix(Self::SEGMENT_PREFIX)?;
        id_str.parse().ok()
    }

    /// "segment_000042.log.compact" → true
    fn is_compaction_temp(path: &Path) -> bool {
        let is_temp = path
            .extension()
            .map_or(false, |ext| ext.to_str() == Some(Self::COMPACTION_EXTENSION));
        is_temp
            && path
                .file_stem()
                .map_or(false, |stem| Self::parse_segment_id(Path::new(stem)).is_some())
    }
}
