//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Serialize writes and rotate the active segment at the size limit
//! - Serve concurrent reads across all segments
//! - Schedule background compaction when segments pile up
//! - Replay segment files on startup

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{Config, SyncStrategy};
use crate::error::{Result, SeglogError};
use crate::record::{Record, HEADER_SIZE, MAX_BODY_SIZE};
use crate::storage::{CompactionStats, Compactor, Segment, SegmentManager};

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put): Serialized by the `writer` mutex
///   - Only ONE put at a time
///   - Size check, rotation, append, and index update all happen under it
///   - Lock order: writer → segment list
///
/// - **Reads** (get): Concurrent, no writer lock
///   - Take a snapshot of the segment list, then scan newest → oldest
///   - An index entry is only inserted after its bytes are written
///
/// - **Compaction**: Background thread, one pass at a time
///   - Never touches the active segment or the writer lock
///   - Installs its output with one swap of the segment list
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Segment list and files (shared with the compaction thread)
    manager: Arc<SegmentManager>,

    /// Active segment append state; holding this lock is the write critical section
    writer: Mutex<ActiveWriter>,

    /// Background compaction supervisor
    compactor: Compactor,
}

/// Append state of the active segment
struct ActiveWriter {
    /// Append handle to the active segment file
    file: File,
    /// Bytes in the active file (offset of the next record)
    offset: u64,
    /// The active segment (also the last element of the segment list)
    segment: Arc<Segment>,
    /// Writes since the last fsync
    unsynced: usize,
    /// Set when a failed append could not be cut back off the file
    needs_rotation: bool,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config and create the data directory
    /// 2. Replay every segment file (newest becomes active)
    /// 3. Reopen the active segment for appends
    /// 4. Ready to serve requests
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let (manager, active) = SegmentManager::open(&config.data_dir)?;

        let file = OpenOptions::new().append(true).open(active.path())?;
        let offset = file.metadata()?.len();

        tracing::info!(
            data_dir = %config.data_dir.display(),
            segments = manager.segment_count(),
            active_id = active.id(),
            active_bytes = offset,
            "Engine opened"
        );

        Ok(Self {
            config,
            manager: Arc::new(manager),
            writer: Mutex::new(ActiveWriter {
                file,
                offset,
                segment: active,
                unsynced: 0,
                needs_rotation: false,
            }),
            compactor: Compactor::new(),
        })
    }

    /// Open with a path and segment size limit (convenience method)
    ///
    /// Uses default config for everything else
    pub fn open_path(path: &Path, segment_size_limit: u64) -> Result<Self> {
        let config = Config::builder()
            .data_dir(path)
            .segment_size_limit(segment_size_limit)
            .build();
        Self::open(config)
    }

    /// Get a value by key
    ///
    /// Searches segments newest → oldest; the first index hit wins.
    /// `Ok(None)` means no segment holds the key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.manager.get(key)
    }

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Acquire writer lock
    /// 2. Rotate if the record would push the active segment past the limit
    /// 3. Append the record (and fsync per strategy)
    /// 4. Index the record in the active segment
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(SeglogError::EmptyKey);
        }

        let record = Record::new(key, value);
        let len = record.encoded_len() as u64;

        if len - HEADER_SIZE as u64 > MAX_BODY_SIZE {
            return Err(SeglogError::RecordTooLarge {
                size: len,
                limit: MAX_BODY_SIZE + HEADER_SIZE as u64,
            });
        }
        if len > self.config.segment_size_limit {
            return Err(SeglogError::RecordTooLarge {
                size: len,
                limit: self.config.segment_size_limit,
            });
        }

        let mut writer = self.writer.lock();

        // A torn append left in place means the active file must take no more records
        if writer.needs_rotation || writer.offset + len > self.config.segment_size_limit {
            self.rotate(&mut writer)?;
        }

        writer.append(record, self.config.sync_strategy)
    }

    /// Seal the active segment and start a new one (called with writer lock held)
    fn rotate(&self, writer: &mut ActiveWriter) -> Result<()> {
        writer.file.sync_all()?;

        let (segment, file) = self.manager.create_segment()?;
        let sealed_id = writer.segment.id();

        writer.file = file;
        writer.offset = 0;
        writer.unsynced = 0;
        writer.needs_rotation = false;
        writer.segment = Arc::clone(&segment);

        let count = self.manager.push(segment);

        tracing::debug!(
            sealed_id,
            active_id = writer.segment.id(),
            segments = count,
            "Rotated active segment"
        );

        if count >= self.config.compaction_threshold {
            self.compactor.schedule(Arc::clone(&self.manager));
        }

        Ok(())
    }

    /// Compact all sealed segments now, on the calling thread
    ///
    /// Waits for a background pass that is already running.
    pub fn compact(&self) -> Result<Option<CompactionStats>> {
        self.compactor.run_now(&self.manager)
    }

    /// Block until the current background compaction finishes
    ///
    /// Returns `Ok(None)` if none was started since the last wait.
    pub fn wait_for_compaction(&self) -> Result<Option<CompactionStats>> {
        self.compactor.wait()
    }

    /// Close the engine gracefully
    ///
    /// Waits for background compaction, then syncs the active segment.
    pub fn close(self) -> Result<()> {
        if let Err(e) = self.compactor.wait() {
            tracing::warn!("Background compaction failed before close: {}", e);
        }

        let writer = self.writer.into_inner();
        writer.file.sync_all()?;

        tracing::info!(
            data_dir = %self.config.data_dir.display(),
            segments = self.manager.segment_count(),
            "Engine closed"
        );

        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the number of segments
    pub fn segment_count(&self) -> usize {
        self.manager.segment_count()
    }

    /// Get the segment file paths, oldest → newest
    pub fn segment_paths(&self) -> Vec<PathBuf> {
        self.manager
            .snapshot()
            .iter()
            .map(|segment| segment.path().to_path_buf())
            .collect()
    }

    /// Get the number of bytes in the active segment
    pub fn active_segment_size(&self) -> u64 {
        self.writer.lock().offset
    }

    /// Check if a background compaction is running
    pub fn is_compacting(&self) -> bool {
        self.compactor.is_running()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl ActiveWriter {
    /// Write one record at the cursor and index it
    fn append(&mut self, record: Record, strategy: SyncStrategy) -> Result<()> {
        let bytes = record.encode();

        if let Err(e) = self.write_and_sync(&bytes, strategy) {
            self.rollback();
            return Err(e);
        }

        self.segment.insert(record.key, self.offset);
        self.offset += bytes.len() as u64;

        Ok(())
    }

    fn write_and_sync(&mut self, bytes: &[u8], strategy: SyncStrategy) -> Result<()> {
        self.file.write_all(bytes)?;
        self.unsynced += 1;

        let should_sync = match strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if should_sync {
            self.file.sync_data()?;
            self.unsynced = 0;
        }

        Ok(())
    }

    /// Cut a failed append back off the file so the cursor stays truthful
    ///
    /// If the cut fails, the cursor follows the file length instead and the
    /// segment is retired on the next put, so no record is ever indexed at an
    /// offset that holds partial bytes.
    fn rollback(&mut self) {
        let Err(e) = self.file.set_len(self.offset) else {
            return;
        };

        tracing::error!(
            path = %self.segment.path().display(),
            offset = self.offset,
            "Failed to roll back partial append: {}",
            e
        );

        match self.file.metadata() {
            Ok(metadata) => self.offset = metadata.len(),
            Err(e) => tracing::error!(
                path = %self.segment.path().display(),
                "Failed to read segment length after failed rollback: {}",
                e
            ),
        }
        self.needs_rotation = true;
    }
}
