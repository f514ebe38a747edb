//! Compaction
//!
//! Merges every sealed segment into one, keeping only the newest value per key.
//!
//! The merge is written to a temp file and renamed into place:
//! 1. Write live records to `segment_{M}.log.compact` (M = newest input id)
//! 2. fsync the temp file
//! 3. Rename it over `segment_{M}.log` (atomic on POSIX)
//! 4. Swap the merged segment into the list in place of the inputs
//! 5. Remove the older input files
//!
//! If the process crashes at any point:
//! - Before rename: the inputs are intact, the temp file is removed on next open
//! - After rename: older inputs may linger, but they replay as older than M,
//!   so the merged segment still shadows them

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::error::{Result, SeglogError};
use crate::record::Record;

use super::{Segment, SegmentManager};

/// Result of a compaction pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionStats {
    /// Number of segments merged
    pub inputs: usize,
    /// Id of the merged segment (the id of the newest input)
    pub output_id: u64,
    /// Records written to the merged segment
    pub records_written: u64,
    /// Index entries dropped because a newer input held the same key
    pub records_dropped: u64,
    /// Merged segment size in bytes
    pub bytes_written: u64,
}

/// Run one compaction pass over all segments except the active one
///
/// Returns `Ok(None)` when there is no sealed segment to merge.
pub fn compact(manager: &SegmentManager) -> Result<Option<CompactionStats>> {
    let snapshot = manager.snapshot();
    if snapshot.len() < 2 {
        return Ok(None);
    }

    // The active (newest) segment is never an input
    let inputs = &snapshot[..snapshot.len() - 1];
    let newest = &inputs[inputs.len() - 1];
    let output_id = newest.id();
    let output_path = newest.path().to_path_buf();
    let temp_path = manager.compaction_temp_path(output_id);

    let merge = match write_merged(inputs, &temp_path) {
        Ok(merge) => merge,
        Err(e) => {
            discard_temp(&temp_path);
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&temp_path, &output_path) {
        discard_temp(&temp_path);
        return Err(e.into());
    }
    sync_dir(manager.data_dir())?;

    let merged = Arc::new(Segment::open(output_id, &output_path, merge.index)?);
    manager.install_compacted(inputs, merged)?;

    // The newest input's path now holds the merged file
    for segment in &inputs[..inputs.len() - 1] {
        if let Err(e) = fs::remove_file(segment.path()) {
            tracing::warn!(
                path = %segment.path().display(),
                "Failed to remove compacted segment: {}",
                e
            );
        }
    }

    Ok(Some(CompactionStats {
        inputs: inputs.len(),
        output_id,
        records_written: merge.records_written,
        records_dropped: merge.records_dropped,
        bytes_written: merge.bytes_written,
    }))
}

/// Output of writing the merged file
struct MergeOutput {
    index: HashMap<Vec<u8>, u64>,
    records_written: u64,
    records_dropped: u64,
    bytes_written: u64,
}

/// Write the newest value of every input key to `path`
///
/// Inputs are walked oldest → newest; a key is written only from the newest
/// input that indexes it.
fn write_merged(inputs: &[Arc<Segment>], path: &Path) -> Result<MergeOutput> {
    let entries: Vec<Vec<(Vec<u8>, u64)>> = inputs.iter().map(|s| s.entries()).collect();

    // key → position of the newest input holding it
    let mut newest_holder: HashMap<&[u8], usize> = HashMap::new();
    for (pos, segment_entries) in entries.iter().enumerate() {
        for (key, _) in segment_entries {
            newest_holder.insert(key.as_slice(), pos);
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    let mut writer = BufWriter::new(file);

    let mut index = HashMap::with_capacity(newest_holder.len());
    let mut offset: u64 = 0;
    let mut records_written = 0;
    let mut records_dropped = 0;

    for (pos, (segment, segment_entries)) in inputs.iter().zip(&entries).enumerate() {
        for (key, value_offset) in segment_entries {
            if newest_holder.get(key.as_slice()) != Some(&pos) {
                records_dropped += 1;
                continue;
            }

            let value = segment.read_value_at(*value_offset)?;
            let record = Record::new(key.clone(), value);
            let bytes = record.encode();
            writer.write_all(&bytes)?;

            index.insert(record.key, offset);
            offset += bytes.len() as u64;
            records_written += 1;
        }
    }

    writer.flush()?;
    let file = writer.into_inner().map_err(|e| SeglogError::Io(e.into_error()))?;
    file.sync_all()?;

    Ok(MergeOutput {
        index,
        records_written,
        records_dropped,
        bytes_written: offset,
    })
}

fn discard_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "Failed to remove compaction temp file: {}", e);
        }
    }
}

/// Persist a rename by syncing the parent directory
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

// =============================================================================
// Background Supervision
// =============================================================================

/// Supervises background compaction for one engine
///
/// At most one pass runs at a time: background runs and `run_now` both hold
/// `run_lock` for the whole pass. A schedule request that arrives while a
/// background run is in flight is queued, and the run makes one more pass
/// before it exits.
pub struct Compactor {
    /// Handle of the most recently started background run
    worker: Mutex<Option<JoinHandle<Result<Option<CompactionStats>>>>>,

    /// Running/pending flags shared with the worker thread
    state: Arc<Mutex<WorkerState>>,

    /// Held for the duration of every pass
    run_lock: Arc<Mutex<()>>,
}

/// Background run bookkeeping, always read and written under one lock
#[derive(Debug, Default)]
struct WorkerState {
    /// A background thread is running passes
    running: bool,
    /// Another pass was requested while the current one was in flight
    pending: bool,
}

impl Compactor {
    pub fn new() -> Self {
        Self {
            worker: Mutex::new(None),
            state: Arc::new(Mutex::new(WorkerState::default())),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Start a background pass, or queue one if a run is already in flight
    ///
    /// Returns whether a new thread was started.
    pub fn schedule(&self, manager: Arc<SegmentManager>) -> bool {
        let mut worker = self.worker.lock();

        {
            let mut state = self.state.lock();
            if state.running {
                tracing::debug!("Compaction already running, queued another pass");
                state.pending = true;
                return false;
            }
            state.running = true;
        }
        // A finished run has already logged its outcome
        drop(worker.take());

        let run_lock = Arc::clone(&self.run_lock);
        let state = Arc::clone(&self.state);
        let spawned = thread::Builder::new()
            .name("seglog-compactor".to_string())
            .spawn(move || run_passes(&manager, &run_lock, &state));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                true
            }
            Err(e) => {
                self.state.lock().running = false;
                tracing::warn!("Failed to spawn compaction thread: {}", e);
                false
            }
        }
    }

    /// Run a pass on the calling thread, after any in-flight pass
    pub fn run_now(&self, manager: &SegmentManager) -> Result<Option<CompactionStats>> {
        let _running = self.run_lock.lock();
        let outcome = compact(manager);
        log_outcome(&outcome);
        outcome
    }

    /// Check if a background pass is still running
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Block until the current background run finishes and return its outcome
    ///
    /// The outcome is the last pass that merged something, or the error that
    /// ended the run. Returns `Ok(None)` if no run was started since the last
    /// wait.
    pub fn wait(&self) -> Result<Option<CompactionStats>> {
        let handle = self.worker.lock().take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| SeglogError::Compaction("Compaction thread panicked".to_string()))?,
            None => Ok(None),
        }
    }
}

/// Body of the background thread: pass after pass while more are queued
fn run_passes(
    manager: &SegmentManager,
    run_lock: &Mutex<()>,
    state: &Mutex<WorkerState>,
) -> Result<Option<CompactionStats>> {
    let mut merged = None;

    loop {
        let outcome = {
            let _running = run_lock.lock();
            compact(manager)
        };
        log_outcome(&outcome);

        let mut flags = state.lock();
        match outcome {
            Ok(stats) => {
                if stats.is_some() {
                    merged = stats;
                }
                if flags.pending {
                    flags.pending = false;
                    continue;
                }
                flags.running = false;
                return Ok(merged);
            }
            Err(e) => {
                // Queued requests are dropped with the failed run
                flags.pending = false;
                flags.running = false;
                return Err(e);
            }
        }
    }
}

impl Default for Compactor {
    fn default() -> Self {
        Self::new()
    }
}

fn log_outcome(outcome: &Result<Option<CompactionStats>>) {
    match outcome {
        Ok(Some(stats)) => tracing::info!(
            inputs = stats.inputs,
            output_id = stats.output_id,
            written = stats.records_written,
            dropped = stats.records_dropped,
            bytes = stats.bytes_written,
            "Compaction finished"
        ),
        Ok(None) => tracing::debug!("Nothing to compact"),
        Err(e) => tracing::warn!("Compaction failed, keeping existing segments: {}", e),
    }
}
