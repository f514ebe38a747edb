//! Tests for Engine
//!
//! These tests verify:
//! - Basic get/put operations
//! - Segment rotation at the size limit
//! - Background compaction and duplicate-key shadowing
//! - Restart and crash recovery
//! - Concurrent access patterns
//! - Input validation and configuration errors

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use seglog::config::{Config, SyncStrategy};
use seglog::engine::Engine;
use seglog::{Record, SeglogError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open_path(temp_dir.path(), 1024 * 1024).unwrap();
    (temp_dir, engine)
}

fn open_with_limit(path: &Path, limit: u64) -> Engine {
    let config = Config::builder()
        .data_dir(path)
        .segment_size_limit(limit)
        .sync_strategy(SyncStrategy::EveryWrite)
        .build();
    Engine::open(config).unwrap()
}

fn segment_file(path: &Path, id: u64) -> std::path::PathBuf {
    path.join(format!("segment_{:06}.log", id))
}

const PAIRS: [(&[u8], &[u8]); 3] = [(b"1", b"v1"), (b"2", b"v2"), (b"3", b"v3")];

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let _engine = Engine::open_path(&data_dir, 1024).unwrap();

    assert!(data_dir.exists());
    assert!(segment_file(&data_dir, 0).exists());
}

#[test]
fn test_engine_put_get() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"hello", b"world").unwrap();
    let result = engine.get(b"hello").unwrap();

    assert_eq!(result, Some(b"world".to_vec()));
}

#[test]
fn test_engine_get_nonexistent_key() {
    let (_temp, engine) = setup_temp_engine();

    let result = engine.get(b"nonexistent").unwrap();

    assert_eq!(result, None);
}

#[test]
fn test_engine_put_overwrite() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"value1").unwrap();
    engine.put(b"key", b"value2").unwrap();

    assert_eq!(engine.get(b"key").unwrap(), Some(b"value2".to_vec()));
}

#[test]
fn test_engine_empty_value() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"").unwrap();

    assert_eq!(engine.get(b"key").unwrap(), Some(Vec::new()));
}

#[test]
fn test_engine_put_then_get_each() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_with_limit(temp_dir.path(), 45);

    for (key, value) in PAIRS {
        engine.put(key, value).unwrap();
        assert_eq!(engine.get(key).unwrap(), Some(value.to_vec()));
    }
}

// =============================================================================
// Rotation Tests
// =============================================================================

#[test]
fn test_engine_file_growth_and_rotation() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_with_limit(temp_dir.path(), 45);

    for (key, value) in PAIRS {
        engine.put(key, value).unwrap();
    }
    // Three 15-byte records fill the first segment exactly
    assert_eq!(fs::metadata(segment_file(temp_dir.path(), 0)).unwrap().len(), 45);
    assert_eq!(engine.segment_count(), 1);

    for (key, value) in PAIRS {
        engine.put(key, value).unwrap();
    }
    // The sealed segment did not grow; the writes went to a new one
    assert_eq!(fs::metadata(segment_file(temp_dir.path(), 0)).unwrap().len(), 45);
    assert_eq!(engine.segment_count(), 2);
    assert_eq!(engine.active_segment_size(), 45);
}

#[test]
fn test_engine_sealed_segments_never_exceed_limit() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .segment_size_limit(45)
        .compaction_threshold(1000) // keep every sealed segment around
        .build();
    let engine = Engine::open(config).unwrap();

    for round in 0..10 {
        for (key, value) in PAIRS {
            let mut value = value.to_vec();
            value.extend_from_slice(round.to_string().as_bytes());
            engine.put(key, &value).unwrap();
        }
    }

    let paths = engine.segment_paths();
    assert!(paths.len() > 1);
    for path in &paths[..paths.len() - 1] {
        assert!(fs::metadata(path).unwrap().len() <= 45);
    }
}

#[test]
fn test_engine_rejects_record_larger_than_segment() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_with_limit(temp_dir.path(), 45);

    let result = engine.put(b"key", &[0u8; 64]);

    assert!(matches!(
        result,
        Err(SeglogError::RecordTooLarge { size: 79, limit: 45 })
    ));
    assert_eq!(engine.segment_count(), 1);
    assert_eq!(engine.active_segment_size(), 0);
}

#[test]
fn test_engine_rejects_empty_key() {
    let (_temp, engine) = setup_temp_engine();

    let result = engine.put(b"", b"value");

    assert!(matches!(result, Err(SeglogError::EmptyKey)));
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_engine_segmentation_and_compaction() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_with_limit(temp_dir.path(), 35);

    engine.put(b"1", b"val1").unwrap();
    engine.put(b"2", b"val2").unwrap();
    engine.put(b"3", b"val3").unwrap();
    engine.put(b"2", b"val5").unwrap();
    assert_eq!(engine.segment_count(), 2);

    // Third segment reaches the compaction threshold
    engine.put(b"4", b"val4").unwrap();
    let stats = engine.wait_for_compaction().unwrap().unwrap();

    assert!(!engine.is_compacting());
    assert_eq!(stats.inputs, 2);
    assert_eq!(engine.segment_count(), 2);
    assert_eq!(engine.get(b"2").unwrap(), Some(b"val5".to_vec()));

    // Merged segment holds keys 1, 2, 3 at 17 bytes each
    let paths = engine.segment_paths();
    assert_eq!(fs::metadata(&paths[0]).unwrap().len(), 51);

    for (key, value) in [(b"1", b"val1"), (b"3", b"val3"), (b"4", b"val4")] {
        assert_eq!(engine.get(key).unwrap(), Some(value.to_vec()));
    }
}

#[test]
fn test_engine_compaction_removes_stale_files() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_with_limit(temp_dir.path(), 45);

    for _ in 0..3 {
        for (key, value) in PAIRS {
            engine.put(key, value).unwrap();
        }
    }
    engine.wait_for_compaction().unwrap().unwrap();

    assert_eq!(engine.segment_count(), 2);
    assert!(!segment_file(temp_dir.path(), 0).exists());
    assert!(segment_file(temp_dir.path(), 1).exists());
    assert!(segment_file(temp_dir.path(), 2).exists());
    for (key, value) in PAIRS {
        assert_eq!(engine.get(key).unwrap(), Some(value.to_vec()));
    }
}

#[test]
fn test_engine_compaction_never_drops_keys() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_with_limit(temp_dir.path(), 64);

    for round in 0..5 {
        for i in 0..40 {
            let key = format!("key{:02}", i);
            let value = format!("r{}-{}", round, i);
            engine.put(key.as_bytes(), value.as_bytes()).unwrap();
        }
    }
    engine.wait_for_compaction().unwrap();
    engine.compact().unwrap();

    assert_eq!(engine.segment_count(), 2);
    for i in 0..40 {
        let key = format!("key{:02}", i);
        assert_eq!(
            engine.get(key.as_bytes()).unwrap(),
            Some(format!("r4-{}", i).into_bytes()),
            "wrong value for {}",
            key
        );
    }
}

#[test]
fn test_engine_compact_with_single_segment() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"key", b"value").unwrap();

    assert_eq!(engine.compact().unwrap(), None);
    assert_eq!(engine.get(b"key").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn test_engine_writes_during_compaction_are_kept() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_with_limit(temp_dir.path(), 45);

    for _ in 0..3 {
        for (key, value) in PAIRS {
            engine.put(key, value).unwrap();
        }
    }
    // Compaction may still be running; these land in the active segment
    engine.put(b"late", b"write").unwrap();
    engine.put(b"1", b"fresh").unwrap();
    engine.wait_for_compaction().unwrap();

    assert_eq!(engine.get(b"late").unwrap(), Some(b"write".to_vec()));
    assert_eq!(engine.get(b"1").unwrap(), Some(b"fresh".to_vec()));
    assert_eq!(engine.get(b"2").unwrap(), Some(b"v2".to_vec()));
}

// =============================================================================
// Restart / Recovery Tests
// =============================================================================

#[test]
fn test_engine_reopen_restores_all_keys() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_with_limit(temp_dir.path(), 45);
        for (key, value) in PAIRS {
            engine.put(key, value).unwrap();
        }
        for (key, value) in PAIRS {
            engine.put(key, value).unwrap();
        }
        engine.close().unwrap();
    }

    let engine = open_with_limit(temp_dir.path(), 45);
    assert_eq!(engine.segment_count(), 2);
    for (key, value) in PAIRS {
        assert_eq!(engine.get(key).unwrap(), Some(value.to_vec()));
    }
}

#[test]
fn test_engine_reopen_after_compaction() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_with_limit(temp_dir.path(), 35);
        engine.put(b"1", b"val1").unwrap();
        engine.put(b"2", b"val2").unwrap();
        engine.put(b"3", b"val3").unwrap();
        engine.put(b"2", b"val5").unwrap();
        engine.put(b"4", b"val4").unwrap();
        engine.close().unwrap();
    }

    let engine = open_with_limit(temp_dir.path(), 35);
    assert_eq!(engine.segment_count(), 2);
    assert_eq!(engine.get(b"1").unwrap(), Some(b"val1".to_vec()));
    assert_eq!(engine.get(b"2").unwrap(), Some(b"val5".to_vec()));
    assert_eq!(engine.get(b"3").unwrap(), Some(b"val3".to_vec()));
    assert_eq!(engine.get(b"4").unwrap(), Some(b"val4".to_vec()));
}

#[test]
fn test_engine_restart_never_reuses_segment_ids() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_with_limit(temp_dir.path(), 45);
        for (key, value) in PAIRS {
            engine.put(key, value).unwrap();
        }
        engine.close().unwrap();
    }

    let engine = open_with_limit(temp_dir.path(), 45);
    engine.put(b"4", b"v4").unwrap();

    // Segment 0 was full, so the write rotated into a fresh segment 1
    assert_eq!(fs::metadata(segment_file(temp_dir.path(), 0)).unwrap().len(), 45);
    assert!(segment_file(temp_dir.path(), 1).exists());
    for (key, value) in PAIRS {
        assert_eq!(engine.get(key).unwrap(), Some(value.to_vec()));
    }
    assert_eq!(engine.get(b"4").unwrap(), Some(b"v4".to_vec()));
}

#[test]
fn test_engine_recovery_without_close() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_with_limit(temp_dir.path(), 1024);
        engine.put(b"key1", b"value1").unwrap();
        engine.put(b"key2", b"value2").unwrap();
        engine.put(b"key1", b"value3").unwrap();
        // Don't call close() - simulating crash
        drop(engine);
    }

    let engine = open_with_limit(temp_dir.path(), 1024);
    assert_eq!(engine.get(b"key1").unwrap(), Some(b"value3".to_vec()));
    assert_eq!(engine.get(b"key2").unwrap(), Some(b"value2".to_vec()));
}

#[test]
fn test_engine_recovers_from_torn_append() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_with_limit(temp_dir.path(), 1024);
        engine.put(b"key1", b"value1").unwrap();
        engine.close().unwrap();
    }

    // Crash halfway through a second append
    let torn = Record::new(b"key2".to_vec(), b"value2".to_vec()).encode();
    OpenOptions::new()
        .append(true)
        .open(segment_file(temp_dir.path(), 0))
        .unwrap()
        .write_all(&torn[..torn.len() - 3])
        .unwrap();

    {
        let engine = open_with_limit(temp_dir.path(), 1024);
        assert_eq!(engine.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(engine.get(b"key2").unwrap(), None);

        // New appends follow the well-formed prefix
        engine.put(b"key3", b"value3").unwrap();
        engine.close().unwrap();
    }

    let engine = open_with_limit(temp_dir.path(), 1024);
    assert_eq!(engine.get(b"key1").unwrap(), Some(b"value1".to_vec()));
    assert_eq!(engine.get(b"key3").unwrap(), Some(b"value3".to_vec()));
}

#[test]
fn test_engine_open_fails_on_truncated_header() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_with_limit(temp_dir.path(), 1024);
        engine.put(b"key1", b"value1").unwrap();
        engine.close().unwrap();
    }

    OpenOptions::new()
        .append(true)
        .open(segment_file(temp_dir.path(), 0))
        .unwrap()
        .write_all(&[9, 0, 0])
        .unwrap();

    let config = Config::builder()
        .data_dir(temp_dir.path())
        .segment_size_limit(1024)
        .build();
    let result = Engine::open(config);

    assert!(matches!(result, Err(SeglogError::Corruption(_))));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_engine_concurrent_gets() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(open_with_limit(temp_dir.path(), 45));

    let pairs = [
        (b"key1".to_vec(), b"value1".to_vec()),
        (b"key2".to_vec(), b"value2".to_vec()),
        (b"key3".to_vec(), b"value3".to_vec()),
    ];
    for (key, value) in &pairs {
        engine.put(key, value).unwrap();
    }

    let handles: Vec<_> = pairs
        .iter()
        .cloned()
        .map(|(key, expected)| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let value = engine.get(&key).unwrap();
                assert_eq!(value, Some(expected));
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_engine_concurrent_writes_and_reads_with_compaction() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .segment_size_limit(128)
        .sync_strategy(SyncStrategy::EveryNEntries { count: 16 })
        .build();
    let engine = Arc::new(Engine::open(config).unwrap());

    // Pre-populated keys readers can check throughout
    for i in 0..20 {
        engine
            .put(format!("fixed{}", i).as_bytes(), format!("stable{}", i).as_bytes())
            .unwrap();
    }

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("t{}-k{}", t, i % 10);
                    let value = format!("t{}-v{}", t, i);
                    engine.put(key.as_bytes(), value.as_bytes()).unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for round in 0..50 {
                    let i = round % 20;
                    let value = engine.get(format!("fixed{}", i).as_bytes()).unwrap();
                    assert_eq!(value, Some(format!("stable{}", i).into_bytes()));
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }
    engine.wait_for_compaction().unwrap();

    for t in 0..4 {
        for k in 0..10 {
            let key = format!("t{}-k{}", t, k);
            let expected = format!("t{}-v{}", t, 90 + k);
            assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(expected.into_bytes()));
        }
    }
    for i in 0..20 {
        assert_eq!(
            engine.get(format!("fixed{}", i).as_bytes()).unwrap(),
            Some(format!("stable{}", i).into_bytes())
        );
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_engine_rejects_zero_segment_limit() {
    let temp_dir = TempDir::new().unwrap();

    let result = Engine::open_path(temp_dir.path(), 0);

    assert!(matches!(result, Err(SeglogError::Config(_))));
}

#[test]
fn test_engine_rejects_low_compaction_threshold() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .compaction_threshold(1)
        .build();

    let result = Engine::open(config);

    assert!(matches!(result, Err(SeglogError::Config(_))));
}

#[test]
fn test_engine_batched_sync_strategy() {
    let temp_dir = TempDir::new().unwrap();

    {
        let config = Config::builder()
            .data_dir(temp_dir.path())
            .sync_strategy(SyncStrategy::EveryNEntries { count: 10 })
            .build();
        let engine = Engine::open(config).unwrap();
        for i in 0..25 {
            engine
                .put(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes())
                .unwrap();
        }
        engine.close().unwrap();
    }

    let engine = Engine::open_path(temp_dir.path(), 1024 * 1024).unwrap();
    for i in 0..25 {
        assert_eq!(
            engine.get(format!("key{}", i).as_bytes()).unwrap(),
            Some(format!("value{}", i).into_bytes())
        );
    }
}

#[test]
fn test_engine_close() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"key", b"value").unwrap();

    engine.close().unwrap();
}

#[test]
fn test_engine_open_path_uses_default_config() {
    let temp_dir = TempDir::new().unwrap();

    let engine = Engine::open_path(temp_dir.path(), 4096).unwrap();

    let config = engine.config();
    assert_eq!(config.segment_size_limit, 4096);
    assert_eq!(config.compaction_threshold, 3);
    assert_eq!(config.sync_strategy, SyncStrategy::EveryWrite);
    assert_eq!(engine.data_dir(), temp_dir.path());
    assert!(!engine.is_compacting());
}

#[cfg(unix)]
#[test]
fn test_engine_failed_compaction_keeps_serving() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_with_limit(temp_dir.path(), 45);

    for (key, value) in PAIRS {
        engine.put(key, value).unwrap();
    }
    for (key, value) in PAIRS {
        engine.put(key, value).unwrap();
    }
    // Block the merged output path before the third rotation
    fs::remove_file(segment_file(temp_dir.path(), 1)).unwrap();
    fs::create_dir(segment_file(temp_dir.path(), 1)).unwrap();

    engine.put(b"4", b"v4").unwrap();

    assert!(engine.wait_for_compaction().is_err());
    assert!(!engine.is_compacting());
    assert_eq!(engine.segment_count(), 3);
    for (key, value) in PAIRS {
        assert_eq!(engine.get(key).unwrap(), Some(value.to_vec()));
    }
    assert_eq!(engine.get(b"4").unwrap(), Some(b"v4".to_vec()));
}
