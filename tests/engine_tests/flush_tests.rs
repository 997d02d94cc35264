use std::fs;

use layerkv::config::Config;
use layerkv::engine::Engine;
use tempfile::TempDir;

use crate::common::{entries_config, key, setup_temp_engine};

fn wal_segments(engine: &Engine) -> usize {
    fs::read_dir(engine.data_dir().join("wal")).unwrap().count()
}

// =============================================================================
// Manual Flush Tests
// =============================================================================

#[test]
fn test_flush_moves_memtable_to_table() {
    let (_temp, engine) = setup_temp_engine();
    engine.set("a", "1").unwrap();
    engine.delete("b").unwrap();

    engine.flush().unwrap();

    assert_eq!(engine.memtable_entry_count(), 0);
    assert_eq!(engine.memtable_size(), 0);
    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(engine.level_counts().get(&0), Some(&1));
    assert_eq!(engine.get_string("a").unwrap(), "1");
    assert!(engine.get("b").unwrap().is_none());
}

#[test]
fn test_flush_of_empty_memtable_is_noop() {
    let (_temp, engine) = setup_temp_engine();
    engine.flush().unwrap();
    assert_eq!(engine.sstable_count(), 0);
}

#[test]
fn test_flush_removes_wal_segments() {
    let (_temp, engine) = setup_temp_engine();
    engine.set("a", "1").unwrap();
    assert_eq!(wal_segments(&engine), 1);

    engine.flush().unwrap();

    // Only the fresh active segment remains
    assert_eq!(wal_segments(&engine), 1);
    assert_eq!(engine.stats().wal_segment, 2);
}

#[test]
fn test_memtable_shadows_flushed_value() {
    let (_temp, engine) = setup_temp_engine();
    engine.set("k", "old").unwrap();
    engine.flush().unwrap();
    engine.set("k", "new").unwrap();

    assert_eq!(engine.get_string("k").unwrap(), "new");
}

#[test]
fn test_tombstone_shadows_flushed_value() {
    let (_temp, engine) = setup_temp_engine();
    engine.set("k", "v").unwrap();
    engine.flush().unwrap();

    engine.delete("k").unwrap();
    assert!(engine.get("k").unwrap().is_none());

    engine.flush().unwrap();
    assert_eq!(engine.sstable_count(), 2);
    assert!(engine.get("k").unwrap().is_none());
}

// =============================================================================
// Threshold Flush Tests
// =============================================================================

#[test]
fn test_entry_threshold_triggers_background_flush() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(entries_config(&temp_dir, 3)).unwrap();

    engine.set(key(0), "v").unwrap();
    engine.set(key(1), "v").unwrap();
    assert_eq!(engine.memtable_entry_count(), 2);

    engine.set(key(2), "v").unwrap();
    // Frozen on the write that reached the threshold
    assert_eq!(engine.memtable_entry_count(), 0);

    engine.wait_for_background();
    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(engine.version().tables(0)[0].entry_count(), 3);
    for i in 0..3 {
        assert_eq!(engine.get_string(key(i)).unwrap(), "v");
    }
}

#[test]
fn test_many_threshold_flushes() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(entries_config(&temp_dir, 10)).unwrap();

    for i in 0..100 {
        engine.set(key(i), format!("value{}", i)).unwrap();
    }
    engine.wait_for_background();

    assert_eq!(engine.sstable_count(), 10);
    assert_eq!(engine.stats().flushes, 10);
    assert_eq!(engine.stats().frozen_memtables, 0);
    for i in 0..100 {
        assert_eq!(engine.get_string(key(i)).unwrap(), format!("value{}", i));
    }
}

#[test]
fn test_byte_threshold_triggers_flush() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .memtable_size_limit(100) // Very small to trigger flushes
        .background_compaction(false)
        .build();
    let engine = Engine::open(config).unwrap();

    for i in 0..10 {
        engine.set(key(i), vec![b'x'; 50]).unwrap();
    }
    engine.wait_for_background();

    assert!(engine.sstable_count() >= 4);
    for i in 0..10 {
        assert_eq!(engine.get(key(i)).unwrap(), Some(vec![b'x'; 50]));
    }
}
