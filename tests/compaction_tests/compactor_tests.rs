use std::sync::Arc;

use layerkv::compaction::Compactor;
use layerkv::entry::Entry;
use layerkv::storage::{StorageManager, VersionEdit};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_storage() -> (TempDir, Arc<StorageManager>) {
    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(StorageManager::open(temp_dir.path()).unwrap());
    (temp_dir, storage)
}

/// Write and register one table on `level`; returns its id
fn add_table(storage: &StorageManager, level: u32, entries: Vec<Entry>) -> u64 {
    let table = storage
        .write_table(level, entries.into_iter().map(Ok))
        .unwrap()
        .unwrap();
    let id = table.id();
    storage
        .install(VersionEdit {
            added: vec![table],
            ..VersionEdit::default()
        })
        .unwrap();
    id
}

fn put(key: &str, value: &str, sequence: u64) -> Entry {
    Entry::put(key.as_bytes().to_vec(), value.as_bytes().to_vec(), sequence)
}

fn del(key: &str, sequence: u64) -> Entry {
    Entry::tombstone(key.as_bytes().to_vec(), sequence)
}

// =============================================================================
// Selection Tests
// =============================================================================

#[test]
fn test_single_table_is_not_compacted() {
    let (_temp, storage) = setup_storage();
    add_table(&storage, 0, vec![put("a", "1", 1)]);

    let compactor = Compactor::new(Arc::clone(&storage), 4);
    assert!(compactor.levels_needing_compaction().is_empty());
    assert!(compactor.compact_level(0).unwrap().is_none());
    assert_eq!(storage.sstable_count(), 1);
}

#[test]
fn test_pick_selects_oldest_pair() {
    let (_temp, storage) = setup_storage();
    let first = add_table(&storage, 0, vec![put("a", "1", 1)]);
    let second = add_table(&storage, 0, vec![put("b", "2", 2)]);
    add_table(&storage, 0, vec![put("c", "3", 3)]);

    let version = storage.current();
    let (x, y) = Compactor::pick(&version, 0).unwrap();
    assert_eq!((x.id(), y.id()), (first, second));
}

#[test]
fn test_output_level() {
    let (_temp, storage) = setup_storage();
    let compactor = Compactor::new(storage, 3);

    assert_eq!(compactor.output_level(0), 1);
    assert_eq!(compactor.output_level(2), 3);
    assert_eq!(compactor.output_level(3), 3);
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_pair_merges_to_next_level() {
    let (_temp, storage) = setup_storage();
    let first = add_table(&storage, 0, vec![put("a", "1", 1), put("k", "old", 2)]);
    let second = add_table(&storage, 0, vec![put("b", "2", 3), put("k", "new", 4)]);

    let compactor = Compactor::new(Arc::clone(&storage), 4);
    let outcome = compactor.compact_level(0).unwrap().unwrap();

    assert_eq!(outcome.level, 0);
    assert_eq!(outcome.output_level, 1);
    assert_eq!(outcome.inputs, vec![first, second]);
    assert_eq!(outcome.entries_read, 4);
    assert_eq!(outcome.entries_written, 3);

    let counts = storage.level_counts();
    assert_eq!(counts.get(&0), None);
    assert_eq!(counts.get(&1), Some(&1));

    assert_eq!(storage.get(b"k").unwrap().unwrap().value, b"new");
    assert_eq!(storage.get(b"a").unwrap().unwrap().value, b"1");
    assert!(outcome.summary().contains("level 0"));
}

#[test]
fn test_max_level_merges_in_place() {
    let (_temp, storage) = setup_storage();
    add_table(&storage, 2, vec![put("a", "1", 1)]);
    add_table(&storage, 2, vec![put("b", "2", 2)]);

    let compactor = Compactor::new(Arc::clone(&storage), 2);
    let outcome = compactor.compact_level(2).unwrap().unwrap();

    assert_eq!(outcome.output_level, 2);
    assert_eq!(storage.level_counts().get(&2), Some(&1));
}

#[test]
fn test_merged_inputs_are_deleted() {
    let (_temp, storage) = setup_storage();
    add_table(&storage, 0, vec![put("a", "1", 1)]);
    add_table(&storage, 0, vec![put("b", "2", 2)]);

    let paths: Vec<_> = storage
        .current()
        .tables(0)
        .iter()
        .map(|t| t.path().to_path_buf())
        .collect();

    Compactor::new(Arc::clone(&storage), 4)
        .compact_level(0)
        .unwrap()
        .unwrap();

    for path in paths {
        assert!(!path.exists(), "{} should be removed", path.display());
    }
}

// =============================================================================
// Tombstone Tests
// =============================================================================

#[test]
fn test_tombstones_dropped_when_nothing_above() {
    let (_temp, storage) = setup_storage();
    add_table(&storage, 0, vec![put("a", "1", 1), put("k", "v", 2)]);
    add_table(&storage, 0, vec![del("k", 3), del("z", 4)]);

    let outcome = Compactor::new(Arc::clone(&storage), 4)
        .compact_level(0)
        .unwrap()
        .unwrap();

    assert_eq!(outcome.tombstones_dropped, 2);
    assert_eq!(outcome.entries_written, 1);
    assert!(storage.get(b"k").unwrap().is_none());
    assert!(storage.get(b"z").unwrap().is_none());
}

#[test]
fn test_tombstones_kept_when_older_data_above() {
    let (_temp, storage) = setup_storage();
    add_table(&storage, 1, vec![put("k", "ancient", 1)]);
    add_table(&storage, 0, vec![put("a", "1", 2)]);
    add_table(&storage, 0, vec![del("k", 3)]);

    let outcome = Compactor::new(Arc::clone(&storage), 4)
        .compact_level(0)
        .unwrap()
        .unwrap();

    assert_eq!(outcome.tombstones_dropped, 0);
    // The tombstone still shadows the older value on the same level
    let entry = storage.get(b"k").unwrap().unwrap();
    assert!(entry.tombstone);
}

#[test]
fn test_all_tombstones_produce_no_output() {
    let (_temp, storage) = setup_storage();
    add_table(&storage, 0, vec![del("a", 1)]);
    add_table(&storage, 0, vec![del("b", 2)]);

    let outcome = Compactor::new(Arc::clone(&storage), 4)
        .compact_level(0)
        .unwrap()
        .unwrap();

    assert!(outcome.output.is_none());
    assert_eq!(storage.sstable_count(), 0);
}

#[test]
fn test_repeated_compaction_drains_levels() {
    let (_temp, storage) = setup_storage();
    for i in 0..8u64 {
        add_table(&storage, 0, vec![put(&format!("key{}", i), "v", i + 1)]);
    }

    let compactor = Compactor::new(Arc::clone(&storage), 6);
    while let Some(level) = compactor.levels_needing_compaction().first().copied() {
        compactor.compact_level(level).unwrap().unwrap();
    }

    assert_eq!(storage.sstable_count(), 1);
    for i in 0..8u64 {
        assert!(storage.get(format!("key{}", i).as_bytes()).unwrap().is_some());
    }
}
