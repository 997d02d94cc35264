use std::fs;

use layerkv::error::LayerError;
use layerkv::storage::Manifest;
use tempfile::TempDir;

fn sample_manifest() -> Manifest {
    let mut manifest = Manifest::new();
    manifest.version = 4;
    manifest.next_table_id = 9;
    manifest.last_sequence = 120;
    manifest.flushed_sequence = 100;
    manifest.levels.insert(0, vec![7, 8]);
    manifest.levels.insert(1, vec![5]);
    manifest
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_new_manifest_is_empty() {
    let manifest = Manifest::new();
    assert_eq!(manifest.next_table_id, 1);
    assert_eq!(manifest.table_count(), 0);
}

#[test]
fn test_load_missing_returns_none() {
    let temp_dir = TempDir::new().unwrap();
    assert!(Manifest::load(temp_dir.path()).unwrap().is_none());
}

#[test]
fn test_store_then_load() {
    let temp_dir = TempDir::new().unwrap();
    let manifest = sample_manifest();
    manifest.store(temp_dir.path()).unwrap();

    let loaded = Manifest::load(temp_dir.path()).unwrap().unwrap();
    assert_eq!(loaded, manifest);
    assert_eq!(loaded.table_count(), 3);

    let mut ids: Vec<u64> = loaded.table_ids().collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![5, 7, 8]);
}

#[test]
fn test_store_replaces_previous() {
    let temp_dir = TempDir::new().unwrap();
    sample_manifest().store(temp_dir.path()).unwrap();

    let mut next = sample_manifest();
    next.version = 5;
    next.levels.remove(&0);
    next.store(temp_dir.path()).unwrap();

    let loaded = Manifest::load(temp_dir.path()).unwrap().unwrap();
    assert_eq!(loaded.version, 5);
    assert_eq!(loaded.table_count(), 1);
    assert!(!temp_dir.path().join("MANIFEST.tmp").exists());
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_corrupted_manifest_rejected() {
    let temp_dir = TempDir::new().unwrap();
    sample_manifest().store(temp_dir.path()).unwrap();

    let path = Manifest::path(temp_dir.path());
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x55;
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        Manifest::load(temp_dir.path()),
        Err(LayerError::ManifestCorruption(_))
    ));
}

#[test]
fn test_short_manifest_rejected() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(Manifest::path(temp_dir.path()), b"LYMF").unwrap();

    assert!(matches!(
        Manifest::load(temp_dir.path()),
        Err(LayerError::ManifestCorruption(_))
    ));
}

#[test]
fn test_remove_stale_tmp() {
    let temp_dir = TempDir::new().unwrap();
    let tmp = temp_dir.path().join("MANIFEST.tmp");
    fs::write(&tmp, b"half written").unwrap();

    Manifest::remove_stale_tmp(temp_dir.path()).unwrap();
    assert!(!tmp.exists());
}
