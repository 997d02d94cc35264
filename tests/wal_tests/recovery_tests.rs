use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use layerkv::config::WalSyncStrategy;
use layerkv::entry::Entry;
use layerkv::wal::{encode_record, WalRecovery, WalWriter, HEADER_SIZE};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn write_entries(count: u64) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("recover.log");

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
    for i in 1..=count {
        writer
            .append(&Entry::put(
                format!("key{:03}", i).into_bytes(),
                format!("value{}", i).into_bytes(),
                i,
            ))
            .unwrap();
    }

    (temp_dir, wal_path)
}

// =============================================================================
// Clean Recovery
// =============================================================================

#[test]
fn test_recover_clean_log() {
    let (_temp, wal_path) = write_entries(10);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();
    assert_eq!(entries.len(), 10);
    assert_eq!(result.entries_recovered, 10);
    assert_eq!(result.entries_corrupted, 0);
    assert_eq!(result.last_sequence, 10);
    assert!(!result.was_truncated);
}

#[test]
fn test_recover_empty_log() {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("empty.log");
    fs::File::create(&wal_path).unwrap();

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();
    assert!(entries.is_empty());
    assert_eq!(result, Default::default());
}

// =============================================================================
// Torn and Corrupt Tails
// =============================================================================

#[test]
fn test_recover_truncates_torn_tail() {
    let (_temp, wal_path) = write_entries(5);
    let clean_len = fs::metadata(&wal_path).unwrap().len();

    // Half a header from a write that never finished
    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&[0xAB; 7]).unwrap();
    drop(file);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();
    assert_eq!(entries.len(), 5);
    assert!(result.was_truncated);
    assert_eq!(result.entries_corrupted, 1);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), clean_len);
}

#[test]
fn test_recover_stops_at_corrupted_record() {
    let (_temp, wal_path) = write_entries(5);

    let mut bytes = fs::read(&wal_path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&wal_path, &bytes).unwrap();

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(result.last_sequence, 4);
    assert!(result.was_truncated);

    // Second pass sees a clean file
    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();
    assert_eq!(entries.len(), 4);
    assert!(!result.was_truncated);
}

#[test]
fn test_recover_rejects_mismatched_header_sequence() {
    let (_temp, wal_path) = write_entries(3);

    // A record whose checksum is valid but whose header claims sequence 9
    // while the payload carries sequence 4
    let mut record = encode_record(&Entry::put(b"key004".to_vec(), b"v".to_vec(), 4))
        .unwrap()
        .to_vec();
    record[..8].copy_from_slice(&9u64.to_le_bytes());
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&record[..8]);
    hasher.update(&record[HEADER_SIZE..]);
    record[8..12].copy_from_slice(&hasher.finalize().to_le_bytes());

    let clean_len = fs::metadata(&wal_path).unwrap().len();
    OpenOptions::new()
        .append(true)
        .open(&wal_path)
        .unwrap()
        .write_all(&record)
        .unwrap();

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(result.last_sequence, 3);
    assert_eq!(result.entries_corrupted, 1);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), clean_len);
}

#[test]
fn test_verify_does_not_modify() {
    let (_temp, wal_path) = write_entries(3);

    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&[1, 2, 3]).unwrap();
    drop(file);
    let len = fs::metadata(&wal_path).unwrap().len();

    let result = WalRecovery::verify(&wal_path).unwrap();
    assert_eq!(result.entries_recovered, 3);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), len);
}

#[test]
fn test_append_after_recovery_is_readable() {
    let (_temp, wal_path) = write_entries(3);

    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&[9; 20]).unwrap();
    drop(file);

    WalRecovery::recover(&wal_path).unwrap();

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
    writer
        .append(&Entry::put(b"after".to_vec(), b"crash".to_vec(), 4))
        .unwrap();
    drop(writer);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[3].key, b"after");
    assert!(!result.was_truncated);
}
