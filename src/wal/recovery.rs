//! WAL Recovery
//!
//! Handles crash recovery by replaying a WAL segment.

use std::fs::OpenOptions;
use std::path::Path;

use crate::entry::Entry;
use crate::error::{LayerError, Result};

use super::WalReader;

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupt or torn records found (recovery stops at the first)
    pub entries_corrupted: u64,

    /// Highest valid sequence seen
    pub last_sequence: u64,

    /// Whether the segment was truncated (partial writes removed)
    pub was_truncated: bool,
}

impl RecoveryResult {
    /// Fold another segment's statistics into this one
    pub fn merge(&mut self, other: &RecoveryResult) {
        self.entries_recovered += other.entries_recovered;
        self.entries_corrupted += other.entries_corrupted;
        self.last_sequence = self.last_sequence.max(other.last_sequence);
        self.was_truncated |= other.was_truncated;
    }
}

impl WalRecovery {
    /// Recover entries from a WAL segment
    ///
    /// This will:
    /// 1. Read all valid records in order
    /// 2. Stop at the first torn or corrupt record
    /// 3. Truncate the file back to the last valid record
    /// 4. Return all valid entries in order
    pub fn recover(path: &Path) -> Result<(Vec<Entry>, RecoveryResult)> {
        let (entries, result, valid_len) = Self::scan(path)?;

        if result.was_truncated {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
            tracing::warn!(
                path = %path.display(),
                valid_len,
                "truncated WAL segment after corrupt or partial record"
            );
        }

        Ok((entries, result))
    }

    /// Verify integrity of a WAL segment without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let (_, result, _) = Self::scan(path)?;
        Ok(result)
    }

    fn scan(path: &Path) -> Result<(Vec<Entry>, RecoveryResult, u64)> {
        let mut reader = WalReader::open(path)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    result.entries_recovered += 1;
                    result.last_sequence = result.last_sequence.max(entry.sequence);
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(LayerError::WalCorruption(reason)) => {
                    tracing::debug!(path = %path.display(), "WAL scan stopped: {}", reason);
                    result.entries_corrupted += 1;
                    result.was_truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok((entries, result, reader.position()))
    }
}
