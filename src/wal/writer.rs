//! WAL Writer
//!
//! Handles appending records to a WAL segment.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::entry::Entry;
use crate::error::{LayerError, Result};

use super::record::encode_record;

/// Writes records to a single WAL segment file
pub struct WalWriter {
    path: PathBuf,
    file: File,
    sync_strategy: WalSyncStrategy,
    /// Appends since the last fsync
    unsynced: usize,
    /// End of the last fully written record
    offset: u64,
    last_sequence: u64,
}

impl WalWriter {
    /// Open or create a WAL segment for appending
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let offset = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            sync_strategy,
            unsynced: 0,
            offset,
            last_sequence: 0,
        })
    }

    /// Append an entry; returns the offset the record starts at
    ///
    /// Under `EveryWrite` the record is fsynced before this returns. Any
    /// failure is reported as `Durability` and the file is cut back to the
    /// previous record boundary so later appends stay readable.
    pub fn append(&mut self, entry: &Entry) -> Result<u64> {
        let record = encode_record(entry)?;
        let start = self.offset;

        if let Err(e) = self.write_record(&record) {
            if let Err(trim) = self.file.set_len(start) {
                tracing::error!(path = %self.path.display(), "failed to trim torn WAL record: {}", trim);
            }
            return Err(LayerError::Durability(format!(
                "WAL append of sequence {} failed: {}",
                entry.sequence, e
            )));
        }

        self.offset += record.len() as u64;
        self.last_sequence = entry.sequence;
        Ok(start)
    }

    fn write_record(&mut self, record: &[u8]) -> std::io::Result<()> {
        self.file.write_all(record)?;
        self.unsynced += 1;

        let due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if due {
            self.file.sync_data()?;
            self.unsynced = 0;
        }
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        if self.unsynced > 0 {
            self.file
                .sync_data()
                .map_err(|e| LayerError::Durability(format!("WAL sync failed: {}", e)))?;
            self.unsynced = 0;
        }
        Ok(())
    }

    /// Sequence of the last record appended through this writer
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Current size of the segment in bytes
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
