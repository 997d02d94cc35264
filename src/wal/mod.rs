//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append every mutation before it reaches the memtable
//! - CRC32 checksums for corruption detection
//! - One segment per memtable generation, rotated on freeze
//! - Crash recovery and replay
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Record 1                                     │
//! │ ┌─────────┬─────────┬─────────┬────────────┐ │
//! │ │ Seq (8) │ CRC (4) │ Len (4) │ Entry data │ │
//! │ └─────────┴─────────┴─────────┴────────────┘ │
//! ├──────────────────────────────────────────────┤
//! │ Record 2 ...                                 │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Segments live in `{data_dir}/wal/wal_{id:06}.log`. A segment is deleted
//! only once every entry in it is part of a table registered in the manifest.

mod record;
mod writer;
mod reader;
mod recovery;

use std::fs;
use std::path::{Path, PathBuf};

pub use record::{decode_record, encode_record, HEADER_SIZE, MAX_RECORD_SIZE};
pub use writer::WalWriter;
pub use reader::WalReader;
pub use recovery::{RecoveryResult, WalRecovery};

use crate::config::WalSyncStrategy;
use crate::entry::Entry;
use crate::error::Result;

/// Entries recovered from every segment in a WAL directory
#[derive(Debug, Default)]
pub struct WalReplay {
    /// Entries in append order across all segments
    pub entries: Vec<Entry>,

    /// Segment ids found on disk, ascending
    pub segments: Vec<u64>,

    /// Aggregated recovery statistics
    pub result: RecoveryResult,
}

/// Segmented write-ahead log
///
/// Only the active segment is ever written. Older segments are sealed and
/// wait for their memtable to be flushed.
pub struct Wal {
    dir: PathBuf,
    sync_strategy: WalSyncStrategy,
    active_id: u64,
    writer: WalWriter,
}

impl Wal {
    /// Create (or reopen for append) the segment with the given id
    pub fn open(dir: &Path, segment_id: u64, sync_strategy: WalSyncStrategy) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let writer = WalWriter::open(&Self::segment_path(dir, segment_id), sync_strategy)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            sync_strategy,
            active_id: segment_id,
            writer,
        })
    }

    /// Replay every segment in `dir` in id order
    ///
    /// Torn tails are truncated in place so the segment can be appended to or
    /// replayed again without tripping over the same partial record.
    pub fn replay(dir: &Path) -> Result<WalReplay> {
        let mut replay = WalReplay {
            segments: Self::list_segments(dir)?,
            ..WalReplay::default()
        };

        for &id in &replay.segments {
            let (entries, result) = WalRecovery::recover(&Self::segment_path(dir, id))?;
            replay.entries.extend(entries);
            replay.result.merge(&result);
        }

        Ok(replay)
    }

    /// Append an entry to the active segment; returns its byte offset
    pub fn append(&mut self, entry: &Entry) -> Result<u64> {
        self.writer.append(entry)
    }

    /// Seal the active segment and start the next one
    ///
    /// Returns the id of the sealed segment. Every segment with an id up to
    /// and including it belongs to the memtable generation being frozen.
    pub fn rotate(&mut self) -> Result<u64> {
        self.writer.sync()?;

        let next_id = self.active_id + 1;
        let writer = WalWriter::open(&Self::segment_path(&self.dir, next_id), self.sync_strategy)?;

        let sealed = self.active_id;
        self.writer = writer;
        self.active_id = next_id;

        tracing::debug!(sealed, active = next_id, "rotated WAL segment");
        Ok(sealed)
    }

    /// Force sync the active segment
    pub fn sync(&mut self) -> Result<()> {
        self.writer.sync()
    }

    /// Id of the segment currently receiving appends
    pub fn active_segment(&self) -> u64 {
        self.active_id
    }

    /// Delete every segment with id <= `segment_id`
    pub fn remove_segments_through(dir: &Path, segment_id: u64) -> Result<usize> {
        let mut removed = 0;
        for id in Self::list_segments(dir)? {
            if id > segment_id {
                break;
            }
            fs::remove_file(Self::segment_path(dir, id))?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Segment ids present in `dir`, ascending
    pub fn list_segments(dir: &Path) -> Result<Vec<u64>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                if let Some(id) = Self::parse_segment_id(&path) {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// "wal_000042.log" in `dir`
    pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("wal_{:06}.log", id))
    }

    fn parse_segment_id(path: &Path) -> Option<u64> {
        if path.extension()? != "log" {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        name.strip_prefix("wal_")?.parse().ok()
    }
}
