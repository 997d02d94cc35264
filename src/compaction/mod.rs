//! Compaction Module
//!
//! Merges sorted tables to bound the table count per level and reclaim
//! superseded and deleted entries.
//!
//! ## Policy
//! Whenever a level holds two or more tables, the two holding the oldest data
//! (smallest `max_sequence`, ties broken by id) are merged into one table on
//! the next level. Tables on `max_level` are merged in place.
//!
//! ## Tombstones
//! A tombstone is dropped only when no table lives above the input level.
//! The inputs are the oldest tables of their level and every level above is
//! empty, so no older copy of the key can survive to be resurrected.
//!
//! ## Concurrency
//! A level is claimed for the duration of its merge, so a table is never
//! selected into two merges at once. Merges of different levels run in
//! parallel.

mod merge;

use std::cell::Cell;
use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{LayerError, Result};
use crate::storage::{SSTableReader, StorageManager, TableMeta, Version, VersionEdit};

pub use merge::{EntrySource, MergeIterator};

/// What a completed merge did
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    /// Level the inputs were taken from
    pub level: u32,
    /// Level the output landed on
    pub output_level: u32,
    /// Ids of the replaced tables
    pub inputs: Vec<u64>,
    /// `None` when every surviving entry was a dropped tombstone
    pub output: Option<TableMeta>,
    pub entries_read: u64,
    pub entries_written: u64,
    pub tombstones_dropped: u64,
}

impl CompactionOutcome {
    /// Human readable one-liner used in change events and logs
    pub fn summary(&self) -> String {
        match &self.output {
            Some(meta) => format!(
                "compacted level {} tables {:?} into table {} on level {} ({} -> {} entries)",
                self.level, self.inputs, meta.id, self.output_level, self.entries_read, self.entries_written
            ),
            None => format!(
                "compacted level {} tables {:?} away ({} entries, all deleted)",
                self.level, self.inputs, self.entries_read
            ),
        }
    }
}

/// Selects and runs merges against a storage manager
pub struct Compactor {
    storage: Arc<StorageManager>,
    max_level: u32,
    /// Levels with a merge in flight
    busy: Mutex<BTreeSet<u32>>,
}

/// Releases a level claim on drop
struct LevelClaim<'a> {
    busy: &'a Mutex<BTreeSet<u32>>,
    level: u32,
}

impl Drop for LevelClaim<'_> {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.level);
    }
}

impl Compactor {
    pub fn new(storage: Arc<StorageManager>, max_level: u32) -> Self {
        Self {
            storage,
            max_level,
            busy: Mutex::new(BTreeSet::new()),
        }
    }

    /// Level a merge of `level` writes to
    pub fn output_level(&self, level: u32) -> u32 {
        if level >= self.max_level {
            level
        } else {
            level + 1
        }
    }

    /// The two tables on `level` holding the oldest data
    pub fn pick(version: &Version, level: u32) -> Option<(Arc<SSTableReader>, Arc<SSTableReader>)> {
        let mut tables: Vec<&Arc<SSTableReader>> = version.tables(level).iter().collect();
        if tables.len() < 2 {
            return None;
        }
        tables.sort_by_key(|t| (t.meta().max_sequence, t.id()));
        Some((Arc::clone(tables[0]), Arc::clone(tables[1])))
    }

    /// Levels currently holding two or more tables
    pub fn levels_needing_compaction(&self) -> Vec<u32> {
        self.storage
            .current()
            .level_counts()
            .into_iter()
            .filter(|&(_, count)| count >= 2)
            .map(|(level, _)| level)
            .collect()
    }

    /// Merge one pair on `level`
    ///
    /// Returns `Ok(None)` when the level has fewer than two tables or is
    /// already being merged. On failure the inputs stay registered and
    /// untouched; the next cycle selects them again.
    pub fn compact_level(&self, level: u32) -> Result<Option<CompactionOutcome>> {
        let _claim = match self.claim(level) {
            Some(claim) => claim,
            None => return Ok(None),
        };

        let version = self.storage.current();
        let (first, second) = match Self::pick(&version, level) {
            Some(pair) => pair,
            None => return Ok(None),
        };

        let output_level = self.output_level(level);
        let drop_tombstones = !version.has_tables_above(level);
        drop(version);

        tracing::debug!(
            level,
            output_level,
            inputs = ?[first.id(), second.id()],
            drop_tombstones,
            "starting compaction"
        );

        self.merge_pair(level, output_level, &first, &second, drop_tombstones)
            .map(Some)
            .map_err(|e| match e {
                LayerError::Compaction(_) => e,
                other => LayerError::Compaction(format!(
                    "level {} tables [{}, {}]: {}",
                    level,
                    first.id(),
                    second.id(),
                    other
                )),
            })
    }

    fn claim(&self, level: u32) -> Option<LevelClaim<'_>> {
        let mut busy = self.busy.lock();
        if !busy.insert(level) {
            return None;
        }
        Some(LevelClaim {
            busy: &self.busy,
            level,
        })
    }

    fn merge_pair(
        &self,
        level: u32,
        output_level: u32,
        first: &Arc<SSTableReader>,
        second: &Arc<SSTableReader>,
        drop_tombstones: bool,
    ) -> Result<CompactionOutcome> {
        let sources: Vec<EntrySource> = vec![Box::new(first.iter()?), Box::new(second.iter()?)];

        let dropped = Cell::new(0u64);
        let merged = MergeIterator::new(sources).filter(|item| match item {
            Ok(entry) if drop_tombstones && entry.tombstone => {
                dropped.set(dropped.get() + 1);
                false
            }
            _ => true,
        });

        let output = self.storage.write_table(output_level, merged)?;
        let output_meta = output.as_ref().map(|t| t.meta().clone());

        self.storage.install(VersionEdit {
            added: output.into_iter().collect(),
            removed: vec![first.id(), second.id()],
            flushed_sequence: None,
        })?;

        Ok(CompactionOutcome {
            level,
            output_level,
            inputs: vec![first.id(), second.id()],
            entries_read: first.entry_count() + second.entry_count(),
            entries_written: output_meta.as_ref().map_or(0, |m| m.entry_count),
            output: output_meta,
            tombstones_dropped: dropped.get(),
        })
    }
}
