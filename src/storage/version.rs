//! Table set versions
//!
//! A `Version` is an immutable snapshot of the live tables per level.
//! Readers clone the current `Arc<Version>` under a brief lock and search it
//! without holding any lock; writers build a new version from an edit and
//! swap it in. A compaction swap therefore never tears an in-flight read.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::entry::Entry;
use crate::error::Result;

use super::sstable::SSTableReader;

/// Change to the table set, applied atomically
#[derive(Debug, Default)]
pub struct VersionEdit {
    /// New tables; each lands on the level recorded in its metadata
    pub added: Vec<Arc<SSTableReader>>,
    /// Ids of tables leaving the set
    pub removed: Vec<u64>,
    /// Raise the flushed watermark (flush only)
    pub flushed_sequence: Option<u64>,
}

/// Immutable snapshot of the table set
#[derive(Debug, Default)]
pub struct Version {
    number: u64,
    /// Tables per level, in insertion order
    levels: BTreeMap<u32, Vec<Arc<SSTableReader>>>,
}

impl Version {
    pub fn new(number: u64, levels: BTreeMap<u32, Vec<Arc<SSTableReader>>>) -> Self {
        Self { number, levels }
    }

    /// Monotonic version number (matches the manifest version)
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Tables on a level, in insertion order
    pub fn tables(&self, level: u32) -> &[Arc<SSTableReader>] {
        self.levels.get(&level).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every table with its level
    pub fn all_tables(&self) -> impl Iterator<Item = (u32, &Arc<SSTableReader>)> {
        self.levels
            .iter()
            .flat_map(|(&level, tables)| tables.iter().map(move |t| (level, t)))
    }

    /// Table count per non-empty level
    pub fn level_counts(&self) -> BTreeMap<u32, usize> {
        self.levels
            .iter()
            .filter(|(_, tables)| !tables.is_empty())
            .map(|(&level, tables)| (level, tables.len()))
            .collect()
    }

    pub fn table_count(&self) -> usize {
        self.levels.values().map(Vec::len).sum()
    }

    /// Whether any table lives strictly above `level`
    pub fn has_tables_above(&self, level: u32) -> bool {
        self.levels
            .range(level + 1..)
            .any(|(_, tables)| !tables.is_empty())
    }

    /// Highest sequence stored in any table
    pub fn max_sequence(&self) -> u64 {
        self.all_tables()
            .map(|(_, t)| t.meta().max_sequence)
            .max()
            .unwrap_or(0)
    }

    /// Look a key up from level 0 upward
    ///
    /// Within a level every candidate table is checked and the highest
    /// sequence wins (level-0 tables overlap). The first level with a hit
    /// answers; a tombstone hit is returned as-is so it shadows older levels.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        for tables in self.levels.values() {
            let mut best: Option<Entry> = None;
            for table in tables.iter().filter(|t| t.might_contain(key)) {
                if let Some(entry) = table.get(key)? {
                    best = Some(match best {
                        Some(current) => current.newest(entry),
                        None => entry,
                    });
                }
            }
            if best.is_some() {
                return Ok(best);
            }
        }
        Ok(None)
    }

    /// Build the successor version; removed tables are marked obsolete by
    /// the caller once the swap is durable
    pub fn apply(&self, edit: &VersionEdit, number: u64) -> Version {
        let removed: HashSet<u64> = edit.removed.iter().copied().collect();

        let mut levels: BTreeMap<u32, Vec<Arc<SSTableReader>>> = self
            .levels
            .iter()
            .map(|(&level, tables)| {
                let kept = tables
                    .iter()
                    .filter(|t| !removed.contains(&t.id()))
                    .cloned()
                    .collect::<Vec<_>>();
                (level, kept)
            })
            .filter(|(_, tables)| !tables.is_empty())
            .collect();

        for table in &edit.added {
            levels
                .entry(table.meta().level)
                .or_default()
                .push(Arc::clone(table));
        }

        Version { number, levels }
    }
}
