//! Storage Manager
//!
//! Owns the table set: the tables directory, the manifest, and the current
//! copy-on-write version.
//!
//! ## Responsibilities
//! - Load the manifest and open its tables on startup
//! - Remove orphaned table files left by an interrupted flush or compaction
//! - Write new tables (flush products and compaction outputs)
//! - Apply table-set edits: persist the manifest first, then swap versions

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::entry::Entry;
use crate::error::{LayerError, Result};
use crate::memtable::FrozenMemTable;

use super::manifest::Manifest;
use super::version::{Version, VersionEdit};
use super::{SSTableBuilder, SSTableReader, TableMeta};

/// Manages the storage layer
///
/// ## Concurrency:
/// - `current`: brief RwLock around an `Arc<Version>`; readers clone the Arc
///   and search without any lock held
/// - `manifest`: Mutex that serializes table-set edits and their persistence
/// - `next_table_id`: Atomic counter (lock-free)
pub struct StorageManager {
    /// Root directory (holds the manifest)
    data_dir: PathBuf,

    /// Directory where table files are stored
    tables_dir: PathBuf,

    current: RwLock<Arc<Version>>,

    manifest: Mutex<Manifest>,

    /// Next ID for creating new tables (atomic, lock-free)
    next_table_id: AtomicU64,
}

impl StorageManager {
    const TABLE_DIR: &'static str = "tables";

    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directories if they don't exist
    /// 2. Load the manifest (or write an empty one)
    /// 3. Open a reader for every listed table
    /// 4. Delete table files the manifest does not list
    pub fn open(data_dir: &Path) -> Result<Self> {
        let tables_dir = data_dir.join(Self::TABLE_DIR);
        fs::create_dir_all(&tables_dir)?;
        Manifest::remove_stale_tmp(data_dir)?;

        let manifest = match Manifest::load(data_dir)? {
            Some(manifest) => manifest,
            None => {
                let manifest = Manifest::new();
                manifest.store(data_dir)?;
                manifest
            }
        };

        let mut levels = BTreeMap::new();
        for (&level, ids) in &manifest.levels {
            let mut tables = Vec::with_capacity(ids.len());
            for &id in ids {
                let reader = SSTableReader::open(&Self::table_path_in(&tables_dir, id))?;
                if reader.meta().level != level || reader.id() != id {
                    return Err(LayerError::ManifestCorruption(format!(
                        "table file {} claims id {} level {}, manifest lists it on level {}",
                        id,
                        reader.id(),
                        reader.meta().level,
                        level
                    )));
                }
                tables.push(Arc::new(reader));
            }
            levels.insert(level, tables);
        }

        let live: HashSet<u64> = manifest.table_ids().collect();
        let max_seen = Self::remove_orphans(&tables_dir, &live)?;

        let next_id = manifest.next_table_id.max(max_seen + 1);
        let version = Version::new(manifest.version, levels);

        tracing::debug!(
            tables = version.table_count(),
            manifest_version = manifest.version,
            "opened table set"
        );

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            tables_dir,
            current: RwLock::new(Arc::new(version)),
            manifest: Mutex::new(manifest),
            next_table_id: AtomicU64::new(next_id),
        })
    }

    /// Snapshot of the current table set
    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current.read())
    }

    /// Look a key up in the current table set
    ///
    /// Returns the newest stored entry, tombstones included.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        self.current().get(key)
    }

    /// Write a memtable snapshot as a new level-0 table and register it
    pub fn flush_memtable(&self, frozen: &FrozenMemTable) -> Result<TableMeta> {
        if frozen.is_empty() {
            return Err(LayerError::Storage(
                "Cannot flush empty MemTable".to_string(),
            ));
        }

        let table = self
            .write_table(0, frozen.iter().cloned().map(Ok))?
            .ok_or_else(|| LayerError::Storage("flush produced no table".to_string()))?;
        let meta = table.meta().clone();

        self.install(VersionEdit {
            added: vec![table],
            removed: Vec::new(),
            flushed_sequence: Some(frozen.max_sequence()),
        })?;

        Ok(meta)
    }

    /// Write sorted entries into a new table on `level`
    ///
    /// Returns `None` when the input is empty. On error the partial file is
    /// removed and nothing is registered.
    pub fn write_table<I>(&self, level: u32, entries: I) -> Result<Option<Arc<SSTableReader>>>
    where
        I: IntoIterator<Item = Result<Entry>>,
    {
        let id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
        let path = self.table_path(id);

        let mut builder = SSTableBuilder::new(&path, id, level)?;
        for entry in entries {
            let added = entry.and_then(|e| builder.add(&e));
            if let Err(e) = added {
                builder.abandon();
                return Err(e);
            }
        }

        if builder.entry_count() == 0 {
            builder.abandon();
            return Ok(None);
        }

        builder.finish()?;
        match SSTableReader::open(&path) {
            Ok(reader) => Ok(Some(Arc::new(reader))),
            Err(e) => {
                if let Err(rm) = fs::remove_file(&path) {
                    tracing::warn!(table = id, "failed to remove unreadable table: {}", rm);
                }
                Err(e)
            }
        }
    }

    /// Apply an edit: persist the new manifest, then swap in the new version
    ///
    /// If the manifest cannot be written nothing changes and the added tables
    /// are released.
    pub fn install(&self, edit: VersionEdit) -> Result<Arc<Version>> {
        let mut manifest = self.manifest.lock();

        let mut next = manifest.clone();
        next.version += 1;
        next.next_table_id = self.next_table_id.load(Ordering::SeqCst);

        let removed: HashSet<u64> = edit.removed.iter().copied().collect();
        for ids in next.levels.values_mut() {
            ids.retain(|id| !removed.contains(id));
        }
        for table in &edit.added {
            let meta = table.meta();
            next.levels.entry(meta.level).or_default().push(meta.id);
            next.last_sequence = next.last_sequence.max(meta.max_sequence);
        }
        next.levels.retain(|_, ids| !ids.is_empty());
        if let Some(seq) = edit.flushed_sequence {
            next.flushed_sequence = next.flushed_sequence.max(seq);
            next.last_sequence = next.last_sequence.max(seq);
        }

        if let Err(e) = next.store(&self.data_dir) {
            for table in &edit.added {
                table.mark_obsolete();
            }
            return Err(LayerError::Storage(format!(
                "failed to persist manifest version {}: {}",
                next.version, e
            )));
        }

        let (old, version) = {
            let mut current = self.current.write();
            let version = Arc::new(current.apply(&edit, next.version));
            let old = std::mem::replace(&mut *current, Arc::clone(&version));
            (old, version)
        };
        *manifest = next;
        drop(manifest);

        // Storage is released when the last snapshot holding them goes away
        for (_, table) in old.all_tables() {
            if removed.contains(&table.id()) {
                table.mark_obsolete();
            }
        }

        Ok(version)
    }

    /// Copy of the in-memory manifest
    pub fn manifest(&self) -> Manifest {
        self.manifest.lock().clone()
    }

    /// Sequence watermark below which WAL entries are already in tables
    pub fn flushed_sequence(&self) -> u64 {
        self.manifest.lock().flushed_sequence
    }

    /// Get the number of live tables
    pub fn sstable_count(&self) -> usize {
        self.current().table_count()
    }

    /// Table count per non-empty level
    pub fn level_counts(&self) -> BTreeMap<u32, usize> {
        self.current().level_counts()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn tables_dir(&self) -> &Path {
        &self.tables_dir
    }

    /// Get the next table ID (for testing/debugging)
    pub fn next_table_id(&self) -> u64 {
        self.next_table_id.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn table_path(&self, id: u64) -> PathBuf {
        Self::table_path_in(&self.tables_dir, id)
    }

    /// "table_000042.sst" in `dir`
    fn table_path_in(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("table_{:06}.sst", id))
    }

    /// Parse table ID from filename
    /// "table_000042.sst" → Some(42)
    fn parse_table_id(path: &Path) -> Option<u64> {
        if path.extension()? != "sst" {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        name.strip_prefix("table_")?.parse().ok()
    }

    /// Delete table files not listed in the manifest; returns the highest
    /// table id seen on disk
    fn remove_orphans(dir: &Path, live: &HashSet<u64>) -> Result<u64> {
        let mut max_seen = 0;

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            let is_tmp = path.to_string_lossy().ends_with(".sst.tmp");
            let orphan = match Self::parse_table_id(&path) {
                Some(id) => {
                    max_seen = max_seen.max(id);
                    !live.contains(&id)
                }
                None => is_tmp,
            };

            if orphan {
                tracing::warn!(path = %path.display(), "removing orphaned table file");
                fs::remove_file(&path)?;
            }
        }

        Ok(max_seen)
    }
}
