//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::mem;

use parking_lot::RwLock;

use crate::entry::Entry;

/// Size of a memtable at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemTableSize {
    /// Approximate bytes held
    pub bytes: usize,
    /// Distinct keys, tombstones included
    pub entries: usize,
}

#[derive(Default)]
struct Inner {
    data: BTreeMap<Vec<u8>, Entry>,
    bytes: usize,
}

/// In-memory table for recent writes
///
/// Size counters live under the same lock as the map so a swap never
/// observes a half-updated size.
#[derive(Default)]
pub struct MemTable {
    inner: RwLock<Inner>,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a live value
    pub fn set(&self, key: Vec<u8>, value: Vec<u8>, sequence: u64) -> MemTableSize {
        self.apply(Entry::put(key, value, sequence))
    }

    /// Record a delete as a tombstone
    pub fn delete(&self, key: Vec<u8>, sequence: u64) -> MemTableSize {
        self.apply(Entry::tombstone(key, sequence))
    }

    /// Insert an entry unless a newer version of the key is already present
    pub fn apply(&self, entry: Entry) -> MemTableSize {
        let mut inner = self.inner.write();

        let added = entry.approximate_size();
        match inner.data.get(&entry.key) {
            Some(existing) if existing.sequence > entry.sequence => {}
            Some(existing) => {
                let removed = existing.approximate_size();
                inner.bytes = inner.bytes - removed + added;
                inner.data.insert(entry.key.clone(), entry);
            }
            None => {
                inner.bytes += added;
                inner.data.insert(entry.key.clone(), entry);
            }
        }

        MemTableSize {
            bytes: inner.bytes,
            entries: inner.data.len(),
        }
    }

    /// Latest entry for a key; a tombstone is returned as-is
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.inner.read().data.get(key).cloned()
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.inner.read().bytes
    }

    /// Get entry count
    pub fn entry_count(&self) -> usize {
        self.inner.read().data.len()
    }

    /// Bytes and entry count read together
    pub fn stats(&self) -> MemTableSize {
        let inner = self.inner.read();
        MemTableSize {
            bytes: inner.bytes,
            entries: inner.data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().data.is_empty()
    }

    /// Copy of all entries in key order
    pub fn entries(&self) -> Vec<Entry> {
        self.inner.read().data.values().cloned().collect()
    }

    /// Move every entry into an immutable snapshot and leave this table empty
    ///
    /// Runs under the write lock: no writer can land in the old contents after
    /// this returns, and none is lost in between.
    pub fn snapshot_and_clear(&self, wal_segment: u64) -> FrozenMemTable {
        let mut inner = self.inner.write();
        let taken = mem::take(&mut *inner);

        FrozenMemTable {
            wal_segment,
            bytes: taken.bytes,
            data: taken.data,
        }
    }
}

/// Immutable memtable waiting to be written as a level-0 table
#[derive(Debug)]
pub struct FrozenMemTable {
    /// Highest WAL segment holding entries of this generation
    wal_segment: u64,
    bytes: usize,
    data: BTreeMap<Vec<u8>, Entry>,
}

impl FrozenMemTable {
    pub fn get(&self, key: &[u8]) -> Option<&Entry> {
        self.data.get(key)
    }

    /// Entries in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.data.values()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn size(&self) -> usize {
        self.bytes
    }

    pub fn wal_segment(&self) -> u64 {
        self.wal_segment
    }

    /// Highest sequence number in the snapshot (0 when empty)
    pub fn max_sequence(&self) -> u64 {
        self.data.values().map(|e| e.sequence).max().unwrap_or(0)
    }
}
