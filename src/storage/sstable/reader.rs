//! SSTable Reader
//!
//! Opens table files and provides O(log n) key lookups via in-memory index.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Buf;
use parking_lot::Mutex;

use crate::entry::Entry;
use crate::error::{LayerError, Result};

use super::iterator::SSTableIterator;
use super::{
    TableMeta, ENTRY_HEADER_SIZE, FOOTER_SIZE, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION,
};

/// Reader for table files with in-memory index for O(log n) lookups
///
/// The file handle sits behind a mutex so lookups only need `&self` and a
/// table can be shared between concurrent readers through an `Arc`.
///
/// Once a table has been replaced in the table set it is marked obsolete;
/// the file is removed when the last reference is dropped, so a reader
/// holding an older snapshot never loses its file.
pub struct SSTableReader {
    path: PathBuf,
    file: Mutex<BufReader<File>>,
    /// In-memory index: key → file offset
    index: BTreeMap<Vec<u8>, u64>,
    meta: TableMeta,
    /// Index block starting offset (end of the data block)
    index_offset: u64,
    obsolete: AtomicBool,
}

impl SSTableReader {
    /// Open a table for reading
    ///
    /// Validates header, footer and the data checksum, then loads the index
    /// and metadata into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(LayerError::Storage(format!(
                "table {} is too small ({} bytes)",
                path.display(),
                file_size
            )));
        }

        // Read and validate header
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        let mut cursor = &header[..];
        let mut magic = [0u8; 4];
        cursor.copy_to_slice(&mut magic);
        if &magic != MAGIC {
            return Err(LayerError::Storage(format!(
                "Invalid table magic: expected LYKV, got {:?}",
                magic
            )));
        }

        let version = cursor.get_u16_le();
        if version != VERSION {
            return Err(LayerError::Storage(format!(
                "Unsupported table version: {}",
                version
            )));
        }

        let header_count = cursor.get_u64_le();

        // Read footer
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let mut cursor = &footer[..];
        let index_offset = cursor.get_u64_le();
        let meta_offset = cursor.get_u64_le();
        let data_crc = cursor.get_u32_le();

        let meta_end = file_size - FOOTER_SIZE;
        if index_offset < HEADER_SIZE || meta_offset < index_offset || meta_offset > meta_end {
            return Err(LayerError::Storage(format!(
                "table {} has an invalid footer",
                path.display()
            )));
        }

        // Verify the data block checksum
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut hasher = crc32fast::Hasher::new();
        let mut remaining = index_offset - HEADER_SIZE;
        let mut chunk = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let n = remaining.min(chunk.len() as u64) as usize;
            file.read_exact(&mut chunk[..n])?;
            hasher.update(&chunk[..n]);
            remaining -= n as u64;
        }
        if hasher.finalize() != data_crc {
            return Err(LayerError::Storage(format!(
                "table {} failed data checksum",
                path.display()
            )));
        }

        // Index block, already positioned at index_offset
        let mut index_data = vec![0u8; (meta_offset - index_offset) as usize];
        file.read_exact(&mut index_data)?;

        let mut meta_data = vec![0u8; (meta_end - meta_offset) as usize];
        file.read_exact(&mut meta_data)?;
        let meta: TableMeta = bincode::deserialize(&meta_data)?;

        // Parse index entries: [key_len(4)][offset(8)][key]
        let mut index = BTreeMap::new();
        let mut cursor = &index_data[..];
        while cursor.has_remaining() {
            if cursor.remaining() < 12 {
                return Err(LayerError::Storage(format!(
                    "table {} has a truncated index",
                    path.display()
                )));
            }
            let key_len = cursor.get_u32_le() as usize;
            let offset = cursor.get_u64_le();
            if cursor.remaining() < key_len {
                return Err(LayerError::Storage(format!(
                    "table {} has a truncated index key",
                    path.display()
                )));
            }
            let key = cursor[..key_len].to_vec();
            cursor.advance(key_len);
            index.insert(key, offset);
        }

        if index.len() as u64 != header_count || meta.entry_count != header_count {
            return Err(LayerError::Storage(format!(
                "table {} entry count mismatch: header {}, index {}, metadata {}",
                path.display(),
                header_count,
                index.len(),
                meta.entry_count
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(BufReader::new(file)),
            index,
            meta,
            index_offset,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Get an entry by key in O(log n) via the in-memory index
    ///
    /// Returns:
    /// - `Ok(Some(entry))`: key present (the entry may be a tombstone)
    /// - `Ok(None)`: key not in this table
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        let offset = match self.index.get(key) {
            Some(&off) => off,
            None => return Ok(None),
        };

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; ENTRY_HEADER_SIZE];
        file.read_exact(&mut header)?;

        let mut cursor = &header[..];
        let key_len = cursor.get_u32_le() as usize;
        let val_len = cursor.get_u32_le();
        let sequence = cursor.get_u64_le();
        let timestamp = cursor.get_u64_le();

        // Skip the key (we already know it matches)
        file.seek(SeekFrom::Current(key_len as i64))?;

        let (value, tombstone) = if val_len == TOMBSTONE_MARKER {
            (Vec::new(), true)
        } else {
            let mut value = vec![0u8; val_len as usize];
            file.read_exact(&mut value)?;
            (value, false)
        };

        Ok(Some(Entry {
            key: key.to_vec(),
            value,
            tombstone,
            sequence,
            timestamp,
        }))
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    /// Get entry count
    pub fn entry_count(&self) -> u64 {
        self.meta.entry_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Quick check if a key might be in this table (range check)
    /// Returns false only if the key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.meta.might_contain(key)
    }

    /// Create an iterator over all entries in key order
    ///
    /// Uses its own file handle so a long compaction scan never holds the
    /// lookup mutex.
    pub fn iter(&self) -> Result<SSTableIterator> {
        SSTableIterator::open(&self.path, self.index_offset)
    }

    /// Release the file once the last reference is dropped
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::SeqCst);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::SeqCst)
    }
}

impl Drop for SSTableReader {
    fn drop(&mut self) {
        if self.obsolete.load(Ordering::SeqCst) {
            match fs::remove_file(&self.path) {
                Ok(()) => tracing::debug!(table = self.meta.id, "removed obsolete table file"),
                Err(e) => tracing::warn!(
                    table = self.meta.id,
                    path = %self.path.display(),
                    "failed to remove obsolete table file: {}",
                    e
                ),
            }
        }
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("path", &self.path)
            .field("meta", &self.meta)
            .finish()
    }
}
