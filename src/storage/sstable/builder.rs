//! SSTable Builder
//!
//! Writes sorted entries to a new table file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};

use crate::entry::{now_millis, Entry};
use crate::error::{LayerError, Result};

use super::{TableMeta, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Builder for creating new tables from sorted, deduplicated entries
pub struct SSTableBuilder {
    /// Final file path; the table is written to a `.tmp` sibling first
    path: PathBuf,
    tmp_path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    id: u64,
    level: u32,
    /// Number of entries written
    entry_count: u64,
    /// Current write position (for index)
    current_offset: u64,
    /// Index: key → file offset of entry
    index: Vec<(Vec<u8>, u64)>,
    /// Track min/max keys for metadata
    min_key: Option<Vec<u8>>,
    max_key: Option<Vec<u8>>,
    min_sequence: u64,
    max_sequence: u64,
    /// Running CRC hasher for data section
    data_hasher: crc32fast::Hasher,
    scratch: BytesMut,
}

impl SSTableBuilder {
    /// Create a new table builder
    ///
    /// Writes header immediately; call `add()` in ascending key order,
    /// then `finish()` to write index, metadata and footer.
    pub fn new(path: &Path, id: u64, level: u32) -> Result<Self> {
        let tmp_path = path.with_extension("sst.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut writer = BufWriter::new(file);

        // Write header (entry_count placeholder, will be updated in finish)
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            writer,
            id,
            level,
            entry_count: 0,
            current_offset: HEADER_SIZE,
            index: Vec::new(),
            min_key: None,
            max_key: None,
            min_sequence: u64::MAX,
            max_sequence: 0,
            data_hasher: crc32fast::Hasher::new(),
            scratch: BytesMut::with_capacity(256),
        })
    }

    /// Add an entry (keys must be strictly ascending)
    pub fn add(&mut self, entry: &Entry) -> Result<()> {
        if let Some(last) = &self.max_key {
            if entry.key.as_slice() <= last.as_slice() {
                return Err(LayerError::Storage(format!(
                    "table {} entries out of order: {:?} after {:?}",
                    self.id, entry.key, last
                )));
            }
        }

        self.index.push((entry.key.clone(), self.current_offset));

        if self.min_key.is_none() {
            self.min_key = Some(entry.key.clone());
        }
        self.max_key = Some(entry.key.clone());
        self.min_sequence = self.min_sequence.min(entry.sequence);
        self.max_sequence = self.max_sequence.max(entry.sequence);

        let val_len = if entry.tombstone {
            TOMBSTONE_MARKER
        } else {
            entry.value.len() as u32
        };

        self.scratch.clear();
        self.scratch.put_u32_le(entry.key.len() as u32);
        self.scratch.put_u32_le(val_len);
        self.scratch.put_u64_le(entry.sequence);
        self.scratch.put_u64_le(entry.timestamp);
        self.scratch.put_slice(&entry.key);
        if !entry.tombstone {
            self.scratch.put_slice(&entry.value);
        }

        self.writer.write_all(&self.scratch)?;
        self.data_hasher.update(&self.scratch);

        self.current_offset += self.scratch.len() as u64;
        self.entry_count += 1;

        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Finish building: write index, metadata, footer, fsync and rename
    /// the file into place
    pub fn finish(mut self) -> Result<TableMeta> {
        let index_offset = self.current_offset;

        // Index block: [key_len(4)][offset(8)][key] for each entry
        let mut written = 0u64;
        for (key, offset) in &self.index {
            self.scratch.clear();
            self.scratch.put_u32_le(key.len() as u32);
            self.scratch.put_u64_le(*offset);
            self.scratch.put_slice(key);
            self.writer.write_all(&self.scratch)?;
            written += self.scratch.len() as u64;
        }

        let meta = TableMeta {
            id: self.id,
            level: self.level,
            min_key: self.min_key.take().unwrap_or_default(),
            max_key: self.max_key.take().unwrap_or_default(),
            entry_count: self.entry_count,
            created_at: now_millis(),
            min_sequence: if self.entry_count == 0 { 0 } else { self.min_sequence },
            max_sequence: self.max_sequence,
        };

        let meta_offset = index_offset + written;
        let meta_bytes = bincode::serialize(&meta)?;
        self.writer.write_all(&meta_bytes)?;

        let data_crc = self.data_hasher.finalize();

        // Footer
        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer.write_all(&meta_offset.to_le_bytes())?;
        self.writer.write_all(&data_crc.to_le_bytes())?;
        self.writer.write_all(&[0u8; 4])?;

        self.writer.flush()?;

        // Seek back and update entry count in header
        let mut file = self.writer.into_inner().map_err(|e| {
            LayerError::Storage(format!("Failed to flush table {}: {}", meta.id, e))
        })?;
        file.seek(SeekFrom::Start(6))?;
        file.write_all(&meta.entry_count.to_le_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.path)?;
        if let Some(dir) = self.path.parent() {
            sync_dir(dir)?;
        }

        Ok(meta)
    }

    /// Discard a partially written table
    pub fn abandon(self) {
        let tmp_path = self.tmp_path.clone();
        drop(self.writer);
        if let Err(e) = fs::remove_file(&tmp_path) {
            tracing::warn!(path = %tmp_path.display(), "failed to remove abandoned table: {}", e);
        }
    }
}

/// fsync a directory so a rename inside it is durable
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
