//! SSTable Iterator
//!
//! Sequential iteration over all entries in a table.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Buf;

use crate::entry::Entry;
use crate::error::{LayerError, Result};

use super::{ENTRY_HEADER_SIZE, HEADER_SIZE, TOMBSTONE_MARKER};

/// Iterator over table entries in sorted key order
pub struct SSTableIterator {
    file: BufReader<File>,
    /// Stop reading when we reach this offset (start of index block)
    end_offset: u64,
    /// Current position in file
    current_offset: u64,
}

impl SSTableIterator {
    /// Open a fresh handle positioned at the start of the data block
    pub(super) fn open(path: &Path, end_offset: u64) -> Result<Self> {
        let mut file = BufReader::new(File::open(path)?);
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            file,
            end_offset,
            current_offset: HEADER_SIZE,
        })
    }

    fn read_entry(&mut self) -> Result<Entry> {
        let mut header = [0u8; ENTRY_HEADER_SIZE];
        self.file.read_exact(&mut header)?;

        let mut cursor = &header[..];
        let key_len = cursor.get_u32_le() as usize;
        let val_len = cursor.get_u32_le();
        let sequence = cursor.get_u64_le();
        let timestamp = cursor.get_u64_le();

        let mut key = vec![0u8; key_len];
        self.file.read_exact(&mut key)?;

        let mut entry_size = (ENTRY_HEADER_SIZE + key_len) as u64;

        let (value, tombstone) = if val_len == TOMBSTONE_MARKER {
            (Vec::new(), true)
        } else {
            let mut v = vec![0u8; val_len as usize];
            self.file.read_exact(&mut v)?;
            entry_size += val_len as u64;
            (v, false)
        };

        self.current_offset += entry_size;
        if self.current_offset > self.end_offset {
            return Err(LayerError::Storage(
                "table entry runs past the data block".to_string(),
            ));
        }

        Ok(Entry {
            key,
            value,
            tombstone,
            sequence,
            timestamp,
        })
    }
}

impl Iterator for SSTableIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        // Stop at index block
        if self.current_offset >= self.end_offset {
            return None;
        }

        match self.read_entry() {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                // Do not keep reading from an unknown position
                self.current_offset = self.end_offset;
                Some(Err(e))
            }
        }
    }
}
