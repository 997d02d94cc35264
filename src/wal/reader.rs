//! WAL Reader
//!
//! Handles reading records back from a WAL segment.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::entry::Entry;
use crate::error::{LayerError, Result};

use super::record::{decode_record, HEADER_SIZE, MAX_RECORD_SIZE};

/// Reads records sequentially from a WAL segment
pub struct WalReader {
    reader: BufReader<File>,
    /// End of the last valid record
    position: u64,
}

impl WalReader {
    /// Open a WAL segment for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Read the next record
    ///
    /// Returns `Ok(None)` at a clean end of file. A partial record or a
    /// checksum mismatch yields `WalCorruption`; `position()` still points at
    /// the end of the last good record.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        let mut record = vec![0u8; HEADER_SIZE];
        let read = read_fully(&mut self.reader, &mut record)?;
        if read == 0 {
            return Ok(None);
        }
        if read < HEADER_SIZE {
            return Err(LayerError::WalCorruption(format!(
                "torn record header at offset {}",
                self.position
            )));
        }

        let len = u32::from_le_bytes([record[12], record[13], record[14], record[15]]);
        if len <= MAX_RECORD_SIZE {
            record.resize(HEADER_SIZE + len as usize, 0);
            read_fully(&mut self.reader, &mut record[HEADER_SIZE..])?;
        }

        match decode_record(&record) {
            Ok(Some((entry, consumed))) => {
                self.position += consumed as u64;
                Ok(Some(entry))
            }
            Ok(None) => Err(LayerError::WalCorruption(format!(
                "torn record payload at offset {}",
                self.position
            ))),
            Err(LayerError::WalCorruption(reason)) => Err(LayerError::WalCorruption(format!(
                "{} at offset {}",
                reason, self.position
            ))),
            Err(e) => Err(e),
        }
    }

    /// Byte offset just past the last valid record
    pub fn position(&self) -> u64 {
        self.position
    }
}

/// Read until `buf` is full or EOF; returns bytes read
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
