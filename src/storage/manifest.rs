//! Manifest
//!
//! Durable record of which tables are live at each level.
//!
//! ```text
//! ┌───────────┬─────────┬─────────┬───────────────────┐
//! │ Magic (4) │ CRC (4) │ Len (4) │ bincode(Manifest) │
//! └───────────┴─────────┴─────────┴───────────────────┘
//! ```
//!
//! Rewritten on every table-set change: write `MANIFEST.tmp`, fsync, rename
//! over `MANIFEST`, fsync the directory. A crash leaves either the old or the
//! new manifest, never a mix.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{LayerError, Result};

use super::sstable::sync_dir;

pub(crate) const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TMP_FILE: &str = "MANIFEST.tmp";
const MANIFEST_MAGIC: &[u8; 4] = b"LYMF";
const MANIFEST_HEADER_SIZE: usize = 12;

/// Persisted table set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Bumped on every rewrite
    pub version: u64,

    /// Next table id to hand out
    pub next_table_id: u64,

    /// Highest sequence known to be durable in tables
    pub last_sequence: u64,

    /// Every entry with a sequence at or below this is in a listed table;
    /// WAL replay skips them
    pub flushed_sequence: u64,

    /// Live table ids per level, oldest first
    pub levels: BTreeMap<u32, Vec<u64>>,
}

impl Manifest {
    /// A manifest for an empty store
    pub fn new() -> Self {
        Self {
            next_table_id: 1,
            ..Self::default()
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Load the manifest from `dir`, or `None` if the store is new
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(dir);
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path)?;
        if data.len() < MANIFEST_HEADER_SIZE {
            return Err(LayerError::ManifestCorruption(format!(
                "manifest is only {} bytes",
                data.len()
            )));
        }

        let mut cursor = &data[..];
        let mut magic = [0u8; 4];
        cursor.copy_to_slice(&mut magic);
        if &magic != MANIFEST_MAGIC {
            return Err(LayerError::ManifestCorruption(format!(
                "bad manifest magic {:?}",
                magic
            )));
        }

        let crc = cursor.get_u32_le();
        let len = cursor.get_u32_le() as usize;
        if cursor.remaining() != len {
            return Err(LayerError::ManifestCorruption(format!(
                "manifest length {} does not match payload of {} bytes",
                len,
                cursor.remaining()
            )));
        }
        if crc32fast::hash(cursor) != crc {
            return Err(LayerError::ManifestCorruption(
                "manifest checksum mismatch".to_string(),
            ));
        }

        let manifest = bincode::deserialize(cursor)
            .map_err(|e| LayerError::ManifestCorruption(e.to_string()))?;
        Ok(Some(manifest))
    }

    /// Atomically replace the manifest in `dir` with this one
    pub fn store(&self, dir: &Path) -> Result<()> {
        let payload = bincode::serialize(self)?;

        let mut buf = BytesMut::with_capacity(MANIFEST_HEADER_SIZE + payload.len());
        buf.put_slice(MANIFEST_MAGIC);
        buf.put_u32_le(crc32fast::hash(&payload));
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(&payload);

        let tmp_path = dir.join(MANIFEST_TMP_FILE);
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, Self::path(dir))?;
        sync_dir(dir)?;
        Ok(())
    }

    /// Every live table id across all levels
    pub fn table_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.levels.values().flatten().copied()
    }

    /// Number of live tables across all levels
    pub fn table_count(&self) -> usize {
        self.levels.values().map(Vec::len).sum()
    }

    /// Remove any stale temporary manifest left by a crash mid-rewrite
    pub fn remove_stale_tmp(dir: &Path) -> Result<()> {
        let tmp_path = dir.join(MANIFEST_TMP_FILE);
        if tmp_path.exists() {
            tracing::warn!(path = %tmp_path.display(), "removing stale temporary manifest");
            fs::remove_file(tmp_path)?;
        }
        Ok(())
    }
}
