//! SSTable Module
//!
//! Sorted String Table - immutable on-disk sorted entry storage.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                            │
//! │   Magic: "LYKV" (4) | Version: u16 (2) | Count: u64 (8)      │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                        │
//! │   [KeyLen: u32][ValLen: u32][Seq: u64][Ts: u64][Key][Value]  │
//! │   ... repeated for each entry, ascending key order ...       │
//! │   (ValLen = u32::MAX means tombstone, no value bytes)        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Index Block (variable)                                       │
//! │   [KeyLen: u32][Offset: u64][Key]                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Metadata Block (variable, bincode TableMeta)                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Footer (24 bytes)                                            │
//! │   IndexOffset: u64 | MetaOffset: u64 | DataCRC: u32 | Pad: 4 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tables are written to `*.sst.tmp` and renamed into place only after an
//! fsync, so a reader never sees a partially written table.

mod builder;
mod iterator;
mod reader;

use serde::{Deserialize, Serialize};

pub use builder::SSTableBuilder;
pub(crate) use builder::sync_dir;
pub use iterator::SSTableIterator;
pub use reader::SSTableReader;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Magic bytes identifying a layerkv table file
pub(crate) const MAGIC: &[u8; 4] = b"LYKV";

/// Current table format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + EntryCount (8) = 14 bytes
pub(crate) const HEADER_SIZE: u64 = 14;

/// Footer size: IndexOffset (8) + MetaOffset (8) + DataCRC (4) + Padding (4)
pub(crate) const FOOTER_SIZE: u64 = 24;

/// Per-entry record header: KeyLen (4) + ValLen (4) + Seq (8) + Ts (8)
pub(crate) const ENTRY_HEADER_SIZE: usize = 24;

/// Sentinel value indicating a tombstone (deleted key)
pub(crate) const TOMBSTONE_MARKER: u32 = u32::MAX;

// =============================================================================
// Table Metadata
// =============================================================================

/// Metadata stored in the trailing block of every table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Opaque table id, also the file name
    pub id: u64,
    /// Level the table was written for
    pub level: u32,
    /// Smallest key (for range filtering)
    pub min_key: Vec<u8>,
    /// Largest key (for range filtering)
    pub max_key: Vec<u8>,
    pub entry_count: u64,
    /// Unix millis
    pub created_at: u64,
    pub min_sequence: u64,
    pub max_sequence: u64,
}

impl TableMeta {
    /// Get the number of entries
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Quick check if a key might be in this table (range check)
    /// Returns false if key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.entry_count > 0 && key >= self.min_key.as_slice() && key <= self.max_key.as_slice()
    }
}
