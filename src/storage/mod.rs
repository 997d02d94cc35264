//! Storage Module
//!
//! Persistent storage layer: sorted tables, the manifest that lists them,
//! and the versioned table set readers search.
//!
//! ## Responsibilities
//! - Persist memtable snapshots as immutable sorted tables
//! - Point lookups and ordered scans over tables
//! - Durable, atomic table-set changes (flush and compaction installs)
//!
//! ## Layout
//! ```text
//! {data_dir}/
//!   MANIFEST
//!   tables/table_000001.sst
//!   tables/table_000002.sst
//! ```

pub mod sstable;
mod manifest;
mod manager;
mod version;

pub use sstable::{SSTableBuilder, SSTableIterator, SSTableReader, TableMeta};
pub use manifest::Manifest;
pub use manager::StorageManager;
pub use version::{Version, VersionEdit};
