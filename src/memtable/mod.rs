//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Single-writer/multi-reader access pattern
//! - Track size for flush triggers
//! - Atomic swap into an immutable snapshot for background flush
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in RwLock:
//! - Ordered keys (required for sorted table generation)
//! - Deletes are stored as tombstone entries, never physical removals

mod table;

pub use table::{FrozenMemTable, MemTable, MemTableSize};
