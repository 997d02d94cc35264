//! # layerkv
//!
//! An embedded, single-node LSM-tree key-value store with:
//! - Write-Ahead Logging (WAL) for durability
//! - Crash recovery with torn-write handling
//! - Leveled sorted tables with background compaction
//! - A change feed of every accepted mutation
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │        set / delete / get / subscribe / flush / close        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┼─────────────────────┐
//!          │            │                     │
//!          ▼            ▼                     ▼
//!   ┌─────────────┐ ┌─────────────┐   ┌───────────────┐
//!   │     WAL     │ │  MemTable   │──▶│ Frozen tables │
//!   │ (segments)  │ │  (RwLock)   │   │ (flush queue) │
//!   └─────────────┘ └─────────────┘   └───────┬───────┘
//!                                             │ flush worker
//!                                             ▼
//!                                   ┌───────────────────┐
//!                                   │ Storage (levels)  │◀─┐
//!                                   │ MANIFEST + tables │  │ compaction
//!                                   └─────────┬─────────┘  │ workers
//!                                             └────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod entry;

pub mod wal;
pub mod memtable;
pub mod storage;
pub mod compaction;
pub mod events;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LayerError, Result};
pub use config::{Config, FlushThreshold, WalSyncStrategy};
pub use entry::Entry;
pub use events::{ChangeEvent, EventKind};
pub use engine::{Engine, EngineStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of layerkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
