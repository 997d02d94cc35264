//! Configuration for layerkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{LayerError, Result};

/// Main configuration for a layerkv instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── MANIFEST         (live tables per level)
    ///     ├── wal/             (one log segment per memtable generation)
    ///     └── tables/          (sorted table files)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// When the active memtable is frozen and flushed to level 0
    pub flush_threshold: FlushThreshold,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Highest level; pairs at this level are merged in place
    pub max_level: u32,

    /// Run compaction on background workers after every flush
    pub background_compaction: bool,

    /// Number of compaction worker threads
    pub compaction_threads: usize,

    // -------------------------------------------------------------------------
    // Change Feed Configuration
    // -------------------------------------------------------------------------
    /// Queue capacity for subscribers created by `Engine::subscribe_bounded`
    pub subscriber_capacity: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Memtable size bound that triggers a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushThreshold {
    /// Approximate payload bytes (keys + values + per-entry overhead)
    Bytes(usize),

    /// Number of distinct keys, tombstones included
    Entries(usize),
}

impl FlushThreshold {
    /// Whether a memtable with the given size has reached the bound
    pub fn is_reached(&self, bytes: usize, entries: usize) -> bool {
        match *self {
            FlushThreshold::Bytes(limit) => bytes >= limit,
            FlushThreshold::Entries(limit) => entries >= limit,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./layerkv_data"),
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            flush_threshold: FlushThreshold::Bytes(4 * 1024 * 1024), // 4 MB
            max_level: 6,
            background_compaction: true,
            compaction_threads: 2,
            subscriber_capacity: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        match self.flush_threshold {
            FlushThreshold::Bytes(0) | FlushThreshold::Entries(0) => {
                return Err(LayerError::Config(
                    "flush threshold must be greater than zero".to_string(),
                ));
            }
            _ => {}
        }

        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(LayerError::Config(
                "WAL sync interval must be greater than zero".to_string(),
            ));
        }

        if self.compaction_threads == 0 {
            return Err(LayerError::Config(
                "at least one compaction thread is required".to_string(),
            ));
        }

        if self.subscriber_capacity == 0 {
            return Err(LayerError::Config(
                "subscriber capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable flush threshold
    pub fn flush_threshold(mut self, threshold: FlushThreshold) -> Self {
        self.config.flush_threshold = threshold;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.flush_threshold = FlushThreshold::Bytes(size);
        self
    }

    /// Set the highest level in the table hierarchy
    pub fn max_level(mut self, level: u32) -> Self {
        self.config.max_level = level;
        self
    }

    /// Enable or disable background compaction
    pub fn background_compaction(mut self, enabled: bool) -> Self {
        self.config.background_compaction = enabled;
        self
    }

    /// Set the number of compaction worker threads
    pub fn compaction_threads(mut self, count: usize) -> Self {
        self.config.compaction_threads = count;
        self
    }

    /// Set the queue capacity for bounded subscribers
    pub fn subscriber_capacity(mut self, capacity: usize) -> Self {
        self.config.subscriber_capacity = capacity;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
