//! Entry definitions
//!
//! The unit of data that flows through every layer: WAL, memtable and
//! sorted tables all store the same `Entry`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A single versioned mutation of a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Vec<u8>,

    /// Empty for tombstones
    pub value: Vec<u8>,

    pub tombstone: bool,

    /// Engine-wide sequence number; the higher one wins on conflicts
    pub sequence: u64,

    /// Unix millis when the mutation was accepted
    pub timestamp: u64,
}

impl Entry {
    /// Create a live value entry stamped with the current time
    pub fn put(key: Vec<u8>, value: Vec<u8>, sequence: u64) -> Self {
        Self {
            key,
            value,
            tombstone: false,
            sequence,
            timestamp: now_millis(),
        }
    }

    /// Create a tombstone entry stamped with the current time
    pub fn tombstone(key: Vec<u8>, sequence: u64) -> Self {
        Self {
            key,
            value: Vec::new(),
            tombstone: true,
            sequence,
            timestamp: now_millis(),
        }
    }

    /// The value, or `None` for a tombstone
    pub fn live_value(&self) -> Option<&[u8]> {
        if self.tombstone {
            None
        } else {
            Some(&self.value)
        }
    }

    /// Approximate in-memory footprint used for flush accounting
    pub fn approximate_size(&self) -> usize {
        // sequence + timestamp + tombstone flag
        const OVERHEAD: usize = 17;
        self.key.len() + self.value.len() + OVERHEAD
    }

    /// Pick the newer of two versions of the same key
    pub fn newest(self, other: Entry) -> Entry {
        if other.sequence > self.sequence {
            other
        } else {
            self
        }
    }
}

/// Current wall clock as unix millis
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
