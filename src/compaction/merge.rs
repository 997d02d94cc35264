//! K-way merge over sorted entry streams
//!
//! Every input yields entries in strictly ascending key order. The merge
//! yields each key once, keeping the version with the highest sequence.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::entry::Entry;
use crate::error::{LayerError, Result};

/// Boxed sorted source
pub type EntrySource = Box<dyn Iterator<Item = Result<Entry>> + Send>;

struct HeapItem {
    entry: Entry,
    source: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    // BinaryHeap is a max-heap: smallest key first, then highest sequence
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .entry
            .key
            .cmp(&self.entry.key)
            .then_with(|| self.entry.sequence.cmp(&other.entry.sequence))
    }
}

/// Merges sorted sources into one deduplicated sorted stream
///
/// Tombstones are yielded like any other entry; dropping them is the
/// caller's decision.
pub struct MergeIterator {
    sources: Vec<EntrySource>,
    heap: BinaryHeap<HeapItem>,
    /// First error hit while priming or advancing a source
    error: Option<LayerError>,
}

impl MergeIterator {
    pub fn new(sources: Vec<EntrySource>) -> Self {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            error: None,
        };
        for source in 0..merge.sources.len() {
            merge.advance(source);
        }
        merge
    }

    /// Pull the next entry of `source` into the heap
    fn advance(&mut self, source: usize) {
        match self.sources[source].next() {
            Some(Ok(entry)) => self.heap.push(HeapItem { entry, source }),
            Some(Err(e)) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
            None => {}
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.error.take() {
            self.heap.clear();
            return Some(Err(e));
        }

        let top = self.heap.pop()?;
        self.advance(top.source);

        // Older versions of the same key sort right behind the winner
        while let Some(next) = self.heap.peek() {
            if next.entry.key != top.entry.key {
                break;
            }
            if let Some(stale) = self.heap.pop() {
                self.advance(stale.source);
            }
        }

        if let Some(e) = self.error.take() {
            self.heap.clear();
            return Some(Err(e));
        }

        Some(Ok(top.entry))
    }
}
