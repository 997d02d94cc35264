//! Tests for compaction
//!
//! These tests verify:
//! - K-way merge ordering and deduplication
//! - Pair selection and output levels
//! - Tombstone retention and removal
//! - Reads stay correct across merges

mod merge_tests;
mod compactor_tests;
