//! Tests for the WAL module
//!
//! These tests verify:
//! - Record framing and checksum validation
//! - Writer appends and sync strategies
//! - Recovery from torn and corrupted tails
//! - Segment rotation, replay and cleanup

mod recovery_tests;
