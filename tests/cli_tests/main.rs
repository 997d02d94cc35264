//! Tests for the layerkv maintenance CLI
//!
//! These tests run the built binary against a temporary data directory.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn run_cli(data_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_layerkv"))
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// =============================================================================
// Command Tests
// =============================================================================

#[test]
fn test_set_then_get() {
    let temp_dir = TempDir::new().unwrap();

    let set = run_cli(temp_dir.path(), &["set", "name", "layerkv"]);
    assert!(set.status.success());
    assert_eq!(stdout(&set).trim(), "OK");

    let get = run_cli(temp_dir.path(), &["get", "name"]);
    assert!(get.status.success());
    assert_eq!(stdout(&get).trim(), "layerkv");
}

#[test]
fn test_get_missing_key() {
    let temp_dir = TempDir::new().unwrap();

    let get = run_cli(temp_dir.path(), &["get", "missing"]);
    assert!(!get.status.success());
    assert_eq!(stdout(&get).trim(), "(nil)");
}

#[test]
fn test_stats_reports_background_counters() {
    let temp_dir = TempDir::new().unwrap();
    for (key, value) in [("a", "1"), ("b", "2")] {
        assert!(run_cli(temp_dir.path(), &["set", key, value]).status.success());
        assert!(run_cli(temp_dir.path(), &["flush"]).status.success());
    }
    assert!(run_cli(temp_dir.path(), &["compact"]).status.success());

    let stats = run_cli(temp_dir.path(), &["stats"]);
    assert!(stats.status.success());
    let text = stdout(&stats);
    for field in [
        "frozen_memtables:",
        "flushes:",
        "compactions:",
        "events:",
        "last_sequence:    2",
    ] {
        assert!(text.contains(field), "missing {:?} in:\n{}", field, text);
    }
    assert!(text.contains("(0 failed)"));
}
