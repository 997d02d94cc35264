//! layerkv maintenance CLI
//!
//! Opens a data directory in-process and runs one command against it.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use layerkv::{Config, Engine, LayerError};
use tracing_subscriber::{fmt, EnvFilter};

/// layerkv CLI
#[derive(Parser, Debug)]
#[command(name = "layerkv")]
#[command(about = "Maintenance CLI for a layerkv data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./layerkv_data")]
    data_dir: PathBuf,

    /// MemTable size limit in MB before flush
    #[arg(short = 'm', long, default_value = "4")]
    memtable_mb: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Write the memtable out as a level-0 table
    Flush,

    /// Merge tables until every level holds at most one
    Compact,

    /// Print table counts and engine counters
    Stats,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,layerkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .memtable_size_limit(args.memtable_mb * 1024 * 1024)
        .background_compaction(false)
        .build();

    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open {}: {}", args.data_dir.display(), e);
            process::exit(1);
        }
    };

    let outcome = run(&engine, args.command);
    let closed = engine.close();

    if let Err(e) = outcome.and(closed) {
        match e {
            LayerError::KeyNotFound => {
                println!("(nil)");
                process::exit(1);
            }
            other => {
                tracing::error!("{}", other);
                process::exit(1);
            }
        }
    }
}

fn run(engine: &Engine, command: Commands) -> layerkv::Result<()> {
    match command {
        Commands::Get { key } => {
            let value = engine.get(key.as_bytes())?.ok_or(LayerError::KeyNotFound)?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Commands::Set { key, value } => {
            engine.set(key, value)?;
            println!("OK");
        }
        Commands::Del { key } => {
            engine.delete(key)?;
            println!("OK");
        }
        Commands::Flush => {
            engine.flush()?;
            println!("OK ({} tables)", engine.sstable_count());
        }
        Commands::Compact => {
            engine.flush()?;
            let outcomes = engine.compact()?;
            for outcome in &outcomes {
                println!("{}", outcome.summary());
            }
            println!("OK ({} merges)", outcomes.len());
        }
        Commands::Stats => {
            let stats = engine.stats();
            println!("last_sequence:    {}", stats.last_sequence);
            println!("memtable_entries: {}", stats.memtable_entries);
            println!("memtable_bytes:   {}", stats.memtable_bytes);
            println!("manifest_version: {}", stats.manifest_version);
            println!("wal_segment:      {}", stats.wal_segment);
            println!("frozen_memtables: {}", stats.frozen_memtables);
            println!("flushes:          {} ({} failed)", stats.flushes, stats.flush_failures);
            println!(
                "compactions:      {} ({} failed)",
                stats.compactions, stats.compaction_failures
            );
            println!(
                "events:           {} delivered, {} dropped",
                stats.events_delivered, stats.events_dropped
            );
            for (level, count) in &stats.tables_per_level {
                println!("level {}:          {} tables", level, count);
            }
        }
    }
    Ok(())
}
