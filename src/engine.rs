//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Coordinate WAL, MemTable, table set and compaction
//! - Handle concurrent read/write access
//! - Freeze the memtable at its threshold and flush it in the background
//! - Publish change events to subscribers
//! - Crash recovery on startup, clean drain on shutdown

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::compaction::{CompactionOutcome, Compactor};
use crate::config::Config;
use crate::entry::Entry;
use crate::error::{LayerError, Result};
use crate::events::{ChangeEvent, SubscriberRegistry};
use crate::memtable::{FrozenMemTable, MemTable};
use crate::storage::{StorageManager, Version};
use crate::wal::{RecoveryResult, Wal};

/// Point-in-time engine counters
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub last_sequence: u64,
    pub memtable_bytes: usize,
    pub memtable_entries: usize,
    /// Frozen memtables not yet written to level 0
    pub frozen_memtables: usize,
    pub tables_per_level: BTreeMap<u32, usize>,
    pub manifest_version: u64,
    pub wal_segment: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub compactions: u64,
    pub compaction_failures: u64,
    pub subscribers: usize,
    pub events_delivered: u64,
    pub events_dropped: u64,
}

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Writes** (set/delete): serialized by the WAL mutex. Sequence
///   assignment, WAL append, memtable apply and event publication happen in
///   one critical section, so sequence order equals log order.
/// - **Reads** (get): never take the WAL mutex. The memtable has its own
///   RwLock; frozen memtables and the table set are cloned as snapshots and
///   searched without a lock held.
/// - **Flush**: the swap happens inside the write critical section; writing
///   the level-0 table happens on the flush worker.
/// - **Compaction**: a worker pool; merges of different levels run in
///   parallel, merges of one level are serialized by the compactor.
pub struct Engine {
    inner: Arc<EngineInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct EngineInner {
    config: Config,

    wal_dir: PathBuf,

    /// Write-ahead log; its mutex is the write critical section
    wal: Mutex<Wal>,

    /// In-memory table for recent writes (internal RwLock)
    memtable: MemTable,

    /// Frozen memtables waiting for flush, newest first
    frozen: RwLock<Vec<Arc<FrozenMemTable>>>,

    /// Persistent table set
    storage: Arc<StorageManager>,

    compactor: Compactor,

    subscribers: SubscriberRegistry,

    /// Highest sequence durably logged
    last_sequence: AtomicU64,

    /// Set once shutdown begins; writes are refused afterwards
    shutting_down: AtomicBool,

    /// Serializes level-0 table writes so they register oldest first
    flush_lock: Mutex<()>,

    scheduler: Scheduler,

    counters: Counters,

    recovery: RecoveryResult,
}

#[derive(Default)]
struct Counters {
    flushes: AtomicU64,
    flush_failures: AtomicU64,
    compactions: AtomicU64,
    compaction_failures: AtomicU64,
}

/// Background job queues plus an idle barrier
struct Scheduler {
    flush_tx: Mutex<Option<Sender<()>>>,
    compact_tx: Mutex<Option<Sender<u32>>>,
    /// Jobs queued or running
    pending: Mutex<usize>,
    idle: Condvar,
}

impl Scheduler {
    fn new(flush_tx: Sender<()>, compact_tx: Sender<u32>) -> Self {
        Self {
            flush_tx: Mutex::new(Some(flush_tx)),
            compact_tx: Mutex::new(Some(compact_tx)),
            pending: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    fn schedule_flush(&self) {
        if let Some(tx) = self.flush_tx.lock().as_ref() {
            *self.pending.lock() += 1;
            if tx.send(()).is_err() {
                self.job_done();
            }
        }
    }

    fn schedule_compaction(&self, level: u32) {
        if let Some(tx) = self.compact_tx.lock().as_ref() {
            *self.pending.lock() += 1;
            if tx.send(level).is_err() {
                self.job_done();
            }
        }
    }

    fn job_done(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.idle.wait(&mut pending);
        }
    }

    /// Stop accepting jobs; workers exit once their queues drain
    fn close(&self) {
        self.flush_tx.lock().take();
        self.compact_tx.lock().take();
    }
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_DIR: &'static str = "wal";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create data directory
    /// 2. Load the manifest and its tables
    /// 3. Replay WAL segments into the memtable
    /// 4. Start a fresh WAL segment and the background workers
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Create data directory if it doesn't exist
        fs::create_dir_all(&config.data_dir)?;
        let wal_dir = config.data_dir.join(Self::WAL_DIR);
        fs::create_dir_all(&wal_dir)?;

        // Step 2: Open storage manager (manifest + tables)
        let storage = Arc::new(StorageManager::open(&config.data_dir)?);
        let manifest = storage.manifest();

        // Step 3: Replay WAL; entries already in tables are skipped
        let replay = Wal::replay(&wal_dir)?;
        let memtable = MemTable::new();
        let mut replayed = 0u64;
        for entry in replay.entries {
            if entry.sequence > manifest.flushed_sequence {
                memtable.apply(entry);
                replayed += 1;
            }
        }

        if replay.result.entries_recovered > 0 || replay.result.entries_corrupted > 0 {
            tracing::info!(
                recovered = replay.result.entries_recovered,
                replayed,
                corrupted = replay.result.entries_corrupted,
                truncated = replay.result.was_truncated,
                last_sequence = replay.result.last_sequence,
                "WAL recovery complete"
            );
        }

        // Nothing unflushed left in the old segments
        if memtable.is_empty() {
            if let Some(&last) = replay.segments.last() {
                Wal::remove_segments_through(&wal_dir, last)?;
            }
        }

        let last_sequence = manifest
            .last_sequence
            .max(storage.current().max_sequence())
            .max(replay.result.last_sequence);

        // Step 4: New active segment after every replayed one
        let next_segment = replay.segments.last().map_or(1, |id| id + 1);
        let wal = Wal::open(&wal_dir, next_segment, config.wal_sync_strategy)?;

        let (flush_tx, flush_rx) = channel::unbounded();
        let (compact_tx, compact_rx) = channel::unbounded();

        let inner = Arc::new(EngineInner {
            compactor: Compactor::new(Arc::clone(&storage), config.max_level),
            subscribers: SubscriberRegistry::new(config.subscriber_capacity),
            wal_dir,
            wal: Mutex::new(wal),
            memtable,
            frozen: RwLock::new(Vec::new()),
            storage,
            last_sequence: AtomicU64::new(last_sequence),
            shutting_down: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
            scheduler: Scheduler::new(flush_tx, compact_tx),
            counters: Counters::default(),
            recovery: replay.result,
            config,
        });

        let workers = Self::spawn_workers(&inner, flush_rx, compact_rx)?;
        let engine = Self {
            inner,
            workers: Mutex::new(workers),
        };

        // A recovered memtable can already be over its threshold
        {
            let mut wal = engine.inner.wal.lock();
            engine.inner.freeze_if_full(&mut wal);
        }
        if engine.inner.config.background_compaction {
            for level in engine.inner.compactor.levels_needing_compaction() {
                engine.inner.scheduler.schedule_compaction(level);
            }
        }

        Ok(engine)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    fn spawn_workers(
        inner: &Arc<EngineInner>,
        flush_rx: Receiver<()>,
        compact_rx: Receiver<u32>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(1 + inner.config.compaction_threads);

        let flush_inner = Arc::clone(inner);
        handles.push(
            thread::Builder::new()
                .name("layerkv-flush".to_string())
                .spawn(move || flush_inner.flush_worker(flush_rx))?,
        );

        for i in 0..inner.config.compaction_threads {
            let compact_inner = Arc::clone(inner);
            let rx = compact_rx.clone();
            handles.push(
                thread::Builder::new()
                    .name(format!("layerkv-compact-{}", i))
                    .spawn(move || compact_inner.compaction_worker(rx))?,
            );
        }

        Ok(handles)
    }

    // =========================================================================
    // Key Operations
    // =========================================================================

    /// Set a key to a value
    ///
    /// Returns once the mutation is in the WAL (fsynced under
    /// `WalSyncStrategy::EveryWrite`) and visible to readers.
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.inner.write(key.as_ref(), Some(value.as_ref()))
    }

    /// Delete a key by writing a tombstone
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        self.inner.write(key.as_ref(), None)
    }

    /// Get a value by key
    ///
    /// Search order:
    /// 1. Active memtable
    /// 2. Frozen memtables (newest to oldest)
    /// 3. Tables, level 0 upward
    ///
    /// A tombstone anywhere on the way means `Ok(None)`.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        Ok(self
            .inner
            .lookup(key.as_ref())?
            .and_then(|entry| entry.live_value().map(<[u8]>::to_vec)))
    }

    /// Get a UTF-8 value; a miss is `Err(KeyNotFound)`
    pub fn get_string(&self, key: impl AsRef<str>) -> Result<String> {
        let value = self
            .get(key.as_ref().as_bytes())?
            .ok_or(LayerError::KeyNotFound)?;
        String::from_utf8(value).map_err(|_| LayerError::InvalidUtf8)
    }

    /// Newest stored version of a key, tombstones included
    pub fn get_entry(&self, key: impl AsRef<[u8]>) -> Result<Option<Entry>> {
        self.inner.lookup(key.as_ref())
    }

    // =========================================================================
    // Change Feed
    // =========================================================================

    /// Register a channel for change events
    pub fn subscribe(&self, sender: Sender<ChangeEvent>) {
        self.inner.subscribers.subscribe(sender);
    }

    /// Register a new bounded channel (`Config::subscriber_capacity`) and
    /// return its receiver
    pub fn subscribe_bounded(&self) -> Receiver<ChangeEvent> {
        self.inner.subscribers.subscribe_bounded()
    }

    /// Remove a channel registered with `subscribe`
    pub fn unsubscribe(&self, sender: &Sender<ChangeEvent>) -> bool {
        self.inner.subscribers.unsubscribe(sender)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Flush memtable to disk
    ///
    /// Freezes the active memtable (if non-empty) and writes every pending
    /// frozen memtable as a level-0 table before returning.
    pub fn flush(&self) -> Result<()> {
        self.inner.ensure_running()?;
        {
            let mut wal = self.inner.wal.lock();
            self.inner.freeze(&mut wal)?;
        }

        let flushed = self.inner.flush_frozen()?;
        if flushed > 0 && self.inner.config.background_compaction {
            self.inner.scheduler.schedule_compaction(0);
        }
        Ok(())
    }

    /// Merge one pair of tables on `level`, if it holds two or more
    pub fn compact_level(&self, level: u32) -> Result<Option<CompactionOutcome>> {
        self.inner.ensure_running()?;
        self.inner.run_compaction(level)
    }

    /// Merge until no level holds two or more tables
    ///
    /// Returns the merges performed by this call.
    pub fn compact(&self) -> Result<Vec<CompactionOutcome>> {
        self.inner.ensure_running()?;
        self.wait_for_background();

        let mut outcomes = Vec::new();
        loop {
            let mut progressed = false;
            for level in self.inner.compactor.levels_needing_compaction() {
                if let Some(outcome) = self.inner.run_compaction(level)? {
                    outcomes.push(outcome);
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(outcomes);
            }
        }
    }

    /// Block until queued flush and compaction jobs have finished
    pub fn wait_for_background(&self) {
        self.inner.scheduler.wait_idle();
    }

    /// Close the engine gracefully
    ///
    /// Refuses new writes, flushes the memtable, drains background work and
    /// syncs the WAL.
    pub fn close(self) -> Result<()> {
        self.shutdown(true)
    }

    fn shutdown(&self, flush: bool) -> Result<()> {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(flush, "engine shutting down");

        let mut result = Ok(());

        if flush {
            // Waits for any write already inside the critical section
            let frozen = {
                let mut wal = self.inner.wal.lock();
                self.inner.freeze(&mut wal)
            };
            result = frozen.and_then(|_| self.inner.flush_frozen().map(|_| ()));
        }

        self.inner.scheduler.close();
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                tracing::error!("background worker panicked");
            }
        }

        let synced = self.inner.wal.lock().sync();
        result.and(synced)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Get the current memtable size
    pub fn memtable_size(&self) -> usize {
        self.inner.memtable.size()
    }

    /// Get the memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.inner.memtable.entry_count()
    }

    /// Get the number of live tables
    pub fn sstable_count(&self) -> usize {
        self.inner.storage.sstable_count()
    }

    /// Table count per non-empty level
    pub fn level_counts(&self) -> BTreeMap<u32, usize> {
        self.inner.storage.level_counts()
    }

    /// Snapshot of the current table set
    pub fn version(&self) -> Arc<Version> {
        self.inner.storage.current()
    }

    /// Highest sequence assigned so far
    pub fn last_sequence(&self) -> u64 {
        self.inner.last_sequence.load(Ordering::SeqCst)
    }

    /// WAL statistics gathered when this engine was opened
    pub fn recovery_result(&self) -> &RecoveryResult {
        &self.inner.recovery
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        let memtable = inner.memtable.stats();
        let version = inner.storage.current();

        EngineStats {
            last_sequence: inner.last_sequence.load(Ordering::SeqCst),
            memtable_bytes: memtable.bytes,
            memtable_entries: memtable.entries,
            frozen_memtables: inner.frozen.read().len(),
            tables_per_level: version.level_counts(),
            manifest_version: version.number(),
            wal_segment: inner.wal.lock().active_segment(),
            flushes: inner.counters.flushes.load(Ordering::Relaxed),
            flush_failures: inner.counters.flush_failures.load(Ordering::Relaxed),
            compactions: inner.counters.compactions.load(Ordering::Relaxed),
            compaction_failures: inner.counters.compaction_failures.load(Ordering::Relaxed),
            subscribers: inner.subscribers.subscriber_count(),
            events_delivered: inner.subscribers.delivered(),
            events_dropped: inner.subscribers.dropped(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Unflushed entries stay in the WAL and are replayed on the next open
        if let Err(e) = self.shutdown(false) {
            tracing::error!("engine shutdown failed: {}", e);
        }
    }
}

impl EngineInner {
    fn ensure_running(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(LayerError::ShuttingDown);
        }
        Ok(())
    }

    /// The write critical section: sequence → WAL → memtable → event
    fn write(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        self.ensure_running()?;
        let mut wal = self.wal.lock();
        // Shutdown may have started while we waited for the lock
        self.ensure_running()?;

        let sequence = self.last_sequence.load(Ordering::SeqCst) + 1;
        let entry = match value {
            Some(value) => Entry::put(key.to_vec(), value.to_vec(), sequence),
            None => Entry::tombstone(key.to_vec(), sequence),
        };

        // Not durable, not acknowledged; the sequence number is reused
        wal.append(&entry)?;
        self.last_sequence.store(sequence, Ordering::SeqCst);

        let event = ChangeEvent::from_entry(&entry);
        self.memtable.apply(entry);
        self.subscribers.publish(&event);

        self.freeze_if_full(&mut wal);
        Ok(())
    }

    /// Freeze and schedule a flush when the threshold is reached; failures
    /// are logged and retried on the next write
    fn freeze_if_full(&self, wal: &mut Wal) {
        let size = self.memtable.stats();
        if !self.config.flush_threshold.is_reached(size.bytes, size.entries) {
            return;
        }

        match self.freeze(wal) {
            Ok(true) => self.scheduler.schedule_flush(),
            Ok(false) => {}
            Err(e) => {
                self.counters.flush_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!("failed to freeze memtable: {}", e);
            }
        }
    }

    /// Swap the active memtable for an empty one and seal its WAL segment
    ///
    /// Must be called with the WAL mutex held. The frozen list stays
    /// write-locked across the swap so a reader that misses the active
    /// memtable always finds the snapshot.
    fn freeze(&self, wal: &mut Wal) -> Result<bool> {
        if self.memtable.is_empty() {
            return Ok(false);
        }

        let sealed = wal.rotate()?;
        let mut frozen = self.frozen.write();
        let snapshot = self.memtable.snapshot_and_clear(sealed);
        tracing::debug!(
            entries = snapshot.len(),
            bytes = snapshot.size(),
            wal_segment = sealed,
            "froze memtable"
        );
        frozen.insert(0, Arc::new(snapshot));
        Ok(true)
    }

    /// Write every frozen memtable, oldest first, as a level-0 table
    ///
    /// A failed write leaves that memtable (and its WAL segments) in place
    /// for the next attempt.
    fn flush_frozen(&self) -> Result<usize> {
        let _guard = self.flush_lock.lock();
        let mut flushed = 0;

        loop {
            let oldest = match self.frozen.read().last() {
                Some(frozen) => Arc::clone(frozen),
                None => break,
            };

            let meta = self.storage.flush_memtable(&oldest)?;

            // Registered in the table set, safe to stop serving from memory
            self.frozen.write().retain(|f| !Arc::ptr_eq(f, &oldest));

            if let Err(e) = Wal::remove_segments_through(&self.wal_dir, oldest.wal_segment()) {
                tracing::warn!(
                    segment = oldest.wal_segment(),
                    "failed to remove flushed WAL segments: {}",
                    e
                );
            }

            self.counters.flushes.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                table = meta.id,
                entries = meta.entry_count,
                max_sequence = meta.max_sequence,
                "flushed memtable to level 0"
            );
            flushed += 1;
        }

        Ok(flushed)
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<Entry>> {
        if let Some(entry) = self.memtable.get(key) {
            return Ok(Some(entry));
        }

        let frozen = self.frozen.read().clone();
        for table in &frozen {
            if let Some(entry) = table.get(key) {
                return Ok(Some(entry.clone()));
            }
        }

        self.storage.get(key)
    }

    fn run_compaction(&self, level: u32) -> Result<Option<CompactionOutcome>> {
        match self.compactor.compact_level(level) {
            Ok(Some(outcome)) => {
                self.counters.compactions.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    level = outcome.level,
                    output_level = outcome.output_level,
                    inputs = ?outcome.inputs,
                    output = ?outcome.output.as_ref().map(|m| m.id),
                    entries_read = outcome.entries_read,
                    entries_written = outcome.entries_written,
                    tombstones_dropped = outcome.tombstones_dropped,
                    "compaction finished"
                );
                self.subscribers
                    .publish(&ChangeEvent::compaction(outcome.summary()));

                if self.config.background_compaction {
                    self.scheduler.schedule_compaction(outcome.level);
                    if outcome.output_level != outcome.level {
                        self.scheduler.schedule_compaction(outcome.output_level);
                    }
                }
                Ok(Some(outcome))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.counters.compaction_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(level, "{}", e);
                Err(e)
            }
        }
    }

    fn flush_worker(&self, jobs: Receiver<()>) {
        for () in jobs.iter() {
            match self.flush_frozen() {
                Ok(0) => {}
                Ok(_) => {
                    if self.config.background_compaction {
                        self.scheduler.schedule_compaction(0);
                    }
                }
                Err(e) => {
                    self.counters.flush_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("background flush failed: {}", e);
                }
            }
            self.scheduler.job_done();
        }
    }

    fn compaction_worker(&self, jobs: Receiver<u32>) {
        for level in jobs.iter() {
            // Queued merges are abandoned on shutdown; in-flight ones finish
            if !self.shutting_down.load(Ordering::SeqCst) {
                if let Err(e) = self.run_compaction(level) {
                    tracing::trace!(level, "background compaction job failed: {}", e);
                }
            }
            self.scheduler.job_done();
        }
    }
}
