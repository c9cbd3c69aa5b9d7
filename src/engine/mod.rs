//! # LSM Storage Engine
//!
//! A **synchronous**, single-writer, leveled LSM-tree engine over `u64`
//! keys and byte-string values.
//!
//! ## Design Overview
//!
//! Data lives in two places, queried newest-first:
//!
//! 1. **Memtable** — a deterministic skip list holding recent writes.
//! 2. **Runs** — immutable, key-sorted files under `level0/`, `level1/`,
//!    ... of the root directory. For every run the engine keeps a
//!    resident [`RunSummary`] (header + Bloom filter + sparse index) in
//!    an insertion-ordered buffer; the buffer is the only catalog, and
//!    values are only ever fetched from disk.
//!
//! Writes go into the memtable. When its estimated byte footprint
//! reaches `max_size - bloom_filter_size`, the engine bumps its
//! timestamp counter, drains the memtable in key order into a new
//! level-0 run, and triggers leveled compaction when level 0 exceeds
//! its budget. Compaction cascades synchronously (see
//! [`compaction`](self::compaction)).
//!
//! ## Precedence
//!
//! Newest wins: the memtable shadows every run, and among runs the one
//! with the greatest timestamp wins. Deletions are tombstone writes of
//! [`TOMBSTONE`]; a tombstone is never returned to callers and is
//! physically dropped once compaction reaches the deepest level holding
//! the key.
//!
//! ## Concurrency Model
//!
//! Single-writer, single-threaded. Nothing here spawns threads or
//! suspends; file I/O blocks the caller, and compaction runs inline on
//! the writer. Callers needing shared access must serialize externally.

use std::collections::HashMap;
use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::memtable::{InsertOutcome, Memtable};
use crate::sstable::{self, RunSummary, SSTableError};

pub mod compaction;
pub(crate) mod merge;

use merge::{IndexedEntry, RunRef};

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Sentinel value marking a logical deletion. Reserved: writing it via
/// [`Engine::put`] is indistinguishable from [`Engine::del`].
pub const TOMBSTONE: &[u8] = b"~DELETED~";

/// Per-entry overhead in the size estimator: `u64` key + `u32` offset.
const ENTRY_OVERHEAD: usize = 8 + 4;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the run subsystem (write or read).
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected configuration at open.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Rejected operation argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`Engine`] instance. Passed to [`Engine::open`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Flush threshold driver: the memtable is drained once its
    /// estimated footprint reaches `max_size - bloom_filter_size`, and
    /// compaction outputs are cut at the same bound.
    pub max_size: usize,

    /// Requested Bloom filter width in bits (one byte per bit on disk),
    /// clamped to [`crate::bloom::MAX_BITS`].
    pub bloom_filter_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_size: 2 * 1024 * 1024,
            bloom_filter_size: 10 * 1024,
        }
    }
}

impl EngineConfig {
    /// The byte budget that triggers a flush and bounds compaction
    /// outputs.
    pub(crate) fn flush_threshold(&self) -> usize {
        self.max_size - self.bloom_filter_size
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.bloom_filter_size == 0 {
            return Err(EngineError::Config("bloom_filter_size must be nonzero".into()));
        }
        if self.max_size <= self.bloom_filter_size {
            return Err(EngineError::Config(format!(
                "max_size ({}) must exceed bloom_filter_size ({})",
                self.max_size, self.bloom_filter_size
            )));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Resident state
// ------------------------------------------------------------------------------------------------

/// One buffer slot: a run summary tagged with the level its file lives
/// under.
#[derive(Debug)]
pub(crate) struct ResidentRun {
    pub(crate) level: usize,
    pub(crate) summary: RunSummary,
}

impl ResidentRun {
    /// The `(level, header)` identity of this run.
    pub(crate) fn run_ref(&self) -> RunRef {
        RunRef {
            level: self.level,
            header: self.summary.header,
        }
    }
}

/// Snapshot of engine state returned by [`Engine::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Entries currently in the memtable (tombstones included).
    pub memtable_entries: usize,

    /// Estimated memtable payload bytes.
    pub memtable_bytes: usize,

    /// Resident run count per level, indexed by level. Empty when no
    /// run has ever been flushed.
    pub runs_per_level: Vec<usize>,
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

/// The storage engine handle. Owns the memtable, the resident run
/// buffer, and the engine-scoped flush timestamp counter.
#[derive(Debug)]
pub struct Engine {
    memtable: Memtable,
    buffer: Vec<ResidentRun>,
    current_size: usize,
    /// Flush counter; incremented before each memtable flush and shared
    /// by every output of a cascading compaction.
    timestamp: u64,
    root: PathBuf,
    config: EngineConfig,
}

impl Engine {
    /// Opens an engine rooted at `path`, creating the root directory
    /// (mode 0755) if needed.
    ///
    /// The engine keeps no manifest: a fresh instance starts with an
    /// empty buffer and sees only runs it writes itself.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let root = path.as_ref().to_path_buf();
        if !root.exists() {
            DirBuilder::new().recursive(true).mode(0o755).create(&root)?;
        }

        info!(root = %root.display(), ?config, "engine opened");

        Ok(Self {
            memtable: Memtable::new(),
            buffer: Vec::new(),
            current_size: 0,
            timestamp: 0,
            root,
            config,
        })
    }

    // --------------------------------------------------------------------------------------------
    // Write path
    // --------------------------------------------------------------------------------------------

    /// Inserts or overwrites `key`. May trigger a flush and a cascading
    /// compaction before returning.
    pub fn put(&mut self, key: u64, value: Vec<u8>) -> Result<(), EngineError> {
        if value.is_empty() {
            return Err(EngineError::InvalidArgument("value must not be empty".into()));
        }
        trace!(key, len = value.len(), "put");

        let value_len = value.len();
        match self.memtable.insert(key, value) {
            InsertOutcome::Inserted => {
                self.current_size += ENTRY_OVERHEAD + value_len;
            }
            InsertOutcome::Replaced(prev_len) => {
                self.current_size += value_len;
                self.current_size = self.current_size.saturating_sub(prev_len);
            }
        }

        if self.current_size >= self.config.flush_threshold() {
            self.flush()?;
        }

        Ok(())
    }

    /// Deletes `key` by writing a tombstone. Returns `true` iff the key
    /// was visible at the time of the call.
    pub fn del(&mut self, key: u64) -> Result<bool, EngineError> {
        if self.get(key)?.is_none() {
            trace!(key, "del on absent key");
            return Ok(false);
        }
        self.put(key, TOMBSTONE.to_vec())?;
        trace!(key, "del");
        Ok(true)
    }

    /// Drains the memtable into a new level-0 run and compacts if the
    /// level overflows. A no-op when the memtable is empty.
    pub fn flush(&mut self) -> Result<(), EngineError> {
        let batch = self.memtable.scan_all();
        if batch.is_empty() {
            self.current_size = 0;
            return Ok(());
        }

        self.timestamp += 1;
        debug!(
            timestamp = self.timestamp,
            entries = batch.len(),
            "flushing memtable to level 0"
        );

        self.write_level_run(0, &batch)?;
        if compaction::need_compaction(&self.buffer, 0) {
            self.compact_level(0)?;
        }

        self.current_size = 0;
        self.memtable.reset();
        Ok(())
    }

    /// Empties the memtable without flushing. On-disk runs and their
    /// resident summaries are untouched.
    pub fn reset(&mut self) {
        info!(dropped = self.memtable.len(), "memtable reset");
        self.memtable = Memtable::new();
        self.current_size = 0;
    }

    // --------------------------------------------------------------------------------------------
    // Read path
    // --------------------------------------------------------------------------------------------

    /// Returns the visible value for `key`, or `None` if the key is
    /// absent or deleted.
    pub fn get(&self, key: u64) -> Result<Option<Vec<u8>>, EngineError> {
        if let Some(value) = self.memtable.get(key) {
            trace!(key, "get hit memtable");
            return Ok(if value == TOMBSTONE {
                None
            } else {
                Some(value.to_vec())
            });
        }

        // Track the best candidate across the whole buffer: filter hit,
        // exact index match, greatest timestamp.
        let mut best: Option<(&ResidentRun, usize)> = None;
        let mut best_timestamp = 0u64;
        for run in &self.buffer {
            if run.summary.header.timestamp > best_timestamp
                && run.summary.filter.may_contain(key)
            {
                if let Some(pos) = run.summary.position_of(key) {
                    best_timestamp = run.summary.header.timestamp;
                    best = Some((run, pos));
                }
            }
        }

        let Some((run, pos)) = best else {
            trace!(key, "get miss");
            return Ok(None);
        };

        let values = match self.read_run(&run.run_ref()) {
            Ok(values) => values,
            Err(e) => {
                // A vanished or unreadable file is treated as holding
                // no matching key.
                error!(key, %e, file = %run.summary.header.file_name(), "run read failed during get");
                return Ok(None);
            }
        };

        match values.get(pos) {
            Some(value) if value.as_slice() == TOMBSTONE => Ok(None),
            Some(value) => Ok(Some(value.clone())),
            None => {
                warn!(key, pos, file = %run.summary.header.file_name(), "index position out of range");
                Ok(None)
            }
        }
    }

    // --------------------------------------------------------------------------------------------
    // Scan path
    // --------------------------------------------------------------------------------------------

    /// Returns every visible `(key, value)` pair with
    /// `low <= key <= high`, in ascending key order, tombstones
    /// excluded.
    pub fn scan(&self, low: u64, high: u64) -> Result<Vec<(u64, Vec<u8>)>, EngineError> {
        trace!(low, high, "scan");

        // 1. Memtable slice. Tombstones stay in for now: they must
        // shadow older on-disk copies of their key during the merge.
        let mut out = Vec::new();
        self.memtable.scan(low, high, &mut out);

        // 2–4. Pack every overlapping summary's index slice and
        // fold-merge into one newest-wins, key-ordered stream.
        let packs: Vec<Vec<IndexedEntry>> = self
            .buffer
            .iter()
            .filter(|run| run.summary.overlaps(low, high))
            .map(|run| merge::pack_range(run, low, high))
            .collect();
        let stream = merge::merge_packs(packs);

        // 5. Merge the run stream underneath the memtable result,
        // fetching each distinct file once.
        let mut cache: HashMap<RunRef, Vec<Vec<u8>>> = HashMap::new();
        let mut merged = Vec::with_capacity(out.len() + stream.len());
        let mut out_iter = out.into_iter().peekable();

        for entry in stream {
            while let Some((mem_key, _)) = out_iter.peek() {
                if *mem_key >= entry.key {
                    break;
                }
                if let Some(pair) = out_iter.next() {
                    if pair.1.as_slice() != TOMBSTONE {
                        merged.push(pair);
                    }
                }
            }
            if out_iter
                .peek()
                .is_some_and(|(mem_key, _)| *mem_key == entry.key)
            {
                continue; // memtable wins, deletions included
            }

            let Some(value) = self.cached_value(&mut cache, &entry) else {
                continue;
            };
            if value.as_slice() != TOMBSTONE {
                merged.push((entry.key, value));
            }
        }
        merged.extend(out_iter.filter(|(_, value)| value.as_slice() != TOMBSTONE));

        Ok(merged)
    }

    // --------------------------------------------------------------------------------------------
    // Introspection
    // --------------------------------------------------------------------------------------------

    /// Snapshot of the memtable and per-level run counts.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let deepest = self.buffer.iter().map(|run| run.level).max();
        let mut runs_per_level = vec![0usize; deepest.map_or(0, |level| level + 1)];
        for run in &self.buffer {
            runs_per_level[run.level] += 1;
        }

        EngineStats {
            memtable_entries: self.memtable.len(),
            memtable_bytes: self.current_size,
            runs_per_level,
        }
    }

    // --------------------------------------------------------------------------------------------
    // Shared internals
    // --------------------------------------------------------------------------------------------

    /// Builds the summary for `batch`, writes the run file at `level`
    /// with the current timestamp, then admits the summary to the
    /// buffer. The file exists before any state changes.
    pub(crate) fn write_level_run(
        &mut self,
        level: usize,
        batch: &[(u64, Vec<u8>)],
    ) -> Result<(), EngineError> {
        let summary = RunSummary::build(batch, self.timestamp, self.config.bloom_filter_size);
        sstable::write_run(&self.level_dir(level), &summary, batch)?;
        self.buffer.push(ResidentRun { level, summary });
        Ok(())
    }

    /// Directory holding the runs of `level`.
    pub(crate) fn level_dir(&self, level: usize) -> PathBuf {
        self.root.join(format!("level{level}"))
    }

    /// Full path of the run file identified by `run_ref`.
    pub(crate) fn run_path(&self, run_ref: &RunRef) -> PathBuf {
        self.level_dir(run_ref.level).join(run_ref.header.file_name())
    }

    /// Reads every value of the referenced run.
    pub(crate) fn read_run(&self, run_ref: &RunRef) -> Result<Vec<Vec<u8>>, SSTableError> {
        sstable::read_values(&self.run_path(run_ref), self.config.bloom_filter_size)
    }

    /// Deletes the referenced run file. Failures are logged and
    /// swallowed; the resident summary is gone either way.
    pub(crate) fn remove_run_file(&self, run_ref: &RunRef) {
        let path = self.run_path(run_ref);
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), %e, "failed to delete run file");
        }
    }

    /// Fetches `entry`'s value through `cache`, reading the owning file
    /// at most once. Read failures and out-of-range positions are
    /// logged and yield `None`.
    fn cached_value(
        &self,
        cache: &mut HashMap<RunRef, Vec<Vec<u8>>>,
        entry: &IndexedEntry,
    ) -> Option<Vec<u8>> {
        if !cache.contains_key(&entry.source) {
            match self.read_run(&entry.source) {
                Ok(values) => {
                    cache.insert(entry.source, values);
                }
                Err(e) => {
                    error!(
                        key = entry.key,
                        %e,
                        file = %entry.source.header.file_name(),
                        "run read failed during scan"
                    );
                    cache.insert(entry.source, Vec::new());
                }
            }
        }

        let values = cache.get(&entry.source)?;
        match values.get(entry.pos) {
            Some(value) => Some(value.clone()),
            None => {
                warn!(
                    key = entry.key,
                    pos = entry.pos,
                    file = %entry.source.header.file_name(),
                    "index position out of range"
                );
                None
            }
        }
    }
}
