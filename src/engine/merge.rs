//! Merge primitives — annotated key streams and the rotating-tape fold
//! used by both the scan path and compaction.
//!
//! A "pack" is the sparse index of one run flattened into
//! [`IndexedEntry`] values: each key annotated with the owning run's
//! `(level, header)` identity and the key's position inside that run.
//! Packs are key-ascending with unique keys (runs never repeat a key).
//!
//! Merging is a fold of stable pairwise merges over two scratch tapes.
//! When both sides hold the same key, the entry whose run has the
//! greater timestamp survives and **both** sides advance, so the folded
//! stream is strictly key-ascending and newest-wins.

use std::mem;

use crate::sstable::RunHeader;

use super::ResidentRun;

// ------------------------------------------------------------------------------------------------
// Stream element types
// ------------------------------------------------------------------------------------------------

/// Identity of a run file: the level directory it lives under plus its
/// header tuple (which is also its filename).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RunRef {
    pub(crate) level: usize,
    pub(crate) header: RunHeader,
}

/// One key of one run, annotated for later dereferencing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexedEntry {
    /// The key.
    pub(crate) key: u64,

    /// Owning run.
    pub(crate) source: RunRef,

    /// Positional index of the key within the owning run.
    pub(crate) pos: usize,
}

impl IndexedEntry {
    /// Timestamp of the owning run; the merge tie-breaker.
    fn timestamp(&self) -> u64 {
        self.source.header.timestamp
    }
}

// ------------------------------------------------------------------------------------------------
// Packing
// ------------------------------------------------------------------------------------------------

/// Flattens a run's entire sparse index into a pack.
pub(crate) fn pack_full(run: &ResidentRun) -> Vec<IndexedEntry> {
    let source = run.run_ref();
    run.summary
        .index
        .iter()
        .enumerate()
        .map(|(pos, entry)| IndexedEntry {
            key: entry.key,
            source,
            pos,
        })
        .collect()
}

/// Flattens the slice of a run's sparse index with
/// `low <= key <= high` into a pack, keeping original positions.
pub(crate) fn pack_range(run: &ResidentRun, low: u64, high: u64) -> Vec<IndexedEntry> {
    let source = run.run_ref();
    run.summary
        .index
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.key >= low && entry.key <= high)
        .map(|(pos, entry)| IndexedEntry {
            key: entry.key,
            source,
            pos,
        })
        .collect()
}

// ------------------------------------------------------------------------------------------------
// Merging
// ------------------------------------------------------------------------------------------------

/// Stable two-way merge of key-ascending packs into `target`.
///
/// Equal keys: the side whose run has the greater timestamp is kept and
/// both sides advance. Ties go to `b` (the accumulated tape), which can
/// only arise between runs created by distinct level-writes and is
/// therefore inert for any key both could contain.
pub(crate) fn merge_sorted(a: &[IndexedEntry], b: &[IndexedEntry], target: &mut Vec<IndexedEntry>) {
    let mut ai = 0;
    let mut bi = 0;

    while ai < a.len() && bi < b.len() {
        if a[ai].key < b[bi].key {
            target.push(a[ai]);
            ai += 1;
        } else if a[ai].key > b[bi].key {
            target.push(b[bi]);
            bi += 1;
        } else {
            if a[ai].timestamp() > b[bi].timestamp() {
                target.push(a[ai]);
            } else {
                target.push(b[bi]);
            }
            ai += 1;
            bi += 1;
        }
    }
    target.extend_from_slice(&a[ai..]);
    target.extend_from_slice(&b[bi..]);
}

/// Folds any number of packs into one strictly key-ascending,
/// newest-wins stream using two rotating scratch tapes.
pub(crate) fn merge_packs(packs: Vec<Vec<IndexedEntry>>) -> Vec<IndexedEntry> {
    let capacity = packs.iter().map(Vec::len).sum();
    let mut acc: Vec<IndexedEntry> = Vec::with_capacity(capacity);
    let mut scratch: Vec<IndexedEntry> = Vec::with_capacity(capacity);

    for pack in &packs {
        scratch.clear();
        merge_sorted(pack, &acc, &mut scratch);
        mem::swap(&mut acc, &mut scratch);
    }

    acc
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------
