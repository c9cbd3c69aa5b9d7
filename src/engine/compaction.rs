//! Leveled compaction — budgets, victim selection, and the cascading
//! merge that moves runs from level `L` into level `L + 1`.
//!
//! ## Shape
//!
//! Level `L` holds at most `1 << (L + 1)` runs (2, 4, 8, ...). When a
//! flush pushes level 0 past its budget, the engine merges victims into
//! the next level, and the cascade repeats synchronously for as long as
//! the receiving level overflows.
//!
//! ## One round
//!
//! 1. Pick victims: all of level 0, or the oldest
//!    `count - budget` runs (by `(timestamp, max_key)`) of a deeper
//!    level.
//! 2. Pull in every next-level run whose key range intersects the
//!    victims' combined range.
//! 3. Fold-merge the sparse indices of everything selected into one
//!    newest-wins stream; the selected runs leave the resident buffer.
//! 4. Stream the merged entries back out: values are fetched through a
//!    per-compaction file cache (each source file is read once and
//!    deleted right after), tombstones are dropped when no deeper run
//!    can still hold their key, and a new output run is cut every time
//!    the accumulated payload reaches the flush threshold. Outputs
//!    share the engine's current timestamp.
//! 5. Consumed files that were never dereferenced (every entry
//!    superseded) are deleted in a final sweep.
//!
//! Deletion failures are logged and non-fatal; the resident summaries
//! are gone regardless.

use std::collections::{HashMap, HashSet};

use tracing::{debug, error, info};

use super::merge::{self, IndexedEntry, RunRef};
use super::{Engine, EngineError, ResidentRun, TOMBSTONE};

/// Maximum number of resident runs level `level` may hold.
#[must_use]
pub fn max_files(level: usize) -> usize {
    1 << (level + 1)
}

/// `true` when `level` currently exceeds its budget.
pub(crate) fn need_compaction(buffer: &[ResidentRun], level: usize) -> bool {
    level_count(buffer, level) > max_files(level)
}

/// Number of resident runs at `level`.
pub(crate) fn level_count(buffer: &[ResidentRun], level: usize) -> usize {
    buffer.iter().filter(|run| run.level == level).count()
}

impl Engine {
    /// Runs one compaction out of `level`, cascading while the
    /// receiving levels overflow.
    pub(crate) fn compact_level(&mut self, level: usize) -> Result<(), EngineError> {
        let victims = self.select_victims(level);
        if victims.is_empty() {
            return Ok(());
        }
        self.compact(victims, level + 1)
    }

    /// Selects the runs to evict from `level`.
    ///
    /// Level 0 is drained completely (its runs may overlap each other
    /// arbitrarily). Deeper levels evict only their oldest runs, sorted
    /// ascending by `(timestamp, max_key)`, keeping exactly the budget.
    fn select_victims(&self, level: usize) -> Vec<RunRef> {
        let mut victims: Vec<RunRef> = self
            .buffer
            .iter()
            .filter(|run| run.level == level)
            .map(ResidentRun::run_ref)
            .collect();

        if level == 0 {
            return victims;
        }

        let budget = max_files(level);
        if victims.len() <= budget {
            return Vec::new();
        }
        let evict = victims.len() - budget;
        victims.sort_by_key(|run_ref| (run_ref.header.timestamp, run_ref.header.max_key));
        victims.truncate(evict);
        victims
    }

    /// Merges `victims` (from `next_level - 1`) together with every
    /// overlapping run at `next_level`, writing the survivors as new
    /// runs at `next_level`.
    fn compact(&mut self, victims: Vec<RunRef>, next_level: usize) -> Result<(), EngineError> {
        // 1. Combined key range of the victim set.
        let min_key = victims.iter().map(|v| v.header.min_key).min().unwrap_or(0);
        let max_key = victims
            .iter()
            .map(|v| v.header.max_key)
            .max()
            .unwrap_or(u64::MAX);

        // 2. Next-level runs whose range intersects the victims'.
        let overlaps: Vec<RunRef> = self
            .buffer
            .iter()
            .filter(|run| {
                run.level == next_level
                    && run.summary.header.max_key >= min_key
                    && run.summary.header.min_key <= max_key
            })
            .map(ResidentRun::run_ref)
            .collect();

        info!(
            from_level = next_level - 1,
            next_level,
            victims = victims.len(),
            overlaps = overlaps.len(),
            min_key,
            max_key,
            "compaction start"
        );

        // 3. Pack and fold-merge while the summaries are still
        // resident, then drop the consumed runs from the buffer.
        let consumed: HashSet<RunRef> = victims.iter().chain(overlaps.iter()).copied().collect();
        let packs: Vec<Vec<IndexedEntry>> = self
            .buffer
            .iter()
            .filter(|run| consumed.contains(&run.run_ref()))
            .map(merge::pack_full)
            .collect();
        let stream = merge::merge_packs(packs);
        self.buffer.retain(|run| !consumed.contains(&run.run_ref()));

        // 4. Stream the survivors into size-bounded outputs.
        let mut cache: HashMap<RunRef, Vec<Vec<u8>>> = HashMap::new();
        let mut deleted: HashSet<RunRef> = HashSet::new();
        let mut data: Vec<(u64, Vec<u8>)> = Vec::new();
        let mut pending_bytes = 0usize;

        for entry in stream {
            let Some(value) = self.consume_value(&mut cache, &mut deleted, &entry) else {
                continue;
            };

            if value.as_slice() == TOMBSTONE && !self.key_survives_below(entry.key, next_level) {
                debug!(key = entry.key, "tombstone dropped at level {next_level}");
                continue;
            }

            pending_bytes += super::ENTRY_OVERHEAD + value.len();
            data.push((entry.key, value));

            if pending_bytes >= self.config.flush_threshold() {
                self.write_level_run(next_level, &data)?;
                data.clear();
                pending_bytes = 0;
            }
        }

        if !data.is_empty() {
            self.write_level_run(next_level, &data)?;
        }

        // 5. Sweep consumed files whose entries were all superseded.
        for run_ref in &consumed {
            if !deleted.contains(run_ref) {
                self.remove_run_file(run_ref);
            }
        }

        info!(
            next_level,
            resident = self.buffer.len(),
            "compaction finished"
        );

        // 6. Cascade.
        if need_compaction(&self.buffer, next_level) {
            self.compact_level(next_level)?;
        }

        Ok(())
    }

    /// `true` when some resident run deeper than `output_level` could
    /// still hold `key` — in which case a tombstone for `key` must be
    /// carried into the output rather than dropped.
    fn key_survives_below(&self, key: u64, output_level: usize) -> bool {
        self.buffer.iter().any(|run| {
            run.level > output_level
                && run.summary.header.min_key <= key
                && run.summary.header.max_key >= key
                && run.summary.filter.may_contain(key)
        })
    }

    /// Fetches `entry`'s value during compaction. The owning file is
    /// read once into `cache` and deleted immediately afterwards (it
    /// has already left the resident buffer). Unreadable files are
    /// logged and their entries skipped.
    fn consume_value(
        &self,
        cache: &mut HashMap<RunRef, Vec<Vec<u8>>>,
        deleted: &mut HashSet<RunRef>,
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
                        "run read failed during compaction"
                    );
                    cache.insert(entry.source, Vec::new());
                }
            }
            self.remove_run_file(&entry.source);
            deleted.insert(entry.source);
        }

        let values = cache.get(&entry.source)?;
        match values.get(entry.pos) {
            Some(value) => Some(value.clone()),
            None => {
                error!(
                    key = entry.key,
                    pos = entry.pos,
                    file = %entry.source.header.file_name(),
                    "index position out of range during compaction"
                );
                None
            }
        }
    }
}
