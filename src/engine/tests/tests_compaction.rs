//! Leveled compaction — budgets, cascades, file lifecycle.

use tempfile::TempDir;

use crate::engine::compaction::max_files;
use crate::engine::tests::helpers::*;
use crate::engine::Engine;

/// Flushes one single-entry run holding `key`.
fn flush_one(engine: &mut Engine, key: u64, value: &str) {
    engine.put(key, value.as_bytes().to_vec()).unwrap();
    engine.flush().unwrap();
}

#[test]
fn level_budgets_double_per_level() {
    assert_eq!(max_files(0), 2);
    assert_eq!(max_files(1), 4);
    assert_eq!(max_files(2), 8);
    assert_eq!(max_files(5), 64);
}

#[test]
fn level0_overflow_compacts_into_level1() {
    let tmp = TempDir::new().unwrap();
    let mut engine = open_memtable_only(tmp.path());

    flush_one(&mut engine, 1, "a");
    flush_one(&mut engine, 2, "b");
    assert_eq!(engine.stats().runs_per_level, vec![2]);

    // Third flush exceeds level 0's budget of 2 and drains it.
    flush_one(&mut engine, 3, "c");
    let stats = engine.stats();
    assert_eq!(stats.runs_per_level[0], 0);
    assert!(stats.runs_per_level[1] >= 1);

    for (key, value) in [(1, "a"), (2, "b"), (3, "c")] {
        assert_eq!(engine.get(key).unwrap(), Some(value.as_bytes().to_vec()));
    }
}

#[test]
fn compaction_deletes_consumed_files() {
    let tmp = TempDir::new().unwrap();
    let mut engine = open_memtable_only(tmp.path());

    flush_one(&mut engine, 1, "a");
    flush_one(&mut engine, 2, "b");
    flush_one(&mut engine, 3, "c");

    // Disk state and resident state must agree exactly.
    let mut on_disk = run_files_on_disk(tmp.path());
    on_disk.sort();
    let level0: Vec<_> = on_disk.iter().filter(|(l, _)| *l == 0).collect();
    assert!(level0.is_empty(), "level0 victims must be unlinked");

    let stats = engine.stats();
    let resident_total: usize = stats.runs_per_level.iter().sum();
    assert_eq!(on_disk.len(), resident_total);
}

#[test]
fn every_level_respects_its_budget_after_each_put() {
    let tmp = TempDir::new().unwrap();
    let mut engine = open_tiny(tmp.path());

    for key in 0..400u64 {
        engine.put(key, format!("value-{key}").into_bytes()).unwrap();

        let stats = engine.stats();
        for (level, count) in stats.runs_per_level.iter().enumerate() {
            assert!(
                *count <= max_files(level),
                "level {level} holds {count} runs after put {key}"
            );
        }
    }
}

#[test]
fn compaction_merges_duplicate_keys_newest_wins() {
    let tmp = TempDir::new().unwrap();
    let mut engine = open_memtable_only(tmp.path());

    flush_one(&mut engine, 7, "v1");
    flush_one(&mut engine, 7, "v2");
    flush_one(&mut engine, 7, "v3"); // triggers compaction of all three

    assert_eq!(engine.stats().runs_per_level[0], 0);
    assert_eq!(engine.get(7).unwrap(), Some(b"v3".to_vec()));

    // Only one copy survives the merge.
    let pairs = engine.scan(0, 10).unwrap();
    assert_eq!(pairs, vec![(7, b"v3".to_vec())]);
}

#[test]
fn deleted_keys_stay_deleted_through_compaction() {
    let tmp = TempDir::new().unwrap();
    let mut engine = open_tiny(tmp.path());

    for key in 0..120u64 {
        engine.put(key, format!("v{key}").into_bytes()).unwrap();
    }
    for key in (0..120u64).step_by(2) {
        engine.del(key).unwrap();
    }
    // Keep churning so tombstones travel through several compactions.
    for key in 200..320u64 {
        engine.put(key, format!("v{key}").into_bytes()).unwrap();
    }

    for key in 0..120u64 {
        let got = engine.get(key).unwrap();
        if key % 2 == 0 {
            assert_eq!(got, None, "deleted key {key} resurfaced");
        } else {
            assert_eq!(got, Some(format!("v{key}").into_bytes()));
        }
    }
}

#[test]
fn compaction_outputs_are_size_bounded() {
    let tmp = TempDir::new().unwrap();
    let mut engine = open_tiny(tmp.path());

    // Enough data that merged levels must split their output runs.
    for key in 0..200u64 {
        engine
            .put(key, format!("payload-{key:04}").into_bytes())
            .unwrap();
    }

    for (level, name) in run_files_on_disk(tmp.path()) {
        if level == 0 {
            continue;
        }
        let path = tmp.path().join(format!("level{level}")).join(&name);
        let header = crate::sstable::read_header(&path).unwrap();
        // 64-byte threshold, cheapest entry ~24 bytes: a bounded run
        // can never hold more than a handful of entries.
        assert!(
            header.length <= 8,
            "run {name} at level {level} holds {} entries",
            header.length
        );
    }
}

#[test]
fn data_survives_deep_cascades() {
    let tmp = TempDir::new().unwrap();
    let mut engine = open_tiny(tmp.path());

    for key in 0..600u64 {
        engine.put(key, format!("v{key}").into_bytes()).unwrap();
    }

    let stats = engine.stats();
    assert!(
        stats.runs_per_level.len() >= 3,
        "expected a multi-level tree, got {:?}",
        stats.runs_per_level
    );
    for key in 0..600u64 {
        assert_eq!(
            engine.get(key).unwrap(),
            Some(format!("v{key}").into_bytes()),
            "key {key} lost in cascade"
        );
    }
}
