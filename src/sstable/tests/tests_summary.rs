//! Resident summary construction tests.

use crate::sstable::RunSummary;

fn batch(pairs: &[(u64, &str)]) -> Vec<(u64, Vec<u8>)> {
    pairs
        .iter()
        .map(|(k, v)| (*k, v.as_bytes().to_vec()))
        .collect()
}

#[test]
fn header_reflects_batch_bounds() {
    let data = batch(&[(3, "aaa"), (7, "bb"), (40, "c")]);
    let summary = RunSummary::build(&data, 9, 64);

    assert_eq!(summary.header.timestamp, 9);
    assert_eq!(summary.header.length, 3);
    assert_eq!(summary.header.min_key, 3);
    assert_eq!(summary.header.max_key, 40);
}

#[test]
fn header_bounds_equal_first_and_last_index_keys() {
    let data = batch(&[(10, "x"), (20, "y"), (30, "z")]);
    let summary = RunSummary::build(&data, 1, 64);

    assert_eq!(summary.header.min_key, summary.index[0].key);
    assert_eq!(summary.header.max_key, summary.index[summary.index.len() - 1].key);
}

#[test]
fn offsets_are_cumulative_value_lengths() {
    let data = batch(&[(1, "aaa"), (2, "bb"), (3, "cccc"), (4, "d")]);
    let summary = RunSummary::build(&data, 1, 64);

    let offsets: Vec<u32> = summary.index.iter().map(|e| e.offset).collect();
    assert_eq!(offsets, vec![0, 3, 5, 9]);
}

#[test]
fn every_key_enters_the_filter() {
    let data: Vec<(u64, Vec<u8>)> = (0..500u64).map(|k| (k * 7, vec![0u8; 4])).collect();
    let summary = RunSummary::build(&data, 1, 10_240);

    for (key, _) in &data {
        assert!(summary.filter.may_contain(*key), "filter missed key {key}");
    }
}

#[test]
fn position_of_finds_exact_matches_only() {
    let data = batch(&[(5, "a"), (10, "b"), (15, "c")]);
    let summary = RunSummary::build(&data, 1, 64);

    assert_eq!(summary.position_of(5), Some(0));
    assert_eq!(summary.position_of(10), Some(1));
    assert_eq!(summary.position_of(15), Some(2));
    assert_eq!(summary.position_of(12), None);
}

#[test]
fn overlaps_uses_inclusive_bounds() {
    let data = batch(&[(10, "a"), (20, "b")]);
    let summary = RunSummary::build(&data, 1, 64);

    assert!(summary.overlaps(0, 10)); // touches min
    assert!(summary.overlaps(20, 30)); // touches max
    assert!(summary.overlaps(12, 15)); // inside
    assert!(summary.overlaps(0, 100)); // covers
    assert!(!summary.overlaps(0, 9));
    assert!(!summary.overlaps(21, 100));
}

#[test]
fn single_entry_summary() {
    let data = batch(&[(42, "answer")]);
    let summary = RunSummary::build(&data, 3, 64);

    assert_eq!(summary.header.min_key, 42);
    assert_eq!(summary.header.max_key, 42);
    assert_eq!(summary.header.length, 1);
    assert_eq!(summary.index[0].offset, 0);
}
