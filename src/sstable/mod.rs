//! # Sorted Run (SSTable) Module
//!
//! Immutable, key-sorted on-disk runs and the resident summaries the
//! engine keeps for them.
//!
//! ## On-disk layout
//!
//! Little-endian, contiguous, no padding:
//!
//! ```text
//! offset 0                      : u64   timestamp
//! offset 8                      : u64   length (number of entries)
//! offset 16                     : u64   max_key
//! offset 24                     : u64   min_key
//! offset 32                     : u8[m] bloom filter (one byte per bit)
//! offset 32 + m                 : length x { u64 key, u32 value_offset }
//! offset 32 + m + length * 12   : concatenated value bytes
//! ```
//!
//! `value_offset` is measured from the start of the value region and is
//! cumulative over the preceding values. There is no per-value length
//! and no terminator: the final value ends at the end of the file, so
//! readers **must** work from the real file size. The reader maps the
//! whole file with `memmap2` and slices the value region directly.
//!
//! ## Identity
//!
//! A run is identified by its header 4-tuple, which is also its
//! filename: `{timestamp}-{length}-{max_key}-{min_key}.sst`, placed
//! under `{root}/level{L}/`. There is no separate manifest: the engine's
//! resident buffer is the only catalog, and the header both names the
//! file and describes it (the two are asserted equal by tests).
//!
//! ## Sub-modules
//!
//! - [`builder`] — [`write_run`], serializing a key-ordered batch.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod builder;

#[cfg(test)]
mod tests;

pub use builder::write_run;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;
use thiserror::Error;

use crate::bloom::{self, BloomFilter};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Byte size of the fixed header (four `u64` fields).
pub const HEADER_SIZE: usize = 32;

/// Byte size of one sparse-index entry (`u64` key + `u32` offset).
pub const INDEX_ENTRY_SIZE: usize = 12;

/// File extension for runs.
pub const RUN_EXTENSION: &str = "sst";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by run read and write operations.
#[derive(Debug, Error)]
pub enum SSTableError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file contents do not match the self-described layout.
    #[error("malformed run file: {0}")]
    Malformed(String),
}

// ------------------------------------------------------------------------------------------------
// RunHeader
// ------------------------------------------------------------------------------------------------

/// The fixed 32-byte header of a run. Doubles as the run's identity:
/// the filename is derived from these four fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunHeader {
    /// Flush counter value at creation; greater means newer.
    pub timestamp: u64,

    /// Number of entries in the run.
    pub length: u64,

    /// Largest key in the run (equals the last index key).
    pub max_key: u64,

    /// Smallest key in the run (equals the first index key).
    pub min_key: u64,
}

impl RunHeader {
    /// The filename this header maps to.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}-{}.{}",
            self.timestamp, self.length, self.max_key, self.min_key, RUN_EXTENSION
        )
    }

    /// Serializes the header into its on-disk 32 bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..16].copy_from_slice(&self.length.to_le_bytes());
        buf[16..24].copy_from_slice(&self.max_key.to_le_bytes());
        buf[24..32].copy_from_slice(&self.min_key.to_le_bytes());
        buf
    }

    /// Decodes a header from the first 32 bytes of a run file.
    fn from_bytes(buf: &[u8]) -> Self {
        Self {
            timestamp: read_u64_le(&buf[0..8]),
            length: read_u64_le(&buf[8..16]),
            max_key: read_u64_le(&buf[16..24]),
            min_key: read_u64_le(&buf[24..32]),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// IndexEntry / RunSummary
// ------------------------------------------------------------------------------------------------

/// One sparse-index entry: a key and the byte offset of its value
/// within the run's value region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// The entry's key.
    pub key: u64,

    /// Byte offset of the value's first byte, measured from the start
    /// of the value region.
    pub offset: u32,
}

/// The resident half of a run: header, Bloom filter, and the full
/// sparse index. Built from the same batch the writer serializes and
/// held in the engine's per-level buffer; never holds values.
#[derive(Debug)]
pub struct RunSummary {
    /// Mirror of the on-disk header.
    pub header: RunHeader,

    /// Bloom filter over every key in the run.
    pub filter: BloomFilter,

    /// One entry per key, in ascending key order.
    pub index: Vec<IndexEntry>,
}

impl RunSummary {
    /// Builds the summary for a key-ordered `batch` about to be written
    /// with the given `timestamp`.
    ///
    /// Offsets are cumulative over the value region; min/max keys are
    /// computed during the same pass; every key enters the filter.
    #[must_use]
    pub fn build(batch: &[(u64, Vec<u8>)], timestamp: u64, bloom_filter_size: usize) -> Self {
        debug_assert!(!batch.is_empty(), "runs are never built from empty batches");

        let mut filter = BloomFilter::new(bloom_filter_size);
        let mut index = Vec::with_capacity(batch.len());
        let mut min_key = u64::MAX;
        let mut max_key = 0u64;
        let mut pos: u32 = 0;

        for (key, value) in batch {
            min_key = min_key.min(*key);
            max_key = max_key.max(*key);
            filter.insert(*key);
            index.push(IndexEntry { key: *key, offset: pos });
            pos += value.len() as u32;
        }

        Self {
            header: RunHeader {
                timestamp,
                length: batch.len() as u64,
                max_key,
                min_key,
            },
            filter,
            index,
        }
    }

    /// Position of `key` within the run, found by a linear scan of the
    /// sparse index.
    #[must_use]
    pub fn position_of(&self, key: u64) -> Option<usize> {
        self.index.iter().position(|entry| entry.key == key)
    }

    /// `true` if the run's key range intersects `[low, high]`.
    #[must_use]
    pub fn overlaps(&self, low: u64, high: u64) -> bool {
        self.header.min_key <= high && self.header.max_key >= low
    }
}

// ------------------------------------------------------------------------------------------------
// Readers
// ------------------------------------------------------------------------------------------------

/// Reads back only the header of a run file.
pub fn read_header(path: &Path) -> Result<RunHeader, SSTableError> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    if mmap.len() < HEADER_SIZE {
        return Err(SSTableError::Malformed(format!(
            "file shorter than header: {} bytes",
            mmap.len()
        )));
    }
    Ok(RunHeader::from_bytes(&mmap[..HEADER_SIZE]))
}

/// Reads every value of a run, in index order.
///
/// The run file is self-describing apart from the filter width: `m` is
/// the engine's configured `bloom_filter_size` (clamped exactly as the
/// writer clamps it). The index region is re-read from the file so the
/// caller does not need a resident summary, and each value is sliced
/// out of the memory map using the cumulative offsets; the final
/// value's length comes from the mapped file size.
///
/// # Safety
///
/// Uses `unsafe { Mmap::map(...) }`; sound because run files are never
/// modified after the writer's rename and the map is read-only.
pub fn read_values(path: &Path, bloom_filter_size: usize) -> Result<Vec<Vec<u8>>, SSTableError> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let file_len = mmap.len();

    if file_len < HEADER_SIZE {
        return Err(SSTableError::Malformed(format!(
            "file shorter than header: {file_len} bytes"
        )));
    }

    let header = RunHeader::from_bytes(&mmap[..HEADER_SIZE]);
    let m = bloom::clamp_bits(bloom_filter_size);
    let length = usize::try_from(header.length)
        .map_err(|_| SSTableError::Malformed("entry count exceeds addressable range".into()))?;

    let index_start = HEADER_SIZE + m;
    let value_start = index_start + length * INDEX_ENTRY_SIZE;
    if value_start > file_len {
        return Err(SSTableError::Malformed(format!(
            "truncated run: need {value_start} bytes before value region, have {file_len}"
        )));
    }

    let mut offsets = Vec::with_capacity(length);
    for i in 0..length {
        let entry_at = index_start + i * INDEX_ENTRY_SIZE;
        offsets.push(read_u32_le(&mmap[entry_at + 8..entry_at + 12]) as usize);
    }

    let value_region_len = file_len - value_start;
    let mut values = Vec::with_capacity(length);
    for i in 0..length {
        let start = offsets[i];
        let end = if i + 1 < length {
            offsets[i + 1]
        } else {
            value_region_len
        };
        if start > end || end > value_region_len {
            return Err(SSTableError::Malformed(format!(
                "inconsistent value offsets at entry {i}: {start}..{end} of {value_region_len}"
            )));
        }
        values.push(mmap[value_start + start..value_start + end].to_vec());
    }

    Ok(values)
}

// ------------------------------------------------------------------------------------------------
// Byte helpers
// ------------------------------------------------------------------------------------------------

fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}
