//! # CascadeDB
//!
//! An embeddable, persistent, ordered key-value store built on a
//! **leveled Log-Structured Merge tree (LSM-tree)**. Keys are `u64`;
//! values are byte strings.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                       Engine                           │
//! │  ┌────────────┐   ┌──────────────────────────────────┐ │
//! │  │  Memtable   │   │  Resident buffer                 │ │
//! │  │ (skip list) │   │  (level, header+bloom+index) ×N  │ │
//! │  └─────┬───────┘   └───────────┬──────────────────────┘ │
//! │        │  flush on overflow    │  describes             │
//! │        ▼                       ▼                        │
//! │   level0/*.sst ── compact ─► level1/*.sst ── ... ─► levelN/ │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core engine — put, get, del, scan, flush, reset, leveled compaction |
//! | [`memtable`] | Deterministic skip list holding recent writes |
//! | [`sstable`] | Immutable sorted run files and their resident summaries |
//! | [`bloom`] | Per-run Bloom filter (four MurmurHash3-x64-128 lanes) |
//!
//! ## Key Properties
//!
//! - **Newest wins** — the memtable shadows every run; among runs the
//!   greatest flush timestamp wins.
//! - **Tombstone deletes** — deletions write a sentinel value that is
//!   filtered from every read and physically dropped once compaction
//!   reaches the deepest level holding the key.
//! - **Self-describing runs** — each run file carries its header,
//!   filter, and sparse index; the filename is the header tuple. No
//!   separate manifest exists.
//! - **Single-writer** — the engine is fully synchronous and
//!   single-threaded; compaction cascades inline on the writing call.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cascadedb::{Engine, EngineConfig};
//!
//! let mut db = Engine::open("/tmp/my_db", EngineConfig::default()).unwrap();
//!
//! db.put(1, b"hello".to_vec()).unwrap();
//! assert_eq!(db.get(1).unwrap(), Some(b"hello".to_vec()));
//!
//! assert!(db.del(1).unwrap());
//! assert_eq!(db.get(1).unwrap(), None);
//!
//! db.put(2, b"a".to_vec()).unwrap();
//! db.put(3, b"b".to_vec()).unwrap();
//! let pairs = db.scan(0, 10).unwrap();
//! assert_eq!(pairs.len(), 2);
//! ```

pub mod bloom;
pub mod engine;
pub mod memtable;
pub mod sstable;

pub use engine::{Engine, EngineConfig, EngineError, EngineStats, TOMBSTONE};
