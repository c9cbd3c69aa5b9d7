//! Run writer — serializes a key-ordered batch into a run file.
//!
//! # Input Requirements
//!
//! - `batch` must be strictly ascending by key (the memtable drain and
//!   the compaction merge both guarantee this).
//! - `summary` must have been built from the same batch via
//!   [`RunSummary::build`], so the header, filter, and offsets the file
//!   carries are exactly the ones the engine keeps resident.
//!
//! # Atomicity
//!
//! 1. Write everything to `{name}.sst.tmp` through a `BufWriter`.
//! 2. Flush and sync the file.
//! 3. Rename to the final `{timestamp}-{length}-{max_key}-{min_key}.sst`.
//!
//! The engine only touches its resident buffer after this function
//! returns, so a failed write leaves no observable state change.

use std::fs::{self, DirBuilder, File, rename};
use std::io::{BufWriter, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{RunSummary, SSTableError};

/// Directory mode for newly created level directories.
const LEVEL_DIR_MODE: u32 = 0o755;

/// Writes `batch` as a run file under `level_dir`, creating the
/// directory (mode 0755) on demand. Returns the final path.
pub fn write_run(
    level_dir: &Path,
    summary: &RunSummary,
    batch: &[(u64, Vec<u8>)],
) -> Result<PathBuf, SSTableError> {
    if !level_dir.exists() {
        DirBuilder::new()
            .recursive(true)
            .mode(LEVEL_DIR_MODE)
            .create(level_dir)?;
    }

    let final_path = level_dir.join(summary.header.file_name());
    if final_path.exists() {
        // Output names are unique by construction; see DESIGN.md.
        warn!(path = %final_path.display(), "overwriting colliding run file");
        debug_assert!(false, "run filename collision: {}", final_path.display());
    }

    let tmp_path = level_dir.join(format!("{}.tmp", summary.header.file_name()));

    let file = File::create(&tmp_path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(&summary.header.to_bytes())?;
    writer.write_all(summary.filter.as_bytes())?;
    for entry in &summary.index {
        writer.write_all(&entry.key.to_le_bytes())?;
        writer.write_all(&entry.offset.to_le_bytes())?;
    }
    for (_, value) in batch {
        writer.write_all(value)?;
    }

    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    if let Err(e) = rename(&tmp_path, &final_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    debug!(
        path = %final_path.display(),
        entries = summary.header.length,
        "run written"
    );

    Ok(final_path)
}
