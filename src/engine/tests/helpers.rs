use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::engine::{Engine, EngineConfig};

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Tiny limits: flushes after a handful of small entries and compacts
/// constantly. Matches the small-test constants of the format spec.
pub fn tiny_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        max_size: 128,
        bloom_filter_size: 64,
    }
}

/// Large limits: nothing ever flushes on its own.
pub fn memtable_only_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        max_size: 1024 * 1024,
        bloom_filter_size: 1024,
    }
}

/// Opens an engine at `path` with the tiny config.
pub fn open_tiny(path: &Path) -> Engine {
    Engine::open(path, tiny_config()).expect("open")
}

/// Opens an engine at `path` with the memtable-only config.
pub fn open_memtable_only(path: &Path) -> Engine {
    Engine::open(path, memtable_only_config()).expect("open")
}

/// Every `.sst` file currently under `root`, as `(level, file_name)`.
pub fn run_files_on_disk(root: &Path) -> Vec<(usize, String)> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return found;
    };
    for entry in entries.flatten() {
        let dir_name = entry.file_name().to_string_lossy().into_owned();
        let Some(level) = dir_name
            .strip_prefix("level")
            .and_then(|s| s.parse::<usize>().ok())
        else {
            continue;
        };
        let Ok(files) = std::fs::read_dir(entry.path()) else {
            continue;
        };
        for file in files.flatten() {
            let name = file.file_name().to_string_lossy().into_owned();
            if name.ends_with(".sst") {
                found.push((level, name));
            }
        }
    }
    found
}
