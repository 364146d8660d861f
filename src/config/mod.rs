//! # Index Configuration
//!
//! Runtime options for the hash index, plus the compile-time geometry in
//! [`constants`]. Options are normally assembled through
//! [`HashIndexBuilder`](crate::index::HashIndexBuilder); `IndexOptions` is
//! the validated form the index is constructed from.
//!
//! ## Configuration Options
//!
//! | Option          | Default              | Description                          |
//! |-----------------|----------------------|--------------------------------------|
//! | path            | (required)           | Backing file path                    |
//! | size_bytes      | (required for create)| Table size, multiple of EXTENT_BYTES |
//! | flush_rate      | 128MB/s              | Writeback rate limit                 |
//! | audit_interval  | 3600s                | Delay between audit passes           |
//! | block_size      | 4096                 | Dedup block size for the toxic set   |
//! | heal_defects    | true                 | Zero out defective cells in place    |
//! | stats_file_name | index-stats.txt      | Audit report file in the home dir    |
//!
//! The table size only matters when the backing file does not exist yet;
//! an existing file dictates its own size (there is no resizing).

pub mod constants;

use std::path::PathBuf;
use std::time::Duration;

use eyre::{ensure, Result};

use self::constants::{
    DEFAULT_AUDIT_INTERVAL_SECS, DEFAULT_BLOCK_SIZE, DEFAULT_FLUSH_RATE, DEFAULT_STATS_FILE_NAME,
    EXTENT_BYTES,
};

/// Validated runtime configuration for a [`HashIndex`](crate::index::HashIndex).
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Backing file path. Relative paths are resolved against the context
    /// home directory.
    pub path: PathBuf,
    /// Table size in bytes, used only when the file is created.
    pub size_bytes: u64,
    /// Writeback rate limit in bytes per second.
    pub flush_rate: f64,
    /// Delay between audit passes.
    pub audit_interval: Duration,
    /// Dedup block size used to precompute the toxic-hash set.
    pub block_size: usize,
    /// Whether the audit pass zeroes defective cells in place.
    pub heal_defects: bool,
    /// File name of the audit report, created in the context home directory.
    pub stats_file_name: String,
}

impl IndexOptions {
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            flush_rate: DEFAULT_FLUSH_RATE,
            audit_interval: Duration::from_secs(DEFAULT_AUDIT_INTERVAL_SECS),
            block_size: DEFAULT_BLOCK_SIZE,
            heal_defects: true,
            stats_file_name: DEFAULT_STATS_FILE_NAME.to_string(),
        }
    }

    /// Checks the option set before any file is touched.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.path.as_os_str().is_empty(),
            "backing file path must not be empty"
        );
        ensure!(self.size_bytes > 0, "table size must be positive");
        ensure!(
            self.size_bytes % EXTENT_BYTES as u64 == 0,
            "table size {} is not a multiple of extent size {}",
            self.size_bytes,
            EXTENT_BYTES
        );
        ensure!(self.block_size > 0, "block size must be positive");
        ensure!(
            self.flush_rate > 0.0,
            "flush rate must be positive, got {}",
            self.flush_rate
        );
        Ok(())
    }
}
