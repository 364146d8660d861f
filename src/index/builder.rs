//! # Index Builder
//!
//! Fluent construction of a [`HashIndex`]. Settings are chained before
//! calling [`open`](HashIndexBuilder::open), which validates the whole
//! option set at once.
//!
//! ```ignore
//! let ctx = Arc::new(EngineContext::new("/var/lib/dedup"));
//! let index = HashIndex::builder("table.dat", 1 << 30)
//!     .flush_rate(64.0 * 1024.0 * 1024.0)
//!     .audit_interval(Duration::from_secs(900))
//!     .open(ctx)?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;

use crate::config::IndexOptions;
use crate::context::EngineContext;
use crate::index::table::HashIndex;

pub struct HashIndexBuilder {
    opts: IndexOptions,
}

impl HashIndexBuilder {
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            opts: IndexOptions::new(path, size_bytes),
        }
    }

    /// Writeback rate limit in bytes per second.
    pub fn flush_rate(mut self, bytes_per_sec: f64) -> Self {
        self.opts.flush_rate = bytes_per_sec;
        self
    }

    /// Delay between audit passes.
    pub fn audit_interval(mut self, interval: Duration) -> Self {
        self.opts.audit_interval = interval;
        self
    }

    /// Dedup block size used to precompute the toxic-hash set.
    pub fn block_size(mut self, bytes: usize) -> Self {
        self.opts.block_size = bytes;
        self
    }

    /// Whether the audit pass zeroes defective cells in place.
    pub fn heal_defects(mut self, heal: bool) -> Self {
        self.opts.heal_defects = heal;
        self
    }

    /// File name of the audit report within the context home directory.
    pub fn stats_file_name(mut self, name: impl Into<String>) -> Self {
        self.opts.stats_file_name = name.into();
        self
    }

    pub fn open(self, ctx: Arc<EngineContext>) -> Result<HashIndex> {
        HashIndex::open(ctx, self.opts)
    }
}

impl HashIndex {
    pub fn builder(path: impl Into<PathBuf>, size_bytes: u64) -> HashIndexBuilder {
        HashIndexBuilder::new(path, size_bytes)
    }
}
