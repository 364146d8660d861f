//! # Engine Context
//!
//! Shared state the index borrows from the surrounding dedup engine: the
//! home directory where the backing file and stats report live, the
//! process uptime timer used for rate reporting, the statistics counters,
//! and the blacklist of paths the scanner must never feed back into the
//! engine (the index registers its own backing file there, otherwise the
//! scanner would dedup the table against itself).
//!
//! The context never references the index. The index owns its own threads
//! and lifetime; the context is plain shared infrastructure, so no cycle
//! exists that would need breaking.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashSet;
use parking_lot::Mutex;

use crate::stats::IndexStats;

pub struct EngineContext {
    home: PathBuf,
    started: Instant,
    stats: Arc<IndexStats>,
    blacklist: Mutex<HashSet<PathBuf>>,
}

impl EngineContext {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            started: Instant::now(),
            stats: Arc::new(IndexStats::new()),
            blacklist: Mutex::new(HashSet::new()),
        }
    }

    /// Home directory for engine-owned files (backing table, stats report).
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Seconds since the engine started. Used as the denominator for rate
    /// statistics; clamped away from zero so rates stay finite.
    pub fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64().max(1e-6)
    }

    pub fn stats(&self) -> &Arc<IndexStats> {
        &self.stats
    }

    /// Registers a path the scanner must skip.
    pub fn blacklist_add(&self, path: impl Into<PathBuf>) {
        self.blacklist.lock().insert(path.into());
    }

    pub fn is_blacklisted(&self, path: &Path) -> bool {
        self.blacklist.lock().contains(path)
    }
}
