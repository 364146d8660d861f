//! # Process-Wide Index Statistics
//!
//! Named monotonic counters for every interesting event in the index.
//! Counters use relaxed atomics: they are observability, not
//! synchronization. The instance is owned by the
//! [`EngineContext`](crate::context::EngineContext) and handed to the index
//! as an `Arc`, so tests can instantiate private counters instead of
//! sharing process globals.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic event counters for one hash index.
#[derive(Debug, Default)]
pub struct IndexStats {
    /// `lookup` calls that consulted the table (toxic probes excluded).
    pub lookups: AtomicU64,
    /// `lookup` calls short-circuited by the toxic-hash filter.
    pub toxic_hits: AtomicU64,
    /// Cells written by the random-insertion primitive.
    pub inserts: AtomicU64,
    /// `push_front` calls that wrote position 0.
    pub front_promotions: AtomicU64,
    /// Random inserts that promoted an existing entry forward.
    pub bumps: AtomicU64,
    /// Random inserts that found the entry already at or before the
    /// drawn position and left the bucket untouched.
    pub already_present: AtomicU64,
    /// Cells zeroed by `erase`.
    pub erases: AtomicU64,
    /// Cells dropped to make room, by either insertion primitive.
    pub evictions: AtomicU64,
    /// Extents faulted in from the backing file.
    pub extents_read: AtomicU64,
    /// Fault-in attempts that found the extent already serviced after
    /// waiting on the per-extent lock.
    pub extent_read_races: AtomicU64,
    /// Extents written back to the backing file.
    pub extents_written: AtomicU64,
    /// Failed extent reads.
    pub read_errors: AtomicU64,
    /// Failed extent writes.
    pub write_errors: AtomicU64,
    /// Cells found with an impossible (sub-sentinel) address.
    pub bad_addr_defects: AtomicU64,
    /// Duplicate cells found within one bucket.
    pub duplicate_cell_defects: AtomicU64,
}

impl IndexStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// All counters as (name, value) pairs, in report order.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        vec![
            ("lookups", read(&self.lookups)),
            ("toxic_hits", read(&self.toxic_hits)),
            ("inserts", read(&self.inserts)),
            ("front_promotions", read(&self.front_promotions)),
            ("bumps", read(&self.bumps)),
            ("already_present", read(&self.already_present)),
            ("erases", read(&self.erases)),
            ("evictions", read(&self.evictions)),
            ("extents_read", read(&self.extents_read)),
            ("extent_read_races", read(&self.extent_read_races)),
            ("extents_written", read(&self.extents_written)),
            ("read_errors", read(&self.read_errors)),
            ("write_errors", read(&self.write_errors)),
            ("bad_addr_defects", read(&self.bad_addr_defects)),
            ("duplicate_cell_defects", read(&self.duplicate_cell_defects)),
        ]
    }
}

/// Bumps a counter by one.
#[inline]
pub(crate) fn count(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counts() {
        let stats = IndexStats::new();
        count(&stats.lookups);
        count(&stats.lookups);
        count(&stats.evictions);

        let snap = stats.snapshot();
        let get = |name: &str| snap.iter().find(|(n, _)| *n == name).unwrap().1;
        assert_eq!(get("lookups"), 2);
        assert_eq!(get("evictions"), 1);
        assert_eq!(get("inserts"), 0);
    }

    #[test]
    fn snapshot_names_are_unique() {
        let stats = IndexStats::new();
        let snap = stats.snapshot();
        let mut names: Vec<_> = snap.iter().map(|(n, _)| *n).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), snap.len());
    }
}
