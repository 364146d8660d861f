//! # Probe & Mutation Engine
//!
//! [`HashIndex`] is the public face of the table: four mutation
//! primitives over a fixed array of recency-ordered buckets, backed by
//! the [`TableMapping`](crate::index::mapping::TableMapping) image and
//! the [`ExtentTracker`](crate::index::writeback::ExtentTracker).
//!
//! ## Operation Shape
//!
//! Every primitive follows the same discipline:
//!
//! 1. fault the target extent in if it has never been read from the
//!    backing file (blocking, per-extent lock, no table-wide lock held);
//! 2. take the table-wide mutation mutex for the duration of the bucket
//!    edit only; the mutex is never held across I/O;
//! 3. if the edit changed any byte, mark the extent dirty for the
//!    writeback thread.
//!
//! ## Replacement Policy
//!
//! First sightings of unique blocks vastly outnumber confirmed
//! duplicates, so new entries land at a *uniformly random* bucket
//! position (`push_insert_random`) while confirmed duplicates are
//! promoted to position 0 (`push_front`). Together these approximate a
//! random-replacement cache biased toward retained duplicates, with none
//! of the bookkeeping true LRU would need.
//!
//! ## Error Policy
//!
//! The primitives are infallible by signature. The index is an
//! optimization: the engine operates correctly (if slowly) with zero
//! successful lookups, so transient I/O failures degrade the operation
//! to a no-op instead of poisoning the caller. Configuration and mapping
//! failures surface once, at construction.

use std::os::unix::fs::FileExt;
use std::sync::Arc;
use std::thread::JoinHandle;

use eyre::WrapErr as _;
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use smallvec::SmallVec;
use tracing::{info, warn};

use crate::addr::BlockAddr;
use crate::config::constants::{CELLS_PER_BUCKET, EXTENT_BYTES, MIN_VALID_ADDR};
use crate::config::IndexOptions;
use crate::context::EngineContext;
use crate::index::audit;
use crate::index::cell::Cell;
use crate::index::mapping::TableMapping;
use crate::index::toxic::ToxicFilter;
use crate::index::writeback::{self, ExtentTracker};
use crate::stats::{count, IndexStats};
use crate::sync::{LockSet, RateLimiter};

/// Lookup results are usually a handful of cells; spill to the heap only
/// for hot hashes.
pub type CellList = SmallVec<[Cell; 8]>;

pub(crate) struct IndexShared {
    pub(crate) ctx: Arc<EngineContext>,
    pub(crate) opts: IndexOptions,
    pub(crate) mapping: TableMapping,
    pub(crate) tracker: ExtentTracker,
    /// Table-wide mutation lock: every in-bucket probe or edit, never
    /// held across I/O.
    pub(crate) bucket_mutex: Mutex<()>,
    /// One in-flight fault-in per extent.
    pub(crate) extent_locks: LockSet<u64>,
    pub(crate) toxic: ToxicFilter,
    pub(crate) stats: Arc<IndexStats>,
    pub(crate) flush_limiter: RateLimiter,
    pub(crate) prefetch_limiter: RateLimiter,
    /// Audit thread parks here between passes; flipped on shutdown.
    pub(crate) audit_stop: Mutex<bool>,
    pub(crate) audit_wakeup: Condvar,
}

impl IndexShared {
    /// Guarantees the extent holding `hash`'s bucket is resident.
    /// Returns false if the backing file could not be read, in which case
    /// the caller must leave the table untouched.
    pub(crate) fn fault_in_for_hash(&self, hash: u64) -> bool {
        let bucket = self.mapping.bucket_of(hash);
        self.fault_in_extent(self.mapping.extent_of_bucket(bucket))
    }

    pub(crate) fn fault_in_extent(&self, extent: u64) -> bool {
        if !self.tracker.is_missing(extent) {
            return true;
        }

        let _extent_lock = self.extent_locks.lock(extent);

        // Another thread may have serviced this extent while we waited on
        // the per-extent lock.
        if !self.tracker.is_missing(extent) {
            count(&self.stats.extent_read_races);
            return true;
        }

        let offset = self.mapping.extent_offset(extent);
        // SAFETY: the per-extent lock is held and the extent is missing,
        // so no bucket in it can be under mutation.
        let image = unsafe { self.mapping.extent_bytes_mut(extent) };
        match self.mapping.file().read_exact_at(image, offset) {
            Ok(()) => {
                count(&self.stats.extents_read);
                // Slow the prefetch thread down rather than this probe.
                self.prefetch_limiter.borrow(EXTENT_BYTES as u64);
                self.tracker.clear_missing(extent);
                true
            }
            Err(err) => {
                count(&self.stats.read_errors);
                warn!(extent, offset, %err, "extent fault-in failed; probe degrades to a miss");
                false
            }
        }
    }

    pub(crate) fn mark_bucket_dirty(&self, bucket: u64) {
        self.tracker.mark_dirty(self.mapping.extent_of_bucket(bucket));
    }
}

pub struct HashIndex {
    shared: Arc<IndexShared>,
    writeback_thread: Option<JoinHandle<()>>,
    audit_thread: Option<JoinHandle<()>>,
}

impl HashIndex {
    /// Opens (or creates) the backing file and starts the writeback and
    /// audit threads. The backing file is registered in the context
    /// blacklist so the scanner never feeds the table to itself.
    pub fn open(ctx: Arc<EngineContext>, opts: IndexOptions) -> eyre::Result<Self> {
        opts.validate()?;

        let path = if opts.path.is_absolute() {
            opts.path.clone()
        } else {
            ctx.home().join(&opts.path)
        };

        let mapping = TableMapping::open(&path, opts.size_bytes)?;
        ctx.blacklist_add(mapping.path());

        let shared = Arc::new(IndexShared {
            tracker: ExtentTracker::new(mapping.n_extents()),
            toxic: ToxicFilter::new(opts.block_size),
            stats: Arc::clone(ctx.stats()),
            flush_limiter: RateLimiter::new(opts.flush_rate),
            prefetch_limiter: RateLimiter::new(opts.flush_rate),
            bucket_mutex: Mutex::new(()),
            extent_locks: LockSet::new(),
            audit_stop: Mutex::new(false),
            audit_wakeup: Condvar::new(),
            mapping,
            ctx,
            opts,
        });

        let writeback_thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("index-writeback".into())
                .spawn(move || {
                    writeback::writeback_loop(
                        &shared.mapping,
                        &shared.tracker,
                        &shared.stats,
                        &shared.flush_limiter,
                    )
                })
                .wrap_err("failed to spawn writeback thread")?
        };

        let audit_thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("index-audit".into())
                .spawn(move || audit::audit_loop(&shared))
                .wrap_err("failed to spawn audit thread")?
        };

        info!(
            path = %shared.mapping.path().display(),
            toxic_hashes = shared.toxic.len(),
            "hash index ready"
        );

        Ok(Self {
            shared,
            writeback_thread: Some(writeback_thread),
            audit_thread: Some(audit_thread),
        })
    }

    /// All cells recorded for `hash`, most recently promoted first.
    ///
    /// Toxic hashes short-circuit to a single synthetic cell carrying the
    /// toxic marker address; the table is not touched, not even to fault
    /// the extent in.
    pub fn lookup(&self, hash: u64) -> CellList {
        let shared = &self.shared;

        if shared.toxic.contains(hash) {
            count(&shared.stats.toxic_hits);
            let mut list = CellList::new();
            list.push(Cell::new(hash, BlockAddr::toxic_marker().raw()));
            return list;
        }

        if !shared.fault_in_for_hash(hash) {
            return CellList::new();
        }

        let bucket = shared.mapping.bucket_of(hash);
        let _guard = shared.bucket_mutex.lock();
        // SAFETY: mutation mutex held, extent resident.
        let cells = unsafe { shared.mapping.bucket_cells(bucket) };

        count(&shared.stats.lookups);
        cells
            .iter()
            .filter(|cell| cell.hash() == hash && cell.raw_addr() >= MIN_VALID_ADDR)
            .copied()
            .collect()
    }

    /// Removes the exact (hash, addr) entry if present. Called when an
    /// address handed out by `lookup` turns out not to resolve any more;
    /// clearing it stops every subsequent probe from retrying a dead
    /// address. No compaction.
    pub fn erase(&self, hash: u64, addr: BlockAddr) {
        let shared = &self.shared;
        if !shared.fault_in_for_hash(hash) {
            return;
        }

        let bucket = shared.mapping.bucket_of(hash);
        let target = Cell::new(hash, addr.raw());
        let _guard = shared.bucket_mutex.lock();
        // SAFETY: mutation mutex held, extent resident.
        let cells = unsafe { shared.mapping.bucket_cells(bucket) };

        if let Some(pos) = cells.iter().position(|cell| *cell == target) {
            cells[pos] = Cell::empty();
            shared.mark_bucket_dirty(bucket);
            count(&shared.stats.erases);
        }
    }

    /// Promotes (hash, addr) to position 0 of its bucket, inserting it if
    /// absent. Returns true iff the entry was already present.
    ///
    /// Invoked when a block is confirmed to be a duplicate: the hottest
    /// confirmed duplicates converge on the front of their buckets, where
    /// random insertion is least likely to displace them.
    pub fn push_front(&self, hash: u64, addr: BlockAddr) -> bool {
        let shared = &self.shared;
        if !shared.fault_in_for_hash(hash) {
            return false;
        }

        let bucket = shared.mapping.bucket_of(hash);
        let target = Cell::new(hash, addr.raw());
        let _guard = shared.bucket_mutex.lock();
        // SAFETY: mutation mutex held, extent resident.
        let cells = unsafe { shared.mapping.bucket_cells(bucket) };

        let found_at = cells.iter().position(|cell| *cell == target);
        let found = found_at.is_some();

        // The slot vacated by the shift: the matching entry, else the
        // first empty cell, else one past the end.
        let mut vacate = found_at
            .or_else(|| cells.iter().position(Cell::is_empty))
            .unwrap_or(cells.len());
        if vacate == cells.len() {
            // Nothing reusable: silently evict the tail cell.
            vacate -= 1;
            count(&shared.stats.evictions);
        }

        cells.copy_within(0..vacate, 1);

        if cells[0] != target {
            cells[0] = target;
            shared.mark_bucket_dirty(bucket);
            count(&shared.stats.front_promotions);
        }

        found
    }

    /// Records a first-seen (hash, addr) at a uniformly random bucket
    /// position, preserving an existing equal entry. Returns true iff the
    /// entry was already present.
    pub fn push_insert_random(&self, hash: u64, addr: BlockAddr) -> bool {
        self.push_insert_random_with(hash, addr, &mut rand::thread_rng())
    }

    /// [`push_insert_random`](Self::push_insert_random) with an injected
    /// RNG, for deterministic replay.
    pub fn push_insert_random_with<R: Rng>(&self, hash: u64, addr: BlockAddr, rng: &mut R) -> bool {
        let shared = &self.shared;
        if !shared.fault_in_for_hash(hash) {
            return false;
        }

        let pos = rng.gen_range(0..CELLS_PER_BUCKET);

        let bucket = shared.mapping.bucket_of(hash);
        let target = Cell::new(hash, addr.raw());
        let _guard = shared.bucket_mutex.lock();
        // SAFETY: mutation mutex held, extent resident.
        let cells = unsafe { shared.mapping.bucket_cells(bucket) };

        let found_at = cells.iter().position(|cell| *cell == target);

        if let Some(ip) = found_at {
            if ip > pos {
                // Already present behind the drawn position: bump it
                // forward without dropping anything.
                cells.copy_within(pos..ip, pos + 1);
                cells[pos] = target;
                count(&shared.stats.bumps);
                count(&shared.stats.inserts);
                shared.mark_bucket_dirty(bucket);
            } else {
                // Already at or before the drawn position: leave it.
                count(&shared.stats.already_present);
            }
            return true;
        }

        // Empty slot at or after the drawn position.
        if let Some(slot) = (pos..cells.len()).find(|&i| cells[i].is_empty()) {
            cells[slot] = target;
            count(&shared.stats.inserts);
            shared.mark_bucket_dirty(bucket);
            return false;
        }

        // Empty slot strictly before it, nearest first.
        if let Some(slot) = (0..pos).rev().find(|&i| cells[i].is_empty()) {
            cells[slot] = target;
            count(&shared.stats.inserts);
            shared.mark_bucket_dirty(bucket);
            return false;
        }

        // Full bucket: evict the tail, insert at the drawn position.
        cells.copy_within(pos..cells.len() - 1, pos + 1);
        cells[pos] = target;
        count(&shared.stats.evictions);
        count(&shared.stats.inserts);
        shared.mark_bucket_dirty(bucket);
        false
    }

    /// Runs one synchronous audit sweep over the whole table and returns
    /// its report. The periodic audit thread runs the same sweep.
    pub fn audit_pass(&self) -> audit::AuditReport {
        audit::audit_pass(&self.shared)
    }

    /// Blocks until every currently dirty extent has been written back.
    pub fn flush(&self) {
        let batch = self.shared.tracker.take_dirty();
        for extent in batch.iter() {
            writeback::flush_extent(
                &self.shared.mapping,
                &self.shared.stats,
                &self.shared.flush_limiter,
                extent as u64,
            );
        }
    }

    pub fn stats(&self) -> &Arc<IndexStats> {
        &self.shared.stats
    }

    pub fn n_buckets(&self) -> u64 {
        self.shared.mapping.n_buckets()
    }

    /// Extents currently awaiting writeback.
    pub fn dirty_extents(&self) -> u64 {
        self.shared.tracker.dirty_count()
    }

    /// Extents not yet faulted in from the backing file.
    pub fn missing_extents(&self) -> u64 {
        self.shared.tracker.missing_count()
    }

    pub fn n_extents(&self) -> u64 {
        self.shared.mapping.n_extents()
    }

    /// The bucket index `hash` probes. Stable for the lifetime of the
    /// backing file.
    pub fn bucket_of(&self, hash: u64) -> u64 {
        self.shared.mapping.bucket_of(hash)
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<IndexShared> {
        &self.shared
    }
}

impl Drop for HashIndex {
    fn drop(&mut self) {
        // Stop the audit thread first: it can still dirty extents while
        // healing, and those must reach the final writeback drain.
        {
            let mut stop = self.shared.audit_stop.lock();
            *stop = true;
        }
        self.shared.audit_wakeup.notify_all();
        if let Some(handle) = self.audit_thread.take() {
            let _ = handle.join();
        }

        // The writeback thread drains the dirty set before exiting.
        self.shared.tracker.request_shutdown();
        if let Some(handle) = self.writeback_thread.take() {
            let _ = handle.join();
        }

        // Nothing can dirty extents past this point; drain any stragglers.
        self.flush();
    }
}
