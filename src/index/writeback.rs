//! # Extent State Tracking and Writeback
//!
//! Every extent is in one of three effective states: *missing* (never
//! faulted in since open), *resident*, or *resident and dirty*. The
//! [`ExtentTracker`] holds the missing and dirty sets behind one mutex,
//! with a condition variable the writeback thread parks on while the
//! dirty set is empty.
//!
//! The writeback loop swaps the whole dirty set out under the mutex, then
//! flushes extents with no lock held: each extent's bytes are copied into
//! a private buffer first and written from there, because writing straight
//! from the shared image would contend with probe threads editing cells in
//! the same pages for longer than the copy costs. A torn snapshot of a bucket
//! being edited is harmless: the edit re-dirties the extent, so a clean
//! image lands on the next pass. Re-flushing an unchanged extent is
//! idempotent by construction.
//!
//! Write errors are logged and counted, never propagated; the extent
//! simply stays stale on disk until it is dirtied again.

use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use roaring::RoaringBitmap;
use tracing::{debug, warn};

use crate::config::constants::EXTENT_BYTES;
use crate::index::mapping::TableMapping;
use crate::stats::{count, IndexStats};
use crate::sync::RateLimiter;

struct TrackerState {
    /// Extents not yet faulted in from the backing file.
    missing: RoaringBitmap,
    /// Extents whose image differs from the backing file.
    dirty: RoaringBitmap,
}

pub struct ExtentTracker {
    state: Mutex<TrackerState>,
    dirty_ready: Condvar,
    shutdown: AtomicBool,
}

impl ExtentTracker {
    /// A tracker with every extent of an `n_extents`-sized table missing.
    pub fn new(n_extents: u64) -> Self {
        let mut missing = RoaringBitmap::new();
        missing.insert_range(0..n_extents as u32);
        Self {
            state: Mutex::new(TrackerState {
                missing,
                dirty: RoaringBitmap::new(),
            }),
            dirty_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn is_missing(&self, extent: u64) -> bool {
        self.state.lock().missing.contains(extent as u32)
    }

    pub fn clear_missing(&self, extent: u64) {
        self.state.lock().missing.remove(extent as u32);
    }

    pub fn missing_count(&self) -> u64 {
        self.state.lock().missing.len()
    }

    pub fn mark_dirty(&self, extent: u64) {
        let mut state = self.state.lock();
        state.dirty.insert(extent as u32);
        drop(state);
        self.dirty_ready.notify_one();
    }

    pub fn is_dirty(&self, extent: u64) -> bool {
        self.state.lock().dirty.contains(extent as u32)
    }

    pub fn dirty_count(&self) -> u64 {
        self.state.lock().dirty.len()
    }

    /// Swaps out the dirty set. Returns an empty bitmap if nothing is
    /// dirty.
    pub fn take_dirty(&self) -> RoaringBitmap {
        let mut state = self.state.lock();
        std::mem::take(&mut state.dirty)
    }

    /// Swaps out the dirty set, parking until it is non-empty or shutdown
    /// is requested. Returns `None` on shutdown with nothing left to
    /// flush.
    pub fn wait_dirty(&self) -> Option<RoaringBitmap> {
        let mut state = self.state.lock();
        loop {
            if !state.dirty.is_empty() {
                return Some(std::mem::take(&mut state.dirty));
            }
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            // The timeout bounds how stale a missed wakeup can leave us.
            self.dirty_ready
                .wait_for(&mut state, Duration::from_secs(1));
        }
    }

    /// Asks the writeback thread to drain and exit.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.dirty_ready.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Flushes one extent: snapshot the image bytes, `pwrite` them at the
/// extent's file offset, pace against the flush limiter.
pub(crate) fn flush_extent(
    mapping: &TableMapping,
    stats: &IndexStats,
    limiter: &RateLimiter,
    extent: u64,
) {
    // SAFETY: snapshot path; torn reads of in-flight bucket edits are
    // tolerated because such edits re-dirty the extent.
    let snapshot = unsafe { mapping.extent_bytes(extent) }.to_vec();
    let offset = mapping.extent_offset(extent);

    match mapping.file().write_all_at(&snapshot, offset) {
        Ok(()) => {
            count(&stats.extents_written);
            debug!(extent, offset, "flushed extent");
        }
        Err(err) => {
            count(&stats.write_errors);
            warn!(extent, offset, %err, "extent writeback failed; will retry when re-dirtied");
        }
    }

    limiter.sleep_for(EXTENT_BYTES as u64);
}

/// Body of the dedicated writeback thread: drain batches until shutdown,
/// flushing in extent order within each batch.
pub(crate) fn writeback_loop(
    mapping: &TableMapping,
    tracker: &ExtentTracker,
    stats: &IndexStats,
    limiter: &RateLimiter,
) {
    while let Some(batch) = tracker.wait_dirty() {
        for extent in batch.iter() {
            flush_extent(mapping, stats, limiter, extent as u64);
        }
    }
    debug!("writeback thread exiting");
}
