//! # Probe & Mutation Primitive Tests
//!
//! Exercises the four public primitives against a small single-extent
//! table: recency ordering, presence reporting, erase semantics, dirty
//! marking, and the toxic-hash short circuit.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tempfile::tempdir;

use dedupidx::config::constants::{BUCKETS_PER_EXTENT, EXTENT_BYTES, MIN_VALID_ADDR};
use dedupidx::{block_hash, BlockAddr, EngineContext, HashIndex};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn create_test_index(size_bytes: u64) -> (tempfile::TempDir, Arc<EngineContext>, HashIndex) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let dir = tempdir().expect("failed to create temp dir");
    let ctx = Arc::new(EngineContext::new(dir.path()));
    let index = HashIndex::builder("table.dat", size_bytes)
        .open(Arc::clone(&ctx))
        .expect("failed to open index");
    (dir, ctx, index)
}

fn addr(offset: u64) -> BlockAddr {
    assert!(offset >= MIN_VALID_ADDR);
    BlockAddr::new(offset)
}

/// Lets the writeback thread drain pending extents so dirty-count
/// assertions start from a clean slate.
fn drain_writeback(index: &HashIndex) {
    for _ in 0..200 {
        if index.dirty_extents() == 0 {
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    panic!("writeback did not drain");
}

// ============================================================================
// PUSH_FRONT
// ============================================================================

mod push_front {
    use super::*;

    #[test]
    fn insert_then_lookup_returns_entry() {
        let (_dir, _ctx, index) = create_test_index(EXTENT_BYTES as u64);

        let was_present = index.push_front(7, addr(0x10000));
        assert!(!was_present);

        let cells = index.lookup(7);
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].hash(), 7);
        assert_eq!(cells[0].raw_addr(), 0x10000);
    }

    #[test]
    fn insert_marks_extent_dirty() {
        let (_dir, ctx, index) = create_test_index(EXTENT_BYTES as u64);

        let written_before = ctx.stats().extents_written.load(Ordering::Relaxed);
        index.push_front(7, addr(0x10000));

        // The writeback thread may consume the dirty flag at any moment:
        // the mark is either still pending or becomes a completed flush.
        let mut observed = false;
        for _ in 0..200 {
            let pending = index.dirty_extents() > 0;
            let flushed = ctx.stats().extents_written.load(Ordering::Relaxed) > written_before;
            if pending || flushed {
                observed = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(observed, "mutation never marked its extent dirty");
    }

    #[test]
    fn most_recent_promotion_is_first() {
        let (_dir, _ctx, index) = create_test_index(EXTENT_BYTES as u64);

        index.push_front(7, addr(0x10000));
        index.push_front(7, addr(0x20000));

        let cells = index.lookup(7);
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].raw_addr(), 0x20000);
        assert_eq!(cells[1].raw_addr(), 0x10000);
    }

    #[test]
    fn reports_prior_presence() {
        let (_dir, _ctx, index) = create_test_index(EXTENT_BYTES as u64);

        assert!(!index.push_front(9, addr(0x30000)));
        assert!(index.push_front(9, addr(0x30000)));
    }

    #[test]
    fn repeat_push_is_idempotent_and_clean() {
        let (_dir, ctx, index) = create_test_index(EXTENT_BYTES as u64);

        index.push_front(11, addr(0x40000));
        index.push_front(11, addr(0x50000));
        let before = index.lookup(11);
        drain_writeback(&index);

        // The entry is already at position 0: no byte changes, so the
        // extent must not be re-dirtied and nothing counts as a
        // promotion.
        let promotions_before = ctx.stats().front_promotions.load(Ordering::Relaxed);
        assert!(index.push_front(11, addr(0x50000)));

        assert_eq!(index.dirty_extents(), 0);
        assert_eq!(
            ctx.stats().front_promotions.load(Ordering::Relaxed),
            promotions_before
        );
        assert_eq!(index.lookup(11), before);
    }

    #[test]
    fn promotion_preserves_other_entries() {
        let (_dir, _ctx, index) = create_test_index(EXTENT_BYTES as u64);

        index.push_front(13, addr(0x10000));
        index.push_front(13, addr(0x20000));
        index.push_front(13, addr(0x30000));
        // Promote the middle entry back to the front.
        assert!(index.push_front(13, addr(0x20000)));

        let cells = index.lookup(13);
        let addrs: Vec<u64> = cells.iter().map(|c| c.raw_addr()).collect();
        assert_eq!(addrs, vec![0x20000, 0x30000, 0x10000]);
    }
}

// ============================================================================
// LOOKUP
// ============================================================================

mod lookup {
    use super::*;

    #[test]
    fn empty_table_returns_nothing() {
        let (_dir, _ctx, index) = create_test_index(EXTENT_BYTES as u64);
        assert!(index.lookup(12345).is_empty());
    }

    #[test]
    fn returns_only_matching_hashes() {
        let (_dir, _ctx, index) = create_test_index(EXTENT_BYTES as u64);

        // With one extent the table has BUCKETS_PER_EXTENT buckets, so
        // these two hashes collide into the same bucket.
        let n_buckets = BUCKETS_PER_EXTENT as u64;
        let (h1, h2) = (5, 5 + n_buckets);
        assert_eq!(index.bucket_of(h1), index.bucket_of(h2));

        index.push_front(h1, addr(0x10000));
        index.push_front(h2, addr(0x20000));

        let cells = index.lookup(h1);
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].hash(), h1);

        let cells = index.lookup(h2);
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].hash(), h2);
    }
}

// ============================================================================
// ERASE
// ============================================================================

mod erase {
    use super::*;

    #[test]
    fn removes_exact_entry() {
        let (_dir, _ctx, index) = create_test_index(EXTENT_BYTES as u64);

        index.push_front(21, addr(0x10000));
        index.erase(21, addr(0x10000));

        assert!(index.lookup(21).is_empty());
    }

    #[test]
    fn leaves_other_entries_of_same_hash() {
        let (_dir, _ctx, index) = create_test_index(EXTENT_BYTES as u64);

        index.push_front(22, addr(0x10000));
        index.push_front(22, addr(0x20000));
        index.erase(22, addr(0x10000));

        let cells = index.lookup(22);
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].raw_addr(), 0x20000);
    }

    #[test]
    fn absent_entry_is_a_clean_noop() {
        let (_dir, ctx, index) = create_test_index(EXTENT_BYTES as u64);

        index.push_front(23, addr(0x10000));
        drain_writeback(&index);

        index.erase(23, addr(0x99000));
        assert_eq!(index.dirty_extents(), 0);
        assert_eq!(ctx.stats().erases.load(Ordering::Relaxed), 0);
        assert_eq!(index.lookup(23).len(), 1);
    }

    #[test]
    fn erased_slot_can_be_refilled() {
        let (_dir, _ctx, index) = create_test_index(EXTENT_BYTES as u64);

        index.push_front(24, addr(0x10000));
        index.erase(24, addr(0x10000));
        index.push_front(24, addr(0x20000));

        let cells = index.lookup(24);
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].raw_addr(), 0x20000);
    }
}

// ============================================================================
// TOXIC HASHES
// ============================================================================

mod toxic {
    use super::*;

    #[test]
    fn every_uniform_byte_block_short_circuits() {
        let (_dir, _ctx, index) = create_test_index(EXTENT_BYTES as u64);

        for byte in 1..=255u8 {
            let hash = block_hash(&vec![byte; 4096]);
            let cells = index.lookup(hash);
            assert_eq!(cells.len(), 1, "byte {byte:#x}");
            assert!(cells[0].addr().is_toxic(), "byte {byte:#x}");
            assert_eq!(cells[0].hash(), hash);
        }
    }

    #[test]
    fn short_circuit_ignores_table_state() {
        let (_dir, _ctx, index) = create_test_index(EXTENT_BYTES as u64);

        let hash = block_hash(&vec![0xffu8; 4096]);
        // Even a stored entry under the toxic hash is shadowed.
        index.push_front(hash, addr(0x10000));

        let cells = index.lookup(hash);
        assert_eq!(cells.len(), 1);
        assert!(cells[0].addr().is_toxic());
    }

    #[test]
    fn toxic_probe_counts_without_a_table_lookup() {
        let (_dir, ctx, index) = create_test_index(EXTENT_BYTES as u64 * 4);

        let hash = block_hash(&vec![1u8; 4096]);
        index.lookup(hash);

        assert_eq!(ctx.stats().toxic_hits.load(Ordering::Relaxed), 1);
        assert_eq!(ctx.stats().lookups.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn zero_byte_block_probes_the_table() {
        let (_dir, ctx, index) = create_test_index(EXTENT_BYTES as u64);

        let hash = block_hash(&vec![0u8; 4096]);
        let cells = index.lookup(hash);
        assert!(cells.is_empty());
        assert_eq!(ctx.stats().toxic_hits.load(Ordering::Relaxed), 0);
    }
}
