//! # Persistence Tests
//!
//! The backing file is the stable contract: little-endian cells, no
//! header, extent-aligned. These tests check writeback byte layout and
//! that a table reopened from the same file answers like the table that
//! wrote it.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use dedupidx::config::constants::{BUCKET_BYTES, EXTENT_BYTES, MIN_VALID_ADDR};
use dedupidx::{BlockAddr, Cell, EngineContext, HashIndex};

fn open_index(dir: &tempfile::TempDir, size_bytes: u64) -> (Arc<EngineContext>, HashIndex) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let ctx = Arc::new(EngineContext::new(dir.path()));
    let index = HashIndex::builder("table.dat", size_bytes)
        .open(Arc::clone(&ctx))
        .expect("failed to open index");
    (ctx, index)
}

fn addr(offset: u64) -> BlockAddr {
    assert!(offset >= MIN_VALID_ADDR);
    BlockAddr::new(offset)
}

/// Waits until at least `min` extent writes have completed, whether by
/// an explicit flush or the background writeback thread.
fn wait_for_writes(ctx: &EngineContext, min: u64) {
    for _ in 0..400 {
        if ctx.stats().extents_written.load(Ordering::Relaxed) >= min {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("writeback did not complete");
}

#[test]
fn flushed_extent_has_little_endian_cells_at_bucket_offsets() {
    let dir = tempdir().unwrap();
    let (ctx, index) = open_index(&dir, EXTENT_BYTES as u64);

    let hash = 7u64;
    index.push_front(hash, addr(0x10000));
    let bucket = index.bucket_of(hash);
    index.flush();
    wait_for_writes(&ctx, 1);

    let file = std::fs::read(dir.path().join("table.dat")).unwrap();
    assert_eq!(file.len(), EXTENT_BYTES);

    let cell_offset = bucket as usize * BUCKET_BYTES;
    assert_eq!(&file[cell_offset..cell_offset + 8], &hash.to_le_bytes());
    assert_eq!(
        &file[cell_offset + 8..cell_offset + 16],
        &0x10000u64.to_le_bytes()
    );

    // Everything else in the extent is still empty cells.
    let occupied = file.chunks_exact(16).filter(|c| c.iter().any(|&b| b != 0)).count();
    assert_eq!(occupied, 1);
}

#[test]
fn reflush_of_stable_extent_is_idempotent() {
    let dir = tempdir().unwrap();
    let (ctx, index) = open_index(&dir, EXTENT_BYTES as u64);

    index.push_front(3, addr(0x30000));
    index.flush();
    wait_for_writes(&ctx, 1);
    let first = std::fs::read(dir.path().join("table.dat")).unwrap();

    index.flush();
    let second = std::fs::read(dir.path().join("table.dat")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn reopen_returns_entries_written_before_close() {
    let dir = tempdir().unwrap();
    let entries: Vec<(u64, u64)> = (0..20).map(|i| (100 + i, 0x10000 + i * 0x1000)).collect();

    let mut before: Vec<Vec<Cell>> = Vec::new();
    {
        let (_ctx, index) = open_index(&dir, EXTENT_BYTES as u64 * 4);
        for &(hash, offset) in &entries {
            index.push_front(hash, addr(offset));
        }
        for &(hash, _) in &entries {
            before.push(index.lookup(hash).to_vec());
        }
        // Drop performs the final flush.
    }

    let (_ctx, index) = open_index(&dir, EXTENT_BYTES as u64 * 4);
    for (i, &(hash, _)) in entries.iter().enumerate() {
        assert_eq!(index.lookup(hash).to_vec(), before[i], "hash {hash}");
    }
}

#[test]
fn reopen_preserves_erasures() {
    let dir = tempdir().unwrap();
    {
        let (_ctx, index) = open_index(&dir, EXTENT_BYTES as u64);
        index.push_front(5, addr(0x10000));
        index.push_front(5, addr(0x20000));
        index.erase(5, addr(0x10000));
    }

    let (_ctx, index) = open_index(&dir, EXTENT_BYTES as u64);
    let cells = index.lookup(5);
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].raw_addr(), 0x20000);
}

#[test]
fn existing_file_size_wins_over_configuration() {
    let dir = tempdir().unwrap();
    {
        let (_ctx, _index) = open_index(&dir, EXTENT_BYTES as u64 * 2);
    }
    let size_on_disk = std::fs::metadata(dir.path().join("table.dat")).unwrap().len();
    assert_eq!(size_on_disk, EXTENT_BYTES as u64 * 2);

    // Reopening with a larger configured size must not grow the file.
    let (_ctx, index) = open_index(&dir, EXTENT_BYTES as u64 * 8);
    assert_eq!(index.n_extents(), 2);
    let size_on_disk = std::fs::metadata(dir.path().join("table.dat")).unwrap().len();
    assert_eq!(size_on_disk, EXTENT_BYTES as u64 * 2);
}

#[test]
fn backing_file_is_blacklisted() {
    let dir = tempdir().unwrap();
    let ctx = Arc::new(EngineContext::new(dir.path()));
    let _index = HashIndex::builder("table.dat", EXTENT_BYTES as u64)
        .open(Arc::clone(&ctx))
        .unwrap();

    assert!(ctx.is_blacklisted(&dir.path().join("table.dat")));
}
