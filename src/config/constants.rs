//! # Index Configuration Constants
//!
//! This module centralizes the geometry of the hash table file and the
//! defaults for the background threads. Constants that depend on each other
//! are co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! CELL_BYTES (16)
//!       │
//!       └─> CELLS_PER_BUCKET (derived: BUCKET_BYTES / CELL_BYTES)
//!
//! BUCKET_BYTES (8192)
//!       │
//!       ├─> CELLS_PER_BUCKET (512)
//!       │
//!       └─> EXTENT_BYTES (derived: BUCKETS_PER_EXTENT * BUCKET_BYTES)
//!             The extent is the unit of file I/O and of dirty tracking.
//!             The backing file size must be a multiple of EXTENT_BYTES.
//! ```
//!
//! ## Critical Invariants
//!
//! These invariants are enforced by compile-time assertions:
//!
//! 1. `BUCKET_BYTES % CELL_BYTES == 0` (cells tile a bucket exactly)
//! 2. `EXTENT_BYTES % BUCKET_BYTES == 0` (buckets tile an extent exactly)
//! 3. `BUCKET_BYTES % 4096 == 0` (buckets never straddle page boundaries)
//!
//! ## On-Disk Compatibility
//!
//! The backing file has no header: its layout is implied entirely by these
//! constants. Changing `CELL_BYTES`, `BUCKET_BYTES` or `BUCKETS_PER_EXTENT`
//! is a format break and an existing file must be discarded.

// ============================================================================
// TABLE GEOMETRY
// These constants are tightly coupled - changing one may require changing others
// ============================================================================

/// Size of a single table entry: a little-endian (hash, address) pair.
pub const CELL_BYTES: usize = 16;

/// Size of one hash bucket in bytes.
/// A bucket is the unit of probing: every hash maps to exactly one bucket.
pub const BUCKET_BYTES: usize = 8192;

/// Number of cells in one bucket.
/// Derived so that cells exactly tile a bucket.
pub const CELLS_PER_BUCKET: usize = BUCKET_BYTES / CELL_BYTES;

/// Number of buckets in one extent.
/// The extent is the unit of I/O between RAM and the backing file.
pub const BUCKETS_PER_EXTENT: usize = 16;

/// Size of one extent in bytes (128KB).
pub const EXTENT_BYTES: usize = BUCKETS_PER_EXTENT * BUCKET_BYTES;

const _: () = assert!(
    BUCKET_BYTES % CELL_BYTES == 0,
    "cells must tile a bucket exactly"
);

const _: () = assert!(
    EXTENT_BYTES % BUCKET_BYTES == 0,
    "buckets must tile an extent exactly"
);

const _: () = assert!(
    BUCKET_BYTES % 4096 == 0,
    "buckets must be page multiples so they never straddle a page boundary"
);

// ============================================================================
// ADDRESS SPACE
// ============================================================================

/// Smallest legitimate physical address.
/// Non-zero addresses below this are reserved as sentinels (e.g. the toxic
/// marker) and are treated as corruption when found in the table.
pub const MIN_VALID_ADDR: u64 = 0x1000;

// ============================================================================
// DEFAULTS FOR RUNTIME OPTIONS
// ============================================================================

/// Default dedup block size in bytes. The toxic-hash filter hashes
/// uniform blocks of this size.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default writeback rate limit in bytes per second (128MB/s).
/// The writeback thread sleeps after each extent so a freshly dirtied
/// table does not monopolize the disk.
pub const DEFAULT_FLUSH_RATE: f64 = (128 * 1024 * 1024) as f64;

/// Default interval between audit passes, in seconds.
pub const DEFAULT_AUDIT_INTERVAL_SECS: u64 = 3600;

/// Default name of the plain-text stats report, created in the context
/// home directory and truncated on each audit cycle.
pub const DEFAULT_STATS_FILE_NAME: &str = "index-stats.txt";
