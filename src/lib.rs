//! # dedupidx - Persistent Content-Addressed Hash Index
//!
//! `dedupidx` is the hash index at the heart of a block-level
//! deduplication engine for a copy-on-write filesystem. The engine splits
//! file data into fixed-size blocks, hashes each block, and asks this
//! index: "have I seen this block before, and if so, where?" A hit lets
//! the engine share the underlying extent instead of storing the bytes
//! twice.
//!
//! ## Design Priorities
//!
//! - **Bounded everywhere**: the table has a fixed size in RAM and on
//!   disk, chosen at creation, no matter how large the indexed dataset
//!   grows. Replacement is principled random eviction, not ad-hoc.
//! - **Concurrent probes**: many worker threads probe simultaneously;
//!   disk I/O never happens under the table-wide lock.
//! - **Restartable**: the on-disk layout is the stable contract; the
//!   table survives process crashes, modulo extents not yet written back.
//! - **Self-defending**: hashes of uniform-byte blocks are neutralized
//!   before they can build pathological buckets, and a periodic audit
//!   heals benign corruption in place.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dedupidx::{block_hash, BlockAddr, EngineContext, HashIndex};
//!
//! let ctx = Arc::new(EngineContext::new("/var/lib/dedup"));
//! let index = HashIndex::builder("table.dat", 128 * 1024 * 1024).open(ctx)?;
//!
//! let hash = block_hash(&block);
//! for cell in index.lookup(hash) {
//!     // try to dedup against cell.addr() ...
//! }
//! index.push_insert_random(hash, BlockAddr::new(physical));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │      Public API (HashIndex + builder)        │
//! ├──────────────────────────────────────────────┤
//! │   Probe & Mutation Engine (index::table)     │
//! ├────────────┬──────────────┬──────────────────┤
//! │ toxic set  │  writeback   │  prefetch/audit  │
//! ├────────────┴──────────────┴──────────────────┤
//! │  Table image + backing file (index::mapping) │
//! ├──────────────────────────────────────────────┤
//! │  sync (lock set, rate limiter) · stats · ctx │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`index`]: the table core (mapping, cells, probes, writeback, audit)
//! - [`addr`]: physical block addresses with metadata flag bits
//! - [`hash`]: the 64-bit block content hash
//! - [`config`]: geometry constants and runtime options
//! - [`context`]: engine-shared state (home dir, blacklist, stats, timer)
//! - [`stats`]: monotonic event counters
//! - [`sync`]: per-key lock set and token-bucket rate limiter

pub mod addr;
pub mod config;
pub mod context;
pub mod hash;
pub mod index;
pub mod stats;
pub mod sync;

pub use addr::BlockAddr;
pub use config::IndexOptions;
pub use context::EngineContext;
pub use hash::block_hash;
pub use index::{AuditReport, Cell, CellList, HashIndex, HashIndexBuilder};
pub use stats::IndexStats;
