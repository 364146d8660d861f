//! # Table Cells
//!
//! A [`Cell`] is the atomic table entry: a little-endian (hash, address)
//! pair, 16 bytes, laid out identically in RAM and in the backing file.
//! `(0, 0)` denotes an empty slot. Cells are equality-comparable and
//! totally ordered by (hash, address); within a bucket, cell *position*
//! encodes recency, with position 0 the most recently promoted.

use std::fmt;

use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::addr::BlockAddr;
use crate::config::constants::CELL_BYTES;

/// One (hash, address) table entry.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct Cell {
    hash: U64,
    addr: U64,
}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.hash(), self.raw_addr()).cmp(&(other.hash(), other.raw_addr()))
    }
}

const _: () = assert!(
    std::mem::size_of::<Cell>() == CELL_BYTES,
    "cell layout must match the on-disk format"
);

impl Cell {
    pub fn new(hash: u64, addr: u64) -> Self {
        Self {
            hash: U64::new(hash),
            addr: U64::new(addr),
        }
    }

    /// The empty slot marker.
    pub fn empty() -> Self {
        Self::new(0, 0)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }

    pub fn hash(&self) -> u64 {
        self.hash.get()
    }

    pub fn raw_addr(&self) -> u64 {
        self.addr.get()
    }

    pub fn addr(&self) -> BlockAddr {
        BlockAddr::new(self.addr.get())
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cell {{ hash: {:#018x}, addr: {:?} }}",
            self.hash(),
            self.addr()
        )
    }
}
