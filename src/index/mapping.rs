//! # Table Address Space
//!
//! `TableMapping` owns the backing file and the in-memory image of the
//! table. The image is an *anonymous* mapping, not a file mapping: the
//! kernel never writes it back on its own, and nothing outside this
//! process can mutate it underneath us. All traffic between the image and
//! the file is explicit: extent-sized `pread`s on fault-in, extent-sized
//! `pwrite`s on writeback. That is what makes the lazy read-in / lazy
//! write-back discipline possible.
//!
//! Four views alias the image: raw bytes, cells, buckets and extents. All
//! are derived from a single base pointer by index arithmetic, so slice
//! addresses line up exactly across views.
//!
//! ## Safety Model
//!
//! The mapping itself is plain memory; the hazard is data races between
//! probe threads, the writeback thread and the audit thread. The raw view
//! accessors are therefore `unsafe fn`s whose contracts name the lock the
//! caller must hold. The index core upholds them as follows:
//!
//! - bucket cell slices are only touched under the table-wide mutation
//!   mutex;
//! - an extent's bytes are only written wholesale during fault-in, before
//!   any mutation of its buckets is possible (the missing-set check
//!   happens-before the bucket edit) and while the per-extent lock is
//!   held;
//! - writeback snapshots extent bytes into a private buffer; it tolerates
//!   torn reads of concurrently edited buckets because any such edit also
//!   re-dirties the extent, forcing a clean rewrite on the next pass.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;
use tracing::{debug, info, warn};

use crate::config::constants::{BUCKETS_PER_EXTENT, BUCKET_BYTES, CELLS_PER_BUCKET, EXTENT_BYTES};
use crate::index::cell::Cell;

pub struct TableMapping {
    path: PathBuf,
    file: File,
    // Owns the anonymous region; accessed through `base` only.
    _mmap: MmapMut,
    base: *mut u8,
    size: usize,
    n_buckets: u64,
    n_extents: u64,
}

// SAFETY: the raw base pointer targets an anonymous mapping owned by
// `_mmap`, which lives exactly as long as `self`. Concurrent access is
// governed by the lock contracts on the unsafe accessors below; the
// pointer itself is freely sendable.
unsafe impl Send for TableMapping {}
unsafe impl Sync for TableMapping {}

impl TableMapping {
    /// Opens the backing file, creating it at `size_bytes` if absent, and
    /// maps an image of matching size.
    ///
    /// An existing file dictates its own size; `size_bytes` is only used
    /// at creation. Fails if the resulting size is zero or not a multiple
    /// of the extent size.
    pub fn open(path: &Path, size_bytes: u64) -> Result<Self> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Self::create(path, size_bytes)?
            }
            Err(err) => {
                return Err(err)
                    .wrap_err_with(|| format!("failed to open table file '{}'", path.display()))
            }
        };

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat table file '{}'", path.display()))?;
        let size = metadata.len();

        ensure!(
            size > 0,
            "table file '{}' is empty; delete it or configure a size",
            path.display()
        );
        ensure!(
            size % EXTENT_BYTES as u64 == 0,
            "table file '{}' size {} is not a multiple of extent size {}",
            path.display(),
            size,
            EXTENT_BYTES
        );

        let size = size as usize;
        let mut mmap = MmapMut::map_anon(size)
            .wrap_err_with(|| format!("failed to map {} bytes for the table image", size))?;
        let base = mmap.as_mut_ptr();

        let mapping = Self {
            path: path.to_path_buf(),
            file,
            _mmap: mmap,
            base,
            size,
            n_buckets: (size / BUCKET_BYTES) as u64,
            n_extents: (size / EXTENT_BYTES) as u64,
        };

        mapping.advise_huge_pages();

        info!(
            path = %path.display(),
            size,
            buckets = mapping.n_buckets,
            extents = mapping.n_extents,
            "opened hash table"
        );

        Ok(mapping)
    }

    /// Creates the file under a temporary name and renames it into place,
    /// so a crash mid-truncate never leaves a half-sized table behind.
    fn create(path: &Path, size_bytes: u64) -> Result<File> {
        ensure!(
            size_bytes > 0 && size_bytes % EXTENT_BYTES as u64 == 0,
            "configured table size {} must be a positive multiple of extent size {}",
            size_bytes,
            EXTENT_BYTES
        );

        let mut tmp_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        ensure!(
            !tmp_name.is_empty(),
            "table path '{}' has no file name",
            path.display()
        );
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        // A leftover tmp file from an earlier crash is garbage.
        let _ = std::fs::remove_file(&tmp_path);

        info!(path = %path.display(), size = size_bytes, "creating new hash table");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .wrap_err_with(|| format!("failed to create table file '{}'", tmp_path.display()))?;
        file.set_len(size_bytes)
            .wrap_err_with(|| format!("failed to size table file to {} bytes", size_bytes))?;
        std::fs::rename(&tmp_path, path).wrap_err_with(|| {
            format!(
                "failed to rename '{}' into '{}'",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(file)
    }

    fn advise_huge_pages(&self) {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: base/size describe the live anonymous mapping, and
            // madvise is advisory; a refusal leaves the mapping untouched.
            let rc = unsafe {
                libc::madvise(
                    self.base as *mut libc::c_void,
                    self.size,
                    libc::MADV_HUGEPAGE | libc::MADV_DONTFORK,
                )
            };
            if rc != 0 {
                debug!(
                    errno = std::io::Error::last_os_error().raw_os_error(),
                    "madvise(MADV_HUGEPAGE | MADV_DONTFORK) refused; continuing with normal pages"
                );
            }
        }
    }

    /// Pins the whole image in RAM. Best-effort: failure (usually
    /// RLIMIT_MEMLOCK) is logged and ignored.
    pub fn lock_in_ram(&self) {
        #[cfg(unix)]
        {
            // SAFETY: base/size describe the live anonymous mapping.
            let rc = unsafe { libc::mlock(self.base as *const libc::c_void, self.size) };
            if rc != 0 {
                warn!(
                    errno = std::io::Error::last_os_error().raw_os_error(),
                    size = self.size,
                    "mlock of table image failed; table may be paged out under memory pressure"
                );
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn n_buckets(&self) -> u64 {
        self.n_buckets
    }

    pub fn n_extents(&self) -> u64 {
        self.n_extents
    }

    /// The bucket a hash probes. This is the only content-to-slot mapping.
    pub fn bucket_of(&self, hash: u64) -> u64 {
        hash % self.n_buckets
    }

    /// The extent containing a bucket.
    pub fn extent_of_bucket(&self, bucket: u64) -> u64 {
        bucket / BUCKETS_PER_EXTENT as u64
    }

    /// File byte offset of an extent.
    pub fn extent_offset(&self, extent: u64) -> u64 {
        assert!(extent < self.n_extents, "extent {} out of range", extent);
        extent * EXTENT_BYTES as u64
    }

    /// Buckets `[start, end)` covered by an extent.
    pub fn extent_buckets(&self, extent: u64) -> std::ops::Range<u64> {
        assert!(extent < self.n_extents, "extent {} out of range", extent);
        let start = extent * BUCKETS_PER_EXTENT as u64;
        start..start + BUCKETS_PER_EXTENT as u64
    }

    /// Immutable view of one extent's bytes.
    ///
    /// # Safety
    ///
    /// The caller must hold either the per-extent fault-in lock or a lock
    /// excluding concurrent whole-extent writes, or must tolerate torn
    /// reads of cells being edited under the mutation mutex (the writeback
    /// snapshot path does).
    pub unsafe fn extent_bytes(&self, extent: u64) -> &[u8] {
        assert!(extent < self.n_extents, "extent {} out of range", extent);
        let offset = extent as usize * EXTENT_BYTES;
        std::slice::from_raw_parts(self.base.add(offset), EXTENT_BYTES)
    }

    /// Mutable view of one extent's bytes, for fault-in.
    ///
    /// # Safety
    ///
    /// The caller must hold the per-extent fault-in lock for `extent`, and
    /// the extent must still be in the missing set (no bucket of a missing
    /// extent can be under mutation).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn extent_bytes_mut(&self, extent: u64) -> &mut [u8] {
        assert!(extent < self.n_extents, "extent {} out of range", extent);
        let offset = extent as usize * EXTENT_BYTES;
        std::slice::from_raw_parts_mut(self.base.add(offset), EXTENT_BYTES)
    }

    /// Mutable cell view of one bucket.
    ///
    /// # Safety
    ///
    /// The caller must hold the table-wide mutation mutex, and the
    /// bucket's extent must be resident (fault-in completed).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bucket_cells(&self, bucket: u64) -> &mut [Cell] {
        assert!(bucket < self.n_buckets, "bucket {} out of range", bucket);
        let offset = bucket as usize * BUCKET_BYTES;
        // The base is page-aligned and BUCKET_BYTES is a multiple of the
        // cell size and alignment, so the cast is layout-correct.
        let ptr = self.base.add(offset) as *mut Cell;
        std::slice::from_raw_parts_mut(ptr, CELLS_PER_BUCKET)
    }
}
