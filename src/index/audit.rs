//! # Prefetch & Audit
//!
//! A dedicated thread walks the whole table on a fixed interval. The walk
//! does three jobs at once:
//!
//! - **prefetch**: faulting every extent in up front turns the first real
//!   probe of each bucket from a blocking `pread` into a memory access,
//!   and the initial pass doubles as table warm-up after a restart;
//! - **verify**: [`verify_bucket`] detects cells that earlier bugs could
//!   have left behind (impossible sub-sentinel addresses, duplicate
//!   entries within one bucket) and, when healing is enabled, zeroes
//!   them in place, re-dirtying the extent so the repair persists;
//! - **report**: per-bucket occupancy is histogrammed into 64 fill-ratio
//!   columns and written, together with address-flag breakdowns and
//!   counter rates, to a plain-text stats file that is truncated and
//!   rewritten each cycle.
//!
//! Before the first pass the thread pins the table image in RAM
//! (best-effort) so audit scans and probe latency do not fight page
//! reclaim.

use std::io::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::HashSet;
use tracing::{info, warn};

use crate::config::constants::{CELLS_PER_BUCKET, MIN_VALID_ADDR};
use crate::index::cell::Cell;
use crate::index::table::IndexShared;
use crate::stats::count;

/// Number of fill-ratio columns in the occupancy histogram.
const HISTOGRAM_WIDTH: usize = 64;

/// Outcome of one full audit sweep.
#[derive(Debug, Clone)]
pub struct AuditReport {
    /// Non-empty cells across the table.
    pub occupied_cells: u64,
    /// Total cell capacity of the table.
    pub total_cells: u64,
    /// Bucket counts by fill ratio, `HISTOGRAM_WIDTH` columns.
    pub occupancy: Vec<u64>,
    pub compressed: u64,
    pub compressed_with_offset: u64,
    pub toxic: u64,
    pub unaligned_eof: u64,
    /// Whether any bucket contained a defect this sweep.
    pub defects_found: bool,
}

impl AuditReport {
    pub fn fill_percent(&self) -> u64 {
        if self.total_cells == 0 {
            0
        } else {
            self.occupied_cells * 100 / self.total_cells
        }
    }
}

/// Scans one bucket for defects: non-empty cells with impossible
/// addresses, and byte-identical duplicates. Counts each defect; if
/// `clear_bugs` is set, overwrites the offending cell with the empty
/// marker. Returns whether any defect was found.
///
/// The caller must hold the table-wide mutation mutex.
pub(crate) fn verify_bucket(
    cells: &mut [Cell],
    clear_bugs: bool,
    shared: &IndexShared,
) -> bool {
    let mut bugs_found = false;
    let mut seen: HashSet<(u64, u64)> = HashSet::new();

    for cell in cells.iter_mut() {
        let addr = cell.raw_addr();
        if addr != 0 && addr < MIN_VALID_ADDR {
            count(&shared.stats.bad_addr_defects);
            info!(?cell, "impossible address in table");
            if clear_bugs {
                *cell = Cell::empty();
            }
            bugs_found = true;
        }
        // Re-read: a cell healed above no longer participates in the
        // duplicate scan; with healing off it still does.
        let addr = cell.raw_addr();
        if addr != 0 && !seen.insert((cell.hash(), addr)) {
            count(&shared.stats.duplicate_cell_defects);
            info!(?cell, "duplicate cell in bucket");
            if clear_bugs {
                *cell = Cell::empty();
            }
            bugs_found = true;
        }
    }

    bugs_found
}

/// One full sweep: fault in, verify, and tally every extent.
pub(crate) fn audit_pass(shared: &IndexShared) -> AuditReport {
    let mut report = AuditReport {
        occupied_cells: 0,
        total_cells: 0,
        occupancy: vec![0; HISTOGRAM_WIDTH],
        compressed: 0,
        compressed_with_offset: 0,
        toxic: 0,
        unaligned_eof: 0,
        defects_found: false,
    };

    for extent in 0..shared.mapping.n_extents() {
        if !shared.fault_in_extent(extent) {
            // Unreadable extents are skipped; their cells are not counted.
            continue;
        }

        let mut healed_here = false;
        let guard = shared.bucket_mutex.lock();
        for bucket in shared.mapping.extent_buckets(extent) {
            // SAFETY: mutation mutex held, extent resident.
            let cells = unsafe { shared.mapping.bucket_cells(bucket) };

            if verify_bucket(cells, shared.opts.heal_defects, shared) {
                report.defects_found = true;
                if shared.opts.heal_defects {
                    healed_here = true;
                }
            }

            let mut occupied_in_bucket = 0u64;
            for cell in cells.iter() {
                report.total_cells += 1;
                if cell.raw_addr() == 0 {
                    continue;
                }
                occupied_in_bucket += 1;
                let addr = cell.addr();
                if addr.is_compressed() {
                    report.compressed += 1;
                    if addr.has_compressed_offset() {
                        report.compressed_with_offset += 1;
                    }
                }
                if addr.is_toxic() {
                    report.toxic += 1;
                }
                if addr.is_unaligned_eof() {
                    report.unaligned_eof += 1;
                }
            }
            report.occupied_cells += occupied_in_bucket;

            let column =
                occupied_in_bucket as usize * HISTOGRAM_WIDTH / (CELLS_PER_BUCKET + 1);
            report.occupancy[column] += 1;
        }
        drop(guard);

        if healed_here {
            shared.tracker.mark_dirty(extent);
        }
    }

    report
}

fn percent(num: u64, den: u64) -> String {
    if den > 0 {
        format!("{}%", num * 100 / den)
    } else {
        "--%".to_string()
    }
}

/// Renders the occupancy histogram as rows of `#` marks with doubling
/// thresholds, tallest threshold first.
fn render_histogram(occupancy: &[u64]) -> String {
    let mut rows: Vec<(u64, String)> = Vec::new();
    let mut threshold = 1u64;
    loop {
        let row: String = occupancy
            .iter()
            .map(|&n| if n >= threshold { '#' } else { ' ' })
            .collect();
        if !row.contains('#') {
            break;
        }
        rows.push((threshold, row));
        threshold *= 2;
    }

    let mut out = String::new();
    for (i, (threshold, row)) in rows.iter().enumerate().rev() {
        out.push_str(row);
        out.push(' ');
        out.push_str(&threshold.to_string());
        if i == rows.len() - 1 {
            out.push_str(" buckets");
        }
        out.push('\n');
    }
    out.push_str("0%      |      25%      |      50%      |      75%      |  100% bucket fill\n");
    out
}

fn render_report(shared: &IndexShared, report: &AuditReport) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let uptime = shared.ctx.uptime_secs();

    let mut out = String::new();
    out.push_str(&format!("Now:     {}\n", now));
    out.push_str(&format!("Uptime:  {:.0} seconds\n", uptime));
    out.push_str(&format!("Version: {}\n", env!("CARGO_PKG_VERSION")));

    out.push_str(&format!(
        "\nHash table bucket occupancy histogram ({}/{} cells occupied, {}%)\n",
        report.occupied_cells,
        report.total_cells,
        report.fill_percent()
    ));
    out.push_str(&render_histogram(&report.occupancy));

    let occupied = report.occupied_cells;
    let uncompressed = occupied - report.compressed;
    let legacy = report.compressed - report.compressed_with_offset;
    out.push_str(&format!(
        "compressed {} ({}) with-offset {} ({}) legacy {} ({})\n",
        report.compressed,
        percent(report.compressed, occupied),
        report.compressed_with_offset,
        percent(report.compressed_with_offset, occupied),
        legacy,
        percent(legacy, occupied),
    ));
    out.push_str(&format!(
        "uncompressed {} ({}) unaligned_eof {} ({}) toxic {} ({})\n",
        uncompressed,
        percent(uncompressed, occupied),
        report.unaligned_eof,
        percent(report.unaligned_eof, occupied),
        report.toxic,
        percent(report.toxic, occupied),
    ));

    out.push_str("\nTOTAL:\n");
    let snapshot = shared.stats.snapshot();
    for (name, value) in &snapshot {
        out.push_str(&format!("\t{}={}", name, value));
    }
    out.push('\n');

    out.push_str("\nRATES:\n");
    for (name, value) in &snapshot {
        out.push_str(&format!("\t{}={:.3}/s", name, *value as f64 / uptime));
    }
    out.push('\n');

    out
}

fn write_stats_file(shared: &IndexShared, body: &str) {
    let path = shared.ctx.home().join(&shared.opts.stats_file_name);
    let result = std::fs::File::create(&path).and_then(|mut f| f.write_all(body.as_bytes()));
    if let Err(err) = result {
        warn!(path = %path.display(), %err, "failed to write stats report");
    }
}

/// Body of the dedicated audit thread.
pub(crate) fn audit_loop(shared: &IndexShared) {
    shared.mapping.lock_in_ram();

    loop {
        {
            let stop = shared.audit_stop.lock();
            if *stop {
                break;
            }
        }

        let report = audit_pass(shared);
        info!(
            fill = report.fill_percent(),
            occupied = report.occupied_cells,
            defects = report.defects_found,
            "audit pass complete"
        );
        write_stats_file(shared, &render_report(shared, &report));

        let mut stop = shared.audit_stop.lock();
        if *stop {
            break;
        }
        shared
            .audit_wakeup
            .wait_for(&mut stop, shared.opts.audit_interval);
    }
    tracing::debug!("audit thread exiting");
}
