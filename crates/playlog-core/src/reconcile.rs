//! Watermark-based diffing of freshly extracted activity rows.
//!
//! Instead of rewriting every visible row on each page load, a run compares
//! the rows against the stored watermark (the newest entry already
//! processed) and keeps only:
//!
//! 1. rows dated strictly after the watermark, and
//! 2. rows on the watermark's own day whose keyboard or scratch counter grew.
//!
//! Selected rows are grouped into [`VersionMonthKey`] buckets in scan order,
//! and the first selected row carrying the greatest date becomes the new
//! watermark. Buckets and watermark must be persisted together.

use tracing::debug;

use crate::merge::merge_all;
use crate::model::{Buckets, DailyActivity, GameVersion, VersionMonthKey, Watermark};

/// Rows selected by [`diff`], bucketed by partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    pub buckets: Buckets,
    pub watermark: Watermark,
    /// Number of selected rows across all buckets.
    pub selected: usize,
}

impl Diff {
    /// Partition keys touched by this diff.
    pub fn keys(&self) -> impl Iterator<Item = &VersionMonthKey> {
        self.buckets.keys()
    }
}

/// Whether `row` is new or revised relative to `watermark`.
#[must_use]
pub fn is_update(row: &DailyActivity, watermark: &Watermark) -> bool {
    row.date > watermark.date
        || (row.date == watermark.date
            && (row.keyboard > watermark.keyboard || row.scratch > watermark.scratch))
}

/// Select new or revised rows and bucket them by version and month.
///
/// Returns `None` when nothing changed. That is the normal "no update"
/// outcome, not a failure.
#[must_use]
pub fn diff(rows: &[DailyActivity], version: GameVersion, watermark: &Watermark) -> Option<Diff> {
    let mut buckets = Buckets::new();
    let mut newest: Option<&DailyActivity> = None;
    let mut selected = 0_usize;

    for row in rows.iter().filter(|row| is_update(row, watermark)) {
        selected += 1;
        buckets
            .entry(VersionMonthKey::new(version, &row.date))
            .or_default()
            .push(row.clone());

        if newest.is_none_or(|current| row.date > current.date) {
            newest = Some(row);
        }
    }

    let watermark = newest?.clone();
    debug!(
        selected,
        buckets = buckets.len(),
        watermark = %watermark,
        "activity diff computed"
    );

    Some(Diff {
        buckets,
        watermark,
        selected,
    })
}

/// Result of [`reconcile`]: merged buckets for every touched key plus the
/// advanced watermark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub buckets: Buckets,
    pub watermark: Watermark,
}

/// Diff `rows` against `watermark` and merge the result into `stored`.
///
/// Pure composition of [`diff`] and [`merge_all`]. Only keys touched by the
/// diff appear in the output.
#[must_use]
pub fn reconcile(
    rows: &[DailyActivity],
    version: GameVersion,
    watermark: &Watermark,
    stored: &Buckets,
) -> Option<Reconciled> {
    let diff = diff(rows, version, watermark)?;
    Some(Reconciled {
        buckets: merge_all(stored, &diff.buckets),
        watermark: diff.watermark,
    })
}
