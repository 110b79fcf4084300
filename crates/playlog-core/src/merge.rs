//! Per-day last-write-wins merge of month buckets.
//!
//! # Merge Semantics
//!
//! A bucket merge folds `incoming` over `existing` keyed by date:
//!
//! - dates only in `existing` are kept as they are;
//! - dates in `incoming` replace the stored entry in place, or are appended
//!   in `incoming` order when new.
//!
//! The result keeps the first-seen position of every date. This is an
//! overwrite, not a numeric max: an incoming entry with smaller counters
//! still wins. The selection predicate in [`crate::reconcile`] only ever
//! produces entries at or above what was processed before, which is what
//! makes the composition safe.

use std::collections::HashMap;

use crate::model::{ActivityDate, Bucket, Buckets, DailyActivity};

/// Join `other` into `self`, with `other` winning on conflicts.
pub trait Merge {
    fn merge(&mut self, other: Self);
}

impl Merge for Bucket {
    fn merge(&mut self, other: Self) {
        let mut index: HashMap<ActivityDate, usize> = self
            .0
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.date.clone(), i))
            .collect();

        for entry in other {
            if let Some(&slot) = index.get(&entry.date) {
                self.0[slot] = entry;
            } else {
                index.insert(entry.date.clone(), self.0.len());
                self.0.push(entry);
            }
        }
    }
}

/// Merge two buckets, returning a new one. See the module docs.
///
/// Duplicate dates inside `existing` collapse onto their first position
/// holding the last value, matching a map seeded in order.
#[must_use]
pub fn merge_bucket(existing: &[DailyActivity], incoming: &[DailyActivity]) -> Bucket {
    let mut merged = Bucket::default();
    merged.merge(Bucket(existing.to_vec()));
    merged.merge(Bucket(incoming.to_vec()));
    merged
}

/// Merge every bucket in `updates` against its stored counterpart.
///
/// Only keys present in `updates` appear in the result; a missing stored
/// bucket counts as empty. Keys only in `stored` are left out entirely, so
/// the caller persists a partial overwrite of touched keys.
#[must_use]
pub fn merge_all(stored: &Buckets, updates: &Buckets) -> Buckets {
    updates
        .iter()
        .map(|(key, incoming)| {
            let existing = stored.get(key).map_or(&[][..], Bucket::entries);
            (*key, merge_bucket(existing, incoming.entries()))
        })
        .collect()
}
