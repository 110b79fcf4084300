use std::collections::{BTreeMap, BTreeSet};

use playlog_core::model::GameVersion;
use playlog_core::record::{decode_buckets, decode_metadata};

use crate::{SimulationResult, VisitOutcome, VisitRecord};

// ── Core result types ─────────────────────────────────────────────────────────

/// Outcome of one or more invariant checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    #[must_use]
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    #[must_use]
    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Merge another result into this one (failures accumulate).
    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

// ── Invariant violation diagnostics ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// The stored watermark moved to an earlier date.
    WatermarkRegressed {
        day: u32,
        visit: u8,
        before: String,
        after: String,
    },

    /// A run that failed or found nothing new still changed the store.
    UnexpectedWrite {
        day: u32,
        visit: u8,
        outcome: String,
    },

    /// Re-running a page right after it was applied wrote again.
    RerunNotIdempotent { day: u32, visit: u8 },

    /// A day seen on a successful page is missing or stale in the store.
    HistoryMismatch {
        date: String,
        expected: Option<(u64, u64)>,
        stored: Option<(u64, u64)>,
    },

    /// The same date appears in more than one stored entry.
    DuplicateDate { date: String },

    /// The final watermark does not match the newest stored day.
    WatermarkNotNewest {
        watermark: String,
        newest: Option<String>,
    },

    /// The final store could not be decoded at all.
    Undecodable { reason: String },
}

// ── Oracle ────────────────────────────────────────────────────────────────────

/// Checks a finished simulation against what the player actually did.
///
/// # Invariants checked
///
/// 1. **Monotonic watermark** (`check_watermark`): no visit moves it back.
/// 2. **Quiet failures** (`check_quiet_runs`): failed and no-update visits
///    leave the store untouched.
/// 3. **Idempotent reruns** (`check_reruns`): applying a page twice writes
///    once.
/// 4. **History fidelity** (`check_history`): the stored days equal the
///    latest counters of every day seen on a successful page.
pub struct RecordOracle;

impl RecordOracle {
    #[must_use]
    pub fn check_watermark(visits: &[VisitRecord]) -> OracleResult {
        OracleResult::from_violations(
            visits
                .iter()
                .filter(|v| v.watermark_after.date < v.watermark_before.date)
                .map(|v| InvariantViolation::WatermarkRegressed {
                    day: v.day,
                    visit: v.visit,
                    before: v.watermark_before.to_string(),
                    after: v.watermark_after.to_string(),
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn check_quiet_runs(visits: &[VisitRecord]) -> OracleResult {
        OracleResult::from_violations(
            visits
                .iter()
                .filter(|v| v.outcome != VisitOutcome::Updated && v.store_changed)
                .map(|v| InvariantViolation::UnexpectedWrite {
                    day: v.day,
                    visit: v.visit,
                    outcome: format!("{:?}", v.outcome),
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn check_reruns(visits: &[VisitRecord]) -> OracleResult {
        OracleResult::from_violations(
            visits
                .iter()
                .filter(|v| v.rerun_no_update == Some(false))
                .map(|v| InvariantViolation::RerunNotIdempotent {
                    day: v.day,
                    visit: v.visit,
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn check_history(result: &SimulationResult, version: GameVersion) -> OracleResult {
        let (meta, buckets) = match (
            decode_metadata(&result.final_store),
            decode_buckets(&result.final_store),
        ) {
            (Ok(meta), Ok(buckets)) => (meta, buckets),
            (Err(err), _) | (_, Err(err)) => {
                return OracleResult::from_violations(vec![InvariantViolation::Undecodable {
                    reason: err.to_string(),
                }]);
            }
        };

        let mut violations = Vec::new();
        let mut stored: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for entry in buckets
            .iter()
            .filter(|(key, _)| key.version == version)
            .flat_map(|(_, bucket)| bucket.entries())
        {
            let date = entry.date.to_string();
            if stored
                .insert(date.clone(), (entry.keyboard, entry.scratch))
                .is_some()
            {
                violations.push(InvariantViolation::DuplicateDate { date });
            }
        }

        let dates: BTreeSet<&String> = result.observed.keys().chain(stored.keys()).collect();
        for date in dates {
            let expected = result.observed.get(date).copied();
            let actual = stored.get(date).copied();
            if expected != actual {
                violations.push(InvariantViolation::HistoryMismatch {
                    date: date.to_string(),
                    expected,
                    stored: actual,
                });
            }
        }

        let newest = stored.keys().next_back().cloned();
        let watermark = meta.last_daily_activity;
        let matches_newest = match &newest {
            Some(date) => {
                watermark.date.as_str() == date
                    && stored.get(date) == Some(&(watermark.keyboard, watermark.scratch))
            }
            None => watermark.date.as_str() == playlog_core::ActivityDate::FLOOR,
        };
        if !matches_newest {
            violations.push(InvariantViolation::WatermarkNotNewest {
                watermark: watermark.to_string(),
                newest,
            });
        }

        OracleResult::from_violations(violations)
    }

    /// Run every check.
    #[must_use]
    pub fn check_all(result: &SimulationResult, version: GameVersion) -> OracleResult {
        OracleResult::pass()
            .merge(Self::check_watermark(&result.visits))
            .merge(Self::check_quiet_runs(&result.visits))
            .merge(Self::check_reruns(&result.visits))
            .merge(Self::check_history(result, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProfileMode;
    use playlog_core::model::{ActivityDate, DailyActivity};
    use playlog_core::store::KvMap;
    use serde_json::{Value, json};

    fn wm(date: &str, k: u64) -> DailyActivity {
        DailyActivity::new(ActivityDate::parse(date).expect("valid date"), k, 0)
    }

    fn visit(outcome: VisitOutcome, before: &str, after: &str, changed: bool) -> VisitRecord {
        VisitRecord {
            day: 0,
            visit: 0,
            profile: ProfileMode::Healthy,
            outcome,
            watermark_before: wm(before, 1),
            watermark_after: wm(after, 1),
            store_changed: changed,
            rerun_no_update: (outcome == VisitOutcome::Updated).then_some(true),
        }
    }

    fn result(store: Value, observed: &[(&str, (u64, u64))]) -> SimulationResult {
        let Value::Object(final_store) = store else {
            panic!("expected object");
        };
        SimulationResult {
            visits: Vec::new(),
            observed: observed
                .iter()
                .map(|(d, c)| ((*d).to_string(), *c))
                .collect(),
            final_store,
        }
    }

    #[test]
    fn regressed_watermark_is_reported() {
        let visits = [
            visit(VisitOutcome::Updated, "00000000", "20240102", true),
            visit(VisitOutcome::Updated, "20240102", "20240101", true),
        ];
        let result = RecordOracle::check_watermark(&visits);
        assert!(!result.passed);
        assert_eq!(result.violations.len(), 1);
    }

    #[test]
    fn failed_visit_that_wrote_is_reported() {
        let visits = [
            visit(
                VisitOutcome::Failed(playlog_core::ErrorCode::IdentityNotFound),
                "20240101",
                "20240101",
                true,
            ),
            visit(VisitOutcome::NoUpdate, "20240101", "20240101", false),
        ];
        let result = RecordOracle::check_quiet_runs(&visits);
        assert!(matches!(
            result.violations.as_slice(),
            [InvariantViolation::UnexpectedWrite { .. }]
        ));
    }

    #[test]
    fn non_idempotent_rerun_is_reported() {
        let mut record = visit(VisitOutcome::Updated, "20240101", "20240102", true);
        assert!(RecordOracle::check_reruns(&[record.clone()]).passed);
        record.rerun_no_update = Some(false);
        assert!(!RecordOracle::check_reruns(&[record]).passed);
    }

    #[test]
    fn matching_history_passes() {
        let result = result(
            json!({
                "iidxId": "1234-5678",
                "lastDailyActivity": { "d": "20240201", "k": 4, "s": 1 },
                "updatedAt": 1,
                "29_202401": [{ "d": "20240131", "k": 2, "s": 0 }],
                "29_202402": [{ "d": "20240201", "k": 4, "s": 1 }],
            }),
            &[("20240131", (2, 0)), ("20240201", (4, 1))],
        );
        let check = RecordOracle::check_history(&result, GameVersion(29));
        assert!(check.passed, "violations: {:?}", check.violations);
    }

    #[test]
    fn stale_day_is_reported() {
        let result = result(
            json!({
                "lastDailyActivity": { "d": "20240201", "k": 4, "s": 1 },
                "29_202402": [{ "d": "20240201", "k": 4, "s": 1 }],
            }),
            &[("20240201", (6, 1))],
        );
        let check = RecordOracle::check_history(&result, GameVersion(29));
        assert!(check.violations.iter().any(|v| matches!(
            v,
            InvariantViolation::HistoryMismatch { stored: Some((4, 1)), .. }
        )));
    }

    #[test]
    fn empty_store_with_nothing_observed_passes() {
        let result = result(Value::Object(KvMap::new()), &[]);
        assert!(RecordOracle::check_history(&result, GameVersion(29)).passed);
    }

    #[test]
    fn duplicate_date_is_reported() {
        let result = result(
            json!({
                "lastDailyActivity": { "d": "20240201", "k": 4, "s": 1 },
                "29_202402": [
                    { "d": "20240201", "k": 4, "s": 1 },
                    { "d": "20240201", "k": 4, "s": 1 }
                ],
            }),
            &[("20240201", (4, 1))],
        );
        let check = RecordOracle::check_history(&result, GameVersion(29));
        assert!(check.violations.iter().any(|v| matches!(v, InvariantViolation::DuplicateDate { .. })));
    }
}
