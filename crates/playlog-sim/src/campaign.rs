//! Campaign runner for deterministic simulation campaigns.
//!
//! Executes many seeds with the same parameters, collecting pass/fail results
//! and the first failing seed for replay.

use std::ops::Range;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::oracle::{InvariantViolation, OracleResult, RecordOracle};
use crate::{SimulationConfig, SimulationResult, Simulator};

/// Campaign-level configuration: which seeds to run and the simulation
/// parameters shared by every seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Range of seeds to execute, e.g., `0..100`.
    pub seed_range: Range<u64>,
    pub days: u32,
    pub max_visits_per_day: u8,
    pub max_plays_per_session: u64,
    pub page_window: u64,
    /// Chance a profile page loads without the id cell (percent, 0–100).
    pub profile_missing_percent: u8,
    /// Chance a profile page never finishes loading (percent, 0–100).
    pub profile_hang_percent: u8,
    pub start: NaiveDate,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..100,
            days: sim.days,
            max_visits_per_day: sim.max_visits_per_day,
            max_plays_per_session: sim.max_plays_per_session,
            page_window: sim.page_window,
            profile_missing_percent: sim.profile_missing_percent,
            profile_hang_percent: sim.profile_hang_percent,
            start: sim.start,
        }
    }
}

impl CampaignConfig {
    /// Build a [`SimulationConfig`] for a specific seed.
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            days: self.days,
            max_visits_per_day: self.max_visits_per_day,
            max_plays_per_session: self.max_plays_per_session,
            page_window: self.page_window,
            profile_missing_percent: self.profile_missing_percent,
            profile_hang_percent: self.profile_hang_percent,
            start: self.start,
            ..SimulationConfig::default()
        }
    }

    /// Validate configuration before running.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.days == 0 {
            bail!("days must be > 0");
        }
        if self.page_window == 0 {
            bail!("page_window must be > 0");
        }
        if u16::from(self.profile_missing_percent) + u16::from(self.profile_hang_percent) > 100 {
            bail!("profile failure percentages must sum to at most 100");
        }
        Ok(())
    }
}

/// Failure details for a single seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

/// Aggregate report produced by a campaign run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First seed that failed (for prioritized replay).
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds that hit both injected profile failures at least once.
    pub interesting_states_reached: usize,
}

impl CampaignReport {
    /// True if every seed passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Everything produced by replaying one seed.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

/// Run a full campaign across all seeds in the config.
///
/// # Errors
///
/// Returns an error if config validation fails or a simulation encounters
/// an internal error.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
    };

    for seed in config.seed_range.clone() {
        report.seeds_run += 1;
        let trace = replay_seed(seed, config)?;
        if trace.result.interesting_state_reached() {
            report.interesting_states_reached += 1;
        }

        if trace.oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = trace.oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: trace.oracle.violations.iter().map(format_violation).collect(),
            });
        }
    }

    Ok(report)
}

/// Run a single seed and return Ok(()) on pass, Err(violations) on failure.
///
/// # Errors
///
/// Returns an `anyhow::Error` if the simulation itself cannot run. The inner
/// `Result` distinguishes pass from invariant violations.
pub fn run_single_seed(
    seed: u64,
    config: &CampaignConfig,
) -> Result<std::result::Result<(), Vec<InvariantViolation>>> {
    let trace = replay_seed(seed, config)?;
    if trace.oracle.passed {
        Ok(Ok(()))
    } else {
        Ok(Err(trace.oracle.violations))
    }
}

/// Replay a single seed with full trace details for debugging.
///
/// # Errors
///
/// Returns an error when config validation or simulation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;

    let sim_config = config.sim_config_for_seed(seed);
    let version = sim_config.version;
    let result = Simulator::new(sim_config)?.run()?;
    let oracle = RecordOracle::check_all(&result, version);

    Ok(DetailedTrace { result, oracle })
}

/// Format an invariant violation into a human-readable string.
fn format_violation(v: &InvariantViolation) -> String {
    match v {
        InvariantViolation::WatermarkRegressed {
            day,
            visit,
            before,
            after,
        } => format!("WatermarkRegressed: day {day} visit {visit} moved {before} back to {after}"),
        InvariantViolation::UnexpectedWrite {
            day,
            visit,
            outcome,
        } => format!("UnexpectedWrite: day {day} visit {visit} wrote despite {outcome}"),
        InvariantViolation::RerunNotIdempotent { day, visit } => {
            format!("RerunNotIdempotent: day {day} visit {visit} wrote again on rerun")
        }
        InvariantViolation::HistoryMismatch {
            date,
            expected,
            stored,
        } => format!("HistoryMismatch: {date} expected {expected:?}, stored {stored:?}"),
        InvariantViolation::DuplicateDate { date } => {
            format!("DuplicateDate: {date} stored more than once")
        }
        InvariantViolation::WatermarkNotNewest { watermark, newest } => {
            format!("WatermarkNotNewest: watermark {watermark}, newest stored day {newest:?}")
        }
        InvariantViolation::Undecodable { reason } => format!("Undecodable: {reason}"),
    }
}
