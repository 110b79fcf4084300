//! playlog-sim library.
//!
//! Drives a simulated player through many days of page loads, running the
//! real reconciliation pipeline against an in-memory store on each load,
//! and records everything the oracle needs to check the run afterwards.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod campaign;
pub mod oracle;
pub mod player;
pub mod rng;

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use playlog_core::config::PlaylogConfig;
use playlog_core::identity::{ProfileDocument, ProfileLoader};
use playlog_core::model::{DailyActivity, GameVersion, Watermark};
use playlog_core::record::decode_metadata;
use playlog_core::source::extract_activities;
use playlog_core::store::{KvMap, MemoryStore};
use playlog_core::{ErrorCode, PageSnapshot, PlaylogError, Reconciler, RunOutcome};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::player::SimulatedPlayer;
use crate::rng::DeterministicRng;

/// Player id every simulated profile page reports.
pub const SIM_PLAYER_ID: &str = "1234-5678";

/// Parameters of one simulated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Number of simulated days.
    pub days: u32,
    /// Upper bound of page loads per day (each day gets 0..=this many).
    pub max_visits_per_day: u8,
    /// Upper bound of plays per session.
    pub max_plays_per_session: u64,
    /// Days of history the activity page shows.
    pub page_window: u64,
    /// Chance a profile page loads without the id cell (percent).
    pub profile_missing_percent: u8,
    /// Chance a profile page never finishes loading (percent).
    pub profile_hang_percent: u8,
    pub version: GameVersion,
    pub start: NaiveDate,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            days: 45,
            max_visits_per_day: 3,
            max_plays_per_session: 40,
            page_window: 7,
            profile_missing_percent: 10,
            profile_hang_percent: 5,
            version: GameVersion(29),
            start: NaiveDate::from_ymd_opt(2024, 1, 20).unwrap_or(NaiveDate::MIN),
        }
    }
}

/// How the profile page behaves on one visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileMode {
    Healthy,
    MissingId,
    Hang,
}

struct SimProfile(ProfileMode);

#[async_trait]
impl ProfileLoader for SimProfile {
    async fn load(&self, _url: &str) -> Result<ProfileDocument, PlaylogError> {
        let cell = |s: &str| Some(s.to_string());
        match self.0 {
            ProfileMode::Healthy => Ok(ProfileDocument::new(vec![
                vec![cell("DJ NAME"), cell("SIM")],
                vec![cell("所属"), cell("-")],
                vec![cell("IIDX ID"), cell(SIM_PLAYER_ID)],
            ])),
            ProfileMode::MissingId => Ok(ProfileDocument::new(vec![vec![
                cell("DJ NAME"),
                cell("SIM"),
            ]])),
            ProfileMode::Hang => std::future::pending().await,
        }
    }
}

/// Result of one page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitOutcome {
    Updated,
    NoUpdate,
    Failed(ErrorCode),
}

/// Everything observed around one page load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitRecord {
    pub day: u32,
    pub visit: u8,
    pub profile: ProfileMode,
    pub outcome: VisitOutcome,
    pub watermark_before: Watermark,
    pub watermark_after: Watermark,
    pub store_changed: bool,
    /// For updates: whether an immediate healthy re-run was a no-op.
    pub rerun_no_update: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub visits: Vec<VisitRecord>,
    /// Latest counters per date seen on any page whose run succeeded.
    pub observed: BTreeMap<String, (u64, u64)>,
    pub final_store: KvMap,
}

impl SimulationResult {
    #[must_use]
    pub fn count(&self, outcome: VisitOutcome) -> usize {
        self.visits.iter().filter(|v| v.outcome == outcome).count()
    }

    /// Whether the run saw a failure of every injected kind.
    #[must_use]
    pub fn interesting_state_reached(&self) -> bool {
        let failed = |mode| {
            self.visits
                .iter()
                .any(|v| v.profile == mode && matches!(v.outcome, VisitOutcome::Failed(_)))
        };
        failed(ProfileMode::MissingId) && failed(ProfileMode::Hang)
    }
}

pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    player: SimulatedPlayer,
    pipeline_config: PlaylogConfig,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error if the configuration is unusable.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.page_window == 0 {
            bail!("page_window must be > 0");
        }
        if u16::from(config.profile_missing_percent) + u16::from(config.profile_hang_percent) > 100 {
            bail!("profile failure percentages must sum to at most 100");
        }

        let mut pipeline_config = PlaylogConfig::default();
        pipeline_config.identity.load_timeout_ms = 2;

        Ok(Self {
            rng: DeterministicRng::new(config.seed),
            player: SimulatedPlayer::new(config.start),
            config,
            pipeline_config,
        })
    }

    /// Run every simulated day to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the async runtime cannot be started.
    pub fn run(&mut self) -> Result<SimulationResult> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .context("build simulation runtime")?;
        runtime.block_on(self.run_days())
    }

    async fn run_days(&mut self) -> Result<SimulationResult> {
        let store = MemoryStore::new(self.pipeline_config.store);
        let mut visits = Vec::new();
        let mut observed = BTreeMap::new();

        for day in 0..self.config.days {
            let visits_today = self.rng.between(0, u64::from(self.config.max_visits_per_day));
            for visit in 0..visits_today {
                self.player.play(&mut self.rng, self.config.max_plays_per_session);
                let page = self.player.page(self.config.version, self.config.page_window);
                let profile = self.pick_profile();
                let record = self
                    .visit(&store, &page, profile, day, u8::try_from(visit).unwrap_or(u8::MAX))
                    .await?;

                if !matches!(record.outcome, VisitOutcome::Failed(_)) {
                    observe(&mut observed, &page, &self.pipeline_config)?;
                }
                visits.push(record);
            }
            self.player.next_day();
        }

        let result = SimulationResult {
            visits,
            observed,
            final_store: store.snapshot(),
        };
        info!(
            seed = self.config.seed,
            visits = result.visits.len(),
            updated = result.count(VisitOutcome::Updated),
            no_update = result.count(VisitOutcome::NoUpdate),
            "simulation finished"
        );
        Ok(result)
    }

    fn pick_profile(&mut self) -> ProfileMode {
        let roll = self.rng.between(0, 99);
        let missing = u64::from(self.config.profile_missing_percent);
        let hang = u64::from(self.config.profile_hang_percent);
        if roll < missing {
            ProfileMode::MissingId
        } else if roll < missing + hang {
            ProfileMode::Hang
        } else {
            ProfileMode::Healthy
        }
    }

    async fn visit(
        &self,
        store: &MemoryStore,
        page: &PageSnapshot,
        profile: ProfileMode,
        day: u32,
        visit: u8,
    ) -> Result<VisitRecord> {
        let before = store.snapshot();
        let watermark_before = watermark_of(&before)?;
        let now = self
            .player
            .today()
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp()
            + i64::from(visit);

        let loader = SimProfile(profile);
        let reconciler = Reconciler::new(store, &loader, &self.pipeline_config).with_clock(move || now);
        let outcome = match reconciler.run(page).await {
            Ok(RunOutcome::Updated(_)) => VisitOutcome::Updated,
            Ok(RunOutcome::NoUpdate) => VisitOutcome::NoUpdate,
            Err(err) => VisitOutcome::Failed(err.code()),
        };

        let after = store.snapshot();
        let rerun_no_update = if outcome == VisitOutcome::Updated {
            let healthy = SimProfile(ProfileMode::Healthy);
            let rerun = Reconciler::new(store, &healthy, &self.pipeline_config)
                .with_clock(move || now)
                .run(page)
                .await;
            Some(matches!(rerun, Ok(RunOutcome::NoUpdate)))
        } else {
            None
        };

        debug!(day, visit, ?profile, ?outcome, "simulated visit");
        Ok(VisitRecord {
            day,
            visit,
            profile,
            outcome,
            watermark_before,
            watermark_after: watermark_of(&after)?,
            store_changed: before != after,
            rerun_no_update,
        })
    }
}

fn watermark_of(store: &KvMap) -> Result<Watermark> {
    Ok(decode_metadata(store)
        .context("decode stored metadata")?
        .last_daily_activity)
}

fn observe(
    observed: &mut BTreeMap<String, (u64, u64)>,
    page: &PageSnapshot,
    config: &PlaylogConfig,
) -> Result<()> {
    let Some(table) = &page.activity_table else {
        return Ok(());
    };
    let rows: Vec<DailyActivity> = extract_activities(table, &config.source)?;
    for row in rows {
        observed.insert(row.date.to_string(), (row.keyboard, row.scratch));
    }
    Ok(())
}
