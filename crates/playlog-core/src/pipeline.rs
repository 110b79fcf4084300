//! One reconciliation run per activity page load.
//!
//! ```text
//! page path ──► version ─┐
//! page table ─► rows ────┼─► identity (await profile) ─► metadata (await get)
//!                        │        │ mismatch? abort
//!                        └──► diff vs watermark ──► NoUpdate? done
//!                                  │
//!                      stored buckets (await get) ─► merge_all
//!                                  │
//!                 metadata + touched buckets ─► one set (await)
//! ```
//!
//! A run suspends only on the profile load and on store calls. It never
//! retries. Every failure aborts before the single final `set`, so a failed
//! run writes nothing. Two runs racing on the same player are not guarded
//! against; the later `set` wins per key.

use chrono::Utc;
use tracing::{error, info, instrument};

use crate::config::PlaylogConfig;
use crate::error::PlaylogError;
use crate::identity::{IdentityResolver, ProfileLoader, ensure_same_player};
use crate::merge::merge_all;
use crate::model::{GameVersion, RecordMetadata, Watermark};
use crate::reconcile::diff;
use crate::record::{ActivityRecord, decode_buckets, decode_metadata, metadata_keys};
use crate::source::{ActivitySource, ActivityTable, TableSource};
use crate::store::KvStore;

/// What the content script sees when the activity page finishes loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSnapshot {
    /// URL path of the page, e.g. `/game/2dx/29/djdata/activity.html`.
    pub path: String,
    /// The scraped activity table, if the page has one.
    pub activity_table: Option<ActivityTable>,
}

/// Successful end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing newer than the watermark; nothing written.
    NoUpdate,
    Updated(RunReport),
}

/// Summary of a run that wrote to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub version: GameVersion,
    pub player_id: String,
    pub watermark: Watermark,
    /// Rows that passed the watermark filter.
    pub entries_selected: usize,
    /// Month buckets rewritten.
    pub buckets_written: usize,
}

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

/// Drives runs against one store and one profile loader.
pub struct Reconciler<'a, S: ?Sized, L: ?Sized> {
    store: &'a S,
    loader: &'a L,
    config: &'a PlaylogConfig,
    clock: Clock,
}

impl<'a, S, L> Reconciler<'a, S, L>
where
    S: KvStore + ?Sized,
    L: ProfileLoader + ?Sized,
{
    #[must_use]
    pub fn new(store: &'a S, loader: &'a L, config: &'a PlaylogConfig) -> Self {
        Self {
            store,
            loader,
            config,
            clock: Box::new(|| Utc::now().timestamp()),
        }
    }

    /// Replace the source of `updatedAt` (Unix seconds).
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Run the whole pipeline for one page load.
    ///
    /// # Errors
    ///
    /// Returns the first failure of any stage. Nothing is written when an
    /// error is returned.
    #[instrument(skip_all, fields(path = %page.path))]
    pub async fn run(&self, page: &PageSnapshot) -> Result<RunOutcome, PlaylogError> {
        let identity = IdentityResolver::new(self.loader, &self.config.identity);
        let version = identity.resolve_version(&page.path)?;
        let rows = TableSource::new(page.activity_table.as_ref(), &self.config.source).extract()?;
        let player_id = identity.resolve_identity(version).await?;

        let meta = decode_metadata(&self.store.get(&metadata_keys()).await?)?;
        ensure_same_player(meta.player_id.as_deref(), &player_id)?;

        let Some(diff) = diff(&rows, version, &meta.last_daily_activity) else {
            info!(%version, rows = rows.len(), watermark = %meta.last_daily_activity, "no update found");
            return Ok(RunOutcome::NoUpdate);
        };

        let keys: Vec<String> = diff.keys().map(ToString::to_string).collect();
        let stored = decode_buckets(&self.store.get(&keys).await?)?;

        let record = ActivityRecord {
            meta: RecordMetadata {
                player_id: Some(player_id.clone()),
                last_daily_activity: diff.watermark.clone(),
                updated_at: (self.clock)(),
            },
            buckets: merge_all(&stored, &diff.buckets),
        };
        self.store.set(record.to_flat()?).await?;

        info!(
            %version,
            selected = diff.selected,
            buckets = record.buckets.len(),
            watermark = %diff.watermark,
            "activity record updated"
        );

        Ok(RunOutcome::Updated(RunReport {
            version,
            player_id,
            watermark: diff.watermark,
            entries_selected: diff.selected,
            buckets_written: record.buckets.len(),
        }))
    }

    /// Run and log the outcome; errors are reported here and nowhere else.
    pub async fn run_logged(&self, page: &PageSnapshot) -> Option<RunOutcome> {
        match self.run(page).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                error!(
                    code = %err.code(),
                    hint = err.hint().unwrap_or_default(),
                    error = %err,
                    "activity reconciliation failed"
                );
                None
            }
        }
    }
}
