//! playlog-core library.
//!
//! Reconciles the daily activity table of a game-service page against a
//! previously stored watermark and merges new or revised days into
//! month-partitioned buckets of a quota-limited key-value store.
//!
//! # Conventions
//!
//! - **Errors**: Run stages return [`error::PlaylogError`]; config loading
//!   uses `anyhow::Result`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod config;
pub mod error;
pub mod history;
pub mod identity;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod reconcile;
pub mod record;
pub mod source;
pub mod store;

pub use error::{ErrorCode, PlaylogError};
pub use model::{
    ActivityDate, Bucket, Buckets, DailyActivity, GameVersion, RecordMetadata, VersionMonthKey,
    Watermark,
};
pub use pipeline::{PageSnapshot, Reconciler, RunOutcome, RunReport};
