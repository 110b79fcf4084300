//! Game version and player identity resolution.
//!
//! The version comes from the activity page path
//! (`/game/<product>/<version>/...`). The player id is read from a fixed cell
//! of the profile page for that version, which has to be loaded separately.
//! That load is the first of the two suspend points of a run and is bounded
//! by `identity.load_timeout_ms`.

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::IdentityConfig;
use crate::error::PlaylogError;
use crate::model::GameVersion;

/// Text cells of the loaded profile page's profile table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileDocument {
    pub rows: Vec<Vec<Option<String>>>,
}

impl ProfileDocument {
    #[must_use]
    pub const fn new(rows: Vec<Vec<Option<String>>>) -> Self {
        Self { rows }
    }

    /// Text of the cell at 1-based `row` / `column`, if present.
    #[must_use]
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row.checked_sub(1)?)?
            .get(column.checked_sub(1)?)?
            .as_deref()
    }
}

/// Out-of-band loader for the profile page.
#[async_trait]
pub trait ProfileLoader: Send + Sync {
    /// Load and render the document at `url`.
    ///
    /// # Errors
    ///
    /// Implementations return [`PlaylogError::IdentityNotFound`] when the page
    /// cannot be loaded.
    async fn load(&self, url: &str) -> Result<ProfileDocument, PlaylogError>;
}

/// Resolves the game version and player id for one page load.
pub struct IdentityResolver<'a, L: ?Sized> {
    loader: &'a L,
    config: &'a IdentityConfig,
    version_pattern: Regex,
}

impl<'a, L: ProfileLoader + ?Sized> IdentityResolver<'a, L> {
    #[must_use]
    pub fn new(loader: &'a L, config: &'a IdentityConfig) -> Self {
        Self {
            loader,
            config,
            version_pattern: version_pattern(&config.product),
        }
    }

    /// Parse the game version from the activity page path.
    ///
    /// # Errors
    ///
    /// Returns [`PlaylogError::VersionNotFound`] if the path has no
    /// `/game/<product>/<version>/` prefix or the version is not numeric.
    pub fn resolve_version(&self, path: &str) -> Result<GameVersion, PlaylogError> {
        self.version_pattern
            .captures(path)
            .and_then(|caps| caps.get(1))
            .and_then(|segment| GameVersion::from_segment(segment.as_str()))
            .ok_or_else(|| PlaylogError::VersionNotFound {
                path: path.to_string(),
            })
    }

    /// URL of the profile page for `version`.
    #[must_use]
    pub fn profile_url(&self, version: GameVersion) -> String {
        format!(
            "{}/game/{}/{}/{}",
            self.config.origin.trim_end_matches('/'),
            self.config.product,
            version,
            self.config.profile_path.trim_start_matches('/')
        )
    }

    /// Load the profile page and read the player id from it.
    ///
    /// # Errors
    ///
    /// Returns [`PlaylogError::IdentityTimeout`] if the page does not load in
    /// time, and [`PlaylogError::IdentityNotFound`] if it loads without an id.
    pub async fn resolve_identity(&self, version: GameVersion) -> Result<String, PlaylogError> {
        let url = self.profile_url(version);
        let waited = self.config.load_timeout();

        let document = tokio::time::timeout(waited, self.loader.load(&url))
            .await
            .map_err(|_| {
                warn!(%url, ?waited, "profile page load timed out");
                PlaylogError::IdentityTimeout {
                    url: url.clone(),
                    waited,
                }
            })??;
        debug!(%url, "loaded profile page");

        document
            .cell(self.config.id_row, self.config.id_column)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or(PlaylogError::IdentityNotFound { url })
    }
}

/// Reject a resolved id that differs from the stored one.
///
/// A record with no stored id accepts any player.
///
/// # Errors
///
/// Returns [`PlaylogError::IdentityMismatch`] on conflict.
pub fn ensure_same_player(stored: Option<&str>, resolved: &str) -> Result<(), PlaylogError> {
    match stored {
        Some(stored) if !stored.is_empty() && stored != resolved => {
            Err(PlaylogError::IdentityMismatch {
                stored: stored.to_string(),
                resolved: resolved.to_string(),
            })
        }
        _ => Ok(()),
    }
}

fn version_pattern(product: &str) -> Regex {
    let pattern = format!("^/game/{}/(.+?)/", regex::escape(product));
    // An escaped literal between fixed anchors always compiles.
    Regex::new(&pattern).unwrap_or_else(|_| unreachable!("invalid version pattern {pattern}"))
}
