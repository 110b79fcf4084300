use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ErrorCode;

/// Environment variable overriding `identity.load_timeout_ms`.
pub const PROFILE_TIMEOUT_ENV: &str = "PLAYLOG_PROFILE_TIMEOUT_MS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylogConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// How activity table cells are normalised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Characters stripped from date cells (`2024/01/02` -> `20240102`).
    #[serde(default = "default_date_separators")]
    pub date_separators: Vec<char>,
    /// Unit marker stripped from count cells (`12回` -> `12`).
    #[serde(default = "default_count_suffix")]
    pub count_suffix: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            date_separators: default_date_separators(),
            count_suffix: default_count_suffix(),
        }
    }
}

/// Where the version lives in the page path and where the profile page is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Product segment in `/game/<product>/<version>/...`.
    #[serde(default = "default_product")]
    pub product: String,
    /// Profile page path below `/game/<product>/<version>/`.
    #[serde(default = "default_profile_path")]
    pub profile_path: String,
    /// 1-based row of the profile table holding the player id.
    #[serde(default = "default_id_row")]
    pub id_row: usize,
    /// 1-based column of the profile table holding the player id.
    #[serde(default = "default_id_column")]
    pub id_column: usize,
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            product: default_product(),
            profile_path: default_profile_path(),
            id_row: default_id_row(),
            id_column: default_id_column(),
            load_timeout_ms: default_load_timeout_ms(),
        }
    }
}

impl IdentityConfig {
    #[must_use]
    pub const fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

/// Quotas of the cloud-synced key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: usize,
    #[serde(default = "default_quota_bytes_per_item")]
    pub quota_bytes_per_item: usize,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            quota_bytes: default_quota_bytes(),
            quota_bytes_per_item: default_quota_bytes_per_item(),
            max_items: default_max_items(),
        }
    }
}

impl StoreConfig {
    /// No limits at all; handy for local stores and tests.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            quota_bytes: usize::MAX,
            quota_bytes_per_item: usize::MAX,
            max_items: usize::MAX,
        }
    }
}

/// Default config location: `<config_dir>/playlog/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("playlog/config.toml"))
}

/// Load config from `path`, falling back to defaults when the file is absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<PlaylogConfig> {
    if !path.exists() {
        return Ok(PlaylogConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<PlaylogConfig>(&content).with_context(|| {
        let code = ErrorCode::ConfigParseError;
        format!("{code}: failed to parse {}", path.display())
    })
}

/// Load the config from the default location and apply env overrides.
///
/// # Errors
///
/// Returns an error if the config file is malformed or the env override is
/// not a number.
pub fn resolve_config() -> Result<PlaylogConfig> {
    let mut config = match default_config_path() {
        Some(path) => load_config(&path)?,
        None => PlaylogConfig::default(),
    };
    apply_env_overrides(&mut config, env::var(PROFILE_TIMEOUT_ENV).ok())?;
    Ok(config)
}

fn apply_env_overrides(config: &mut PlaylogConfig, timeout_ms: Option<String>) -> Result<()> {
    if let Some(raw) = timeout_ms {
        config.identity.load_timeout_ms = raw
            .trim()
            .parse()
            .with_context(|| format!("{PROFILE_TIMEOUT_ENV} must be milliseconds, got {raw:?}"))?;
    }
    Ok(())
}

fn default_date_separators() -> Vec<char> {
    vec!['/']
}

fn default_count_suffix() -> String {
    "回".to_string()
}

fn default_origin() -> String {
    "https://p.eagate.573.jp".to_string()
}

fn default_product() -> String {
    "2dx".to_string()
}

fn default_profile_path() -> String {
    "djdata/status.html".to_string()
}

const fn default_id_row() -> usize {
    3
}

const fn default_id_column() -> usize {
    2
}

const fn default_load_timeout_ms() -> u64 {
    10_000
}

const fn default_quota_bytes() -> usize {
    102_400
}

const fn default_quota_bytes_per_item() -> usize {
    8_192
}

const fn default_max_items() -> usize {
    512
}
