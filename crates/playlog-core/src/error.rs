use std::fmt;
use std::time::Duration;

use crate::store::StoreError;

/// Machine-readable error codes for log filtering and triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    VersionNotFound,
    IdentityNotFound,
    IdentityMismatch,
    StoreQuotaExceeded,
    StoreUnavailable,
    ConfigParseError,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotFound => "E1001",
            Self::VersionNotFound => "E1002",
            Self::IdentityNotFound => "E2001",
            Self::IdentityMismatch => "E2002",
            Self::StoreQuotaExceeded => "E3001",
            Self::StoreUnavailable => "E3002",
            Self::ConfigParseError => "E4001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotFound => "Activity table not found",
            Self::VersionNotFound => "Game version not found in page path",
            Self::IdentityNotFound => "Player identity not found",
            Self::IdentityMismatch => "Player identity does not match stored record",
            Self::StoreQuotaExceeded => "Key-value store quota exceeded",
            Self::StoreUnavailable => "Key-value store unavailable",
            Self::ConfigParseError => "Config file parse error",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced in logs.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotFound => Some("Open the play-data page that shows the daily activity table."),
            Self::VersionNotFound => Some("The page path must look like /game/<product>/<version>/..."),
            Self::IdentityNotFound => {
                Some("Check that the profile page loads while signed in, then reload.")
            }
            Self::IdentityMismatch => {
                Some("The stored record belongs to another player. Clear it before switching accounts.")
            }
            Self::StoreQuotaExceeded => Some("Remove old month buckets to free sync storage."),
            Self::StoreUnavailable => None,
            Self::ConfigParseError => Some("Fix syntax in playlog/config.toml and retry."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Every failure a reconciliation run can end with.
///
/// None of these is retried. The run that produced one writes nothing.
#[derive(Debug, thiserror::Error)]
pub enum PlaylogError {
    /// The activity table or its header-plus-data rows are missing.
    #[error("activity not found")]
    NotFound,

    /// The page path does not carry a game version.
    #[error("failed to get game version from path {path:?}")]
    VersionNotFound { path: String },

    /// The profile page loaded but had no identity token.
    #[error("failed to get player id from {url}")]
    IdentityNotFound { url: String },

    /// The profile page did not finish loading in time.
    #[error("profile page {url} did not load within {waited:?}")]
    IdentityTimeout { url: String, waited: Duration },

    /// The resolved identity differs from the one already stored.
    #[error("player id mismatch: stored={stored} resolved={resolved}")]
    IdentityMismatch { stored: String, resolved: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored value could not be decoded into the record model.
    #[error("malformed stored record: {0}")]
    Record(#[from] serde_json::Error),
}

impl PlaylogError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NotFound,
            Self::VersionNotFound { .. } => ErrorCode::VersionNotFound,
            Self::IdentityNotFound { .. } | Self::IdentityTimeout { .. } => {
                ErrorCode::IdentityNotFound
            }
            Self::IdentityMismatch { .. } => ErrorCode::IdentityMismatch,
            Self::Store(err) => err.code(),
            Self::Record(_) => ErrorCode::InternalUnexpected,
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
