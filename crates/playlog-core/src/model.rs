//! Activity data model.
//!
//! A [`DailyActivity`] is one day's play counters as shown on the activity
//! page. Entries are partitioned into [`Bucket`]s keyed by
//! [`VersionMonthKey`] so that each game version and calendar month is
//! stored (and rewritten) independently. [`RecordMetadata`] carries the
//! owning player id and the watermark that bounds incremental diffing.
//!
//! # Wire format
//!
//! Entries keep the compact field names used by the sync store:
//!
//! ```json
//! { "d": "20240102", "k": 7, "s": 2 }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ActivityDate
// ---------------------------------------------------------------------------

/// A calendar day in `YYYYMMDD` form.
///
/// Always exactly eight ASCII digits, so lexicographic order is calendar
/// order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActivityDate(String);

/// Error for date strings that are not eight ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid activity date {0:?}: expected 8 digits (YYYYMMDD)")]
pub struct InvalidDate(pub String);

impl ActivityDate {
    /// The date that sorts before every real day. Used by the initial watermark.
    pub const FLOOR: &'static str = "00000000";

    /// Parse an already-normalised `YYYYMMDD` string.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDate`] unless `raw` is exactly eight ASCII digits.
    pub fn parse(raw: &str) -> Result<Self, InvalidDate> {
        if raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidDate(raw.to_string()))
        }
    }

    #[must_use]
    pub fn floor() -> Self {
        Self(Self::FLOOR.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `YYYYMM` prefix as a number. Leading zeros are not preserved.
    #[must_use]
    pub fn month(&self) -> u32 {
        self.0
            .bytes()
            .take(6)
            .fold(0_u32, |acc, b| acc * 10 + u32::from(b - b'0'))
    }
}

impl TryFrom<String> for ActivityDate {
    type Error = InvalidDate;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ActivityDate> for String {
    fn from(date: ActivityDate) -> Self {
        date.0
    }
}

impl fmt::Display for ActivityDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// DailyActivity
// ---------------------------------------------------------------------------

/// One day of play counters for a single player.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DailyActivity {
    #[serde(rename = "d")]
    pub date: ActivityDate,
    /// Plays on the keyboard controller.
    #[serde(rename = "k")]
    pub keyboard: u64,
    /// Plays on the turntable ("scratch") controller.
    #[serde(rename = "s")]
    pub scratch: u64,
}

impl DailyActivity {
    #[must_use]
    pub const fn new(date: ActivityDate, keyboard: u64, scratch: u64) -> Self {
        Self {
            date,
            keyboard,
            scratch,
        }
    }

    /// The zero entry used as the watermark before any run has succeeded.
    #[must_use]
    pub fn floor() -> Self {
        Self::new(ActivityDate::floor(), 0, 0)
    }
}

impl fmt::Display for DailyActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} k={} s={}", self.date, self.keyboard, self.scratch)
    }
}

/// The most recent processed entry; the low-water mark for the next diff.
pub type Watermark = DailyActivity;

// ---------------------------------------------------------------------------
// GameVersion / VersionMonthKey
// ---------------------------------------------------------------------------

/// Numeric game version id taken from the page path (e.g. `29`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameVersion(pub u32);

impl GameVersion {
    /// Coerce a path segment to a version number.
    ///
    /// Surrounding whitespace is ignored and leading zeros are dropped, so
    /// `"029"` and `"29"` name the same version. Anything that is not a
    /// plain decimal number yields `None`.
    #[must_use]
    pub fn from_segment(segment: &str) -> Option<Self> {
        parse_decimal(segment.trim()).map(Self)
    }
}

impl fmt::Display for GameVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Partition key `<version>_<YYYYMM>`, both halves numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionMonthKey {
    pub version: GameVersion,
    pub month: u32,
}

/// Error for strings that do not have the `<version>_<month>` shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version-month key {0:?}")]
pub struct InvalidKey(pub String);

impl VersionMonthKey {
    #[must_use]
    pub fn new(version: GameVersion, date: &ActivityDate) -> Self {
        Self {
            version,
            month: date.month(),
        }
    }
}

impl fmt::Display for VersionMonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.version, self.month)
    }
}

impl FromStr for VersionMonthKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (version, month) = s.split_once('_').ok_or_else(|| InvalidKey(s.to_string()))?;
        match (parse_decimal(version), parse_decimal(month)) {
            (Some(version), Some(month)) => Ok(Self {
                version: GameVersion(version),
                month,
            }),
            _ => Err(InvalidKey(s.to_string())),
        }
    }
}

impl TryFrom<String> for VersionMonthKey {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionMonthKey> for String {
    fn from(key: VersionMonthKey) -> Self {
        key.to_string()
    }
}

fn parse_decimal(raw: &str) -> Option<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

/// Entries for one [`VersionMonthKey`], in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bucket(pub Vec<DailyActivity>);

impl Bucket {
    #[must_use]
    pub fn entries(&self) -> &[DailyActivity] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, entry: DailyActivity) {
        self.0.push(entry);
    }
}

impl From<Vec<DailyActivity>> for Bucket {
    fn from(entries: Vec<DailyActivity>) -> Self {
        Self(entries)
    }
}

impl IntoIterator for Bucket {
    type Item = DailyActivity;
    type IntoIter = std::vec::IntoIter<DailyActivity>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Month buckets keyed by partition.
pub type Buckets = BTreeMap<VersionMonthKey, Bucket>;

// ---------------------------------------------------------------------------
// RecordMetadata
// ---------------------------------------------------------------------------

/// Per-player bookkeeping stored beside the buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    /// Stable player id, absent until the first successful run.
    #[serde(rename = "iidxId", default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(default = "DailyActivity::floor")]
    pub last_daily_activity: Watermark,
    /// Unix seconds of the last successful write.
    #[serde(default)]
    pub updated_at: i64,
}

impl Default for RecordMetadata {
    fn default() -> Self {
        Self {
            player_id: None,
            last_daily_activity: DailyActivity::floor(),
            updated_at: 0,
        }
    }
}
