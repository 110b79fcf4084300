//! Extraction of daily activity rows from the rendered activity table.
//!
//! The table itself is scraped elsewhere; this module receives its cells as
//! text. The first row is the header. Every data row is expected to carry
//! exactly three text cells: date, keyboard plays, scratch plays.
//!
//! Parsing is lenient: rows of the wrong shape are dropped, and counts that
//! are not numbers read as zero.

use tracing::debug;

use crate::config::SourceConfig;
use crate::error::PlaylogError;
use crate::model::{ActivityDate, DailyActivity};

/// Text cells of a scraped table, row by row.
///
/// A `None` cell is one whose text could not be read; it is skipped before
/// the row's width is checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityTable {
    pub rows: Vec<Vec<Option<String>>>,
}

impl ActivityTable {
    #[must_use]
    pub const fn new(rows: Vec<Vec<Option<String>>>) -> Self {
        Self { rows }
    }

    /// Build a table whose cells all have text.
    #[must_use]
    pub fn from_text<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(|cell| Some(cell.into())).collect())
                .collect(),
        }
    }
}

/// Anything that can produce the activity rows visible on a page.
pub trait ActivitySource {
    /// # Errors
    ///
    /// Returns [`PlaylogError::NotFound`] when the table, or a header plus
    /// at least one data row, is absent.
    fn extract(&self) -> Result<Vec<DailyActivity>, PlaylogError>;
}

/// [`ActivitySource`] over an optional scraped table.
#[derive(Debug, Clone, Copy)]
pub struct TableSource<'a> {
    table: Option<&'a ActivityTable>,
    config: &'a SourceConfig,
}

impl<'a> TableSource<'a> {
    #[must_use]
    pub const fn new(table: Option<&'a ActivityTable>, config: &'a SourceConfig) -> Self {
        Self { table, config }
    }
}

impl ActivitySource for TableSource<'_> {
    fn extract(&self) -> Result<Vec<DailyActivity>, PlaylogError> {
        let table = self.table.ok_or(PlaylogError::NotFound)?;
        extract_activities(table, self.config)
    }
}

/// Parse every well-formed data row of `table`.
///
/// # Errors
///
/// Returns [`PlaylogError::NotFound`] if the table has no data rows.
pub fn extract_activities(
    table: &ActivityTable,
    config: &SourceConfig,
) -> Result<Vec<DailyActivity>, PlaylogError> {
    if table.rows.len() <= 1 {
        return Err(PlaylogError::NotFound);
    }

    let mut dropped = 0_usize;
    let activities: Vec<DailyActivity> = table
        .rows
        .iter()
        .skip(1)
        .filter_map(|row| {
            let parsed = parse_row(row, config);
            if parsed.is_none() {
                dropped += 1;
            }
            parsed
        })
        .collect();

    debug!(rows = activities.len(), dropped, "activity table extracted");
    Ok(activities)
}

fn parse_row(row: &[Option<String>], config: &SourceConfig) -> Option<DailyActivity> {
    let cells: Vec<&str> = row.iter().filter_map(Option::as_deref).collect();
    let [date, keyboard, scratch] = cells.as_slice() else {
        return None;
    };

    let date = normalize_date(date, &config.date_separators)?;
    Some(DailyActivity::new(
        date,
        parse_count(keyboard, &config.count_suffix),
        parse_count(scratch, &config.count_suffix),
    ))
}

/// Strip separators from a displayed date (`2024/01/02` -> `20240102`).
///
/// Returns `None` unless the result is eight digits.
#[must_use]
pub fn normalize_date(raw: &str, separators: &[char]) -> Option<ActivityDate> {
    let stripped: String = raw
        .trim()
        .chars()
        .filter(|c| !separators.contains(c))
        .collect();
    ActivityDate::parse(&stripped).ok()
}

/// Parse a displayed count (`12回` -> `12`), reading anything else as 0.
#[must_use]
pub fn parse_count(raw: &str, suffix: &str) -> u64 {
    let trimmed = raw.trim();
    let number = trimmed.strip_suffix(suffix).unwrap_or(trimmed).trim();
    if number.is_empty() {
        return 0;
    }
    number.parse().unwrap_or(0)
}
