use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use playlog_core::PageSnapshot;
use playlog_core::model::GameVersion;
use playlog_core::source::ActivityTable;

use crate::rng::DeterministicRng;

/// Ground truth for one simulated player.
///
/// Plays only ever land on the current day, so every earlier day is frozen
/// once the player moves on. Days without plays do not appear on pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedPlayer {
    today: NaiveDate,
    days: BTreeMap<NaiveDate, (u64, u64)>,
}

impl SimulatedPlayer {
    #[must_use]
    pub const fn new(start: NaiveDate) -> Self {
        Self {
            today: start,
            days: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn today(&self) -> NaiveDate {
        self.today
    }

    /// Play a session today: at least one keyboard play, maybe some scratch.
    pub fn play(&mut self, rng: &mut DeterministicRng, max_plays: u64) {
        let keyboard = rng.between(1, max_plays.max(1));
        let scratch = rng.between(0, max_plays / 2);
        let counters = self.days.entry(self.today).or_insert((0, 0));
        counters.0 += keyboard;
        counters.1 += scratch;
    }

    pub fn next_day(&mut self) {
        self.today = self.today.checked_add_days(Days::new(1)).unwrap_or(self.today);
    }

    /// The activity page as rendered today: the trailing `window` days,
    /// newest first.
    #[must_use]
    pub fn page(&self, version: GameVersion, window: u64) -> PageSnapshot {
        let oldest = self
            .today
            .checked_sub_days(Days::new(window.saturating_sub(1)))
            .unwrap_or(NaiveDate::MIN);

        let mut rows = vec![vec!["日付".to_string(), "鍵盤".to_string(), "皿".to_string()]];
        rows.extend(self.days.range(oldest..=self.today).rev().map(|(day, (k, s))| {
            vec![
                day.format("%Y/%m/%d").to_string(),
                format!("{k}回"),
                format!("{s}回"),
            ]
        }));

        PageSnapshot {
            path: format!("/game/2dx/{version}/djdata/activity.html"),
            activity_table: Some(ActivityTable::from_text(rows)),
        }
    }
}
