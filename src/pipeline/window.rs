//! Window Selector: incremental date ranges behind a persisted watermark.
//!
//! The watermark is the last date whose work is known complete. Each run
//! processes [watermark + 1, today - 1] and afterwards advances the
//! watermark through the contiguous prefix of dates that finished clean,
//! so a failed date is revisited by every subsequent run until it clears.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, info};

use crate::models::DateRange;
use crate::storage::EtlDb;

pub struct WindowSelector {
    store: Arc<EtlDb>,
    season_start: NaiveDate,
    max_window_days: Option<i64>,
}

/// What happened to the watermark after a run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WatermarkAdvance {
    /// New watermark, when any prefix of the window completed.
    pub advanced_to: Option<NaiveDate>,
    /// First date that blocked the walk, if any.
    pub blocked_at: Option<NaiveDate>,
}

impl WindowSelector {
    pub fn new(store: Arc<EtlDb>, season_start: NaiveDate, max_window_days: Option<i64>) -> Self {
        Self {
            store,
            season_start,
            max_window_days,
        }
    }

    /// Next pending window: [watermark + 1, today - 1]. Today is excluded
    /// because its games may still be running. A missing watermark seeds
    /// the window from the season start; start > end encodes "caught up".
    pub fn next_window(&self, job_name: &str, today: NaiveDate) -> Result<DateRange> {
        let start = match self.store.watermark(job_name)? {
            Some(mark) => mark + Duration::days(1),
            None => self.season_start,
        };
        let mut end = today - Duration::days(1);
        if let Some(cap) = self.max_window_days {
            let capped_end = start + Duration::days(cap - 1);
            if capped_end < end {
                debug!(job = job_name, cap, "Truncating catch-up window");
                end = capped_end;
            }
        }
        Ok(DateRange::new(start, end))
    }

    /// Advance the watermark through the contiguous prefix of complete
    /// dates, in window order. A date is complete when its batch had no
    /// failures and every stored game on it reached a terminal status;
    /// a date with no games at all is complete. The first incomplete date
    /// blocks everything behind it.
    pub fn advance_after_run(
        &self,
        job_name: &str,
        date_results: &[(NaiveDate, bool)],
    ) -> Result<WatermarkAdvance> {
        let mut advanced_to = None;
        let mut blocked_at = None;
        for (date, batch_clean) in date_results {
            if *batch_clean && self.store.date_is_terminal(*date)? {
                advanced_to = Some(*date);
            } else {
                blocked_at = Some(*date);
                break;
            }
        }
        if let Some(date) = advanced_to {
            self.store.set_watermark(job_name, date)?;
            info!(job = job_name, watermark = %date, "Watermark advanced");
        }
        Ok(WatermarkAdvance {
            advanced_to,
            blocked_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GameRecord, GameStatus};
    use crate::storage::db;

    const JOB: &str = "game-etl";

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn selector(max_window_days: Option<i64>) -> (Arc<EtlDb>, WindowSelector) {
        let store = Arc::new(EtlDb::open(":memory:").unwrap());
        let sel = WindowSelector::new(Arc::clone(&store), d(2024, 3, 28), max_window_days);
        (store, sel)
    }

    fn put_test_game(store: &EtlDb, game_id: &str, date: NaiveDate, status: GameStatus) {
        let game = GameRecord {
            game_id: game_id.to_string(),
            date,
            home_team: "KC".to_string(),
            away_team: "CWS".to_string(),
            status,
            home_score: None,
            away_score: None,
            source: "statsapi".to_string(),
        };
        store
            .with_unit_txn(|conn| db::put_game(conn, &game))
            .unwrap();
    }

    #[test]
    fn test_window_trails_watermark_and_today() {
        let (store, sel) = selector(None);
        store.set_watermark(JOB, d(2024, 4, 10)).unwrap();

        let range = sel.next_window(JOB, d(2024, 4, 13)).unwrap();
        assert_eq!(range.start, d(2024, 4, 11));
        assert_eq!(range.end, d(2024, 4, 12));
        assert_eq!(range.num_days(), 2);
    }

    #[test]
    fn test_caught_up_window_is_empty() {
        let (store, sel) = selector(None);
        store.set_watermark(JOB, d(2024, 4, 12)).unwrap();

        let range = sel.next_window(JOB, d(2024, 4, 13)).unwrap();
        assert!(range.is_empty());
        assert_eq!(range.days().count(), 0);
    }

    #[test]
    fn test_first_run_seeds_from_season_start() {
        let (_store, sel) = selector(None);
        let range = sel.next_window(JOB, d(2024, 4, 1)).unwrap();
        assert_eq!(range.start, d(2024, 3, 28));
        assert_eq!(range.end, d(2024, 3, 31));
    }

    #[test]
    fn test_catch_up_cap_truncates() {
        let (store, sel) = selector(Some(3));
        store.set_watermark(JOB, d(2024, 4, 1)).unwrap();

        let range = sel.next_window(JOB, d(2024, 4, 20)).unwrap();
        assert_eq!(range.start, d(2024, 4, 2));
        assert_eq!(range.end, d(2024, 4, 4));
    }

    #[test]
    fn test_failed_date_blocks_advance_past_it() {
        let (store, sel) = selector(None);
        store.set_watermark(JOB, d(2024, 4, 10)).unwrap();

        // First window date had a failed unit; the later date was fine.
        let advance = sel
            .advance_after_run(JOB, &[(d(2024, 4, 11), false), (d(2024, 4, 12), true)])
            .unwrap();
        assert_eq!(advance.advanced_to, None);
        assert_eq!(advance.blocked_at, Some(d(2024, 4, 11)));
        assert_eq!(store.watermark(JOB).unwrap(), Some(d(2024, 4, 10)));
    }

    #[test]
    fn test_clean_prefix_advances_watermark() {
        let (store, sel) = selector(None);
        // Zero-game days count as complete and advance normally.
        let advance = sel
            .advance_after_run(JOB, &[(d(2024, 4, 11), true), (d(2024, 4, 12), true)])
            .unwrap();
        assert_eq!(advance.advanced_to, Some(d(2024, 4, 12)));
        assert_eq!(advance.blocked_at, None);
        assert_eq!(store.watermark(JOB).unwrap(), Some(d(2024, 4, 12)));
    }

    #[test]
    fn test_unfinished_game_blocks_even_when_batch_clean() {
        let (store, sel) = selector(None);
        put_test_game(&store, "745001", d(2024, 4, 11), GameStatus::InProgress);

        let advance = sel
            .advance_after_run(JOB, &[(d(2024, 4, 11), true)])
            .unwrap();
        assert_eq!(advance.advanced_to, None);
        assert_eq!(advance.blocked_at, Some(d(2024, 4, 11)));

        // Next run sees the game finished and the date completes.
        put_test_game(&store, "745001", d(2024, 4, 11), GameStatus::Final);
        let advance = sel
            .advance_after_run(JOB, &[(d(2024, 4, 11), true)])
            .unwrap();
        assert_eq!(advance.advanced_to, Some(d(2024, 4, 11)));
    }

    #[test]
    fn test_postponed_game_is_terminal_for_scheduling() {
        let (store, sel) = selector(None);
        put_test_game(&store, "745001", d(2024, 4, 11), GameStatus::Postponed);

        let advance = sel
            .advance_after_run(JOB, &[(d(2024, 4, 11), true)])
            .unwrap();
        assert_eq!(advance.advanced_to, Some(d(2024, 4, 11)));
    }
}
