//! Day windows for backfill runs.

use chrono::{DateTime, NaiveDate};
use footprint_core::{Error, Result, TimestampMs, TimestampRange};
use tracing::info;

/// Midnight UTC of `day` in milliseconds.
pub fn day_start_ms(day: NaiveDate) -> TimestampMs {
    day.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

/// UTC day containing `ts_ms`.
pub fn day_of(ts_ms: TimestampMs) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(ts_ms).map(|dt| dt.date_naive())
}

/// Inclusive range of UTC days to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillWindow {
    pub start_day: NaiveDate,
    pub end_day: NaiveDate,
}

impl BackfillWindow {
    pub fn new(start_day: NaiveDate, end_day: NaiveDate) -> Result<Self> {
        if start_day > end_day {
            return Err(Error::config(format!(
                "backfill start {start_day} is after end {end_day}"
            )));
        }
        Ok(Self { start_day, end_day })
    }

    /// Skip days already covered by stored base candles.
    ///
    /// When the requested start lies inside the stored range, the window
    /// resumes at the day of the last stored candle; that day is replayed
    /// again since upserts are idempotent. The end never moves. Returns
    /// `None` when nothing is left to replay.
    pub fn clamp(self, stored_base: Option<TimestampRange>) -> Option<Self> {
        let Some(range) = stored_base else {
            return Some(self);
        };
        if !range.contains(day_start_ms(self.start_day)) {
            return Some(self);
        }

        let resume_day = day_of(range.last)?;
        if resume_day > self.end_day {
            info!(
                start = %self.start_day,
                end = %self.end_day,
                "Requested window already stored"
            );
            return None;
        }
        if resume_day != self.start_day {
            info!(
                requested = %self.start_day,
                adjusted = %resume_day,
                "Adjusted backfill start to stored history"
            );
        }
        Some(Self {
            start_day: resume_day,
            end_day: self.end_day,
        })
    }

    /// Every day in the window, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end_day = self.end_day;
        self.start_day.iter_days().take_while(move |day| *day <= end_day)
    }

    pub fn day_count(&self) -> usize {
        (self.end_day - self.start_day).num_days() as usize + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use footprint_core::interval::{DAY_MS, HOUR_MS};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_start_after_end_rejected() {
        assert!(matches!(BackfillWindow::new(day(5), day(4)), Err(Error::Config(_))));
        assert!(BackfillWindow::new(day(4), day(4)).is_ok());
    }

    #[test]
    fn test_days_inclusive() {
        let window = BackfillWindow::new(day(1), day(3)).unwrap();
        assert_eq!(window.days().collect::<Vec<_>>(), vec![day(1), day(2), day(3)]);
        assert_eq!(window.day_count(), 3);
    }

    #[test]
    fn test_clamp_without_history() {
        let window = BackfillWindow::new(day(1), day(10)).unwrap();
        assert_eq!(window.clamp(None), Some(window));
    }

    #[test]
    fn test_clamp_resumes_at_last_stored_day() {
        let window = BackfillWindow::new(day(2), day(10)).unwrap();
        let stored = TimestampRange {
            first: day_start_ms(day(1)),
            last: day_start_ms(day(5)) + 13 * HOUR_MS,
        };

        let clamped = window.clamp(Some(stored)).unwrap();
        assert_eq!(clamped.start_day, day(5));
        assert_eq!(clamped.end_day, day(10));
    }

    #[test]
    fn test_clamp_ignores_history_outside_start() {
        let window = BackfillWindow::new(day(20), day(25)).unwrap();
        let stored = TimestampRange {
            first: day_start_ms(day(1)),
            last: day_start_ms(day(5)),
        };
        assert_eq!(window.clamp(Some(stored)), Some(window));
    }

    #[test]
    fn test_clamp_fully_stored() {
        let window = BackfillWindow::new(day(2), day(3)).unwrap();
        let stored = TimestampRange {
            first: day_start_ms(day(1)),
            last: day_start_ms(day(9)),
        };
        assert_eq!(window.clamp(Some(stored)), None);
    }

    #[test]
    fn test_day_helpers() {
        assert_eq!(day_start_ms(day(1)), 1_704_067_200_000);
        assert_eq!(day_of(1_704_067_200_000 + DAY_MS - 1), Some(day(1)));
    }
}
