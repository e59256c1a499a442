//! Candle intervals and grid arithmetic.
//!
//! Every interval has an aligned grid of open times. Intraday intervals are
//! aligned to the Unix epoch, weeks start on Monday 00:00 UTC and months on
//! the first calendar day 00:00 UTC.

use crate::{Error, TimestampMs};
use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MINUTE_MS: i64 = 60_000;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;
pub const WEEK_MS: i64 = 7 * DAY_MS;

/// 1970-01-01 was a Thursday; the first Monday is four days later.
const WEEK_OFFSET_MS: i64 = 4 * DAY_MS;

/// Candle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1M")]
    MN1,
}

impl Interval {
    /// Number of intervals, for fixed-size lookup tables.
    pub const COUNT: usize = 13;

    /// All intervals, smallest first.
    pub const ALL: [Interval; Self::COUNT] = [
        Interval::M1,
        Interval::M5,
        Interval::M15,
        Interval::M30,
        Interval::H1,
        Interval::H2,
        Interval::H4,
        Interval::H6,
        Interval::H8,
        Interval::H12,
        Interval::D1,
        Interval::W1,
        Interval::MN1,
    ];

    /// Position of this interval in [`Interval::ALL`].
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Exchange label (e.g. "1m", "4h", "1M").
    pub fn as_str(self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H2 => "2h",
            Interval::H4 => "4h",
            Interval::H6 => "6h",
            Interval::H8 => "8h",
            Interval::H12 => "12h",
            Interval::D1 => "1d",
            Interval::W1 => "1w",
            Interval::MN1 => "1M",
        }
    }

    /// Size in milliseconds, or `None` for calendar months.
    pub fn fixed_size_ms(self) -> Option<i64> {
        match self {
            Interval::M1 => Some(MINUTE_MS),
            Interval::M5 => Some(5 * MINUTE_MS),
            Interval::M15 => Some(15 * MINUTE_MS),
            Interval::M30 => Some(30 * MINUTE_MS),
            Interval::H1 => Some(HOUR_MS),
            Interval::H2 => Some(2 * HOUR_MS),
            Interval::H4 => Some(4 * HOUR_MS),
            Interval::H6 => Some(6 * HOUR_MS),
            Interval::H8 => Some(8 * HOUR_MS),
            Interval::H12 => Some(12 * HOUR_MS),
            Interval::D1 => Some(DAY_MS),
            Interval::W1 => Some(WEEK_MS),
            Interval::MN1 => None,
        }
    }

    /// Size in milliseconds, failing for intervals without a fixed size.
    pub fn require_fixed_size_ms(self) -> crate::Result<i64> {
        self.fixed_size_ms().ok_or_else(|| {
            Error::config(format!("interval {self} has no fixed millisecond size"))
        })
    }

    /// Start of the interval bucket containing `ts_ms`.
    pub fn floor(self, ts_ms: TimestampMs) -> TimestampMs {
        match self {
            Interval::MN1 => month_start(ts_ms)
                .map(|dt| dt.timestamp_millis())
                .unwrap_or(ts_ms),
            Interval::W1 => {
                (ts_ms - WEEK_OFFSET_MS).div_euclid(WEEK_MS) * WEEK_MS + WEEK_OFFSET_MS
            }
            fixed => {
                // Every other variant has a fixed size.
                let size = fixed.fixed_size_ms().unwrap_or(MINUTE_MS);
                ts_ms.div_euclid(size) * size
            }
        }
    }

    /// Whether `ts_ms` lies exactly on the interval grid.
    #[inline]
    pub fn is_aligned(self, ts_ms: TimestampMs) -> bool {
        self.floor(ts_ms) == ts_ms
    }

    /// Open time of the bucket following the one containing `ts_ms`.
    pub fn next_open(self, ts_ms: TimestampMs) -> TimestampMs {
        let open = self.floor(ts_ms);
        match self.fixed_size_ms() {
            Some(size) => open + size,
            None => month_start(open)
                .and_then(|dt| dt.checked_add_months(Months::new(1)))
                .map(|dt| dt.timestamp_millis())
                .unwrap_or(open),
        }
    }

    /// Inclusive close time of the bucket containing `ts_ms`.
    #[inline]
    pub fn close_time(self, ts_ms: TimestampMs) -> TimestampMs {
        self.next_open(ts_ms) - 1
    }
}

fn month_start(ts_ms: TimestampMs) -> Option<DateTime<Utc>> {
    let dt = DateTime::<Utc>::from_timestamp_millis(ts_ms)?;
    Utc.with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0).single()
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .iter()
            .copied()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| Error::UnknownInterval(s.to_string()))
    }
}
