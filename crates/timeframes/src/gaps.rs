//! Gap detection over stored candle series.

use footprint_core::{Interval, TimestampMs, TimestampRange};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Run of consecutive missing candles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub interval: Interval,
    /// Open time of the first missing candle.
    pub start_ms: TimestampMs,
    /// Inclusive close time of the last missing candle.
    pub end_ms: TimestampMs,
    pub missing: usize,
}

impl fmt::Display for Gap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} gap {}..={} ({} missing)",
            self.interval, self.start_ms, self.end_ms, self.missing
        )
    }
}

/// Finds missing open times on an interval grid.
#[derive(Debug, Clone, Copy)]
pub struct GapDetector {
    interval: Interval,
}

impl GapDetector {
    pub fn new(interval: Interval) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Every grid open time from `range.first` to `range.last` inclusive.
    pub fn expected_open_times(&self, range: TimestampRange) -> impl Iterator<Item = TimestampMs> {
        let interval = self.interval;
        let last = range.last;
        std::iter::successors(Some(interval.floor(range.first)), move |&open| {
            let next = interval.next_open(open);
            (next > open).then_some(next)
        })
        .take_while(move |open| *open <= last)
    }

    /// Gaps between the expected grid and the open times actually present.
    pub fn find_gaps(&self, range: TimestampRange, present: &BTreeSet<TimestampMs>) -> Vec<Gap> {
        let mut gaps: Vec<Gap> = Vec::new();
        let mut current: Option<Gap> = None;

        for open in self.expected_open_times(range) {
            if present.contains(&open) {
                gaps.extend(current.take());
                continue;
            }
            let end_ms = self.interval.close_time(open);
            match current.as_mut() {
                Some(gap) => {
                    gap.end_ms = end_ms;
                    gap.missing += 1;
                }
                None => {
                    current = Some(Gap {
                        interval: self.interval,
                        start_ms: open,
                        end_ms,
                        missing: 1,
                    })
                }
            }
        }
        gaps.extend(current);
        gaps
    }

    /// Total missing candles over a gap list.
    pub fn total_missing(gaps: &[Gap]) -> usize {
        gaps.iter().map(|g| g.missing).sum()
    }
}
