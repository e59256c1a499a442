//! Merge rules from each interval to the higher intervals it builds.
//!
//! Rules are chained: a 1m close can complete a 5m candle, whose close can
//! complete a 15m candle, and so on up to weekly and monthly candles.

use footprint_core::{Interval, TimestampMs};

/// Builds `target` candles out of consecutive `base` candles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRule {
    pub base: Interval,
    pub target: Interval,
}

impl MergeRule {
    pub const fn new(base: Interval, target: Interval) -> Self {
        Self { base, target }
    }

    /// Whether the next base open time starts a new target candle.
    #[inline]
    pub fn is_boundary(&self, next_open_ms: TimestampMs) -> bool {
        self.target.is_aligned(next_open_ms)
    }

    /// Open time of the target candle that ends right before `next_open_ms`.
    #[inline]
    pub fn target_open(&self, next_open_ms: TimestampMs) -> TimestampMs {
        self.target.floor(next_open_ms - 1)
    }

    /// Number of base candles making up the target candle that ends right
    /// before `next_open_ms` (days in the month for monthly targets).
    pub fn required_base_count(&self, next_open_ms: TimestampMs) -> usize {
        match self.base.fixed_size_ms() {
            Some(base_ms) => ((next_open_ms - self.target_open(next_open_ms)) / base_ms) as usize,
            None => 0,
        }
    }

    /// Upper bound of [`MergeRule::required_base_count`] over all windows.
    pub fn max_required_base_count(&self) -> usize {
        let Some(base_ms) = self.base.fixed_size_ms() else {
            return 0;
        };
        let target_ms = self
            .target
            .fixed_size_ms()
            .unwrap_or(31 * footprint_core::interval::DAY_MS);
        (target_ms / base_ms) as usize
    }
}

use Interval::*;

const FROM_1M: &[MergeRule] = &[MergeRule::new(M1, M5)];
const FROM_5M: &[MergeRule] = &[MergeRule::new(M5, M15)];
const FROM_15M: &[MergeRule] = &[MergeRule::new(M15, M30)];
const FROM_30M: &[MergeRule] = &[MergeRule::new(M30, H1)];
const FROM_1H: &[MergeRule] = &[MergeRule::new(H1, H2)];
const FROM_2H: &[MergeRule] = &[MergeRule::new(H2, H4), MergeRule::new(H2, H6)];
const FROM_4H: &[MergeRule] = &[MergeRule::new(H4, H8), MergeRule::new(H4, H12)];
const FROM_12H: &[MergeRule] = &[MergeRule::new(H12, D1)];
const FROM_1D: &[MergeRule] = &[MergeRule::new(D1, W1), MergeRule::new(D1, MN1)];

/// Rules whose base is `base`.
pub fn rules_for(base: Interval) -> &'static [MergeRule] {
    match base {
        M1 => FROM_1M,
        M5 => FROM_5M,
        M15 => FROM_15M,
        M30 => FROM_30M,
        H1 => FROM_1H,
        H2 => FROM_2H,
        H4 => FROM_4H,
        H12 => FROM_12H,
        D1 => FROM_1D,
        H6 | H8 | W1 | MN1 => &[],
    }
}

/// The rule that builds `target`, if any.
pub fn rule_for_target(target: Interval) -> Option<MergeRule> {
    Interval::ALL
        .iter()
        .flat_map(|base| rules_for(*base).iter())
        .find(|rule| rule.target == target)
        .copied()
}

/// Open-time span (inclusive) of `base` candles that precede `open_ms` but
/// belong to a higher candle still open at `open_ms`.
///
/// `None` when every target of `base` starts exactly at `open_ms`, or
/// nothing is built from `base`.
pub fn history_range(base: Interval, open_ms: TimestampMs) -> Option<(TimestampMs, TimestampMs)> {
    let from_ms = rules_for(base)
        .iter()
        .map(|rule| rule.target.floor(open_ms))
        .min()?;
    (from_ms < open_ms).then_some((from_ms, open_ms - 1))
}
