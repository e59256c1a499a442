//! Higher-interval candles rebuilt from stored base candles.

use footprint_core::{ClosedCandle, Error, Interval, Result, TimestampMs};
use footprint_store::CandleStore;
use footprint_timeframes::{merge_candles, rule_for_target};
use tracing::warn;

/// Merge the stored base candles of the `target` candle containing
/// `open_time_ms`.
///
/// Fails when `target` has no merge rule or the stored window is incomplete.
pub fn rebuild_htf<S: CandleStore>(
    store: &S,
    exchange: &str,
    symbol: &str,
    target: Interval,
    open_time_ms: TimestampMs,
) -> Result<ClosedCandle> {
    let rule = rule_for_target(target)
        .ok_or_else(|| Error::config(format!("no merge rule builds {target}")))?;
    let target_open = target.floor(open_time_ms);
    let next_open = target.next_open(target_open);
    let required = rule.required_base_count(next_open);

    let base = store.query_candles(
        exchange,
        symbol,
        rule.base,
        Some(target_open),
        Some(next_open - 1),
    )?;
    if base.len() != required {
        warn!(
            symbol,
            %target,
            open_time_ms = target_open,
            required,
            found = base.len(),
            "Stored window incomplete"
        );
        return Err(Error::data(format!(
            "{symbol} {target} at {target_open}: need {required} {} candles, found {}",
            rule.base,
            base.len()
        )));
    }

    merge_candles(&base, target)
}
