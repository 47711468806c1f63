// =============================================================================
// Doji detector (1h) — indecision candle after a defended run-up
// =============================================================================
//
// Fires on an hourly candle whose body is at most 5% of a meaningful range,
// but only in a context worth watching: over the last 100 candles the
// low-to-high gain reached 15% and that low has never been breached since.
// =============================================================================

use crate::detect::PatternHit;
use crate::indicators::IndicatorSnapshot;
use crate::types::{AlertType, Candle, Interval};

const MAX_BODY_FRACTION: f64 = 0.05;
/// Minimum range as a fraction of close for the candle to count at all.
const MIN_RANGE_PCT: f64 = 1.0;
const CONTEXT_WINDOW: usize = 100;
const MIN_RUNUP_PCT: f64 = 15.0;

pub fn doji(candle: &Candle, snapshot: &IndicatorSnapshot) -> Option<PatternHit> {
    // Hourly pattern only.
    if snapshot.key.interval != Interval::H1 {
        return None;
    }

    if candle.body_fraction() > MAX_BODY_FRACTION {
        return None;
    }
    let range = candle.high - candle.low;
    if candle.close <= 0.0 || range / candle.close * 100.0 < MIN_RANGE_PCT {
        return None;
    }

    let window = &snapshot.window;
    if window.len() < CONTEXT_WINDOW {
        return None;
    }
    let context = &window[window.len() - CONTEXT_WINDOW..];

    // Anchor low of the window, first occurrence.
    let (low_idx, anchor_low) = context
        .iter()
        .enumerate()
        .fold((0usize, f64::INFINITY), |(bi, bl), (i, c)| {
            if c.low < bl {
                (i, c.low)
            } else {
                (bi, bl)
            }
        });
    if !anchor_low.is_finite() || anchor_low <= 0.0 {
        return None;
    }

    // Run-up from the anchor low to the best high after it.
    let peak = context[low_idx..]
        .iter()
        .map(|c| c.high)
        .fold(f64::NEG_INFINITY, f64::max);
    let runup_pct = (peak - anchor_low) / anchor_low * 100.0;
    if runup_pct < MIN_RUNUP_PCT {
        return None;
    }

    // The anchor low must have held: nothing after it trades back down.
    if context[low_idx + 1..].iter().any(|c| c.low <= anchor_low) {
        return None;
    }

    Some(PatternHit::simple(
        AlertType::Doji,
        format!(
            "doji after {runup_pct:.1}% run-up from defended low {anchor_low:.4}"
        ),
    ))
}
