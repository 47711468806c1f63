// =============================================================================
// Bullish streak detector — N consecutive bullish candles with real push
// =============================================================================

use crate::detect::PatternHit;
use crate::indicators::IndicatorSnapshot;
use crate::types::AlertType;

/// Streak length.
pub const STREAK_LEN: usize = 5;
/// At least one candle in the streak must gain this much.
const MIN_SINGLE_GAIN_PCT: f64 = 1.0;

pub fn bullish_streak(snapshot: &IndicatorSnapshot) -> Option<PatternHit> {
    let window = &snapshot.window;
    if window.len() < STREAK_LEN {
        return None;
    }
    let tail = &window[window.len() - STREAK_LEN..];

    if !tail.iter().all(|c| c.is_bullish()) {
        return None;
    }
    let best_gain = tail.iter().map(|c| c.gain_pct()).fold(f64::NEG_INFINITY, f64::max);
    if best_gain < MIN_SINGLE_GAIN_PCT {
        return None;
    }

    Some(PatternHit::simple(
        AlertType::BullishStreak,
        format!("{STREAK_LEN} bullish candles in a row, best gain {best_gain:.2}%"),
    ))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::engine::{IndicatorEngine, DEFAULT_CAPACITY};
    use crate::types::{Candle, CandleKey, Interval};

    fn key() -> CandleKey {
        CandleKey {
            symbol: "BTCUSDT".into(),
            interval: Interval::M5,
        }
    }

    fn candle(i: i64, open: f64, close: f64) -> Candle {
        Candle {
            open_time: i * 300_000,
            close_time: (i + 1) * 300_000 - 1,
            open,
            high: open.max(close) + 0.1,
            low: open.min(close) - 0.1,
            close,
            volume: 100.0,
            is_final: true,
        }
    }

    fn snapshot_of(candles: &[Candle]) -> IndicatorSnapshot {
        let engine = IndicatorEngine::new(DEFAULT_CAPACITY);
        let k = key();
        for c in candles {
            engine.on_final_candle(&k, c);
        }
        engine.snapshot(&k).unwrap()
    }

    #[test]
    fn five_bullish_with_push_fires() {
        let candles: Vec<Candle> = vec![
            candle(0, 100.0, 100.2),
            candle(1, 100.2, 100.4),
            candle(2, 100.4, 101.6), // +1.19%
            candle(3, 101.6, 101.8),
            candle(4, 101.8, 102.0),
        ];
        assert!(bullish_streak(&snapshot_of(&candles)).is_some());
    }

    #[test]
    fn one_bearish_candle_breaks_the_streak() {
        let candles: Vec<Candle> = vec![
            candle(0, 100.0, 100.2),
            candle(1, 100.2, 100.4),
            candle(2, 100.4, 101.6),
            candle(3, 101.8, 101.6), // bearish
            candle(4, 101.6, 102.0),
        ];
        assert!(bullish_streak(&snapshot_of(&candles)).is_none());
    }

    #[test]
    fn weak_drift_does_not_fire() {
        // All bullish but no candle gains 1%.
        let candles: Vec<Candle> = (0..5)
            .map(|i| candle(i, 100.0 + i as f64 * 0.1, 100.05 + i as f64 * 0.1))
            .collect();
        assert!(bullish_streak(&snapshot_of(&candles)).is_none());
    }

    #[test]
    fn short_history_is_silent() {
        let candles: Vec<Candle> = vec![candle(0, 100.0, 101.5), candle(1, 101.5, 103.0)];
        assert!(bullish_streak(&snapshot_of(&candles)).is_none());
    }
}
