// =============================================================================
// Hammer detectors — EMA120-crossing hammer and the perfect hammer
// =============================================================================
//
// Hammer crossing EMA120: a long lower shadow that dips below EMA120 and
// closes back above it, after the prior 30 candles all held above the EMA.
// The dip-and-reclaim is the signal; a market already below the EMA is not.
//
// Perfect hammer: a bullish candle whose lower shadow dominates the range
// and whose low is the lowest of the last 30 candles.  Independent of any
// EMA.
// =============================================================================

use crate::detect::PatternHit;
use crate::indicators::IndicatorSnapshot;
use crate::types::{AlertType, Candle};

/// Candles whose lows must all sit above EMA120 before the crossing hammer.
const PRIOR_WINDOW: usize = 30;

/// Shadow bounds for the EMA-crossing hammer.
const MIN_LOWER_SHADOW: f64 = 0.5;
const MAX_UPPER_SHADOW: f64 = 0.2;

/// Shadow bounds for the perfect hammer.
const PERFECT_MIN_LOWER: f64 = 0.70;
const PERFECT_MAX_UPPER: f64 = 0.05;
/// Window the perfect hammer's low must be the minimum of.
const PERFECT_LOW_WINDOW: usize = 30;

/// Hammer that dips through EMA120 and closes back above it.
pub fn hammer_cross_ema120(candle: &Candle, snapshot: &IndicatorSnapshot) -> Option<PatternHit> {
    let ema120 = snapshot.ema(120)?;

    if candle.lower_shadow_fraction() <= MIN_LOWER_SHADOW {
        return None;
    }
    if candle.upper_shadow_fraction() >= MAX_UPPER_SHADOW {
        return None;
    }
    if !(candle.low < ema120 && ema120 < candle.close) {
        return None;
    }

    // The prior 30 candles must all have held above the EMA.
    let window = &snapshot.window;
    if window.len() < PRIOR_WINDOW + 1 {
        return None;
    }
    let prior = &window[window.len() - 1 - PRIOR_WINDOW..window.len() - 1];
    if !prior.iter().all(|c| c.low > ema120) {
        return None;
    }

    Some(PatternHit::simple(
        AlertType::Hammer,
        format!(
            "hammer dipped through EMA120 {ema120:.4} and reclaimed (close {:.4})",
            candle.close
        ),
    ))
}

/// Bullish candle with a dominant lower shadow at a 30-candle low.
pub fn perfect_hammer(candle: &Candle, snapshot: &IndicatorSnapshot) -> Option<PatternHit> {
    if !candle.is_bullish() {
        return None;
    }
    if candle.lower_shadow_fraction() < PERFECT_MIN_LOWER {
        return None;
    }
    if candle.upper_shadow_fraction() > PERFECT_MAX_UPPER {
        return None;
    }

    let window = &snapshot.window;
    if window.len() < PERFECT_LOW_WINDOW {
        return None;
    }
    let low_window = &window[window.len() - PERFECT_LOW_WINDOW..];
    let min_low = low_window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    if candle.low > min_low {
        return None;
    }

    Some(PatternHit::simple(
        AlertType::PerfectHammer,
        format!(
            "perfect hammer at {:.4}, lowest low of {} candles",
            candle.low, PERFECT_LOW_WINDOW
        ),
    ))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::engine::{IndicatorEngine, DEFAULT_CAPACITY};
    use crate::types::{CandleKey, Interval};

    fn key() -> CandleKey {
        CandleKey {
            symbol: "BTCUSDT".into(),
            interval: Interval::M5,
        }
    }

    fn flat_candle(i: i64, level: f64) -> Candle {
        Candle {
            open_time: i * 300_000,
            close_time: (i + 1) * 300_000 - 1,
            open: level,
            high: level + 0.5,
            low: level - 0.5,
            close: level + 0.1,
            volume: 100.0,
            is_final: true,
        }
    }

    fn rising_candle(i: i64) -> Candle {
        let close = 100.0 + i as f64 * 0.2;
        Candle {
            open_time: i * 300_000,
            close_time: (i + 1) * 300_000 - 1,
            open: close - 0.05,
            high: close + 0.1,
            low: close - 0.1,
            close,
            volume: 100.0,
            is_final: true,
        }
    }

    /// Engine over a steady uptrend: EMA120 lags well below the recent
    /// lows, so the prior-window condition holds naturally.
    fn rising_engine(count: i64) -> (IndicatorEngine, CandleKey) {
        let engine = IndicatorEngine::new(DEFAULT_CAPACITY);
        let k = key();
        for i in 0..count {
            engine.on_final_candle(&k, &rising_candle(i));
        }
        (engine, k)
    }

    /// Engine over a flat series at `level`, `count` candles deep.
    fn engine_at(level: f64, count: i64) -> (IndicatorEngine, CandleKey) {
        let engine = IndicatorEngine::new(DEFAULT_CAPACITY);
        let k = key();
        for i in 0..count {
            engine.on_final_candle(&k, &flat_candle(i, level));
        }
        (engine, k)
    }

    /// Long lower wick through the EMA, close back above, shape in bounds.
    fn crossing_hammer_at(ema120: f64, i: i64) -> Candle {
        Candle {
            open_time: i * 300_000,
            close_time: (i + 1) * 300_000 - 1,
            open: ema120 + 2.4,
            high: ema120 + 3.1,
            low: ema120 - 2.0,
            close: ema120 + 3.0,
            volume: 100.0,
            is_final: true,
        }
    }

    #[test]
    fn crossing_hammer_fires() {
        let (engine, k) = rising_engine(160);
        let snap = engine.snapshot(&k).unwrap();
        let ema120 = snap.ema(120).unwrap();

        // Sanity: the prior 30 lows all sit above the lagging EMA.
        let window = &snap.window;
        assert!(window[window.len() - 31..].iter().all(|c| c.low > ema120));

        let hammer = crossing_hammer_at(ema120, 160);
        assert!(hammer_cross_ema120(&hammer, &snap).is_some());
    }

    #[test]
    fn crossing_hammer_requires_reclaim() {
        let (engine, k) = rising_engine(160);
        let snap = engine.snapshot(&k).unwrap();
        let ema120 = snap.ema(120).unwrap();

        // Closes below the EMA: no reclaim, no hit.
        let candle = Candle {
            open_time: 160 * 300_000,
            close_time: 161 * 300_000 - 1,
            open: ema120 - 0.10,
            high: ema120 - 0.05,
            low: ema120 - 2.0,
            close: ema120 - 0.06,
            volume: 100.0,
            is_final: true,
        };
        assert!(hammer_cross_ema120(&candle, &snap).is_none());
    }

    #[test]
    fn crossing_hammer_requires_clean_prior_window() {
        // Recent candles carry deep lows below the EMA: the prior-window
        // condition breaks even though the hammer shape is right.
        let engine = IndicatorEngine::new(DEFAULT_CAPACITY);
        let k = key();
        for i in 0..160i64 {
            let mut c = rising_candle(i);
            if i > 150 {
                c.low = 50.0;
            }
            engine.on_final_candle(&k, &c);
        }
        let snap = engine.snapshot(&k).unwrap();
        let ema120 = snap.ema(120).unwrap();

        let hammer = crossing_hammer_at(ema120, 160);
        assert!(hammer_cross_ema120(&hammer, &snap).is_none());
    }

    #[test]
    fn perfect_hammer_fires_at_window_low() {
        let (engine, k) = engine_at(100.0, 40);
        let snap = engine.snapshot(&k).unwrap();

        // Lower shadow 0.75 of range, tiny upper shadow, low below everything.
        let hammer = Candle {
            open_time: 40 * 300_000,
            close_time: 41 * 300_000 - 1,
            open: 99.5,
            high: 100.0,
            low: 97.5,   // range 2.5
            close: 99.875, // body 0.375, lower shadow (99.5-97.5)/2.5 = 0.8
            volume: 100.0,
            is_final: true,
        };
        assert!(hammer.lower_shadow_fraction() >= 0.70);
        assert!(hammer.upper_shadow_fraction() <= 0.05);
        assert!(perfect_hammer(&hammer, &snap).is_some());
    }

    #[test]
    fn perfect_hammer_requires_the_low() {
        let (engine, k) = engine_at(100.0, 40);
        let snap = engine.snapshot(&k).unwrap();

        // Shape is right but the low (99.0) is above earlier lows (99.5)...
        // actually window lows are 99.5, so use a low above them.
        let hammer = Candle {
            open_time: 40 * 300_000,
            close_time: 41 * 300_000 - 1,
            open: 101.5,
            high: 102.0,
            low: 99.6, // not the window minimum (99.5)
            close: 101.9,
            volume: 100.0,
            is_final: true,
        };
        assert!(perfect_hammer(&hammer, &snap).is_none());
    }

    #[test]
    fn perfect_hammer_requires_bullish_body() {
        let (engine, k) = engine_at(100.0, 40);
        let snap = engine.snapshot(&k).unwrap();

        let bearish = Candle {
            open_time: 40 * 300_000,
            close_time: 41 * 300_000 - 1,
            open: 99.9,
            high: 100.0,
            low: 97.5,
            close: 99.8,
            volume: 100.0,
            is_final: true,
        };
        assert!(perfect_hammer(&bearish, &snap).is_none());
    }
}
