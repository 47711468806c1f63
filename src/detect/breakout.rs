// =============================================================================
// BreakoutPredictor — weighted composite score over five features
// =============================================================================
//
// Each sub-score lives in 0–100 and leans toward "coiled spring" readings:
// contracting ranges, drying volume, converging EMAs, price pinned to a
// level, and fresh reversal patterns.  The total is a fixed-weight mean;
// weights are stable so scores stay comparable across time and symbols.
//
//   volatility     0.25   range contraction (recent vs prior)
//   volume         0.15   volume contraction (recent vs prior)
//   ma_convergence 0.25   EMA20/EMA60 gap
//   position       0.20   distance to the nearest S/R level
//   pattern        0.15   recent candlestick patterns
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSnapshot;
use crate::types::{Candle, Direction, FeatureScores, LevelType, SrLevel};

/// Candles needed before a prediction is meaningful.
const MIN_HISTORY: usize = 40;

/// Recent window for contraction measures; the preceding window is the
/// baseline.
const RECENT_WINDOW: usize = 10;
const BASELINE_WINDOW: usize = 30;

/// EMA gap (pct of price) at or under which convergence scores 100.
const TIGHTEST_GAP_PCT: f64 = 0.03;
/// EMA gap at which convergence scores 0.
const WIDEST_GAP_PCT: f64 = 1.0;

/// Distance to the nearest level (pct) at which position scores 0.
const FAR_LEVEL_PCT: f64 = 2.0;

const WEIGHTS: FeatureScores = FeatureScores {
    volatility: 0.25,
    volume: 0.15,
    ma_convergence: 0.25,
    position: 0.20,
    pattern: 0.15,
};

/// The predictor's full output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutPrediction {
    pub total_score: f64,
    pub scores: FeatureScores,
    pub predicted_direction: Direction,
}

/// Score the current setup. `None` when history is too short to say
/// anything.
pub fn predict(snapshot: &IndicatorSnapshot, levels: &[SrLevel]) -> Option<BreakoutPrediction> {
    let window = &snapshot.window;
    if window.len() < MIN_HISTORY {
        return None;
    }

    let scores = FeatureScores {
        volatility: volatility_score(window),
        volume: volume_score(window),
        ma_convergence: ma_convergence_score(snapshot),
        position: position_score(snapshot.last_close, levels),
        pattern: pattern_score(window),
    };

    let total_score = scores.volatility * WEIGHTS.volatility
        + scores.volume * WEIGHTS.volume
        + scores.ma_convergence * WEIGHTS.ma_convergence
        + scores.position * WEIGHTS.position
        + scores.pattern * WEIGHTS.pattern;

    Some(BreakoutPrediction {
        total_score,
        scores,
        predicted_direction: predicted_direction(snapshot, levels),
    })
}

/// Higher when recent ranges have contracted versus the prior baseline.
fn volatility_score(window: &[Candle]) -> f64 {
    contraction_score(window, |c| c.high - c.low)
}

/// Higher when recent volume has dried up versus the prior baseline.
fn volume_score(window: &[Candle]) -> f64 {
    contraction_score(window, |c| c.volume)
}

/// Shared contraction shape: 0 when the recent mean matches (or exceeds)
/// the baseline mean, scaling to 100 as it contracts to half.
fn contraction_score(window: &[Candle], metric: impl Fn(&Candle) -> f64) -> f64 {
    let n = window.len();
    if n < RECENT_WINDOW + BASELINE_WINDOW {
        return 0.0;
    }
    let recent = &window[n - RECENT_WINDOW..];
    let baseline = &window[n - RECENT_WINDOW - BASELINE_WINDOW..n - RECENT_WINDOW];

    let recent_avg = recent.iter().map(&metric).sum::<f64>() / recent.len() as f64;
    let baseline_avg = baseline.iter().map(&metric).sum::<f64>() / baseline.len() as f64;
    if baseline_avg <= 0.0 {
        return 0.0;
    }

    let contraction = 1.0 - recent_avg / baseline_avg;
    (contraction * 200.0).clamp(0.0, 100.0)
}

/// 100 at the squeeze threshold or tighter, 0 at a 1% gap, linear between.
fn ma_convergence_score(snapshot: &IndicatorSnapshot) -> f64 {
    let Some(gap_pct) = snapshot.squeeze_pct() else {
        return 0.0;
    };
    if gap_pct <= TIGHTEST_GAP_PCT {
        return 100.0;
    }
    let span = WIDEST_GAP_PCT - TIGHTEST_GAP_PCT;
    ((1.0 - (gap_pct - TIGHTEST_GAP_PCT) / span) * 100.0).clamp(0.0, 100.0)
}

/// 100 on top of the nearest level, 0 at 2% away or with no levels.
fn position_score(price: f64, levels: &[SrLevel]) -> f64 {
    let Some(distance_pct) = nearest_level(price, levels).map(|(d, _)| d) else {
        return 0.0;
    };
    ((1.0 - distance_pct / FAR_LEVEL_PCT) * 100.0).clamp(0.0, 100.0)
}

/// Quality of recent reversal patterns over the last three candles.
fn pattern_score(window: &[Candle]) -> f64 {
    let n = window.len();
    let tail = &window[n.saturating_sub(3)..];

    let mut score: f64 = 0.0;
    for (i, candle) in tail.iter().enumerate() {
        // Hammer shape.
        if candle.lower_shadow_fraction() > 0.5 && candle.upper_shadow_fraction() < 0.2 {
            score = score.max(60.0);
        }
        // Doji-ish indecision.
        if candle.body_fraction() <= 0.1 {
            score = score.max(40.0);
        }
        // Bullish engulfing against the previous candle.
        let prev = if i == 0 {
            if n < 4 {
                continue;
            }
            &window[n - 4]
        } else {
            &tail[i - 1]
        };
        if candle.is_bullish()
            && !prev.is_bullish()
            && candle.open <= prev.close
            && candle.close >= prev.open
        {
            score = score.max(70.0);
        }
    }
    score
}

/// Distance (pct) and kind of the nearest level.
fn nearest_level(price: f64, levels: &[SrLevel]) -> Option<(f64, LevelType)> {
    levels
        .iter()
        .filter(|l| l.price > 0.0)
        .map(|l| ((price - l.price).abs() / l.price * 100.0, l.level_type))
        .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
}

/// Direction from the EMA trend and what kind of level sits closest:
/// trending up into resistance reads as an upside break, trending down
/// onto support as a downside break.
fn predicted_direction(snapshot: &IndicatorSnapshot, levels: &[SrLevel]) -> Direction {
    let (Some(e20), Some(e60)) = (snapshot.ema(20), snapshot.ema(60)) else {
        return Direction::Unclear;
    };
    let Some((_, kind)) = nearest_level(snapshot.last_close, levels) else {
        return Direction::Unclear;
    };

    match (e20 > e60, kind) {
        (true, LevelType::Resistance) => Direction::Up,
        (false, LevelType::Support) => Direction::Down,
        _ => Direction::Unclear,
    }
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

    fn candle(i: i64, close: f64, range: f64, volume: f64) -> Candle {
        Candle {
            open_time: i * 300_000,
            close_time: (i + 1) * 300_000 - 1,
            open: close - range * 0.1,
            high: close + range / 2.0,
            low: close - range / 2.0,
            close,
            volume,
            is_final: true,
        }
    }

    /// Wide, busy candles early; tight, quiet candles late.
    fn coiling_snapshot() -> IndicatorSnapshot {
        let engine = IndicatorEngine::new(DEFAULT_CAPACITY);
        let k = key();
        for i in 0..70i64 {
            let (range, volume) = if i < 60 { (4.0, 400.0) } else { (1.0, 100.0) };
            engine.on_final_candle(&k, &candle(i, 100.0, range, volume));
        }
        engine.snapshot(&k).unwrap()
    }

    fn level(price: f64, kind: LevelType) -> SrLevel {
        SrLevel {
            level_type: kind,
            price,
            strength: 5.0,
            touch_count: 3,
        }
    }

    #[test]
    fn insufficient_history_returns_none() {
        let engine = IndicatorEngine::new(DEFAULT_CAPACITY);
        let k = key();
        for i in 0..20i64 {
            engine.on_final_candle(&k, &candle(i, 100.0, 2.0, 100.0));
        }
        let snap = engine.snapshot(&k).unwrap();
        assert!(predict(&snap, &[]).is_none());
    }

    #[test]
    fn coiling_market_scores_high_on_contraction() {
        let snap = coiling_snapshot();
        let pred = predict(&snap, &[level(100.05, LevelType::Resistance)]).unwrap();

        assert!(pred.scores.volatility > 80.0, "volatility {:?}", pred.scores);
        assert!(pred.scores.volume > 80.0, "volume {:?}", pred.scores);
        // Flat series: EMAs nearly identical.
        assert!(pred.scores.ma_convergence > 90.0, "ma {:?}", pred.scores);
        // Price within 0.05% of the level.
        assert!(pred.scores.position > 95.0, "position {:?}", pred.scores);
        assert!(pred.total_score > 60.0);
    }

    #[test]
    fn expanding_market_scores_low() {
        let engine = IndicatorEngine::new(DEFAULT_CAPACITY);
        let k = key();
        for i in 0..70i64 {
            let (range, volume) = if i < 60 { (1.0, 100.0) } else { (5.0, 800.0) };
            engine.on_final_candle(&k, &candle(i, 100.0, range, volume));
        }
        let snap = engine.snapshot(&k).unwrap();
        let pred = predict(&snap, &[]).unwrap();
        assert_eq!(pred.scores.volatility, 0.0);
        assert_eq!(pred.scores.volume, 0.0);
        assert_eq!(pred.scores.position, 0.0);
    }

    #[test]
    fn direction_up_into_resistance() {
        let engine = IndicatorEngine::new(DEFAULT_CAPACITY);
        let k = key();
        for i in 0..70i64 {
            engine.on_final_candle(&k, &candle(i, 100.0 + i as f64 * 0.5, 1.0, 100.0));
        }
        let snap = engine.snapshot(&k).unwrap();
        let pred = predict(&snap, &[level(snap.last_close * 1.001, LevelType::Resistance)]).unwrap();
        assert_eq!(pred.predicted_direction, Direction::Up);
    }

    #[test]
    fn direction_down_onto_support() {
        let engine = IndicatorEngine::new(DEFAULT_CAPACITY);
        let k = key();
        for i in 0..70i64 {
            engine.on_final_candle(&k, &candle(i, 200.0 - i as f64 * 0.5, 1.0, 100.0));
        }
        let snap = engine.snapshot(&k).unwrap();
        let pred = predict(&snap, &[level(snap.last_close * 0.999, LevelType::Support)]).unwrap();
        assert_eq!(pred.predicted_direction, Direction::Down);
    }

    #[test]
    fn direction_unclear_without_levels() {
        let snap = coiling_snapshot();
        let pred = predict(&snap, &[]).unwrap();
        assert_eq!(pred.predicted_direction, Direction::Unclear);
    }

    #[test]
    fn weights_sum_to_one() {
        let w = WEIGHTS;
        let sum = w.volatility + w.volume + w.ma_convergence + w.position + w.pattern;
        assert!((sum - 1.0).abs() < 1e-12);
    }
}
