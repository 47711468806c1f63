// =============================================================================
// Pullback-ready detector — retracement of a confirmed surge, stabilizing
// =============================================================================
//
// Looks for the latest swing-low -> swing-high pair with a surge of at
// least 5%, a current price retraced into (0, 0.618] of that leg, and a
// stabilization signal within the last 3 candles.  Volume drying up since
// the swing high strengthens the read and is reported as a percentage.
// =============================================================================

use crate::detect::PatternHit;
use crate::indicators::pivots::SwingKind;
use crate::indicators::IndicatorSnapshot;
use crate::types::{AlertType, Candle};

/// Minimum swing-low -> swing-high surge.
const MIN_SURGE_PCT: f64 = 5.0;
/// Deepest acceptable retracement of the leg.
const MAX_RETRACEMENT: f64 = 0.618;
/// Candles searched for a stabilization signal.
const STABILIZE_WINDOW: usize = 3;
/// "Close to prior high" tolerance for stabilization.
const NEAR_HIGH_PCT: f64 = 0.5;
/// Hammer-shape lower-shadow minimum for stabilization.
const HAMMER_LOWER_SHADOW: f64 = 0.5;

pub fn pullback_ready(snapshot: &IndicatorSnapshot) -> Option<PatternHit> {
    let window = &snapshot.window;
    let close = snapshot.last_close;

    // (a) Latest valid leg: most recent swing high with a swing low before it.
    let swings = snapshot.swings();
    let swing_high = swings.iter().rev().find(|s| s.kind == SwingKind::High)?;
    let swing_low = swings
        .iter()
        .rev()
        .find(|s| s.kind == SwingKind::Low && s.index < swing_high.index)?;

    if swing_low.price <= 0.0 {
        return None;
    }
    let surge_pct = (swing_high.price - swing_low.price) / swing_low.price * 100.0;
    if surge_pct < MIN_SURGE_PCT {
        return None;
    }

    // (b) Current close inside the leg.
    if close <= swing_low.price || close >= swing_high.price {
        return None;
    }

    // (c) Retracement fraction in (0, 0.618].
    let leg = swing_high.price - swing_low.price;
    let retracement = (swing_high.price - close) / leg;
    if retracement <= 0.0 || retracement > MAX_RETRACEMENT {
        return None;
    }

    // (d) Stabilization within the last 3 candles.
    if window.len() < STABILIZE_WINDOW + 1 {
        return None;
    }
    let tail = &window[window.len() - STABILIZE_WINDOW..];
    let stabilized = tail.iter().enumerate().any(|(i, c)| {
        let prior = &window[window.len() - STABILIZE_WINDOW + i - 1];
        is_stabilization(c, prior)
    });
    if !stabilized {
        return None;
    }

    // (e) Volume shrink since the swing high.
    let shrink_pct = volume_shrink_pct(window, swing_low.index, swing_high.index);

    Some(PatternHit::simple(
        AlertType::PullbackReady,
        format!(
            "pullback {:.1}% of a {surge_pct:.1}% surge, volume shrink {shrink_pct:.0}%",
            retracement * 100.0
        ),
    ))
}

/// Hammer shape or a bullish close within 0.5% of the prior candle's high.
fn is_stabilization(candle: &Candle, prior: &Candle) -> bool {
    if candle.lower_shadow_fraction() > HAMMER_LOWER_SHADOW {
        return true;
    }
    if !candle.is_bullish() || prior.high <= 0.0 {
        return false;
    }
    (candle.close - prior.high).abs() / prior.high * 100.0 <= NEAR_HIGH_PCT
}

/// Percent by which average volume after the swing high undercuts the
/// up-leg's average. Clamped at zero: expanding volume is "0% shrink".
fn volume_shrink_pct(window: &[Candle], low_idx: usize, high_idx: usize) -> f64 {
    if high_idx >= window.len() || low_idx >= high_idx {
        return 0.0;
    }
    let leg: Vec<f64> = window[low_idx..=high_idx].iter().map(|c| c.volume).collect();
    let after: Vec<f64> = window[high_idx + 1..].iter().map(|c| c.volume).collect();
    if leg.is_empty() || after.is_empty() {
        return 0.0;
    }
    let leg_avg = leg.iter().sum::<f64>() / leg.len() as f64;
    let after_avg = after.iter().sum::<f64>() / after.len() as f64;
    if leg_avg <= 0.0 {
        return 0.0;
    }
    ((1.0 - after_avg / leg_avg) * 100.0).max(0.0)
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

    fn candle(i: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time: i * 300_000,
            close_time: (i + 1) * 300_000 - 1,
            open,
            high,
            low,
            close,
            volume,
            is_final: true,
        }
    }

    /// Build: flat base at 100, V-shaped dip to 100 (swing low), surge to
    /// 110 (swing high, +10%), then a drift down to `final_close` on light
    /// volume ending with a hammer-shaped candle.
    fn scenario(final_close: f64) -> IndicatorSnapshot {
        let engine = IndicatorEngine::new(DEFAULT_CAPACITY);
        let k = key();
        let mut i = 0i64;

        // Descending into the swing low at 100.
        for step in 0..8 {
            let level = 104.0 - step as f64 * 0.5;
            engine.on_final_candle(&k, &candle(i, level, level + 0.3, level - 0.3, level - 0.2, 200.0));
            i += 1;
        }
        // The swing low candle.
        engine.on_final_candle(&k, &candle(i, 100.3, 100.5, 99.8, 100.2, 220.0));
        i += 1;
        // Surge up to the swing high at 110.
        for step in 0..8 {
            let level = 101.0 + step as f64 * 1.2;
            engine.on_final_candle(&k, &candle(i, level, level + 1.0, level - 0.3, level + 0.9, 300.0));
            i += 1;
        }
        // The swing high candle.
        engine.on_final_candle(&k, &candle(i, 109.5, 110.0, 109.0, 109.8, 320.0));
        i += 1;
        // Pullback on shrinking volume.
        for step in 0..6 {
            let level = 109.0 - step as f64 * ((109.0 - final_close) / 6.0);
            engine.on_final_candle(&k, &candle(i, level, level + 0.3, level - 0.4, level - 0.2, 80.0));
            i += 1;
        }
        // Final stabilization candle: hammer shape at the target close.
        engine.on_final_candle(
            &k,
            &candle(i, final_close + 0.1, final_close + 0.2, final_close - 1.5, final_close, 70.0),
        );

        engine.snapshot(&k).unwrap()
    }

    #[test]
    fn valid_pullback_fires() {
        // Retracement from 110 toward 100: close at 106 is 40% of the leg.
        let snap = scenario(106.0);
        let hit = pullback_ready(&snap);
        assert!(hit.is_some(), "expected pullback hit");
        let hit = hit.unwrap();
        assert_eq!(hit.alert_type, AlertType::PullbackReady);
        assert!(hit.description.contains("volume shrink"));
    }

    #[test]
    fn too_deep_retracement_is_silent() {
        // Close at 101.5: ~85% retracement, beyond 0.618.
        let snap = scenario(101.5);
        assert!(pullback_ready(&snap).is_none());
    }

    #[test]
    fn stabilization_via_near_prior_high() {
        let c = candle(1, 100.0, 100.6, 99.9, 100.45, 100.0);
        let prior = candle(0, 100.0, 100.5, 99.5, 100.2, 100.0);
        assert!(is_stabilization(&c, &prior));
    }

    #[test]
    fn bearish_candle_is_not_near_high_stabilization() {
        // Same proximity but bearish, and no hammer shadow.
        let c = candle(1, 100.6, 100.7, 100.3, 100.45, 100.0);
        let prior = candle(0, 100.0, 100.5, 99.5, 100.2, 100.0);
        assert!(!is_stabilization(&c, &prior));
    }

    #[test]
    fn volume_shrink_math() {
        let mut window = Vec::new();
        for i in 0..10i64 {
            window.push(candle(i, 100.0, 101.0, 99.0, 100.5, 200.0));
        }
        for i in 10..14i64 {
            window.push(candle(i, 100.0, 101.0, 99.0, 100.5, 50.0));
        }
        // Leg 0..=9 at 200, after at 50: 75% shrink.
        let shrink = volume_shrink_pct(&window, 0, 9);
        assert!((shrink - 75.0).abs() < 1e-9);
    }
}
