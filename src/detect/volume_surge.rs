// =============================================================================
// Volume surge detector — tiered multiples of the rolling baseline
// =============================================================================
//
// Final candles alert from 5x baseline upward when the candle is bullish
// with a modest upper shadow.  Provisional (mid-candle) volume only alerts
// at the higher tiers (10x for up moves, 20x for down moves) and walks a
// progressive ladder per candle (10 -> 15 -> 20) so one swelling candle
// cannot re-alert at the same tier.
//
// This is the one detector exempt from the EMA30>EMA60 trend gate: a pure
// volume event is informative in any trend.
// =============================================================================

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::detect::PatternHit;
use crate::indicators::IndicatorSnapshot;
use crate::types::{AlertType, Candle, CandleKey};

/// Alert tiers for final candles.
pub const FINAL_TIERS: [f64; 4] = [5.0, 10.0, 15.0, 20.0];
/// Progressive ladder for provisional candles.
pub const PROVISIONAL_TIERS: [f64; 3] = [10.0, 15.0, 20.0];
/// Tier at or above which a final-candle surge is flagged important.
pub const IMPORTANT_TIER: f64 = 10.0;

/// Max upper-shadow fraction for a valid surge candle.
const MAX_UPPER_SHADOW: f64 = 0.5;

pub struct VolumeSurgeDetector {
    /// Highest provisional tier already alerted per key, by candle
    /// open_time. One entry per key; a new candle resets the ladder.
    ladder: Mutex<HashMap<CandleKey, (i64, f64)>>,
}

impl VolumeSurgeDetector {
    pub fn new() -> Self {
        Self {
            ladder: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate a final candle. The candle must be bullish with a
    /// controlled upper shadow and volume at least 5x baseline.
    pub fn evaluate_final(
        &self,
        key: &CandleKey,
        candle: &Candle,
        snapshot: &IndicatorSnapshot,
    ) -> Option<PatternHit> {
        // Final candle closes the ladder for its open_time.
        self.ladder.lock().remove(key);

        let baseline = snapshot.volume_baseline?;
        if baseline <= 0.0 {
            return None;
        }
        let ratio = candle.volume / baseline;

        if !candle.is_bullish() || candle.upper_shadow_fraction() >= MAX_UPPER_SHADOW {
            return None;
        }

        let tier = highest_tier(&FINAL_TIERS, ratio)?;
        let important = tier >= IMPORTANT_TIER;

        Some(PatternHit {
            alert_type: AlertType::VolumeSurge,
            level_type: None,
            level_price: None,
            distance_pct: 0.0,
            strength: tier,
            squeeze_pct: None,
            description: format!(
                "volume {ratio:.1}x baseline (tier {tier:.0}x{})",
                if important { ", important" } else { "" }
            ),
        })
    }

    /// Evaluate a provisional candle mid-period. Up moves need 10x, down
    /// moves 20x; each tier fires at most once per candle.
    pub fn evaluate_provisional(
        &self,
        key: &CandleKey,
        candle: &Candle,
        snapshot: &IndicatorSnapshot,
    ) -> Option<PatternHit> {
        let baseline = snapshot.volume_baseline?;
        if baseline <= 0.0 {
            return None;
        }
        let ratio = candle.volume / baseline;

        let min_tier = if candle.close >= candle.open {
            PROVISIONAL_TIERS[0]
        } else {
            // Down moves must be extreme before a mid-candle alert.
            *PROVISIONAL_TIERS.last().expect("tiers non-empty")
        };
        if ratio < min_tier {
            return None;
        }
        let tier = highest_tier(&PROVISIONAL_TIERS, ratio)?;

        // Progressive ladder: only a strictly higher tier re-alerts within
        // the same candle.
        {
            let mut ladder = self.ladder.lock();
            match ladder.get(key) {
                Some((open_time, alerted)) if *open_time == candle.open_time => {
                    if tier <= *alerted {
                        return None;
                    }
                }
                _ => {}
            }
            ladder.insert(key.clone(), (candle.open_time, tier));
        }

        Some(PatternHit {
            alert_type: AlertType::VolumeSurge,
            level_type: None,
            level_price: None,
            distance_pct: 0.0,
            strength: tier,
            squeeze_pct: None,
            description: format!("provisional volume {ratio:.1}x baseline (tier {tier:.0}x)"),
        })
    }
}

impl Default for VolumeSurgeDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// The highest tier at or below `ratio`, if any tier is reached.
fn highest_tier(tiers: &[f64], ratio: f64) -> Option<f64> {
    tiers.iter().copied().filter(|&t| ratio >= t).fold(None, |acc, t| {
        Some(acc.map_or(t, |a: f64| a.max(t)))
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::engine::{IndicatorEngine, DEFAULT_CAPACITY};
    use crate::types::Interval;

    fn key() -> CandleKey {
        CandleKey {
            symbol: "BTCUSDT".into(),
            interval: Interval::M5,
        }
    }

    fn bullish_candle(i: i64, volume: f64) -> Candle {
        Candle {
            open_time: i * 300_000,
            close_time: (i + 1) * 300_000 - 1,
            open: 100.0,
            high: 102.1,
            low: 99.0,
            close: 102.0,
            volume,
            is_final: true,
        }
    }

    fn snapshot_with_baseline_100() -> IndicatorSnapshot {
        let engine = IndicatorEngine::new(DEFAULT_CAPACITY);
        let k = key();
        for i in 0..21i64 {
            engine.on_final_candle(&k, &bullish_candle(i, 100.0));
        }
        engine.snapshot(&k).unwrap()
    }

    #[test]
    fn surge_fires_at_five_x() {
        let det = VolumeSurgeDetector::new();
        let snap = snapshot_with_baseline_100();
        let hit = det
            .evaluate_final(&key(), &bullish_candle(21, 520.0), &snap)
            .expect("5x surge should fire");
        assert_eq!(hit.alert_type, AlertType::VolumeSurge);
        assert_eq!(hit.strength, 5.0);
    }

    #[test]
    fn no_surge_below_five_x() {
        let det = VolumeSurgeDetector::new();
        let snap = snapshot_with_baseline_100();
        assert!(det
            .evaluate_final(&key(), &bullish_candle(21, 480.0), &snap)
            .is_none());
    }

    #[test]
    fn bearish_final_candle_never_fires() {
        let det = VolumeSurgeDetector::new();
        let snap = snapshot_with_baseline_100();
        let mut candle = bullish_candle(21, 2500.0);
        candle.open = 102.0;
        candle.close = 100.0;
        assert!(det.evaluate_final(&key(), &candle, &snap).is_none());
    }

    #[test]
    fn heavy_upper_shadow_rejected() {
        let det = VolumeSurgeDetector::new();
        let snap = snapshot_with_baseline_100();
        let mut candle = bullish_candle(21, 2500.0);
        // Range 10, close barely above open near the bottom: upper shadow dominates.
        candle.open = 100.0;
        candle.close = 100.5;
        candle.high = 110.0;
        candle.low = 100.0;
        assert!(det.evaluate_final(&key(), &candle, &snap).is_none());
    }

    #[test]
    fn tier_picks_highest_reached() {
        let det = VolumeSurgeDetector::new();
        let snap = snapshot_with_baseline_100();
        let hit = det
            .evaluate_final(&key(), &bullish_candle(21, 1700.0), &snap)
            .unwrap();
        assert_eq!(hit.strength, 15.0);
    }

    #[test]
    fn provisional_ladder_is_progressive() {
        let det = VolumeSurgeDetector::new();
        let snap = snapshot_with_baseline_100();
        let k = key();

        let mut c = bullish_candle(21, 1100.0);
        c.is_final = false;

        // First crossing of 10x fires.
        assert!(det.evaluate_provisional(&k, &c, &snap).is_some());
        // Same tier again: suppressed.
        c.volume = 1200.0;
        assert!(det.evaluate_provisional(&k, &c, &snap).is_none());
        // 15x fires.
        c.volume = 1550.0;
        let hit = det.evaluate_provisional(&k, &c, &snap).unwrap();
        assert_eq!(hit.strength, 15.0);
        // 20x fires.
        c.volume = 2100.0;
        assert_eq!(det.evaluate_provisional(&k, &c, &snap).unwrap().strength, 20.0);
        // Nothing above 20x.
        c.volume = 5000.0;
        assert!(det.evaluate_provisional(&k, &c, &snap).is_none());
    }

    #[test]
    fn provisional_down_move_needs_twenty_x() {
        let det = VolumeSurgeDetector::new();
        let snap = snapshot_with_baseline_100();
        let k = key();

        let mut c = bullish_candle(21, 1500.0);
        c.is_final = false;
        c.open = 102.0;
        c.close = 100.0; // down move

        assert!(det.evaluate_provisional(&k, &c, &snap).is_none());
        c.volume = 2100.0;
        assert!(det.evaluate_provisional(&k, &c, &snap).is_some());
    }

    #[test]
    fn new_candle_resets_ladder() {
        let det = VolumeSurgeDetector::new();
        let snap = snapshot_with_baseline_100();
        let k = key();

        let mut c = bullish_candle(21, 1100.0);
        c.is_final = false;
        assert!(det.evaluate_provisional(&k, &c, &snap).is_some());

        // Next candle: the 10x tier may fire again.
        let mut next = bullish_candle(22, 1100.0);
        next.is_final = false;
        assert!(det.evaluate_provisional(&k, &next, &snap).is_some());
    }
}
