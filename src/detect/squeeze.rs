// =============================================================================
// Squeeze detector — EMA20/EMA60 convergence
// =============================================================================
//
// A squeeze is the state in which the short and medium EMAs sit unusually
// close together, often preceding a breakout.  The hit carries the exact
// convergence so the alert engine can let a *tightening* squeeze bypass its
// cooldown.
// =============================================================================

use crate::detect::PatternHit;
use crate::indicators::IndicatorSnapshot;
use crate::types::AlertType;

/// Convergence threshold: |EMA20 - EMA60| / price, in percent.
pub const SQUEEZE_THRESHOLD_PCT: f64 = 0.03;

pub fn squeeze(snapshot: &IndicatorSnapshot) -> Option<PatternHit> {
    let pct = snapshot.squeeze_pct()?;
    if pct > SQUEEZE_THRESHOLD_PCT {
        return None;
    }

    Some(PatternHit {
        alert_type: AlertType::Squeeze,
        level_type: None,
        level_price: None,
        distance_pct: 0.0,
        strength: 0.0,
        squeeze_pct: Some(pct),
        description: format!("EMA20/EMA60 squeeze at {pct:.4}% of price"),
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::types::{CandleKey, Interval};

    fn snapshot(price: f64, e20: f64, e60: f64) -> IndicatorSnapshot {
        let mut emas = HashMap::new();
        emas.insert(20, e20);
        emas.insert(60, e60);
        IndicatorSnapshot {
            key: CandleKey {
                symbol: "BTCUSDT".into(),
                interval: Interval::M5,
            },
            last_close: price,
            last_open_time: 0,
            emas,
            atr14: None,
            volume_baseline: None,
            window: Vec::new(),
        }
    }

    #[test]
    fn tight_convergence_fires() {
        // |100.01 - 100.00| / 100 = 0.01% <= 0.03%
        let snap = snapshot(100.0, 100.01, 100.00);
        let hit = squeeze(&snap).expect("tight squeeze should fire");
        assert!((hit.squeeze_pct.unwrap() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn just_inside_threshold_fires() {
        // 0.0293% of price, comfortably under 0.03% without sitting on the
        // floating-point boundary.
        let snap = snapshot(100.0, 100.029296875, 100.0);
        assert!(squeeze(&snap).is_some());
    }

    #[test]
    fn just_outside_threshold_is_silent() {
        let snap = snapshot(100.0, 100.03125, 100.0);
        assert!(squeeze(&snap).is_none());
    }

    #[test]
    fn wide_gap_is_silent() {
        let snap = snapshot(100.0, 100.5, 100.0);
        assert!(squeeze(&snap).is_none());
    }

    #[test]
    fn missing_emas_is_silent() {
        let mut snap = snapshot(100.0, 100.0, 100.0);
        snap.emas.remove(&60);
        assert!(squeeze(&snap).is_none());
    }
}
