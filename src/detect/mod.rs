// =============================================================================
// Detection layer — pattern detectors, OI anomaly sweep, breakout scoring
// =============================================================================
//
// Every pattern detector is a pure function of (candle, indicator snapshot)
// returning `Option<PatternHit>`; callers pattern-match.  Detectors never
// throw into the stream loop.
// =============================================================================

pub mod breakout;
pub mod doji;
pub mod enrichment;
pub mod hammer;
pub mod oi_anomaly;
pub mod pipeline;
pub mod pullback;
pub mod sr_levels;
pub mod squeeze;
pub mod streak;
pub mod volume_surge;

use crate::types::{AlertType, LevelType};

/// A detector hit, before alert-engine gating and enrichment.
#[derive(Debug, Clone)]
pub struct PatternHit {
    pub alert_type: AlertType,
    pub level_type: Option<LevelType>,
    pub level_price: Option<f64>,
    /// Distance to the level in percent (S/R hits), 0 otherwise.
    pub distance_pct: f64,
    /// Level strength for S/R hits; carries the surge multiplier for
    /// volume hits.
    pub strength: f64,
    /// EMA20/EMA60 convergence at hit time; set by the squeeze detector so
    /// the alert engine can compare tightness across alerts.
    pub squeeze_pct: Option<f64>,
    pub description: String,
}

impl PatternHit {
    /// Plain hit with only a type and description.
    pub fn simple(alert_type: AlertType, description: String) -> Self {
        Self {
            alert_type,
            level_type: None,
            level_price: None,
            distance_pct: 0.0,
            strength: 0.0,
            squeeze_pct: None,
            description,
        }
    }
}
