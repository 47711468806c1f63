// =============================================================================
// Support / resistance levels — pivot clustering and proximity alerts
// =============================================================================
//
// Levels come from a clustering pass over the swing points of a 200-candle
// window: nearby pivots merge into a cluster, a cluster with enough touches
// becomes a level, strength grows with touch count and recency, and only
// the strongest levels are kept.  Levels regenerate as the window advances.
//
// Proximity alerts (TOUCHED within 0.1%, APPROACHING within 0.5%) are
// gated: they only emit when the breakout score clears the configured
// minimum or the 24h move is already large.
// =============================================================================

use crate::detect::PatternHit;
use crate::indicators::pivots::{find_swings, DEFAULT_WING};
use crate::types::{AlertType, Candle, LevelType, SrLevel};

#[derive(Debug, Clone)]
pub struct SrConfig {
    /// Pivots within this percent of each other merge into one cluster.
    pub cluster_threshold_pct: f64,
    /// Touches required before a cluster becomes a level.
    pub min_touch_count: u32,
    /// Levels kept, strongest first.
    pub max_levels: usize,
    /// Candle window the pivots are mined from.
    pub window: usize,
}

impl Default for SrConfig {
    fn default() -> Self {
        Self {
            cluster_threshold_pct: 0.4,
            min_touch_count: 2,
            max_levels: 15,
            window: 200,
        }
    }
}

/// Proximity thresholds, percent distance from the level.
pub const TOUCHED_PCT: f64 = 0.1;
pub const APPROACHING_PCT: f64 = 0.5;
/// 24h gain that lets proximity alerts through regardless of score.
pub const GAIN_OVERRIDE_PCT: f64 = 10.0;

/// Build the current level set from a candle window.
pub fn build_levels(candles: &[Candle], current_price: f64, config: &SrConfig) -> Vec<SrLevel> {
    if current_price <= 0.0 {
        return Vec::new();
    }
    let window = if candles.len() > config.window {
        &candles[candles.len() - config.window..]
    } else {
        candles
    };

    let swings = find_swings(window, DEFAULT_WING);
    if swings.is_empty() {
        return Vec::new();
    }

    // Sort pivot prices ascending, carrying their window index for recency.
    let mut points: Vec<(f64, usize)> = swings.iter().map(|s| (s.price, s.index)).collect();
    points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    // Greedy clustering: a point joins the open cluster while it stays
    // within the threshold of the cluster's first price.
    let mut levels = Vec::new();
    let mut cluster: Vec<(f64, usize)> = Vec::new();
    for point in points {
        match cluster.first() {
            Some(&(anchor, _))
                if (point.0 - anchor) / anchor * 100.0 <= config.cluster_threshold_pct =>
            {
                cluster.push(point);
            }
            _ => {
                if let Some(level) = close_cluster(&cluster, current_price, window.len(), config) {
                    levels.push(level);
                }
                cluster = vec![point];
            }
        }
    }
    if let Some(level) = close_cluster(&cluster, current_price, window.len(), config) {
        levels.push(level);
    }

    levels.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
    levels.truncate(config.max_levels);
    levels
}

fn close_cluster(
    cluster: &[(f64, usize)],
    current_price: f64,
    window_len: usize,
    config: &SrConfig,
) -> Option<SrLevel> {
    if (cluster.len() as u32) < config.min_touch_count {
        return None;
    }

    let price = cluster.iter().map(|(p, _)| p).sum::<f64>() / cluster.len() as f64;
    let newest = cluster.iter().map(|(_, i)| *i).max().unwrap_or(0);
    let recency = if window_len > 1 {
        newest as f64 / (window_len - 1) as f64
    } else {
        0.0
    };

    // More touches and fresher touches make a stronger level.
    let strength = cluster.len() as f64 * (1.0 + 0.5 * recency);

    Some(SrLevel {
        level_type: if price <= current_price {
            LevelType::Support
        } else {
            LevelType::Resistance
        },
        price,
        strength,
        touch_count: cluster.len() as u32,
    })
}

/// Proximity hits against the active level set, subject to the score/gain
/// gate. Several levels can qualify at once; the alert engine's per-level
/// cooldown sorts out repeats.
pub fn proximity_hits(
    levels: &[SrLevel],
    price: f64,
    breakout_score: Option<f64>,
    min_breakout_score: f64,
    gain_24h_pct: Option<f64>,
) -> Vec<PatternHit> {
    let score_ok = breakout_score.map_or(false, |s| s >= min_breakout_score);
    let gain_ok = gain_24h_pct.map_or(false, |g| g >= GAIN_OVERRIDE_PCT);
    if !score_ok && !gain_ok {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for level in levels {
        if level.price <= 0.0 {
            continue;
        }
        let distance_pct = (price - level.price).abs() / level.price * 100.0;

        let alert_type = if distance_pct <= TOUCHED_PCT {
            AlertType::Touched
        } else if distance_pct <= APPROACHING_PCT {
            AlertType::Approaching
        } else {
            continue;
        };

        hits.push(PatternHit {
            alert_type,
            level_type: Some(level.level_type),
            level_price: Some(level.price),
            distance_pct,
            strength: level.strength,
            squeeze_pct: None,
            description: format!(
                "price {price:.4} {} {} {:.4} ({distance_pct:.2}% away, {} touches)",
                if alert_type == AlertType::Touched { "touched" } else { "approaching" },
                level.level_type.as_str(),
                level.price,
                level.touch_count
            ),
        });
    }
    hits
}
