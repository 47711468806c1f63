// =============================================================================
// Pivot swing detection — local extrema over L-candle wings
// =============================================================================
//
// A candle at index i is a swing high when its high strictly exceeds the
// highs of the L candles on each side; swing lows are symmetric.  The last
// L candles can never be confirmed swings (their right wing is unknown).
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::Candle;

/// Wing width on each side of a candidate pivot.
pub const DEFAULT_WING: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

/// A confirmed swing point within a candle window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwingPoint {
    pub kind: SwingKind,
    /// Index into the window the swing was found in.
    pub index: usize,
    /// The swing price (high for swing highs, low for swing lows).
    pub price: f64,
    pub open_time: i64,
}

/// Find every confirmed swing point in `candles` using `wing` candles on
/// each side. Strict inequality: plateaus do not confirm.
pub fn find_swings(candles: &[Candle], wing: usize) -> Vec<SwingPoint> {
    let mut swings = Vec::new();
    if wing == 0 || candles.len() < 2 * wing + 1 {
        return swings;
    }

    for i in wing..candles.len() - wing {
        let c = &candles[i];

        let is_high = (i - wing..i + wing + 1)
            .filter(|&j| j != i)
            .all(|j| c.high > candles[j].high);
        if is_high {
            swings.push(SwingPoint {
                kind: SwingKind::High,
                index: i,
                price: c.high,
                open_time: c.open_time,
            });
            continue;
        }

        let is_low = (i - wing..i + wing + 1)
            .filter(|&j| j != i)
            .all(|j| c.low < candles[j].low);
        if is_low {
            swings.push(SwingPoint {
                kind: SwingKind::Low,
                index: i,
                price: c.low,
                open_time: c.open_time,
            });
        }
    }

    swings
}

/// The most recent confirmed swing of `kind`, if any.
pub fn latest_swing(candles: &[Candle], wing: usize, kind: SwingKind) -> Option<SwingPoint> {
    find_swings(candles, wing)
        .into_iter()
        .rev()
        .find(|s| s.kind == kind)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(i: i64, high: f64, low: f64) -> Candle {
        Candle {
            open_time: i * 300_000,
            close_time: (i + 1) * 300_000 - 1,
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 100.0,
            is_final: true,
        }
    }

    /// Tent-shaped series: one obvious swing high at the apex.
    #[test]
    fn tent_has_one_swing_high() {
        let mut candles = Vec::new();
        for i in 0..13i64 {
            let h = 100.0 - (i - 6).abs() as f64; // peak at index 6
            candles.push(candle(i, h, h - 2.0));
        }
        let swings = find_swings(&candles, 5);
        let highs: Vec<_> = swings.iter().filter(|s| s.kind == SwingKind::High).collect();
        assert_eq!(highs.len(), 1);
        assert_eq!(highs[0].index, 6);
        assert!((highs[0].price - 100.0).abs() < 1e-12);
    }

    #[test]
    fn valley_has_one_swing_low() {
        let mut candles = Vec::new();
        for i in 0..13i64 {
            let l = 50.0 + (i - 6).abs() as f64; // trough at index 6
            candles.push(candle(i, l + 2.0, l));
        }
        let swings = find_swings(&candles, 5);
        let lows: Vec<_> = swings.iter().filter(|s| s.kind == SwingKind::Low).collect();
        assert_eq!(lows.len(), 1);
        assert_eq!(lows[0].index, 6);
    }

    #[test]
    fn plateau_does_not_confirm() {
        // Two equal highs: strict comparison rejects both.
        let mut candles = Vec::new();
        for i in 0..13i64 {
            let h = if i == 6 || i == 7 { 100.0 } else { 90.0 };
            candles.push(candle(i, h, h - 2.0));
        }
        let swings = find_swings(&candles, 5);
        assert!(swings.iter().all(|s| s.kind != SwingKind::High));
    }

    #[test]
    fn too_short_window_yields_nothing() {
        let candles: Vec<Candle> = (0..10).map(|i| candle(i, 100.0 + i as f64, 90.0)).collect();
        assert!(find_swings(&candles, 5).is_empty());
    }

    #[test]
    fn latest_swing_picks_most_recent() {
        // Two tents back to back: peaks at 6 and 18.
        let mut candles = Vec::new();
        for i in 0..25i64 {
            let d = (i - 6).abs().min((i - 18).abs()) as f64;
            let h = 100.0 - d;
            candles.push(candle(i, h, h - 2.0));
        }
        let latest = latest_swing(&candles, 5, SwingKind::High).unwrap();
        assert_eq!(latest.index, 18);
    }
}
