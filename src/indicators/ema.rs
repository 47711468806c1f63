// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = (close_t - EMA_{t-1}) * multiplier + EMA_{t-1}
//
// The very first EMA value is seeded with the SMA of the first `period`
// closes.  The engine maintains EMAs incrementally via `ema_step`; the
// series form exists for warm-up and detector windows.
// =============================================================================

/// One incremental EMA update.
pub fn ema_step(prev_ema: f64, close: f64, period: usize) -> f64 {
    let multiplier = 2.0 / (period as f64 + 1.0);
    (close - prev_ema) * multiplier + prev_ema
}

/// Compute the EMA series for the given `closes` slice and look-back
/// `period`.
///
/// Returns an empty `Vec` when the input is too short or the period is
/// zero. Each output element corresponds to a close starting at index
/// `period - 1`.
///
/// # Edge cases
/// - `period == 0` => empty vec (division by zero guard)
/// - `closes.len() < period` => empty vec
/// - A non-finite intermediate value stops the series; downstream consumers
///   should not trust a broken tail.
pub fn calculate_ema(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    // Seed: SMA of the first `period` values.
    let sma: f64 = closes[..period].iter().sum::<f64>() / period as f64;
    if !sma.is_finite() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(closes.len() - period + 1);
    result.push(sma);

    let mut prev_ema = sma;
    for &close in &closes[period..] {
        let ema = ema_step(prev_ema, close, period);
        if !ema.is_finite() {
            break;
        }
        result.push(ema);
        prev_ema = ema;
    }

    result
}

/// Latest EMA value for `period`, or `None` on insufficient data.
pub fn latest_ema(closes: &[f64], period: usize) -> Option<f64> {
    calculate_ema(closes, period).last().copied()
}

/// Simple moving average of the last `period` values.
pub fn latest_sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let sum: f64 = closes[closes.len() - period..].iter().sum();
    let sma = sum / period as f64;
    sma.is_finite().then_some(sma)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_empty_input() {
        assert!(calculate_ema(&[], 5).is_empty());
    }

    #[test]
    fn ema_period_zero() {
        assert!(calculate_ema(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn ema_insufficient_data() {
        assert!(calculate_ema(&[1.0, 2.0], 5).is_empty());
    }

    #[test]
    fn ema_period_equals_length() {
        let closes = vec![2.0, 4.0, 6.0];
        let ema = calculate_ema(&closes, 3);
        assert_eq!(ema.len(), 1);
        // Should be the SMA = (2+4+6)/3 = 4.0
        assert!((ema[0] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn ema_known_values() {
        // 5-period EMA of [1,2,3,4,5,6,7,8,9,10]
        // SMA of first 5 = 3.0, multiplier = 2/6 = 1/3
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let ema = calculate_ema(&closes, 5);
        assert_eq!(ema.len(), 6); // indices 4..9

        let mult = 2.0 / 6.0;
        let mut expected = 3.0; // SMA seed
        let mut expected_vec = vec![expected];
        for &c in &closes[5..] {
            expected = (c - expected) * mult + expected;
            expected_vec.push(expected);
        }
        for (a, b) in ema.iter().zip(expected_vec.iter()) {
            assert!((a - b).abs() < 1e-10, "got {a}, expected {b}");
        }
    }

    #[test]
    fn ema_step_matches_series() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64 * 1.5).collect();
        let series = calculate_ema(&closes, 10);

        // Re-derive the last value by stepping from the one before it.
        let n = series.len();
        let stepped = ema_step(series[n - 2], *closes.last().unwrap(), 10);
        assert!((stepped - series[n - 1]).abs() < 1e-10);
    }

    #[test]
    fn ema_handles_nan_in_input() {
        let closes = vec![1.0, 2.0, 3.0, f64::NAN, 5.0];
        let ema = calculate_ema(&closes, 3);
        // SMA of first 3 = 2.0, then next value is NaN => series stops.
        assert_eq!(ema.len(), 1);
    }

    #[test]
    fn sma_last_window() {
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(latest_sma(&closes, 3), Some(4.0));
        assert_eq!(latest_sma(&closes, 5), Some(3.0));
        assert_eq!(latest_sma(&closes, 6), None);
        assert_eq!(latest_sma(&closes, 0), None);
    }
}
