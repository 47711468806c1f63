// =============================================================================
// Anomaly enrichment — market context attached to each OI anomaly
// =============================================================================
//
// An anomaly record alone says "OI moved"; the enrichment says where price
// sits while it moved: day extremes, the 2h low, the 30m box and whether it
// broke, funding drift, crowd positioning, and the MA stack with trend
// labels.  Everything here is pure math over data the sweep already holds.
// =============================================================================

use crate::binance::LongShortSnapshot;
use crate::indicators::ema::latest_sma;
use crate::types::{OIAnomalyRecord, OISnapshot, TrendLabel};

/// Relative tolerance under which two MAs count as equal.
const FLAT_TOLERANCE: f64 = 0.001;

/// Inputs gathered by the sweep for one (symbol, period) anomaly.
pub struct EnrichmentContext<'a> {
    /// The anomaly window itself (ascending; first/last give before/after).
    pub window: &'a [OISnapshot],
    /// MIN/MAX mark price over today's snapshot shard.
    pub day_extremes: Option<(f64, f64)>,
    /// Snapshots over the trailing 2 hours.
    pub window_2h: &'a [OISnapshot],
    /// Snapshots over the trailing 30 minutes.
    pub window_30m: &'a [OISnapshot],
    /// Most recent long/short ratio from the enrichment feed.
    pub long_short: Option<&'a LongShortSnapshot>,
    /// Recent 5m closes, oldest first, for the MA stack.
    pub closes: &'a [f64],
}

/// Fill the enrichment fields of `record` in place.
pub fn enrich(record: &mut OIAnomalyRecord, ctx: &EnrichmentContext<'_>) {
    // ── Price & funding before/after ────────────────────────────────────
    if let Some(first) = ctx.window.first() {
        record.price_before = first.mark_price;
        record.funding_rate_before = first.funding_rate;
    }
    if let Some(last) = ctx.window.last() {
        record.price_after = last.mark_price;
        record.funding_rate_after = last.funding_rate;
    }
    let current_price = record.price_after;

    // ── Crowd positioning ───────────────────────────────────────────────
    if let Some(ls) = ctx.long_short {
        record.long_account_pct = Some(ls.long_account_pct);
        record.short_account_pct = Some(ls.short_account_pct);
        record.long_short_ratio = Some(ls.ratio);
    }

    // ── Day extremes & distances ────────────────────────────────────────
    if let Some((low_24h, high_24h)) = ctx.day_extremes {
        record.low_24h = Some(low_24h);
        record.high_24h = Some(high_24h);
        if let Some(price) = current_price {
            if high_24h > 0.0 {
                record.distance_from_high_pct = Some((price - high_24h) / high_24h * 100.0);
            }
        }
    }

    if let Some(low_2h) = min_price(ctx.window_2h) {
        record.low_2h = Some(low_2h);
        if let Some(price) = current_price {
            if low_2h > 0.0 {
                record.distance_from_low_2h_pct = Some((price - low_2h) / low_2h * 100.0);
            }
        }
    }

    // ── 30-minute box ───────────────────────────────────────────────────
    // The box is measured over everything before the newest snapshot, so
    // the current price can actually break it.
    let box_30m = if ctx.window_30m.len() > 1 {
        &ctx.window_30m[..ctx.window_30m.len() - 1]
    } else {
        ctx.window_30m
    };
    record.high_30m = max_price(box_30m);
    record.low_30m = min_price(box_30m);
    if let Some(price) = current_price {
        record.broke_30m_high = record.high_30m.map_or(false, |h| price > h);
        record.broke_30m_low = record.low_30m.map_or(false, |l| price < l);
    }

    // ── MA stack & trend labels ─────────────────────────────────────────
    record.ma10 = latest_sma(ctx.closes, 10);
    record.ma30 = latest_sma(ctx.closes, 30);
    record.ma60 = latest_sma(ctx.closes, 60);
    record.ma120 = latest_sma(ctx.closes, 120);
    record.ma240 = latest_sma(ctx.closes, 240);

    record.short_ma_trend = trend_label(record.ma10, record.ma30, record.ma60);
    record.long_ma_trend = trend_label(record.ma60, record.ma120, record.ma240);
}

fn min_price(snapshots: &[OISnapshot]) -> Option<f64> {
    snapshots
        .iter()
        .filter_map(|s| s.mark_price)
        .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.min(p))))
}

fn max_price(snapshots: &[OISnapshot]) -> Option<f64> {
    snapshots
        .iter()
        .filter_map(|s| s.mark_price)
        .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.max(p))))
}

/// `up` when the stack is strictly descending in period (fast above slow),
/// `down` when inverted, `flat` when mixed or within tolerance.
fn trend_label(fast: Option<f64>, mid: Option<f64>, slow: Option<f64>) -> Option<TrendLabel> {
    let (fast, mid, slow) = (fast?, mid?, slow?);
    if slow <= 0.0 {
        return Some(TrendLabel::Flat);
    }

    let near = |a: f64, b: f64| (a - b).abs() / b.abs().max(f64::MIN_POSITIVE) <= FLAT_TOLERANCE;
    if near(fast, mid) && near(mid, slow) {
        return Some(TrendLabel::Flat);
    }
    if fast > mid && mid > slow {
        Some(TrendLabel::Up)
    } else if fast < mid && mid < slow {
        Some(TrendLabel::Down)
    } else {
        Some(TrendLabel::Flat)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn snapshot(ts: i64, oi: f64, price: f64) -> OISnapshot {
        OISnapshot {
            symbol: "BTCUSDT".into(),
            timestamp_ms: ts,
            open_interest: oi,
            mark_price: Some(price),
            funding_rate: Some(0.0001 + ts as f64 * 1e-9),
            next_funding_time: None,
            source: "poller".into(),
        }
    }

    fn base_record() -> OIAnomalyRecord {
        OIAnomalyRecord {
            symbol: "BTCUSDT".into(),
            period_seconds: 900,
            percent_change: 40.0,
            oi_before: 1000.0,
            oi_after: 1400.0,
            threshold_value: 20.0,
            anomaly_time: 1_000_000,
            severity: Severity::Medium,
            price_before: None,
            price_after: None,
            funding_rate_before: None,
            funding_rate_after: None,
            long_account_pct: None,
            short_account_pct: None,
            long_short_ratio: None,
            high_24h: None,
            low_24h: None,
            low_2h: None,
            distance_from_high_pct: None,
            distance_from_low_2h_pct: None,
            high_30m: None,
            low_30m: None,
            broke_30m_high: false,
            broke_30m_low: false,
            ma10: None,
            ma30: None,
            ma60: None,
            ma120: None,
            ma240: None,
            short_ma_trend: None,
            long_ma_trend: None,
        }
    }

    #[test]
    fn before_after_fields_come_from_window_edges() {
        let window = vec![snapshot(0, 1000.0, 100.0), snapshot(60_000, 1400.0, 105.0)];
        let mut record = base_record();
        enrich(
            &mut record,
            &EnrichmentContext {
                window: &window,
                day_extremes: Some((95.0, 110.0)),
                window_2h: &window,
                window_30m: &window,
                long_short: None,
                closes: &[],
            },
        );

        assert_eq!(record.price_before, Some(100.0));
        assert_eq!(record.price_after, Some(105.0));
        assert_eq!(record.high_24h, Some(110.0));
        assert_eq!(record.low_24h, Some(95.0));
        // 105 vs high 110: -4.55% below the high.
        assert!((record.distance_from_high_pct.unwrap() + 4.5454).abs() < 0.01);
    }

    #[test]
    fn broke_30m_high_uses_prior_box() {
        // 30m window: prices 100, 101, 102, then the newest at 103.
        let window_30m: Vec<OISnapshot> = [100.0, 101.0, 102.0, 103.0]
            .iter()
            .enumerate()
            .map(|(i, &p)| snapshot(i as i64 * 60_000, 1000.0, p))
            .collect();
        let window = window_30m.clone();

        let mut record = base_record();
        enrich(
            &mut record,
            &EnrichmentContext {
                window: &window,
                day_extremes: None,
                window_2h: &window,
                window_30m: &window_30m,
                long_short: None,
                closes: &[],
            },
        );

        // Box high is 102 (newest excluded); current 103 breaks it.
        assert_eq!(record.high_30m, Some(102.0));
        assert!(record.broke_30m_high);
        assert!(!record.broke_30m_low);
    }

    #[test]
    fn ma_stack_and_trend_labels() {
        // Ascending closes: every fast MA above every slow MA.
        let closes: Vec<f64> = (0..240).map(|i| 100.0 + i as f64).collect();
        let window = vec![snapshot(0, 1000.0, 100.0), snapshot(1, 1400.0, 339.0)];

        let mut record = base_record();
        enrich(
            &mut record,
            &EnrichmentContext {
                window: &window,
                day_extremes: None,
                window_2h: &window,
                window_30m: &window,
                long_short: None,
                closes: &closes,
            },
        );

        assert!(record.ma10.unwrap() > record.ma30.unwrap());
        assert!(record.ma30.unwrap() > record.ma60.unwrap());
        assert_eq!(record.short_ma_trend, Some(TrendLabel::Up));
        assert_eq!(record.long_ma_trend, Some(TrendLabel::Up));
    }

    #[test]
    fn flat_closes_label_flat() {
        let closes = vec![100.0; 240];
        let window = vec![snapshot(0, 1000.0, 100.0), snapshot(1, 1400.0, 100.0)];

        let mut record = base_record();
        enrich(
            &mut record,
            &EnrichmentContext {
                window: &window,
                day_extremes: None,
                window_2h: &window,
                window_30m: &window,
                long_short: None,
                closes: &closes,
            },
        );
        assert_eq!(record.short_ma_trend, Some(TrendLabel::Flat));
    }

    #[test]
    fn short_history_leaves_mas_none() {
        let closes = vec![100.0; 50];
        let window = vec![snapshot(0, 1000.0, 100.0), snapshot(1, 1400.0, 100.0)];

        let mut record = base_record();
        enrich(
            &mut record,
            &EnrichmentContext {
                window: &window,
                day_extremes: None,
                window_2h: &window,
                window_30m: &window,
                long_short: None,
                closes: &closes,
            },
        );
        assert!(record.ma10.is_some());
        assert!(record.ma30.is_some());
        assert!(record.ma60.is_none());
        assert!(record.ma240.is_none());
        assert!(record.long_ma_trend.is_none());
    }
}
