// =============================================================================
// CandleAggregator — rolls final 5m candles into 15m / 1h / 4h candles
// =============================================================================
//
// Per (symbol, target interval) a work-in-progress candle accumulates the
// finer stream.  Boundary math is pure Unix-ms arithmetic:
// `floor(ts / period_ms) * period_ms`.  Every emitted candle satisfies
// `close_time - open_time + 1 == period_ms` and `open_time % period_ms == 0`.
// =============================================================================

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::warn;

use crate::types::{Candle, CandleKey, Interval};

pub struct CandleAggregator {
    wip: Mutex<HashMap<CandleKey, Candle>>,
}

impl CandleAggregator {
    pub fn new() -> Self {
        Self {
            wip: Mutex::new(HashMap::new()),
        }
    }

    /// Ingest one **final** 5m candle and return every longer-period candle
    /// it finalizes (zero, one per target, never more).
    pub fn ingest(&self, symbol: &str, candle: &Candle) -> Vec<(CandleKey, Candle)> {
        if !candle.is_final {
            warn!(symbol, open_time = candle.open_time, "aggregator fed provisional candle, ignoring");
            return Vec::new();
        }

        let mut out = Vec::new();
        for target in Interval::ROLLUP_TARGETS {
            let key = CandleKey {
                symbol: symbol.to_string(),
                interval: target,
            };
            for finalized in self.ingest_for_target(key.clone(), target, candle) {
                out.push((key.clone(), finalized));
            }
        }
        out
    }

    fn ingest_for_target(
        &self,
        key: CandleKey,
        target: Interval,
        candle: &Candle,
    ) -> Vec<Candle> {
        let period_ms = target.period_ms();
        let period_open = (candle.open_time / period_ms) * period_ms;
        let period_close = period_open + period_ms - 1;

        let mut wip_map = self.wip.lock();
        // At most two candles come out of one ingest: a stale WIP from a
        // prior period plus this period closing on the boundary.
        let mut emitted = Vec::new();

        match wip_map.get_mut(&key) {
            Some(wip) if wip.open_time == period_open => {
                // Same period: merge.
                wip.high = wip.high.max(candle.high);
                wip.low = wip.low.min(candle.low);
                wip.close = candle.close;
                wip.volume += candle.volume;
            }
            Some(_) => {
                // The new candle belongs to a different period: the old WIP
                // is as complete as it will ever get.
                let mut old = wip_map.remove(&key).expect("wip entry just matched");
                old.is_final = true;
                emitted.push(old);
                wip_map.insert(key.clone(), new_wip(candle, period_open, period_close));
            }
            None => {
                wip_map.insert(key.clone(), new_wip(candle, period_open, period_close));
            }
        }

        // A candle that closes exactly on the period boundary completes the
        // target period immediately.
        if candle.close_time == period_close {
            if let Some(mut done) = wip_map.remove(&key) {
                done.is_final = true;
                emitted.push(done);
            }
        }

        emitted
    }

    /// Flush every outstanding WIP candle (shutdown path). Flushed candles
    /// stay provisional: their period has not closed.
    pub fn drain_wip(&self) -> Vec<(CandleKey, Candle)> {
        let mut wip_map = self.wip.lock();
        wip_map.drain().collect()
    }
}

impl Default for CandleAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Start a WIP candle covering the full target period. `close_time` is
/// pinned to the period end so emitted candles always span exactly one
/// period, even when the source feed has gaps.
fn new_wip(candle: &Candle, period_open: i64, period_close: i64) -> Candle {
    Candle {
        open_time: period_open,
        close_time: period_close,
        open: candle.open,
        high: candle.high,
        low: candle.low,
        close: candle.close,
        volume: candle.volume,
        is_final: false,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const FIVE_MIN: i64 = 300_000;

    fn five_min_candle(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: i * FIVE_MIN,
            close_time: (i + 1) * FIVE_MIN - 1,
            open,
            high,
            low,
            close,
            volume: 100.0,
            is_final: true,
        }
    }

    /// Twelve consecutive 5m candles covering 00:00–00:55 roll into exactly
    /// one 1h candle with the expected OHLCV.
    #[test]
    fn twelve_five_minute_candles_make_one_hour() {
        let agg = CandleAggregator::new();
        let mut hourly = Vec::new();

        for i in 0..12i64 {
            let c = five_min_candle(
                i,
                10.0 + i as f64,
                12.0 + i as f64,
                9.0 + i as f64,
                11.0 + i as f64,
            );
            for (key, done) in agg.ingest("BTCUSDT", &c) {
                if key.interval == Interval::H1 {
                    hourly.push(done);
                }
            }
        }

        assert_eq!(hourly.len(), 1);
        let h = &hourly[0];
        assert_eq!(h.open_time, 0);
        assert_eq!(h.close_time, 3_599_999);
        assert!((h.open - 10.0).abs() < 1e-12);
        assert!((h.high - 23.0).abs() < 1e-12);
        assert!((h.low - 9.0).abs() < 1e-12);
        assert!((h.close - 22.0).abs() < 1e-12);
        assert!((h.volume - 1200.0).abs() < 1e-12);
        assert!(h.is_final);
    }

    #[test]
    fn emitted_candles_satisfy_period_invariants() {
        let agg = CandleAggregator::new();
        let mut emitted = Vec::new();

        for i in 0..48i64 {
            let c = five_min_candle(i, 10.0, 12.0, 9.0, 11.0);
            emitted.extend(agg.ingest("ETHUSDT", &c));
        }

        assert!(!emitted.is_empty());
        for (key, candle) in emitted {
            let period = key.interval.period_ms();
            assert_eq!(candle.close_time - candle.open_time + 1, period, "{key}");
            assert_eq!(candle.open_time % period, 0, "{key}");
        }
    }

    #[test]
    fn boundary_candle_finalizes_prior_aggregate() {
        let agg = CandleAggregator::new();

        // Feed 00:00–00:25 (six 5m candles), skip ahead: the next candle
        // opens exactly at 01:00 and must flush the incomplete 1h WIP.
        for i in 0..6i64 {
            assert!(agg
                .ingest("BTCUSDT", &five_min_candle(i, 10.0, 12.0, 9.0, 11.0))
                .iter()
                .all(|(k, _)| k.interval != Interval::H1));
        }

        let next_hour = five_min_candle(12, 20.0, 22.0, 19.0, 21.0);
        let finalized = agg.ingest("BTCUSDT", &next_hour);
        let hourly: Vec<_> = finalized
            .iter()
            .filter(|(k, _)| k.interval == Interval::H1)
            .collect();
        assert_eq!(hourly.len(), 1);
        assert_eq!(hourly[0].1.open_time, 0);
        // Even truncated, the emitted candle spans its full period.
        assert_eq!(hourly[0].1.close_time, 3_599_999);
        assert!((hourly[0].1.volume - 600.0).abs() < 1e-12);
    }

    #[test]
    fn rollup_covers_all_targets() {
        let agg = CandleAggregator::new();
        let mut by_interval: HashMap<Interval, usize> = HashMap::new();

        // One full 4h block = 48 five-minute candles.
        for i in 0..48i64 {
            for (key, _) in agg.ingest("SOLUSDT", &five_min_candle(i, 10.0, 12.0, 9.0, 11.0)) {
                *by_interval.entry(key.interval).or_default() += 1;
            }
        }

        assert_eq!(by_interval.get(&Interval::M15), Some(&16));
        assert_eq!(by_interval.get(&Interval::H1), Some(&4));
        assert_eq!(by_interval.get(&Interval::H4), Some(&1));
    }

    #[test]
    fn period_switch_and_boundary_close_emit_both() {
        let agg = CandleAggregator::new();

        // Incomplete WIP from hour 0, then a gap straight to 01:55 whose
        // close sits exactly on the 02:00 boundary: both the stale hour-0
        // aggregate and the fresh hour-1 aggregate come out together.
        agg.ingest("BTCUSDT", &five_min_candle(0, 10.0, 12.0, 9.0, 11.0));
        let finalized = agg.ingest("BTCUSDT", &five_min_candle(23, 20.0, 22.0, 19.0, 21.0));

        let hourly: Vec<_> = finalized
            .iter()
            .filter(|(k, _)| k.interval == Interval::H1)
            .map(|(_, c)| c)
            .collect();
        assert_eq!(hourly.len(), 2);
        assert_eq!(hourly[0].open_time, 0);
        assert_eq!(hourly[1].open_time, 3_600_000);
        assert!(hourly.iter().all(|c| c.is_final));
    }

    #[test]
    fn provisional_input_is_ignored() {
        let agg = CandleAggregator::new();
        let mut c = five_min_candle(0, 10.0, 12.0, 9.0, 11.0);
        c.is_final = false;
        assert!(agg.ingest("BTCUSDT", &c).is_empty());
        assert!(agg.drain_wip().is_empty());
    }

    #[test]
    fn wip_merge_math() {
        let agg = CandleAggregator::new();
        agg.ingest("BTCUSDT", &five_min_candle(0, 10.0, 15.0, 8.0, 12.0));
        agg.ingest("BTCUSDT", &five_min_candle(1, 12.0, 20.0, 11.0, 13.0));

        let wip = agg.drain_wip();
        let m15 = wip
            .iter()
            .find(|(k, _)| k.interval == Interval::M15)
            .map(|(_, c)| c)
            .expect("m15 wip present");
        assert!((m15.open - 10.0).abs() < 1e-12);
        assert!((m15.high - 20.0).abs() < 1e-12);
        assert!((m15.low - 8.0).abs() < 1e-12);
        assert!((m15.close - 13.0).abs() < 1e-12);
        assert!((m15.volume - 200.0).abs() < 1e-12);
        assert!(!m15.is_final);
    }
}
