// =============================================================================
// Kline pipeline — per-partition worker over the candle stream
// =============================================================================
//
// One pipeline instance is shared by all partition workers; each worker
// drains its own kline partition, so candles for a given symbol are always
// processed in source order by exactly one task.
//
// Per final 5m candle: ring buffer, persistence, indicator update, rollups
// (which recurse the same path at 15m/1h/4h), then the detector battery.
// Provisional candles only feed the ring and the provisional volume-surge
// path.  Every detector except volume surge sits behind the EMA30>EMA60
// trend gate.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::alert::AlertEngine;
use crate::detect::breakout::{self, BreakoutPrediction};
use crate::detect::sr_levels::{self, SrConfig};
use crate::detect::volume_surge::VolumeSurgeDetector;
use crate::detect::{doji, hammer, pullback, squeeze, streak, PatternHit};
use crate::indicators::{IndicatorEngine, IndicatorSnapshot};
use crate::market_data::{CandleAggregator, CandleBuffer, TickerBoard};
use crate::stream::event::KlineEvent;
use crate::store::CandleStore;
use crate::types::{Alert, Candle, CandleKey, Direction, FeatureScores, Interval};

pub struct KlinePipeline {
    buffer: Arc<CandleBuffer>,
    aggregator: Arc<CandleAggregator>,
    indicators: Arc<IndicatorEngine>,
    candle_store: Arc<CandleStore>,
    ticker_board: Arc<TickerBoard>,
    alert_engine: Arc<AlertEngine>,
    volume_surge: VolumeSurgeDetector,
    sr_config: SrConfig,
    min_breakout_score: f64,
    candles_processed: AtomicU64,
}

impl KlinePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buffer: Arc<CandleBuffer>,
        aggregator: Arc<CandleAggregator>,
        indicators: Arc<IndicatorEngine>,
        candle_store: Arc<CandleStore>,
        ticker_board: Arc<TickerBoard>,
        alert_engine: Arc<AlertEngine>,
        min_breakout_score: f64,
    ) -> Self {
        Self {
            buffer,
            aggregator,
            indicators,
            candle_store,
            ticker_board,
            alert_engine,
            volume_surge: VolumeSurgeDetector::new(),
            sr_config: SrConfig::default(),
            min_breakout_score,
            candles_processed: AtomicU64::new(0),
        }
    }

    pub fn candles_processed(&self) -> u64 {
        self.candles_processed.load(Ordering::Relaxed)
    }

    /// Drain one kline partition until shutdown.
    pub async fn run_partition(
        self: Arc<Self>,
        partition: usize,
        mut rx: mpsc::Receiver<KlineEvent>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(partition, "kline partition worker started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(partition, "kline partition worker stopped");
                    return;
                }
                event = rx.recv() => {
                    match event {
                        Some(e) => self.handle_event(e).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: KlineEvent) {
        let key = CandleKey {
            symbol: event.symbol.clone(),
            interval: event.interval,
        };
        self.buffer.update(key.clone(), event.candle.clone());

        if !event.candle.is_final {
            self.provisional_surge(&key, &event.candle).await;
            return;
        }

        self.candles_processed.fetch_add(1, Ordering::Relaxed);
        self.process_final(&key, &event.candle).await;

        // Roll 5m candles up and run the rolled-up candles through the
        // same path.
        if event.interval == Interval::M5 {
            for (rolled_key, rolled) in self.aggregator.ingest(&event.symbol, &event.candle) {
                self.buffer.update(rolled_key.clone(), rolled.clone());
                self.process_final(&rolled_key, &rolled).await;
            }
        }
    }

    async fn process_final(&self, key: &CandleKey, candle: &Candle) {
        self.candle_store.append(&key.symbol, key.interval, candle.clone());
        self.indicators.on_final_candle(key, candle);

        let Some(snapshot) = self.indicators.snapshot(key) else {
            return;
        };
        self.run_detectors(key, candle, &snapshot).await;
    }

    async fn run_detectors(&self, key: &CandleKey, candle: &Candle, snapshot: &IndicatorSnapshot) {
        let now_ms = Utc::now().timestamp_millis();

        let levels =
            sr_levels::build_levels(&snapshot.window, snapshot.last_close, &self.sr_config);
        let prediction = breakout::predict(snapshot, &levels);

        // Volume surge ignores the trend gate.
        if let Some(hit) = self.volume_surge.evaluate_final(key, candle, snapshot) {
            self.submit(key, candle, hit, prediction.as_ref(), now_ms).await;
        }

        if !snapshot.trend_gate() {
            debug!(%key, "trend gate closed, pattern detectors suppressed");
            return;
        }

        let mut hits: Vec<PatternHit> = Vec::new();
        hits.extend(hammer::hammer_cross_ema120(candle, snapshot));
        hits.extend(hammer::perfect_hammer(candle, snapshot));
        hits.extend(doji::doji(candle, snapshot));
        hits.extend(squeeze::squeeze(snapshot));
        hits.extend(streak::bullish_streak(snapshot));
        hits.extend(pullback::pullback_ready(snapshot));

        // S/R proximity, gated on the breakout score or a large 24h move.
        let gain_24h = self.ticker_board.gain_24h_pct(&key.symbol);
        hits.extend(sr_levels::proximity_hits(
            &levels,
            snapshot.last_close,
            prediction.as_ref().map(|p| p.total_score),
            self.min_breakout_score,
            gain_24h,
        ));

        for hit in hits {
            self.submit(key, candle, hit, prediction.as_ref(), now_ms).await;
        }
    }

    async fn provisional_surge(&self, key: &CandleKey, candle: &Candle) {
        let Some(snapshot) = self.indicators.snapshot(key) else {
            return;
        };
        if let Some(hit) = self.volume_surge.evaluate_provisional(key, candle, &snapshot) {
            let now_ms = Utc::now().timestamp_millis();
            self.submit(key, candle, hit, None, now_ms).await;
        }
    }

    async fn submit(
        &self,
        key: &CandleKey,
        candle: &Candle,
        hit: PatternHit,
        prediction: Option<&BreakoutPrediction>,
        now_ms: i64,
    ) {
        let squeeze_pct = hit.squeeze_pct;
        let alert = build_alert(key, candle, hit, prediction);
        self.alert_engine.submit(alert, squeeze_pct, now_ms).await;
    }
}

/// Assemble the full alert from a hit plus the current prediction.
fn build_alert(
    key: &CandleKey,
    candle: &Candle,
    hit: PatternHit,
    prediction: Option<&BreakoutPrediction>,
) -> Alert {
    let (breakout_score, feature_scores, predicted_direction) = match prediction {
        Some(p) => (p.total_score, p.scores, p.predicted_direction),
        None => (0.0, FeatureScores::default(), Direction::Unclear),
    };

    Alert {
        symbol: key.symbol.clone(),
        interval: key.interval,
        alert_type: hit.alert_type,
        level_type: hit.level_type,
        level_price: hit.level_price,
        current_price: candle.close,
        distance_pct: hit.distance_pct,
        level_strength: hit.strength,
        kline_time: candle.open_time,
        description: hit.description,
        breakout_score,
        feature_scores,
        predicted_direction,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertType;

    #[test]
    fn build_alert_carries_prediction() {
        let key = CandleKey {
            symbol: "BTCUSDT".into(),
            interval: Interval::M5,
        };
        let candle = Candle {
            open_time: 300_000,
            close_time: 599_999,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 500.0,
            is_final: true,
        };
        let hit = PatternHit::simple(AlertType::BullishStreak, "streak".into());
        let prediction = BreakoutPrediction {
            total_score: 72.5,
            scores: FeatureScores {
                volatility: 80.0,
                volume: 60.0,
                ma_convergence: 90.0,
                position: 70.0,
                pattern: 50.0,
            },
            predicted_direction: Direction::Up,
        };

        let alert = build_alert(&key, &candle, hit, Some(&prediction));
        assert_eq!(alert.kline_time, 300_000);
        assert_eq!(alert.current_price, 100.5);
        assert!((alert.breakout_score - 72.5).abs() < 1e-12);
        assert_eq!(alert.predicted_direction, Direction::Up);
        assert_eq!(alert.alert_type, AlertType::BullishStreak);
    }

    #[test]
    fn build_alert_without_prediction_defaults() {
        let key = CandleKey {
            symbol: "ETHUSDT".into(),
            interval: Interval::H1,
        };
        let candle = Candle {
            open_time: 0,
            close_time: 3_599_999,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 500.0,
            is_final: true,
        };
        let hit = PatternHit::simple(AlertType::Doji, "doji".into());

        let alert = build_alert(&key, &candle, hit, None);
        assert_eq!(alert.breakout_score, 0.0);
        assert_eq!(alert.predicted_direction, Direction::Unclear);
    }
}
