// =============================================================================
// OI anomaly detection — poller, sliding-window evaluation, sweep
// =============================================================================
//
// The poller snapshots open interest (plus mark price and funding from the
// premium index) for every enabled symbol on a fixed cadence and persists
// the batch.  The sweep then evaluates each (symbol, period) window:
// relative OI change against the effective threshold, deduplication against
// the latest stored anomaly, severity classification, enrichment, persist,
// publish.  A window with fewer than two snapshots, or a zero baseline, is
// insufficient data rather than an error.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::binance::BinanceFuturesClient;
use crate::cache::layer::{CacheLayer, TTL_CONFIG};
use crate::config::{Config, MonitorOverrides};
use crate::detect::enrichment::{enrich, EnrichmentContext};
use crate::futures_intel::LongShortFeed;
use crate::indicators::IndicatorEngine;
use crate::store::{AnomalyStore, ConfigStore, ShardedSnapshotStore};
use crate::types::{CandleKey, Interval, OIAnomalyRecord, OISnapshot, Severity};

/// Thresholds in effect for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvalParams {
    pub threshold_pct: f64,
    pub dedup_delta_pct: f64,
    pub high_threshold_pct: f64,
    pub medium_threshold_pct: f64,
}

/// Pure sliding-window evaluation for one (symbol, period).
///
/// Returns the bare anomaly record (enrichment fields unset) or `None`
/// when the window is insufficient, under threshold, or a duplicate of the
/// latest stored anomaly.
pub fn evaluate_window(
    symbol: &str,
    period_seconds: i64,
    window: &[OISnapshot],
    previous: Option<&OIAnomalyRecord>,
    params: EvalParams,
) -> Option<OIAnomalyRecord> {
    // Need both edges of the window.
    if window.len() < 2 {
        return None;
    }
    let first = window.first().expect("len checked");
    let last = window.last().expect("len checked");

    let oi_before = first.open_interest;
    let oi_after = last.open_interest;

    // Zero (or negative) baseline: percent change is meaningless.
    if oi_before <= 0.0 {
        return None;
    }
    let percent_change = (oi_after - oi_before) / oi_before * 100.0;
    if !percent_change.is_finite() {
        return None;
    }

    if percent_change.abs() < params.threshold_pct {
        return None;
    }

    // Dedup: a near-identical reading of the same move is not a new anomaly.
    if let Some(prev) = previous {
        if (percent_change - prev.percent_change).abs() < params.dedup_delta_pct {
            return None;
        }
    }

    let severity = Severity::from_pct(
        percent_change.abs(),
        params.high_threshold_pct,
        params.medium_threshold_pct,
    );

    Some(OIAnomalyRecord {
        symbol: symbol.to_string(),
        period_seconds,
        percent_change,
        oi_before,
        oi_after,
        threshold_value: params.threshold_pct,
        anomaly_time: last.timestamp_ms,
        severity,
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
    })
}

// =============================================================================
// OIPoller
// =============================================================================

/// Captures one OI snapshot per enabled symbol per tick.
pub struct OIPoller {
    client: Arc<BinanceFuturesClient>,
    snapshots: Arc<ShardedSnapshotStore>,
    cache: Arc<CacheLayer>,
}

impl OIPoller {
    pub fn new(
        client: Arc<BinanceFuturesClient>,
        snapshots: Arc<ShardedSnapshotStore>,
        cache: Arc<CacheLayer>,
    ) -> Self {
        Self {
            client,
            snapshots,
            cache,
        }
    }

    /// Poll every symbol once and persist the batch. Per-symbol fetch
    /// failures are logged and skipped; the batch write error bubbles up.
    pub async fn poll_once(&self, symbols: &[String]) -> Result<usize> {
        // One premium-index call covers mark price and funding for all.
        let premium: HashMap<String, _> = match self.client.premium_index_all().await {
            Ok(list) => list.into_iter().map(|p| (p.symbol.clone(), p)).collect(),
            Err(e) => {
                warn!(error = %e, "premium index fetch failed, snapshots will lack prices");
                HashMap::new()
            }
        };

        let now_ms = Utc::now().timestamp_millis();
        let mut batch = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match self.client.open_interest(symbol).await {
                Ok(open_interest) => {
                    let p = premium.get(symbol);
                    batch.push(OISnapshot {
                        symbol: symbol.clone(),
                        timestamp_ms: now_ms,
                        open_interest,
                        mark_price: p.map(|p| p.mark_price),
                        funding_rate: p.map(|p| p.funding_rate),
                        next_funding_time: p.map(|p| p.next_funding_time),
                        source: "poller".to_string(),
                    });
                }
                Err(e) => {
                    warn!(symbol, error = %e, "open interest fetch failed, skipping symbol");
                }
            }
        }

        let inserted = self.snapshots.insert_batch(&batch).await?;

        // Snapshot ingestion invalidates the hot read keys.
        for snap in &batch {
            self.cache
                .invalidate(&CacheLayer::latest_key(&snap.symbol))
                .await;
        }
        self.cache
            .invalidate(&CacheLayer::stats_key(crate::store::shard::beijing_date(now_ms)))
            .await;

        debug!(polled = batch.len(), inserted, "OI poll complete");
        Ok(batch.len())
    }
}

// =============================================================================
// OIAnomalyDetector
// =============================================================================

pub struct OIAnomalyDetector {
    snapshots: Arc<ShardedSnapshotStore>,
    anomalies: Arc<AnomalyStore>,
    config_store: Arc<ConfigStore>,
    cache: Arc<CacheLayer>,
    long_short: Arc<LongShortFeed>,
    indicators: Arc<IndicatorEngine>,
    periods_secs: Vec<i64>,
    default_threshold_pct: f64,
    publisher: broadcast::Sender<OIAnomalyRecord>,
    emitted: AtomicU64,
}

impl OIAnomalyDetector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        snapshots: Arc<ShardedSnapshotStore>,
        anomalies: Arc<AnomalyStore>,
        config_store: Arc<ConfigStore>,
        cache: Arc<CacheLayer>,
        long_short: Arc<LongShortFeed>,
        indicators: Arc<IndicatorEngine>,
    ) -> Self {
        let (publisher, _) = broadcast::channel(256);
        Self {
            snapshots,
            anomalies,
            config_store,
            cache,
            long_short,
            indicators,
            periods_secs: config.oi_periods_secs.clone(),
            default_threshold_pct: config.default_threshold_pct,
            publisher,
            emitted: AtomicU64::new(0),
        }
    }

    /// Subscribe to emitted anomaly records.
    pub fn subscribe(&self) -> broadcast::Receiver<OIAnomalyRecord> {
        self.publisher.subscribe()
    }

    /// Total anomalies persisted since startup.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// One full sweep over all symbols. Runs in a single task, so scans
    /// for the same symbol never overlap. Per-symbol errors are contained.
    pub async fn sweep(&self, symbols: &[String]) {
        let overrides = self.cached_overrides().await;

        for symbol in symbols {
            if let Err(e) = self.scan_symbol(symbol, &overrides).await {
                warn!(symbol, error = %e, "OI scan failed for symbol");
            }
        }
    }

    /// Runtime overrides, read through the cache (10 min TTL).
    async fn cached_overrides(&self) -> MonitorOverrides {
        let store = self.config_store.clone();
        self.cache
            .get_or_fill(
                &CacheLayer::config_key("monitor_overrides"),
                TTL_CONFIG,
                move || async move { store.load_overrides().await },
            )
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to load monitor overrides, using defaults");
                MonitorOverrides::default()
            })
    }

    async fn scan_symbol(&self, symbol: &str, overrides: &MonitorOverrides) -> Result<()> {
        let now_ms = Utc::now().timestamp_millis();

        // Fetch each period window once, through the cache.
        let mut windows: HashMap<i64, Vec<OISnapshot>> = HashMap::new();
        for &period in &self.periods_secs {
            let start_ms = now_ms - period * 1000;
            let snapshots = self.snapshots.clone();
            let symbol_owned = symbol.to_string();
            let window = self
                .cache
                .get_or_fill(
                    &CacheLayer::history_key(symbol, period),
                    CacheLayer::history_ttl(period),
                    move || async move { snapshots.range(&symbol_owned, start_ms, now_ms).await },
                )
                .await?;
            windows.insert(period, window);
        }

        let empty = Vec::new();
        let window_2h = windows.get(&7200).unwrap_or(&empty);
        let window_30m = windows.get(&1800).unwrap_or(&empty);

        for &period in &self.periods_secs {
            let window = windows.get(&period).unwrap_or(&empty);

            let params = EvalParams {
                threshold_pct: overrides.effective_threshold(symbol, self.default_threshold_pct),
                dedup_delta_pct: overrides.dedup_delta_pct,
                high_threshold_pct: overrides.high_threshold_pct,
                medium_threshold_pct: overrides.medium_threshold_pct,
            };

            let previous = self.anomalies.latest_for(symbol, period).await?;
            let Some(mut record) =
                evaluate_window(symbol, period, window, previous.as_ref(), params)
            else {
                continue;
            };

            // ── Enrichment ──────────────────────────────────────────────
            let today = crate::store::shard::beijing_date(now_ms);
            let day_extremes = self
                .snapshots
                .day_price_extremes(symbol, today)
                .await
                .unwrap_or(None);

            let key = CandleKey {
                symbol: symbol.to_string(),
                interval: Interval::M5,
            };
            let closes: Vec<f64> = self
                .indicators
                .snapshot(&key)
                .map(|s| s.window.iter().map(|c| c.close).collect())
                .unwrap_or_default();

            let ls = self.long_short.latest(symbol);
            enrich(
                &mut record,
                &EnrichmentContext {
                    window,
                    day_extremes,
                    window_2h,
                    window_30m,
                    long_short: ls.as_ref(),
                    closes: &closes,
                },
            );

            self.anomalies.insert(&record).await?;
            self.emitted.fetch_add(1, Ordering::Relaxed);
            info!(
                symbol,
                period,
                pct = format!("{:.2}", record.percent_change),
                severity = %record.severity,
                "OI anomaly persisted"
            );
            let _ = self.publisher.send(record);
        }

        Ok(())
    }
}
