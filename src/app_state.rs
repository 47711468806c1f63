// =============================================================================
// Central application state — dependency-injected service wiring
// =============================================================================
//
// Every service is constructed once at startup and threaded explicitly
// through this struct; there are no per-module singletons.  The only true
// process-wide resource is the database pool handle the stores share.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use crate::alert::AlertEngine;
use crate::binance::BinanceFuturesClient;
use crate::cache::CacheLayer;
use crate::config::Config;
use crate::detect::oi_anomaly::{OIAnomalyDetector, OIPoller};
use crate::detect::pipeline::KlinePipeline;
use crate::futures_intel::LongShortFeed;
use crate::indicators::IndicatorEngine;
use crate::market_data::{CandleAggregator, CandleBuffer, TickerBoard};
use crate::registry::SymbolRegistry;
use crate::store::{
    AlertStore, AnomalyStore, CandleStore, ConfigStore, ShardedSnapshotStore, SymbolStore,
};
use crate::stream::{EventRouter, StreamCounters};

/// Shared state across all async tasks via `Arc<AppState>`.
pub struct AppState {
    pub config: Config,

    // ── External clients ────────────────────────────────────────────────
    pub binance: Arc<BinanceFuturesClient>,
    pub cache: Arc<CacheLayer>,

    // ── Stores ──────────────────────────────────────────────────────────
    pub snapshot_store: Arc<ShardedSnapshotStore>,
    pub candle_store: Arc<CandleStore>,
    pub anomaly_store: Arc<AnomalyStore>,
    pub alert_store: Arc<AlertStore>,
    pub config_store: Arc<ConfigStore>,
    pub symbol_store: Arc<SymbolStore>,

    // ── Market data ─────────────────────────────────────────────────────
    pub registry: Arc<SymbolRegistry>,
    pub candle_buffer: Arc<CandleBuffer>,
    pub aggregator: Arc<CandleAggregator>,
    pub indicators: Arc<IndicatorEngine>,
    pub ticker_board: Arc<TickerBoard>,
    pub long_short: Arc<LongShortFeed>,

    // ── Stream ──────────────────────────────────────────────────────────
    pub router: Arc<EventRouter>,
    pub stream_counters: Arc<StreamCounters>,

    // ── Detection & alerts ──────────────────────────────────────────────
    pub pipeline: Arc<KlinePipeline>,
    pub alert_engine: Arc<AlertEngine>,
    pub oi_poller: Arc<OIPoller>,
    pub anomaly_detector: Arc<OIAnomalyDetector>,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: Instant,
}
