// =============================================================================
// REST API — health and cached read endpoints (Axum 0.7)
// =============================================================================
//
// The engine's outward HTTP surface is small: a public health endpoint
// plus a handful of cached reads for operators (latest snapshot, anomaly
// list, daily stats, enabled symbols).  Every read goes through the cache
// layer; the full dashboard facade lives in a separate service.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::cache::layer::{
    CacheLayer, TTL_ANOMALY_LIST, TTL_DAILY_STATS, TTL_LATEST,
};
use crate::store::anomaly_store::AnomalyListParams;
use crate::store::shard;

/// Build the REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/symbols", get(symbols))
        .route("/api/v1/anomalies", get(anomalies))
        .route("/api/v1/stats/today", get(stats_today))
        .route("/api/v1/snapshots/:symbol/latest", get(latest_snapshot))
        .route("/api/v1/candles/:symbol/:interval", get(recent_candles))
        .layer(cors)
        .with_state(state)
}

type ApiError = (StatusCode, String);

fn internal(err: anyhow::Error) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
}

// =============================================================================
// Health
// =============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_s: u64,
    stream: StreamHealth,
    candles_processed: u64,
    candles_buffered: usize,
    anomalies_emitted: u64,
    alerts_emitted: u64,
    pending_alert_retries: usize,
    enabled_symbols: usize,
    used_weight_1m: u32,
}

#[derive(Debug, Serialize)]
struct StreamHealth {
    connected: bool,
    events_parsed: u64,
    events_skipped: u64,
    parse_errors: u64,
    reconnects: u64,
    dropped_events: u64,
    last_event_age_s: Option<u64>,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let counters = &state.stream_counters;
    let last_event_ms = counters.last_event_ms.load(Ordering::Relaxed);
    let last_event_age_s = if last_event_ms > 0 {
        Some(((Utc::now().timestamp_millis() - last_event_ms).max(0) / 1000) as u64)
    } else {
        None
    };

    let connected = counters.connected.load(Ordering::Relaxed);
    Json(HealthResponse {
        status: if connected { "ok" } else { "degraded" },
        uptime_s: state.start_time.elapsed().as_secs(),
        stream: StreamHealth {
            connected,
            events_parsed: counters.events_parsed.load(Ordering::Relaxed),
            events_skipped: counters.events_skipped.load(Ordering::Relaxed),
            parse_errors: counters.parse_errors.load(Ordering::Relaxed),
            reconnects: counters.reconnects.load(Ordering::Relaxed),
            dropped_events: state.router.dropped_events(),
            last_event_age_s,
        },
        candles_processed: state.pipeline.candles_processed(),
        candles_buffered: state.candle_store.buffered(),
        anomalies_emitted: state.anomaly_detector.emitted(),
        alerts_emitted: state.alert_engine.emitted(),
        pending_alert_retries: state.alert_engine.pending_retries(),
        enabled_symbols: state.registry.enabled_symbols().len(),
        used_weight_1m: state.binance.rate_limits().snapshot().used_weight_1m,
    })
}

// =============================================================================
// Cached reads
// =============================================================================

async fn symbols(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<crate::types::SymbolInfo>>, ApiError> {
    state
        .registry
        .enabled_cached()
        .await
        .map(Json)
        .map_err(internal)
}

async fn anomalies(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnomalyListParams>,
) -> Result<Json<Vec<crate::types::OIAnomalyRecord>>, ApiError> {
    let store = state.anomaly_store.clone();
    let key = CacheLayer::anomaly_list_key(&params);
    state
        .cache
        .get_or_fill(&key, TTL_ANOMALY_LIST, move || async move {
            store.list(&params).await
        })
        .await
        .map(Json)
        .map_err(internal)
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    /// Accepted for caller convenience, dropped by key normalization: all
    /// symbol variants share one cache entry and filter client-side.
    #[serde(default)]
    #[allow(dead_code)]
    symbol: Option<String>,
}

async fn stats_today(
    State(state): State<Arc<AppState>>,
    Query(_params): Query<StatsQuery>,
) -> Result<Json<crate::store::DailyStats>, ApiError> {
    let today = shard::beijing_date(Utc::now().timestamp_millis());
    let store = state.anomaly_store.clone();
    state
        .cache
        .get_or_fill(
            &CacheLayer::stats_key(today),
            TTL_DAILY_STATS,
            move || async move { store.daily_stats(today).await },
        )
        .await
        .map(Json)
        .map_err(internal)
}

async fn latest_snapshot(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<Option<crate::types::OISnapshot>>, ApiError> {
    let symbol = symbol.to_uppercase();
    let store = state.snapshot_store.clone();
    let key = CacheLayer::latest_key(&symbol);
    state
        .cache
        .get_or_fill(&key, TTL_LATEST, move || async move {
            store.latest(&symbol).await
        })
        .await
        .map(Json)
        .map_err(internal)
}

#[derive(Debug, Deserialize)]
struct CandlesQuery {
    #[serde(default = "default_candle_count")]
    count: usize,
}

fn default_candle_count() -> usize {
    50
}

#[derive(Debug, Serialize)]
struct CandlesResponse {
    symbol: String,
    interval: crate::types::Interval,
    candles: Vec<crate::types::Candle>,
    provisional: Option<crate::types::Candle>,
}

/// Recent candles straight from the in-memory ring, including the current
/// provisional candle. No storage round-trip.
async fn recent_candles(
    State(state): State<Arc<AppState>>,
    Path((symbol, interval)): Path<(String, String)>,
    Query(params): Query<CandlesQuery>,
) -> Result<Json<CandlesResponse>, ApiError> {
    let Some(interval) = crate::types::Interval::parse(&interval) else {
        return Err((StatusCode::BAD_REQUEST, format!("unknown interval: {interval}")));
    };
    let key = crate::types::CandleKey {
        symbol: symbol.to_uppercase(),
        interval,
    };

    Ok(Json(CandlesResponse {
        candles: state.candle_buffer.recent_final(&key, params.count.min(500)),
        provisional: state.candle_buffer.provisional(&key),
        symbol: key.symbol,
        interval,
    }))
}
