// =============================================================================
// OI Sentinel — Main Entry Point
// =============================================================================
//
// Real-time market surveillance for perpetual futures: ingests the
// multiplexed candle stream and the OI poll, detects anomalies and chart
// patterns, and emits gated alerts to in-process subscribers.
//
// Startup is fail-fast: bad config or an unreachable database exits
// non-zero before any task spawns.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod alert;
mod api;
mod app_state;
mod binance;
mod cache;
mod config;
mod detect;
mod futures_intel;
mod indicators;
mod market_data;
mod registry;
mod store;
mod stream;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Local, NaiveTime};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::alert::{AlertEngine, BatchSignalCollector};
use crate::app_state::AppState;
use crate::binance::BinanceFuturesClient;
use crate::cache::CacheLayer;
use crate::config::Config;
use crate::detect::oi_anomaly::{OIAnomalyDetector, OIPoller};
use crate::detect::pipeline::KlinePipeline;
use crate::futures_intel::LongShortFeed;
use crate::indicators::{engine::DEFAULT_CAPACITY, IndicatorEngine};
use crate::market_data::{CandleAggregator, CandleBuffer, TickerBoard};
use crate::registry::SymbolRegistry;
use crate::store::{
    AlertStore, AnomalyStore, CandleStore, ConfigStore, ShardedSnapshotStore, SymbolStore,
};
use crate::stream::{EventRouter, RouterConfig, StreamCounters, StreamDispatcher};
use crate::types::{AlertType, CandleKey, Interval};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║            OI Sentinel — Starting Up                    ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = Config::from_env().context("invalid configuration")?;
    let deadline = Duration::from_secs(config.db_deadline_secs);

    // ── 2. External services (fail-fast) ─────────────────────────────────
    let pool = store::db::connect(&config.database_url, config.db_max_connections).await?;
    store::db::create_base_tables(&pool).await?;
    let cache = Arc::new(CacheLayer::connect(&config.redis_url).await?);

    // ── 3. Stores & clients ──────────────────────────────────────────────
    let snapshot_store = Arc::new(ShardedSnapshotStore::new(
        pool.clone(),
        deadline,
        config.snapshot_retention_days,
    ));
    let candle_store = Arc::new(CandleStore::new(
        pool.clone(),
        deadline,
        config.candle_flush_rows,
    ));
    let anomaly_store = Arc::new(AnomalyStore::new(pool.clone(), deadline));
    let alert_store = Arc::new(AlertStore::new(pool.clone(), deadline));
    let config_store = Arc::new(ConfigStore::new(pool.clone(), deadline));
    let symbol_store = Arc::new(SymbolStore::new(pool.clone(), deadline));

    let binance = Arc::new(BinanceFuturesClient::new(config.rest_base_url.clone()));

    // ── 4. Symbol registry ───────────────────────────────────────────────
    let registry = Arc::new(SymbolRegistry::new(
        binance.clone(),
        symbol_store.clone(),
        config_store.clone(),
        cache.clone(),
    ));
    registry.bootstrap().await?;
    let symbols = registry.enabled_symbols();
    info!(count = symbols.len(), "watching symbols");

    // ── 5. Market-data state ─────────────────────────────────────────────
    let candle_buffer = Arc::new(CandleBuffer::new(DEFAULT_CAPACITY));
    let aggregator = Arc::new(CandleAggregator::new());
    let indicators = Arc::new(IndicatorEngine::new(DEFAULT_CAPACITY));
    let ticker_board = Arc::new(TickerBoard::new());
    let long_short = Arc::new(LongShortFeed::new(binance.clone()));

    // ── 6. Alert engine & pipeline ───────────────────────────────────────
    let alert_engine = Arc::new(AlertEngine::new(
        alert_store.clone(),
        config.alert_cooldown_secs * 1000,
    ));
    let pipeline = Arc::new(KlinePipeline::new(
        candle_buffer.clone(),
        aggregator.clone(),
        indicators.clone(),
        candle_store.clone(),
        ticker_board.clone(),
        alert_engine.clone(),
        config.min_breakout_score,
    ));

    // ── 7. Stream router & dispatcher ────────────────────────────────────
    let (router, kline_receivers) = EventRouter::new(RouterConfig {
        partitions: config.partition_workers,
        kline_capacity: config.channel_capacity,
        lossy_capacity: config.channel_capacity,
    });
    let router = Arc::new(router);
    let stream_counters = Arc::new(StreamCounters::default());

    let oi_poller = Arc::new(OIPoller::new(
        binance.clone(),
        snapshot_store.clone(),
        cache.clone(),
    ));
    let anomaly_detector = Arc::new(OIAnomalyDetector::new(
        &config,
        snapshot_store.clone(),
        anomaly_store.clone(),
        config_store.clone(),
        cache.clone(),
        long_short.clone(),
        indicators.clone(),
    ));

    let state = Arc::new(AppState {
        config: config.clone(),
        binance: binance.clone(),
        cache: cache.clone(),
        snapshot_store: snapshot_store.clone(),
        candle_store: candle_store.clone(),
        anomaly_store: anomaly_store.clone(),
        alert_store: alert_store.clone(),
        config_store: config_store.clone(),
        symbol_store: symbol_store.clone(),
        registry: registry.clone(),
        candle_buffer: candle_buffer.clone(),
        aggregator: aggregator.clone(),
        indicators: indicators.clone(),
        ticker_board: ticker_board.clone(),
        long_short: long_short.clone(),
        router: router.clone(),
        stream_counters: stream_counters.clone(),
        pipeline: pipeline.clone(),
        alert_engine: alert_engine.clone(),
        oi_poller: oi_poller.clone(),
        anomaly_detector: anomaly_detector.clone(),
        start_time: std::time::Instant::now(),
    });

    // Cancellation: every long-running task watches this channel.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // ── 8. Indicator warm-up from stored candles (background) ────────────
    {
        let indicators = indicators.clone();
        let candle_store = candle_store.clone();
        let warm_symbols = symbols.clone();
        tokio::spawn(async move {
            let mut seeded = 0usize;
            for symbol in &warm_symbols {
                for interval in [Interval::M5, Interval::M15, Interval::H1, Interval::H4] {
                    match candle_store.recent(symbol, interval, DEFAULT_CAPACITY).await {
                        Ok(candles) if !candles.is_empty() => {
                            let key = CandleKey {
                                symbol: symbol.clone(),
                                interval,
                            };
                            indicators.warm_up(&key, &candles);
                            seeded += 1;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(symbol, %interval, error = %e, "indicator warm-up read failed");
                        }
                    }
                }
            }
            info!(series = seeded, "indicator warm-up complete");
        });
    }

    // ── 9. Partition workers ─────────────────────────────────────────────
    for (partition, rx) in kline_receivers.into_iter().enumerate() {
        tokio::spawn(pipeline.clone().run_partition(partition, rx, shutdown_rx.clone()));
    }

    // Ticker consumer keeps the 24h board fresh for the S/R gate.
    {
        let board = ticker_board.clone();
        let mut tickers = router.subscribe_ticker();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    event = tickers.recv() => match event {
                        Ok(t) => board.update(t),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });
    }

    // ── 10. Candle writer ────────────────────────────────────────────────
    tokio::spawn(candle_store.clone().run_writer(
        Duration::from_secs(config.candle_flush_secs),
        shutdown_rx.clone(),
    ));

    // ── 11. Stream dispatcher ────────────────────────────────────────────
    let dispatcher = StreamDispatcher::new(
        config.ws_base_url.clone(),
        StreamDispatcher::standard_streams(&symbols),
        config.reconnect_max_attempts,
        Duration::from_secs(config.reconnect_interval_secs),
        Duration::from_secs(config.ping_interval_secs),
        router.clone(),
        stream_counters.clone(),
    );
    let dispatcher_handle = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { dispatcher.run(shutdown).await })
    };

    // ── 12. OI poll + anomaly sweep ──────────────────────────────────────
    {
        let poller = oi_poller.clone();
        let detector = anomaly_detector.clone();
        let registry = registry.clone();
        let mut shutdown = shutdown_rx.clone();
        let sweep_secs = config.oi_sweep_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(sweep_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => {}
                }
                let symbols = registry.enabled_symbols();
                if let Err(e) = poller.poll_once(&symbols).await {
                    warn!(error = %e, "OI poll failed");
                }
                // The sweep runs in this same task, so per-symbol scans
                // never overlap across ticks.
                detector.sweep(&symbols).await;
            }
        });
    }

    // ── 13. Long/short enrichment feed ───────────────────────────────────
    {
        let feed = long_short.clone();
        let registry = registry.clone();
        let mut shutdown = shutdown_rx.clone();
        let poll_secs = config.long_short_poll_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(poll_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => {}
                }
                feed.poll_once(&registry.enabled_symbols()).await;
            }
        });
    }

    // ── 14. Retention: daily at 01:00 local ──────────────────────────────
    {
        let snapshots = snapshot_store.clone();
        let candles = candle_store.clone();
        let mut shutdown = shutdown_rx.clone();
        let keep_days = config.candle_retention_days;
        tokio::spawn(async move {
            loop {
                let wait = until_next_local(NaiveTime::from_hms_opt(1, 0, 0).expect("valid time"));
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(wait) => {}
                }
                if let Err(e) = snapshots.run_retention().await {
                    warn!(error = %e, "snapshot retention failed");
                }
                if let Err(e) = candles.cleanup(keep_days).await {
                    warn!(error = %e, "candle cleanup failed");
                }
            }
        });
    }

    // ── 15. Symbol reconciliation ────────────────────────────────────────
    {
        let registry = registry.clone();
        let mut shutdown = shutdown_rx.clone();
        let reconcile_secs = config.symbol_reconcile_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(reconcile_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // skip the immediate tick, bootstrap just ran
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => {}
                }
                match registry.reconcile().await {
                    Ok(count) => info!(count, "symbol set reconciled"),
                    Err(e) => warn!(error = %e, "symbol reconcile failed, keeping previous set"),
                }
            }
        });
    }

    // ── 16. Alert retry tick ─────────────────────────────────────────────
    {
        let engine = alert_engine.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => {}
                }
                engine.retry_failed().await;
            }
        });
    }

    // ── 17. Batch collector for perfect-hammer waves ─────────────────────
    let (batch_tx, mut batch_rx) = tokio::sync::mpsc::channel(64);
    {
        let collector = Arc::new(BatchSignalCollector::new(
            Duration::from_millis(config.batch_window_ms),
            [AlertType::PerfectHammer],
            batch_tx,
        ));
        tokio::spawn(collector.run(alert_engine.subscribe(), shutdown_rx.clone()));

        // Downstream batch consumer: log the wave. A trading adapter would
        // subscribe here instead.
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    batch = batch_rx.recv() => match batch {
                        Some(b) => info!(
                            batch_id = %b.id,
                            kline_time = b.kline_time,
                            count = b.alerts.len(),
                            "perfect-hammer wave"
                        ),
                        None => return,
                    },
                }
            }
        });
    }

    // ── 18. Health endpoint ──────────────────────────────────────────────
    {
        let app = api::rest::router(state.clone());
        let bind_addr = config.bind_addr.clone();
        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(addr = %bind_addr, error = %e, "failed to bind health endpoint");
                    return;
                }
            };
            info!(addr = %bind_addr, "health endpoint listening");
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "health server failed");
            }
        });
    }

    info!("all subsystems running, press Ctrl+C to stop");

    // ── 19. Run until shutdown or terminal stream failure ────────────────
    let exit: anyhow::Result<()> = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received, stopping gracefully");
            Ok(())
        }
        joined = dispatcher_handle => {
            match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.context("market-data stream terminally failed")),
                Err(e) => Err(anyhow::anyhow!("dispatcher task panicked: {e}")),
            }
        }
    };

    // Cancel every task, then give pending writes a bounded grace period.
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(Duration::from_secs(config.shutdown_grace_secs)).await;
    if let Err(e) = candle_store.flush().await {
        warn!(error = %e, "final candle flush failed");
    }
    // Queued alert retries get one last attempt before the pool closes.
    alert_engine.retry_failed().await;
    let still_pending = alert_engine.pending_retries();
    if still_pending > 0 {
        warn!(still_pending, "alerts still unpersisted at shutdown");
    }
    // Work-in-progress aggregates never persist (their periods have not
    // closed); report what the restart will rebuild.
    let discarded = aggregator.drain_wip().len();
    if discarded > 0 {
        info!(discarded, "incomplete rollup candles discarded at shutdown");
    }
    pool.close().await;

    info!("OI Sentinel shut down complete");
    exit
}

/// Duration until the next local occurrence of `time`.
fn until_next_local(time: NaiveTime) -> Duration {
    let now = Local::now();
    let today_target = now.date_naive().and_time(time);
    let target = if now.naive_local() < today_target {
        today_target
    } else {
        (now.date_naive() + chrono::Duration::days(1)).and_time(time)
    };
    (target - now.naive_local())
        .to_std()
        .unwrap_or(Duration::from_secs(60))
}
