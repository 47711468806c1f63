// =============================================================================
// StreamDispatcher — the single multiplexed market-data subscription
// =============================================================================
//
// Owns one long-lived WebSocket to the exchange.  The stream list is
// recorded at construction; every (re)connect replays the full SUBSCRIBE
// set.  A ping goes out every 30 s and the connection is closed locally if
// nothing (pong or data) arrives within one interval.  Reconnects back off
// exponentially; exceeding the attempt budget is a terminal error the
// supervisor sees.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::stream::event::{parse_frame, MarketEvent};
use crate::stream::router::EventRouter;

/// Maximum streams per SUBSCRIBE control frame.
const SUBSCRIBE_CHUNK: usize = 200;

/// Lock-free dispatcher health counters.
#[derive(Debug, Default)]
pub struct StreamCounters {
    pub connected: AtomicBool,
    pub events_parsed: AtomicU64,
    pub events_skipped: AtomicU64,
    pub parse_errors: AtomicU64,
    pub reconnects: AtomicU64,
    pub last_event_ms: AtomicI64,
}

pub struct StreamDispatcher {
    ws_base_url: String,
    streams: Vec<String>,
    max_attempts: u32,
    reconnect_interval: Duration,
    ping_interval: Duration,
    router: Arc<EventRouter>,
    counters: Arc<StreamCounters>,
}

/// Why a single connection ended.
enum ConnEnd {
    Shutdown,
    Dropped,
}

impl StreamDispatcher {
    pub fn new(
        ws_base_url: impl Into<String>,
        streams: Vec<String>,
        max_attempts: u32,
        reconnect_interval: Duration,
        ping_interval: Duration,
        router: Arc<EventRouter>,
        counters: Arc<StreamCounters>,
    ) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
            streams,
            max_attempts,
            reconnect_interval,
            ping_interval,
            router,
            counters,
        }
    }

    /// Build the stream names for the standard subscription set: one 5m
    /// kline stream per symbol, the 24h tickers, and the mark-price array.
    pub fn standard_streams(symbols: &[String]) -> Vec<String> {
        let mut streams: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@kline_5m", s.to_lowercase()))
            .collect();
        streams.extend(symbols.iter().map(|s| format!("{}@ticker", s.to_lowercase())));
        streams.push("!markPrice@arr".to_string());
        streams
    }

    /// Run the connect / read / reconnect state machine until shutdown or
    /// the reconnect budget is exhausted (terminal error).
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let connected_at = Instant::now();
            match self.run_connection(&mut shutdown).await {
                Ok(ConnEnd::Shutdown) => {
                    info!("stream dispatcher shut down");
                    return Ok(());
                }
                Ok(ConnEnd::Dropped) => {
                    warn!("market-data connection dropped");
                }
                Err(e) => {
                    error!(error = %e, "market-data connection failed");
                }
            }
            self.counters.connected.store(false, Ordering::Relaxed);

            // A connection that survived a while earns a fresh budget.
            if connected_at.elapsed() >= Duration::from_secs(60) {
                attempt = 0;
            }
            attempt += 1;
            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);

            if attempt > self.max_attempts {
                anyhow::bail!(
                    "market-data stream exceeded {} reconnect attempts",
                    self.max_attempts
                );
            }

            // Exponential backoff from the base interval, capped at 60 s.
            let backoff = self
                .reconnect_interval
                .saturating_mul(1u32 << (attempt - 1).min(4))
                .min(Duration::from_secs(60));
            info!(attempt, backoff_s = backoff.as_secs(), "reconnecting market-data stream");

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    /// Drive one WebSocket connection to completion.
    async fn run_connection(
        &self,
        shutdown: &mut tokio::sync::watch::Receiver<bool>,
    ) -> Result<ConnEnd> {
        let url = format!("{}/ws", self.ws_base_url);
        info!(url = %url, streams = self.streams.len(), "connecting market-data stream");

        let (ws_stream, _response) = connect_async(&url)
            .await
            .context("failed to connect market-data WebSocket")?;
        let (mut write, mut read) = ws_stream.split();

        // Replay the full subscription set, chunked.
        let mut frame_id: u64 = 0;
        for chunk in self.streams.chunks(SUBSCRIBE_CHUNK) {
            frame_id += 1;
            let frame = json!({
                "method": "SUBSCRIBE",
                "params": chunk,
                "id": frame_id,
            });
            write
                .send(Message::Text(frame.to_string()))
                .await
                .context("failed to send SUBSCRIBE frame")?;
        }
        info!(frames = frame_id, "subscription frames sent");
        self.counters.connected.store(true, Ordering::Relaxed);

        let mut ping_timer = tokio::time::interval(self.ping_interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_timer.reset();
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(ConnEnd::Shutdown);
                }

                _ = ping_timer.tick() => {
                    // No pong (or anything else) for a full interval: the
                    // connection is stale, close it locally.
                    if last_activity.elapsed() > self.ping_interval + Duration::from_secs(5) {
                        warn!("no pong within ping interval, closing stale connection");
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(ConnEnd::Dropped);
                    }
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        warn!(error = %e, "ping send failed");
                        return Ok(ConnEnd::Dropped);
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_activity = Instant::now();
                            self.handle_text(&text).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            last_activity = Instant::now();
                            if let Err(e) = write.send(Message::Pong(payload)).await {
                                warn!(error = %e, "pong reply failed");
                                return Ok(ConnEnd::Dropped);
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_activity = Instant::now();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "server closed market-data stream");
                            return Ok(ConnEnd::Dropped);
                        }
                        Some(Ok(_)) => {
                            // Binary frames are not part of this feed.
                            last_activity = Instant::now();
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "market-data read error");
                            return Ok(ConnEnd::Dropped);
                        }
                        None => {
                            warn!("market-data stream ended");
                            return Ok(ConnEnd::Dropped);
                        }
                    }
                }
            }
        }
    }

    /// Parse one text frame and route its events. Parse errors are logged
    /// and the frame dropped; they never reach the connection loop.
    async fn handle_text(&self, text: &str) {
        match parse_frame(text) {
            Ok(events) => {
                for event in events {
                    match &event {
                        MarketEvent::Skipped => {
                            self.counters.events_skipped.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {
                            self.counters.events_parsed.fetch_add(1, Ordering::Relaxed);
                            self.counters
                                .last_event_ms
                                .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
                        }
                    }
                    self.router.route(event).await;
                }
            }
            Err(e) => {
                self.counters.parse_errors.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "dropping unparsable frame");
            }
        }
    }
}
