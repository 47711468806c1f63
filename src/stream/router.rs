// =============================================================================
// EventRouter — per-event-type channels with symbol-hash partitioning
// =============================================================================
//
// Kline events are the pipeline's backbone: they go to W bounded mpsc
// partitions chosen by symbol hash, one worker per partition, so candles
// for a given symbol are always handled in source order by a single owner.
// A full kline partition blocks the dispatcher (no loss).
//
// Ticker / mark-price / trade / depth streams are lossy by policy: they use
// bounded broadcast channels where a lagging consumer loses the OLDEST
// buffered events, never the newest.
// =============================================================================

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::stream::event::{
    DepthEvent, KlineEvent, MarkPriceEvent, MarketEvent, TickerEvent, TradeEvent,
};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Number of kline partitions (usually the worker count).
    pub partitions: usize,
    /// Capacity of each kline partition channel (blocking policy).
    pub kline_capacity: usize,
    /// Capacity of each lossy broadcast channel (drop-oldest policy).
    pub lossy_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            kline_capacity: 1024,
            lossy_capacity: 1024,
        }
    }
}

pub struct EventRouter {
    kline_partitions: Vec<mpsc::Sender<KlineEvent>>,
    ticker_tx: broadcast::Sender<TickerEvent>,
    mark_price_tx: broadcast::Sender<MarkPriceEvent>,
    trade_tx: broadcast::Sender<TradeEvent>,
    depth_tx: broadcast::Sender<DepthEvent>,
    /// Events that could not be delivered (closed partition).
    dropped: AtomicU64,
}

impl EventRouter {
    /// Build the router plus the receive side of every kline partition, in
    /// partition order. The caller spawns one worker per receiver.
    pub fn new(config: RouterConfig) -> (Self, Vec<mpsc::Receiver<KlineEvent>>) {
        let partitions = config.partitions.max(1);
        let mut senders = Vec::with_capacity(partitions);
        let mut receivers = Vec::with_capacity(partitions);
        for _ in 0..partitions {
            let (tx, rx) = mpsc::channel(config.kline_capacity.max(1));
            senders.push(tx);
            receivers.push(rx);
        }

        let (ticker_tx, _) = broadcast::channel(config.lossy_capacity.max(1));
        let (mark_price_tx, _) = broadcast::channel(config.lossy_capacity.max(1));
        let (trade_tx, _) = broadcast::channel(config.lossy_capacity.max(1));
        let (depth_tx, _) = broadcast::channel(config.lossy_capacity.max(1));

        (
            Self {
                kline_partitions: senders,
                ticker_tx,
                mark_price_tx,
                trade_tx,
                depth_tx,
                dropped: AtomicU64::new(0),
            },
            receivers,
        )
    }

    /// Stable partition index for a symbol.
    pub fn partition_for(&self, symbol: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        (hasher.finish() as usize) % self.kline_partitions.len()
    }

    /// Deliver one event to its channel. Kline delivery awaits channel
    /// space; the lossy kinds never block.
    pub async fn route(&self, event: MarketEvent) {
        match event {
            MarketEvent::Kline(e) => {
                let idx = self.partition_for(&e.symbol);
                if self.kline_partitions[idx].send(e).await.is_err() {
                    // Partition worker gone: shutdown in progress.
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(partition = idx, "kline partition closed, event dropped");
                }
            }
            MarketEvent::Ticker(e) => {
                let _ = self.ticker_tx.send(e);
            }
            MarketEvent::MarkPrice(e) => {
                let _ = self.mark_price_tx.send(e);
            }
            MarketEvent::Trade(e) => {
                let _ = self.trade_tx.send(e);
            }
            MarketEvent::Depth(e) => {
                let _ = self.depth_tx.send(e);
            }
            MarketEvent::Skipped => {}
        }
    }

    // ── Lossy subscriptions ─────────────────────────────────────────────

    pub fn subscribe_ticker(&self) -> broadcast::Receiver<TickerEvent> {
        self.ticker_tx.subscribe()
    }

    pub fn subscribe_mark_price(&self) -> broadcast::Receiver<MarkPriceEvent> {
        self.mark_price_tx.subscribe()
    }

    pub fn subscribe_trades(&self) -> broadcast::Receiver<TradeEvent> {
        self.trade_tx.subscribe()
    }

    pub fn subscribe_depth(&self) -> broadcast::Receiver<DepthEvent> {
        self.depth_tx.subscribe()
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
