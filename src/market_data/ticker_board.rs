// =============================================================================
// TickerBoard — latest 24h ticker per symbol
// =============================================================================
//
// A lossy consumer of the ticker stream keeps the newest 24h statistics per
// symbol.  Detectors read the 24-hour gain from here (e.g. the S/R
// proximity gate); stale entries only mean a slightly stale gate.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::stream::event::TickerEvent;

#[derive(Default)]
pub struct TickerBoard {
    inner: RwLock<HashMap<String, TickerEvent>>,
}

impl TickerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the newest ticker for its symbol.
    pub fn update(&self, event: TickerEvent) {
        self.inner.write().insert(event.symbol.clone(), event);
    }

    /// 24-hour percent change for a symbol, if a ticker has been seen.
    pub fn gain_24h_pct(&self, symbol: &str) -> Option<f64> {
        self.inner.read().get(symbol).map(|t| t.price_change_pct)
    }

    /// Last traded price for a symbol.
    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.inner.read().get(symbol).map(|t| t.last_price)
    }

    /// 24-hour high/low for a symbol.
    pub fn range_24h(&self, symbol: &str) -> Option<(f64, f64)> {
        self.inner
            .read()
            .get(symbol)
            .map(|t| (t.low_24h, t.high_24h))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, pct: f64, time: i64) -> TickerEvent {
        TickerEvent {
            symbol: symbol.into(),
            last_price: 100.0,
            price_change_pct: pct,
            high_24h: 110.0,
            low_24h: 90.0,
            event_time: time,
        }
    }

    #[test]
    fn newest_ticker_wins() {
        let board = TickerBoard::new();
        board.update(ticker("BTCUSDT", 3.0, 1));
        board.update(ticker("BTCUSDT", 11.0, 2));
        assert_eq!(board.gain_24h_pct("BTCUSDT"), Some(11.0));
        assert_eq!(board.gain_24h_pct("ETHUSDT"), None);
    }

    #[test]
    fn range_reads_back() {
        let board = TickerBoard::new();
        board.update(ticker("SOLUSDT", 1.0, 1));
        assert_eq!(board.range_24h("SOLUSDT"), Some((90.0, 110.0)));
    }
}
