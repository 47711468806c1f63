// =============================================================================
// Long/Short Ratio Feed — crowd positioning for anomaly enrichment
// =============================================================================
//
// The global long/short account ratio shows the proportion of accounts that
// are net long versus net short.  The feed polls it per symbol on a slow
// cadence and keeps only the most recent reading; the anomaly sweep reads
// whatever is freshest.  A failed poll keeps the previous reading.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::binance::{BinanceFuturesClient, LongShortSnapshot};

pub struct LongShortFeed {
    client: Arc<BinanceFuturesClient>,
    latest: RwLock<HashMap<String, LongShortSnapshot>>,
}

impl LongShortFeed {
    pub fn new(client: Arc<BinanceFuturesClient>) -> Self {
        Self {
            client,
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Most recent reading for a symbol, if any poll has succeeded.
    pub fn latest(&self, symbol: &str) -> Option<LongShortSnapshot> {
        self.latest.read().get(symbol).cloned()
    }

    /// Poll every symbol once. Per-symbol failures keep the stale reading.
    pub async fn poll_once(&self, symbols: &[String]) {
        for symbol in symbols {
            match self.client.long_short_ratio(symbol).await {
                Ok(snapshot) => {
                    debug!(
                        symbol,
                        long_pct = format!("{:.1}", snapshot.long_account_pct),
                        short_pct = format!("{:.1}", snapshot.short_account_pct),
                        ratio = format!("{:.3}", snapshot.ratio),
                        "long/short ratio updated"
                    );
                    self.latest.write().insert(symbol.clone(), snapshot);
                }
                Err(e) => {
                    warn!(symbol, error = %e, "long/short ratio fetch failed, keeping previous");
                }
            }
        }
    }

    /// Insert a reading directly (tests and warm-up).
    pub fn seed(&self, snapshot: LongShortSnapshot) {
        self.latest.write().insert(snapshot.symbol.clone(), snapshot);
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_and_read_back() {
        let client = Arc::new(BinanceFuturesClient::new("https://example.invalid"));
        let feed = LongShortFeed::new(client);
        assert!(feed.latest("BTCUSDT").is_none());

        feed.seed(LongShortSnapshot {
            symbol: "BTCUSDT".into(),
            long_account_pct: 62.0,
            short_account_pct: 38.0,
            ratio: 1.63,
            timestamp_ms: 1,
        });
        let got = feed.latest("BTCUSDT").unwrap();
        assert!((got.long_account_pct - 62.0).abs() < 1e-12);

        // A newer seed replaces the old reading.
        feed.seed(LongShortSnapshot {
            symbol: "BTCUSDT".into(),
            long_account_pct: 55.0,
            short_account_pct: 45.0,
            ratio: 1.22,
            timestamp_ms: 2,
        });
        assert!((feed.latest("BTCUSDT").unwrap().ratio - 1.22).abs() < 1e-12);
    }
}
