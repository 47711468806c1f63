// =============================================================================
// SymbolRegistry — tradable symbol set with blacklist and reconciliation
// =============================================================================
//
// The registry owns the answer to "which symbols does the engine watch".
// On startup and every reconcile tick it pulls exchangeInfo, drops
// blacklisted symbols (substring match), and reconciles the persisted set
// in one transaction: disable all, upsert the survivors as enabled.
// Symbols that vanish from the exchange are disabled, never deleted, so
// their history keeps resolving.  An exchange outage keeps the previous
// set in place.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::binance::BinanceFuturesClient;
use crate::cache::layer::{CacheLayer, TTL_ENABLED_SYMBOLS};
use crate::config::MonitorOverrides;
use crate::store::{ConfigStore, SymbolStore};
use crate::types::{SymbolInfo, SymbolStatus};

pub struct SymbolRegistry {
    client: Arc<BinanceFuturesClient>,
    store: Arc<SymbolStore>,
    config_store: Arc<ConfigStore>,
    cache: Arc<CacheLayer>,
    enabled: RwLock<Vec<SymbolInfo>>,
}

impl SymbolRegistry {
    pub fn new(
        client: Arc<BinanceFuturesClient>,
        store: Arc<SymbolStore>,
        config_store: Arc<ConfigStore>,
        cache: Arc<CacheLayer>,
    ) -> Self {
        Self {
            client,
            store,
            config_store,
            cache,
            enabled: RwLock::new(Vec::new()),
        }
    }

    /// Current enabled symbols with metadata (in-memory copy).
    pub fn enabled(&self) -> Vec<SymbolInfo> {
        self.enabled.read().clone()
    }

    /// Current enabled symbol names.
    pub fn enabled_symbols(&self) -> Vec<String> {
        self.enabled.read().iter().map(|s| s.symbol.clone()).collect()
    }

    /// Startup path: reconcile from the exchange, falling back to the
    /// persisted set when the exchange is unreachable. Fails only when
    /// both sources come up empty.
    pub async fn bootstrap(&self) -> Result<()> {
        match self.reconcile().await {
            Ok(count) => {
                info!(count, "symbol registry bootstrapped from exchange");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "exchange reconcile failed at startup, falling back to persisted set");
            }
        }

        let persisted = self
            .store
            .enabled()
            .await
            .context("failed to load persisted symbol set")?;
        if persisted.is_empty() {
            anyhow::bail!("no symbols available: exchange unreachable and no persisted set");
        }
        info!(count = persisted.len(), "symbol registry bootstrapped from database");
        *self.enabled.write() = persisted;
        Ok(())
    }

    /// Pull exchangeInfo, apply the blacklist, reconcile the store, refresh
    /// the in-memory set. Returns the enabled count.
    pub async fn reconcile(&self) -> Result<usize> {
        let all = self
            .client
            .exchange_info()
            .await
            .context("exchangeInfo fetch failed")?;

        let overrides = self
            .config_store
            .load_overrides()
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "blacklist load failed, using defaults");
                MonitorOverrides::default()
            });

        let filtered = apply_blacklist(all, &overrides);
        self.store.reconcile(&filtered).await?;

        let count = filtered.len();
        *self.enabled.write() = filtered;
        self.cache
            .invalidate(&CacheLayer::enabled_symbols_key())
            .await;
        Ok(count)
    }

    /// Cached read of the persisted enabled set (serves outside readers
    /// without a DB round-trip per request).
    pub async fn enabled_cached(&self) -> Result<Vec<SymbolInfo>> {
        let store = self.store.clone();
        self.cache
            .get_or_fill(
                &CacheLayer::enabled_symbols_key(),
                TTL_ENABLED_SYMBOLS,
                move || async move { store.enabled().await },
            )
            .await
    }
}

/// Keep tradable, non-blacklisted symbols.
fn apply_blacklist(symbols: Vec<SymbolInfo>, overrides: &MonitorOverrides) -> Vec<SymbolInfo> {
    symbols
        .into_iter()
        .filter(|s| s.status == SymbolStatus::Trading)
        .filter(|s| !overrides.is_blacklisted(&s.symbol))
        .collect()
}
