// =============================================================================
// CacheLayer — short-TTL read-through cache over Redis
// =============================================================================
//
// String keys, JSON values, per-domain TTLs.  Every miss-fill runs under a
// single-flight mutex per key so a cold popular key costs one underlying
// read, not N.  Redis being down degrades to uncached reads; it never takes
// the read path down with it.
// =============================================================================

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::store::anomaly_store::AnomalyListParams;
use crate::store::shard;

// ── TTLs per cache domain (seconds) ─────────────────────────────────────────
pub const TTL_LATEST: u64 = 60;
pub const TTL_ENABLED_SYMBOLS: u64 = 5 * 60;
pub const TTL_ANOMALY_LIST: u64 = 30;
pub const TTL_DAILY_STATS: u64 = 30;
pub const TTL_CONFIG: u64 = 10 * 60;

/// Timeout for any single Redis round-trip.
const REDIS_DEADLINE: Duration = Duration::from_secs(5);

pub struct CacheLayer {
    conn: ConnectionManager,
    /// Per-key single-flight locks for the miss-fill path.
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CacheLayer {
    /// Connect to Redis and return the layer. The connection manager
    /// reconnects automatically; a dead Redis only degrades reads.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid Redis URL")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to Redis")?;
        info!("redis cache connected");
        Ok(Self {
            conn,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    // -------------------------------------------------------------------------
    // Key builders
    // -------------------------------------------------------------------------

    pub fn latest_key(symbol: &str) -> String {
        format!("latest:{symbol}")
    }

    pub fn enabled_symbols_key() -> String {
        "symbols:enabled".to_string()
    }

    /// Anomaly list queries key on a hash of the normalized parameters.
    pub fn anomaly_list_key(params: &AnomalyListParams) -> String {
        let normalized = serde_json::to_string(params).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        normalized.hash(&mut hasher);
        format!("anomalies:{:016x}", hasher.finish())
    }

    /// Stats keys deliberately drop the symbol filter: "all symbols today"
    /// and "BTCUSDT today" share one entry and the caller filters
    /// client-side.
    pub fn stats_key(date: NaiveDate) -> String {
        format!("stats:{}", shard::date_suffix(date))
    }

    pub fn config_key(key: &str) -> String {
        format!("cfg:{key}")
    }

    pub fn history_key(symbol: &str, period_secs: i64) -> String {
        format!("hist:{symbol}:{period_secs}")
    }

    /// History windows cache for a fraction of their period, floored at 30 s.
    pub fn history_ttl(period_secs: i64) -> u64 {
        ((period_secs / 10).max(30)) as u64
    }

    // -------------------------------------------------------------------------
    // Read-through
    // -------------------------------------------------------------------------

    /// Read-through get: returns the cached value, or runs `fill` under a
    /// per-key single-flight lock and caches its result for `ttl_secs`.
    pub async fn get_or_fill<T, F, Fut>(&self, key: &str, ttl_secs: u64, fill: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // Fast path: cache hit without taking the flight lock.
        if let Some(hit) = self.try_get::<T>(key).await {
            return Ok(hit);
        }

        let flight = self.flight_lock(key);
        let _guard = flight.lock().await;

        // Another flight may have filled the key while we waited.
        if let Some(hit) = self.try_get::<T>(key).await {
            self.release_flight(key, &flight);
            return Ok(hit);
        }

        let value = fill().await;
        match &value {
            Ok(v) => self.try_set(key, v, ttl_secs).await,
            Err(_) => {}
        }

        self.release_flight(key, &flight);
        value
    }

    /// Delete a key (snapshot-ingestion invalidation path).
    pub async fn invalidate(&self, key: &str) {
        let mut conn = self.conn.clone();
        let res = tokio::time::timeout(REDIS_DEADLINE, async {
            conn.del::<_, ()>(key).await
        })
        .await;
        match res {
            Ok(Ok(())) => debug!(key, "cache invalidated"),
            Ok(Err(e)) => warn!(key, error = %e, "cache invalidate failed"),
            Err(_) => warn!(key, "cache invalidate timed out"),
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn try_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone();
        let res = tokio::time::timeout(REDIS_DEADLINE, async {
            conn.get::<_, Option<String>>(key).await
        })
        .await;

        match res {
            Ok(Ok(Some(raw))) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "cache entry failed to deserialize, dropping");
                    None
                }
            },
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                warn!(key, error = %e, "cache read failed, falling through");
                None
            }
            Err(_) => {
                warn!(key, "cache read timed out, falling through");
                None
            }
        }
    }

    async fn try_set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache value failed to serialize");
                return;
            }
        };

        let mut conn = self.conn.clone();
        let res = tokio::time::timeout(REDIS_DEADLINE, async {
            conn.set_ex::<_, _, ()>(key, raw, ttl_secs).await
        })
        .await;
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(key, error = %e, "cache write failed"),
            Err(_) => warn!(key, "cache write timed out"),
        }
    }

    fn flight_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inflight.lock();
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_flight(&self, key: &str, flight: &Arc<tokio::sync::Mutex<()>>) {
        let mut map = self.inflight.lock();
        // Drop the map entry once we hold the only outside reference.
        if Arc::strong_count(flight) <= 2 {
            map.remove(key);
        }
    }
}
