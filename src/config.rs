// =============================================================================
// Configuration — process-wide settings with code-defined defaults
// =============================================================================
//
// Static configuration is loaded once from environment variables at startup;
// a missing DATABASE_URL is fatal.  Runtime-mutable pieces (the symbol
// blacklist, per-symbol OI thresholds) live in the `oi_monitoring_config`
// table and are read through the cache with a 10-minute TTL, so they can be
// changed without a restart.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Default-value helpers (shared by env parsing and serde defaults)
// =============================================================================

fn default_oi_periods() -> Vec<i64> {
    vec![300, 900, 1800, 3600, 7200, 14400]
}

fn default_threshold_pct() -> f64 {
    10.0
}

fn default_dedup_delta_pct() -> f64 {
    1.0
}

fn default_high_threshold_pct() -> f64 {
    30.0
}

fn default_medium_threshold_pct() -> f64 {
    15.0
}

fn default_blacklist() -> Vec<String> {
    vec!["USDC".to_string(), "BUSD".to_string()]
}

/// Read an env var, falling back to `default` when unset or unparsable.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// =============================================================================
// Config
// =============================================================================

/// Process-wide static configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // ── External services ───────────────────────────────────────────────
    pub database_url: String,
    pub redis_url: String,
    pub rest_base_url: String,
    pub ws_base_url: String,
    pub bind_addr: String,

    // ── Stream dispatcher ───────────────────────────────────────────────
    pub reconnect_max_attempts: u32,
    pub reconnect_interval_secs: u64,
    pub ping_interval_secs: u64,
    pub channel_capacity: usize,
    pub partition_workers: usize,

    // ── OI sweep ────────────────────────────────────────────────────────
    pub oi_sweep_secs: u64,
    pub oi_periods_secs: Vec<i64>,
    pub default_threshold_pct: f64,
    pub dedup_delta_pct: f64,
    pub high_threshold_pct: f64,
    pub medium_threshold_pct: f64,

    // ── Persistence ─────────────────────────────────────────────────────
    pub snapshot_retention_days: i64,
    pub candle_retention_days: i64,
    pub candle_flush_rows: usize,
    pub candle_flush_secs: u64,
    pub db_deadline_secs: u64,
    pub db_max_connections: u32,

    // ── Alerts ──────────────────────────────────────────────────────────
    pub alert_cooldown_secs: i64,
    pub min_breakout_score: f64,
    pub batch_window_ms: u64,

    // ── Periodic tasks ──────────────────────────────────────────────────
    pub symbol_reconcile_secs: u64,
    pub long_short_poll_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Config {
    /// Build configuration from the environment. Only DATABASE_URL is
    /// required; everything else has a code default.
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Ok(Self {
            database_url,
            redis_url,
            rest_base_url: std::env::var("SENTINEL_REST_URL")
                .unwrap_or_else(|_| "https://fapi.binance.com".into()),
            ws_base_url: std::env::var("SENTINEL_WS_URL")
                .unwrap_or_else(|_| "wss://fstream.binance.com".into()),
            bind_addr: std::env::var("SENTINEL_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3001".into()),

            reconnect_max_attempts: env_or("SENTINEL_RECONNECT_MAX", 10),
            reconnect_interval_secs: env_or("SENTINEL_RECONNECT_INTERVAL_SECS", 5),
            ping_interval_secs: env_or("SENTINEL_PING_INTERVAL_SECS", 30),
            channel_capacity: env_or("SENTINEL_CHANNEL_CAPACITY", 1024),
            partition_workers: env_or("SENTINEL_PARTITION_WORKERS", workers),

            oi_sweep_secs: env_or("SENTINEL_OI_SWEEP_SECS", 60),
            oi_periods_secs: default_oi_periods(),
            default_threshold_pct: env_or("SENTINEL_OI_THRESHOLD_PCT", default_threshold_pct()),
            dedup_delta_pct: env_or("SENTINEL_OI_DEDUP_DELTA_PCT", default_dedup_delta_pct()),
            high_threshold_pct: env_or("SENTINEL_OI_HIGH_PCT", default_high_threshold_pct()),
            medium_threshold_pct: env_or("SENTINEL_OI_MEDIUM_PCT", default_medium_threshold_pct()),

            snapshot_retention_days: env_or("SENTINEL_SNAPSHOT_RETENTION_DAYS", 20),
            candle_retention_days: env_or("SENTINEL_CANDLE_RETENTION_DAYS", 7),
            candle_flush_rows: env_or("SENTINEL_CANDLE_FLUSH_ROWS", 500),
            candle_flush_secs: env_or("SENTINEL_CANDLE_FLUSH_SECS", 30),
            db_deadline_secs: env_or("SENTINEL_DB_DEADLINE_SECS", 5),
            db_max_connections: env_or("SENTINEL_DB_MAX_CONNECTIONS", 20),

            alert_cooldown_secs: env_or("SENTINEL_ALERT_COOLDOWN_SECS", 1800),
            min_breakout_score: env_or("SENTINEL_MIN_BREAKOUT_SCORE", 60.0),
            batch_window_ms: env_or("SENTINEL_BATCH_WINDOW_MS", 2000),

            symbol_reconcile_secs: env_or("SENTINEL_SYMBOL_RECONCILE_SECS", 1800),
            long_short_poll_secs: env_or("SENTINEL_LONG_SHORT_POLL_SECS", 300),
            shutdown_grace_secs: env_or("SENTINEL_SHUTDOWN_GRACE_SECS", 5),
        })
    }
}

// =============================================================================
// MonitorOverrides — runtime-mutable monitoring settings from the DB
// =============================================================================

/// Runtime-mutable OI monitoring settings, deserialised from the
/// `oi_monitoring_config` key/value table (values are JSON-encoded).
///
/// Missing keys fall back to the static defaults; malformed JSON is logged
/// and skipped, never fatal at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorOverrides {
    /// Per-symbol OI threshold overrides (percent). Falls back to the global
    /// default when a symbol has no entry.
    #[serde(default)]
    pub symbol_thresholds: HashMap<String, f64>,

    /// Blacklist fragments. A symbol containing any fragment is excluded
    /// (substring match, so `USDC` blocks `USDCUSDT`).
    #[serde(default = "default_blacklist")]
    pub blacklist: Vec<String>,

    /// Minimum |percent_change| delta vs the previous anomaly before a new
    /// record is written.
    #[serde(default = "default_dedup_delta_pct")]
    pub dedup_delta_pct: f64,

    /// Severity boundaries (inclusive lower edges).
    #[serde(default = "default_high_threshold_pct")]
    pub high_threshold_pct: f64,
    #[serde(default = "default_medium_threshold_pct")]
    pub medium_threshold_pct: f64,
}

impl MonitorOverrides {
    /// Effective OI threshold for (symbol, period). Per-symbol override wins;
    /// otherwise the global default applies to every period.
    pub fn effective_threshold(&self, symbol: &str, global_default: f64) -> f64 {
        self.symbol_thresholds
            .get(symbol)
            .copied()
            .unwrap_or(global_default)
    }

    /// True when `symbol` matches any blacklist fragment.
    pub fn is_blacklisted(&self, symbol: &str) -> bool {
        self.blacklist.iter().any(|frag| symbol.contains(frag))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_default_blacklist_is_substring() {
        let ov = MonitorOverrides {
            blacklist: vec!["USDC".into()],
            ..Default::default()
        };
        assert!(ov.is_blacklisted("USDCUSDT"));
        assert!(ov.is_blacklisted("AUSDCB"));
        assert!(!ov.is_blacklisted("BTCUSDT"));
    }

    #[test]
    fn overrides_threshold_fallback() {
        let mut ov = MonitorOverrides::default();
        ov.symbol_thresholds.insert("BTCUSDT".into(), 20.0);
        assert_eq!(ov.effective_threshold("BTCUSDT", 10.0), 20.0);
        assert_eq!(ov.effective_threshold("ETHUSDT", 10.0), 10.0);
    }

    #[test]
    fn overrides_deserialise_empty_json_uses_defaults() {
        let ov: MonitorOverrides = serde_json::from_str("{}").unwrap();
        assert_eq!(ov.dedup_delta_pct, 1.0);
        assert_eq!(ov.high_threshold_pct, 30.0);
        assert_eq!(ov.medium_threshold_pct, 15.0);
        assert!(ov.is_blacklisted("USDCUSDT"));
    }

    #[test]
    fn overrides_partial_json_fills_defaults() {
        let json = r#"{ "symbol_thresholds": { "DOGEUSDT": 25.0 }, "blacklist": [] }"#;
        let ov: MonitorOverrides = serde_json::from_str(json).unwrap();
        assert_eq!(ov.effective_threshold("DOGEUSDT", 10.0), 25.0);
        assert!(!ov.is_blacklisted("USDCUSDT"));
        assert_eq!(ov.medium_threshold_pct, 15.0);
    }
}
