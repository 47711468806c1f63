// =============================================================================
// ConfigStore — runtime-mutable monitoring settings from the DB
// =============================================================================
//
// `oi_monitoring_config` is a key/value table with JSON-encoded values.
// Individual keys compose into MonitorOverrides; a malformed value logs a
// warning and falls back to the default for that key, never failing the
// whole load.
// =============================================================================

use std::time::Duration;

use anyhow::Result;
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tracing::warn;

use crate::config::MonitorOverrides;
use crate::store::db::with_deadline;

pub struct ConfigStore {
    pool: MySqlPool,
    deadline: Duration,
}

impl ConfigStore {
    pub fn new(pool: MySqlPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }

    /// Fetch one config value as raw JSON. `None` when the key is absent.
    pub async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row = with_deadline(
            self.deadline,
            "oi_monitoring_config get",
            sqlx::query("SELECT cfg_value FROM oi_monitoring_config WHERE cfg_key = ?")
                .bind(key)
                .fetch_optional(&self.pool),
        )
        .await?;

        let Some(row) = row else { return Ok(None) };
        let raw: String = row.try_get("cfg_value").unwrap_or_default();
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "malformed JSON in oi_monitoring_config, ignoring");
                Ok(None)
            }
        }
    }

    /// Upsert one config value.
    pub async fn set_json(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        with_deadline(
            self.deadline,
            "oi_monitoring_config set",
            sqlx::query(
                "INSERT INTO oi_monitoring_config (cfg_key, cfg_value) VALUES (?, ?) \
                 ON DUPLICATE KEY UPDATE cfg_value = VALUES(cfg_value)",
            )
            .bind(key)
            .bind(value.to_string())
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Compose the full MonitorOverrides from individual keys. Every key is
    /// optional; defaults fill the gaps.
    pub async fn load_overrides(&self) -> Result<MonitorOverrides> {
        let mut overrides = MonitorOverrides::default();

        if let Some(v) = self.get_json("symbol_thresholds").await? {
            match serde_json::from_value(v) {
                Ok(map) => overrides.symbol_thresholds = map,
                Err(e) => warn!(error = %e, "bad symbol_thresholds value, keeping default"),
            }
        }
        if let Some(v) = self.get_json("blacklist").await? {
            match serde_json::from_value(v) {
                Ok(list) => overrides.blacklist = list,
                Err(e) => warn!(error = %e, "bad blacklist value, keeping default"),
            }
        }
        if let Some(v) = self.get_json("dedup_delta_pct").await? {
            match v.as_f64() {
                Some(x) => overrides.dedup_delta_pct = x,
                None => warn!("bad dedup_delta_pct value, keeping default"),
            }
        }
        if let Some(v) = self.get_json("high_threshold_pct").await? {
            match v.as_f64() {
                Some(x) => overrides.high_threshold_pct = x,
                None => warn!("bad high_threshold_pct value, keeping default"),
            }
        }
        if let Some(v) = self.get_json("medium_threshold_pct").await? {
            match v.as_f64() {
                Some(x) => overrides.medium_threshold_pct = x,
                None => warn!("bad medium_threshold_pct value, keeping default"),
            }
        }

        Ok(overrides)
    }
}
