// =============================================================================
// AlertStore — alert persistence routed across the three alert tables
// =============================================================================
//
// TOUCHED / APPROACHING land in `sr_alerts`; VOLUME_SURGE in
// `volume_alerts`; every candlestick/breakout alert type in
// `kline_breakout_signals`.  The duplicate probe enforces that no two
// persisted alerts share (symbol, interval, alert_type, level_price,
// kline_time).
// =============================================================================

use std::time::Duration;

use anyhow::Result;
use sqlx::mysql::MySqlPool;
use sqlx::Row;

use crate::store::db::with_deadline;
use crate::types::{Alert, AlertType};

pub struct AlertStore {
    pool: MySqlPool,
    deadline: Duration,
}

impl AlertStore {
    pub fn new(pool: MySqlPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }

    /// Table an alert of this type is persisted to.
    fn table_for(alert_type: AlertType) -> &'static str {
        match alert_type {
            AlertType::Touched | AlertType::Approaching => "sr_alerts",
            AlertType::VolumeSurge => "volume_alerts",
            _ => "kline_breakout_signals",
        }
    }

    /// True when an identical alert (symbol, interval, type, level_price,
    /// kline_time) is already stored. `<=>` is MySQL's null-safe equality,
    /// so alerts without a level compare on NULL = NULL.
    pub async fn exists(&self, alert: &Alert) -> Result<bool> {
        let table = Self::table_for(alert.alert_type);
        let sql = if table == "sr_alerts" {
            format!(
                "SELECT COUNT(*) AS n FROM `{table}` \
                 WHERE symbol = ? AND `interval` = ? AND alert_type = ? \
                   AND level_price <=> ? AND kline_time = ?"
            )
        } else {
            format!(
                "SELECT COUNT(*) AS n FROM `{table}` \
                 WHERE symbol = ? AND `interval` = ? AND alert_type = ? \
                   AND kline_time = ?"
            )
        };

        let mut query = sqlx::query(&sql)
            .bind(&alert.symbol)
            .bind(alert.interval.as_str())
            .bind(alert.alert_type.as_str());
        if table == "sr_alerts" {
            query = query.bind(alert.level_price);
        }
        query = query.bind(alert.kline_time);

        let row = with_deadline(self.deadline, table, query.fetch_one(&self.pool)).await?;
        let n: i64 = row.try_get("n").unwrap_or(0);
        Ok(n > 0)
    }

    /// Persist one alert into its table.
    pub async fn insert(&self, alert: &Alert) -> Result<()> {
        match Self::table_for(alert.alert_type) {
            "sr_alerts" => self.insert_sr(alert).await,
            "volume_alerts" => self.insert_volume(alert).await,
            _ => self.insert_breakout(alert).await,
        }
    }

    async fn insert_sr(&self, alert: &Alert) -> Result<()> {
        with_deadline(
            self.deadline,
            "sr_alerts insert",
            sqlx::query(
                "INSERT INTO sr_alerts \
                 (symbol, `interval`, alert_type, level_type, level_price, \
                  current_price, distance_pct, level_strength, breakout_score, \
                  kline_time, description) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&alert.symbol)
            .bind(alert.interval.as_str())
            .bind(alert.alert_type.as_str())
            .bind(alert.level_type.map(|t| t.as_str()).unwrap_or("support"))
            .bind(alert.level_price.unwrap_or(0.0))
            .bind(alert.current_price)
            .bind(alert.distance_pct)
            .bind(alert.level_strength)
            .bind(alert.breakout_score)
            .bind(alert.kline_time)
            .bind(&alert.description)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn insert_volume(&self, alert: &Alert) -> Result<()> {
        // level_strength carries the surge multiplier for volume alerts.
        with_deadline(
            self.deadline,
            "volume_alerts insert",
            sqlx::query(
                "INSERT INTO volume_alerts \
                 (symbol, `interval`, alert_type, multiplier, price, kline_time, description) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&alert.symbol)
            .bind(alert.interval.as_str())
            .bind(alert.alert_type.as_str())
            .bind(alert.level_strength)
            .bind(alert.current_price)
            .bind(alert.kline_time)
            .bind(&alert.description)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn insert_breakout(&self, alert: &Alert) -> Result<()> {
        with_deadline(
            self.deadline,
            "kline_breakout_signals insert",
            sqlx::query(
                "INSERT INTO kline_breakout_signals \
                 (symbol, `interval`, alert_type, current_price, breakout_score, \
                  volatility_score, volume_score, ma_convergence_score, \
                  position_score, pattern_score, predicted_direction, \
                  kline_time, description) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&alert.symbol)
            .bind(alert.interval.as_str())
            .bind(alert.alert_type.as_str())
            .bind(alert.current_price)
            .bind(alert.breakout_score)
            .bind(alert.feature_scores.volatility)
            .bind(alert.feature_scores.volume)
            .bind(alert.feature_scores.ma_convergence)
            .bind(alert.feature_scores.position)
            .bind(alert.feature_scores.pattern)
            .bind(alert.predicted_direction.as_str())
            .bind(alert.kline_time)
            .bind(&alert.description)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_by_alert_type() {
        assert_eq!(AlertStore::table_for(AlertType::Touched), "sr_alerts");
        assert_eq!(AlertStore::table_for(AlertType::Approaching), "sr_alerts");
        assert_eq!(AlertStore::table_for(AlertType::VolumeSurge), "volume_alerts");
        assert_eq!(AlertStore::table_for(AlertType::Squeeze), "kline_breakout_signals");
        assert_eq!(AlertStore::table_for(AlertType::PerfectHammer), "kline_breakout_signals");
        assert_eq!(AlertStore::table_for(AlertType::Doji), "kline_breakout_signals");
    }
}
