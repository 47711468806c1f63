// =============================================================================
// AnomalyStore — persisted OI anomaly records and their queries
// =============================================================================

use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tracing::debug;

use crate::store::db::with_deadline;
use crate::store::shard;
use crate::types::{OIAnomalyRecord, Severity, TrendLabel};

pub struct AnomalyStore {
    pool: MySqlPool,
    deadline: Duration,
}

/// Normalized query parameters for anomaly list reads. Also the cache-key
/// source for the list query domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalyListParams {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub start_ms: Option<i64>,
    #[serde(default)]
    pub end_ms: Option<i64>,
    #[serde(default)]
    pub limit: u32,
}

/// Aggregate anomaly statistics for one Beijing-time day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyStats {
    pub total: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
    pub distinct_symbols: i64,
}

impl AnomalyStore {
    pub fn new(pool: MySqlPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }

    /// Persist a new anomaly record. Records are append-only.
    pub async fn insert(&self, rec: &OIAnomalyRecord) -> Result<()> {
        let sql = r#"
            INSERT INTO oi_anomaly_records
                (symbol, period_seconds, percent_change, oi_before, oi_after,
                 threshold_value, anomaly_time, severity,
                 price_before, price_after, funding_rate_before, funding_rate_after,
                 long_account_pct, short_account_pct, long_short_ratio,
                 high_24h, low_24h, low_2h,
                 distance_from_high_pct, distance_from_low_2h_pct,
                 high_30m, low_30m, broke_30m_high, broke_30m_low,
                 ma10, ma30, ma60, ma120, ma240, short_ma_trend, long_ma_trend)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                    ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;

        with_deadline(
            self.deadline,
            "oi_anomaly_records insert",
            sqlx::query(sql)
                .bind(&rec.symbol)
                .bind(rec.period_seconds)
                .bind(rec.percent_change)
                .bind(rec.oi_before)
                .bind(rec.oi_after)
                .bind(rec.threshold_value)
                .bind(rec.anomaly_time)
                .bind(rec.severity.as_str())
                .bind(rec.price_before)
                .bind(rec.price_after)
                .bind(rec.funding_rate_before)
                .bind(rec.funding_rate_after)
                .bind(rec.long_account_pct)
                .bind(rec.short_account_pct)
                .bind(rec.long_short_ratio)
                .bind(rec.high_24h)
                .bind(rec.low_24h)
                .bind(rec.low_2h)
                .bind(rec.distance_from_high_pct)
                .bind(rec.distance_from_low_2h_pct)
                .bind(rec.high_30m)
                .bind(rec.low_30m)
                .bind(rec.broke_30m_high)
                .bind(rec.broke_30m_low)
                .bind(rec.ma10)
                .bind(rec.ma30)
                .bind(rec.ma60)
                .bind(rec.ma120)
                .bind(rec.ma240)
                .bind(rec.short_ma_trend.map(|t| t.as_str()))
                .bind(rec.long_ma_trend.map(|t| t.as_str()))
                .execute(&self.pool),
        )
        .await?;

        debug!(symbol = %rec.symbol, period = rec.period_seconds, pct = rec.percent_change, "anomaly persisted");
        Ok(())
    }

    /// Most recent anomaly for (symbol, period). The detector compares the
    /// candidate's percent_change against this for deduplication.
    pub async fn latest_for(
        &self,
        symbol: &str,
        period_seconds: i64,
    ) -> Result<Option<OIAnomalyRecord>> {
        let row = with_deadline(
            self.deadline,
            "oi_anomaly_records latest",
            sqlx::query(
                "SELECT * FROM oi_anomaly_records \
                 WHERE symbol = ? AND period_seconds = ? \
                 ORDER BY anomaly_time DESC LIMIT 1",
            )
            .bind(symbol)
            .bind(period_seconds)
            .fetch_optional(&self.pool),
        )
        .await?;

        Ok(row.as_ref().map(row_to_record))
    }

    /// Filtered anomaly list, newest first.
    pub async fn list(&self, params: &AnomalyListParams) -> Result<Vec<OIAnomalyRecord>> {
        let mut sql = String::from("SELECT * FROM oi_anomaly_records WHERE 1=1");
        if params.symbol.is_some() {
            sql.push_str(" AND symbol = ?");
        }
        if params.severity.is_some() {
            sql.push_str(" AND severity = ?");
        }
        if params.start_ms.is_some() {
            sql.push_str(" AND anomaly_time >= ?");
        }
        if params.end_ms.is_some() {
            sql.push_str(" AND anomaly_time <= ?");
        }
        let limit = if params.limit == 0 { 100 } else { params.limit.min(1000) };
        sql.push_str(&format!(" ORDER BY anomaly_time DESC LIMIT {limit}"));

        let mut query = sqlx::query(&sql);
        if let Some(symbol) = &params.symbol {
            query = query.bind(symbol);
        }
        if let Some(sev) = params.severity {
            query = query.bind(sev.as_str());
        }
        if let Some(start) = params.start_ms {
            query = query.bind(start);
        }
        if let Some(end) = params.end_ms {
            query = query.bind(end);
        }

        let rows = with_deadline(
            self.deadline,
            "oi_anomaly_records list",
            query.fetch_all(&self.pool),
        )
        .await?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    /// Aggregate stats for one Beijing-time day, symbol-agnostic by design:
    /// the cache layer shares a single entry across symbol filters and the
    /// caller filters client-side.
    pub async fn daily_stats(&self, date: NaiveDate) -> Result<DailyStats> {
        let offset = shard::beijing_offset();
        let day_start = date
            .and_hms_opt(0, 0, 0)
            .and_then(|dt| dt.and_local_timezone(offset).single())
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(0);
        let day_end = day_start + 24 * 3600 * 1000 - 1;

        let row = with_deadline(
            self.deadline,
            "oi_anomaly_records stats",
            // SUM over a boolean yields DECIMAL; cast so the driver hands
            // back integers.
            sqlx::query(
                "SELECT COUNT(*) AS total, \
                        CAST(SUM(severity = 'high')   AS SIGNED) AS high, \
                        CAST(SUM(severity = 'medium') AS SIGNED) AS medium, \
                        CAST(SUM(severity = 'low')    AS SIGNED) AS low, \
                        COUNT(DISTINCT symbol) AS distinct_symbols \
                 FROM oi_anomaly_records \
                 WHERE anomaly_time >= ? AND anomaly_time <= ?",
            )
            .bind(day_start)
            .bind(day_end)
            .fetch_one(&self.pool),
        )
        .await?;

        Ok(DailyStats {
            total: row.try_get("total").unwrap_or(0),
            high: sum_col(&row, "high"),
            medium: sum_col(&row, "medium"),
            low: sum_col(&row, "low"),
            distinct_symbols: row.try_get("distinct_symbols").unwrap_or(0),
        })
    }
}

/// The SUM columns are NULL on an empty day.
fn sum_col(row: &sqlx::mysql::MySqlRow, name: &str) -> i64 {
    row.try_get::<Option<i64>, _>(name)
        .ok()
        .flatten()
        .unwrap_or(0)
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "high" => Severity::High,
        "medium" => Severity::Medium,
        _ => Severity::Low,
    }
}

fn parse_trend(s: Option<String>) -> Option<TrendLabel> {
    match s.as_deref() {
        Some("up") => Some(TrendLabel::Up),
        Some("down") => Some(TrendLabel::Down),
        Some("flat") => Some(TrendLabel::Flat),
        _ => None,
    }
}

fn row_to_record(row: &sqlx::mysql::MySqlRow) -> OIAnomalyRecord {
    OIAnomalyRecord {
        symbol: row.try_get("symbol").unwrap_or_default(),
        period_seconds: row.try_get("period_seconds").unwrap_or_default(),
        percent_change: row.try_get("percent_change").unwrap_or_default(),
        oi_before: row.try_get("oi_before").unwrap_or_default(),
        oi_after: row.try_get("oi_after").unwrap_or_default(),
        threshold_value: row.try_get("threshold_value").unwrap_or_default(),
        anomaly_time: row.try_get("anomaly_time").unwrap_or_default(),
        severity: parse_severity(row.try_get::<String, _>("severity").unwrap_or_default().as_str()),
        price_before: row.try_get("price_before").ok().flatten(),
        price_after: row.try_get("price_after").ok().flatten(),
        funding_rate_before: row.try_get("funding_rate_before").ok().flatten(),
        funding_rate_after: row.try_get("funding_rate_after").ok().flatten(),
        long_account_pct: row.try_get("long_account_pct").ok().flatten(),
        short_account_pct: row.try_get("short_account_pct").ok().flatten(),
        long_short_ratio: row.try_get("long_short_ratio").ok().flatten(),
        high_24h: row.try_get("high_24h").ok().flatten(),
        low_24h: row.try_get("low_24h").ok().flatten(),
        low_2h: row.try_get("low_2h").ok().flatten(),
        distance_from_high_pct: row.try_get("distance_from_high_pct").ok().flatten(),
        distance_from_low_2h_pct: row.try_get("distance_from_low_2h_pct").ok().flatten(),
        high_30m: row.try_get("high_30m").ok().flatten(),
        low_30m: row.try_get("low_30m").ok().flatten(),
        broke_30m_high: row.try_get("broke_30m_high").unwrap_or(false),
        broke_30m_low: row.try_get("broke_30m_low").unwrap_or(false),
        ma10: row.try_get("ma10").ok().flatten(),
        ma30: row.try_get("ma30").ok().flatten(),
        ma60: row.try_get("ma60").ok().flatten(),
        ma120: row.try_get("ma120").ok().flatten(),
        ma240: row.try_get("ma240").ok().flatten(),
        short_ma_trend: parse_trend(row.try_get("short_ma_trend").ok().flatten()),
        long_ma_trend: parse_trend(row.try_get("long_ma_trend").ok().flatten()),
    }
}
