// =============================================================================
// Database plumbing — pool construction, deadlines, base schema
// =============================================================================
//
// A single bounded MySQL pool is built at startup and threaded through every
// store.  Every query acquires from the pool and runs under a deadline; a
// timed-out query surfaces as a recoverable error, never a hang.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tracing::info;

/// Build the shared connection pool and verify the database is reachable.
/// An unreachable database at startup is fatal by design.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("failed to connect to MySQL")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("database probe query failed")?;

    info!(max_connections, "database pool ready");
    Ok(pool)
}

/// Run `fut` under `deadline`. Timeouts become recoverable errors.
pub async fn with_deadline<T, F>(deadline: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(res) => res.with_context(|| format!("query failed: {what}")),
        Err(_) => anyhow::bail!("query deadline exceeded ({}s): {what}", deadline.as_secs()),
    }
}

/// True when the error means the target table does not exist (MySQL 1146).
/// Reads over missing shards are skipped silently per shard.
pub fn is_missing_table(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(db_err) = cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
        {
            return db_err.code().map(|c| c == "42S02").unwrap_or(false)
                || db_err.message().contains("doesn't exist");
        }
        false
    })
}

/// True when table creation failed only because the table already exists
/// (MySQL 1050). Creation races between writers are tolerated.
pub fn is_already_exists(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(db_err) = cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
        {
            return db_err.code().map(|c| c == "42S01").unwrap_or(false)
                || db_err.message().contains("already exists");
        }
        false
    })
}

/// Idempotently create the non-sharded base tables. Daily shards are created
/// lazily by their stores on first write.
pub async fn create_base_tables(pool: &MySqlPool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS contract_symbols_config (
            symbol              VARCHAR(32)  NOT NULL PRIMARY KEY,
            base_asset          VARCHAR(16)  NOT NULL,
            quote_asset         VARCHAR(16)  NOT NULL,
            contract_type       VARCHAR(32)  NOT NULL,
            status              VARCHAR(16)  NOT NULL,
            enabled             TINYINT(1)   NOT NULL DEFAULT 1,
            priority            INT          NOT NULL DEFAULT 0,
            price_precision     INT          NOT NULL DEFAULT 2,
            quantity_precision  INT          NOT NULL DEFAULT 3,
            step_size           DOUBLE       NOT NULL DEFAULT 0,
            min_notional        DOUBLE       NOT NULL DEFAULT 0,
            updated_at          TIMESTAMP    NOT NULL DEFAULT CURRENT_TIMESTAMP
                                             ON UPDATE CURRENT_TIMESTAMP
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS oi_monitoring_config (
            cfg_key    VARCHAR(64)  NOT NULL PRIMARY KEY,
            cfg_value  TEXT         NOT NULL,
            updated_at TIMESTAMP    NOT NULL DEFAULT CURRENT_TIMESTAMP
                                    ON UPDATE CURRENT_TIMESTAMP
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS oi_anomaly_records (
            id                        BIGINT AUTO_INCREMENT PRIMARY KEY,
            symbol                    VARCHAR(32) NOT NULL,
            period_seconds            BIGINT      NOT NULL,
            percent_change            DOUBLE      NOT NULL,
            oi_before                 DOUBLE      NOT NULL,
            oi_after                  DOUBLE      NOT NULL,
            threshold_value           DOUBLE      NOT NULL,
            anomaly_time              BIGINT      NOT NULL,
            severity                  VARCHAR(8)  NOT NULL,
            price_before              DOUBLE      NULL,
            price_after               DOUBLE      NULL,
            funding_rate_before       DOUBLE      NULL,
            funding_rate_after        DOUBLE      NULL,
            long_account_pct          DOUBLE      NULL,
            short_account_pct         DOUBLE      NULL,
            long_short_ratio          DOUBLE      NULL,
            high_24h                  DOUBLE      NULL,
            low_24h                   DOUBLE      NULL,
            low_2h                    DOUBLE      NULL,
            distance_from_high_pct    DOUBLE      NULL,
            distance_from_low_2h_pct  DOUBLE      NULL,
            high_30m                  DOUBLE      NULL,
            low_30m                   DOUBLE      NULL,
            broke_30m_high            TINYINT(1)  NOT NULL DEFAULT 0,
            broke_30m_low             TINYINT(1)  NOT NULL DEFAULT 0,
            ma10                      DOUBLE      NULL,
            ma30                      DOUBLE      NULL,
            ma60                      DOUBLE      NULL,
            ma120                     DOUBLE      NULL,
            ma240                     DOUBLE      NULL,
            short_ma_trend            VARCHAR(8)  NULL,
            long_ma_trend             VARCHAR(8)  NULL,
            KEY idx_symbol_period_time (symbol, period_seconds, anomaly_time),
            KEY idx_anomaly_time (anomaly_time)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS volume_alerts (
            id          BIGINT AUTO_INCREMENT PRIMARY KEY,
            symbol      VARCHAR(32) NOT NULL,
            `interval`  VARCHAR(8)  NOT NULL,
            alert_type  VARCHAR(24) NOT NULL,
            multiplier  DOUBLE      NOT NULL,
            price       DOUBLE      NOT NULL,
            kline_time  BIGINT      NOT NULL,
            description TEXT        NULL,
            created_at  TIMESTAMP   NOT NULL DEFAULT CURRENT_TIMESTAMP,
            KEY idx_symbol_time (symbol, kline_time)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS sr_alerts (
            id             BIGINT AUTO_INCREMENT PRIMARY KEY,
            symbol         VARCHAR(32) NOT NULL,
            `interval`     VARCHAR(8)  NOT NULL,
            alert_type     VARCHAR(24) NOT NULL,
            level_type     VARCHAR(12) NOT NULL,
            level_price    DOUBLE      NOT NULL,
            current_price  DOUBLE      NOT NULL,
            distance_pct   DOUBLE      NOT NULL,
            level_strength DOUBLE      NOT NULL,
            breakout_score DOUBLE      NOT NULL,
            kline_time     BIGINT      NOT NULL,
            description    TEXT        NULL,
            created_at     TIMESTAMP   NOT NULL DEFAULT CURRENT_TIMESTAMP,
            KEY idx_symbol_time (symbol, kline_time)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS kline_breakout_signals (
            id                  BIGINT AUTO_INCREMENT PRIMARY KEY,
            symbol              VARCHAR(32) NOT NULL,
            `interval`          VARCHAR(8)  NOT NULL,
            alert_type          VARCHAR(24) NOT NULL,
            current_price       DOUBLE      NOT NULL,
            breakout_score      DOUBLE      NOT NULL,
            volatility_score    DOUBLE      NOT NULL,
            volume_score        DOUBLE      NOT NULL,
            ma_convergence_score DOUBLE     NOT NULL,
            position_score      DOUBLE      NOT NULL,
            pattern_score       DOUBLE      NOT NULL,
            predicted_direction VARCHAR(8)  NOT NULL,
            kline_time          BIGINT      NOT NULL,
            description         TEXT        NULL,
            created_at          TIMESTAMP   NOT NULL DEFAULT CURRENT_TIMESTAMP,
            KEY idx_symbol_time (symbol, kline_time)
        )
        "#,
    ];

    for stmt in statements {
        sqlx::query(stmt)
            .execute(pool)
            .await
            .context("failed to create base table")?;
    }

    info!("base tables ready");
    Ok(())
}
