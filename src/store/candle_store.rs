// =============================================================================
// CandleStore — daily-sharded candle persistence with a buffered writer
// =============================================================================
//
// Final candles are appended to an in-memory buffer and flushed by a single
// writer task when the buffer reaches `flush_rows` or the flush interval
// elapses.  A failed bucket returns its rows to the buffer so the next tick
// retries them; INSERT IGNORE keeps retries idempotent.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use parking_lot::Mutex;
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::store::db::{is_already_exists, is_missing_table, with_deadline};
use crate::store::shard;
use crate::types::{Candle, Interval};

/// A buffered row waiting for the writer task.
#[derive(Debug, Clone)]
struct PendingCandle {
    symbol: String,
    interval: Interval,
    candle: Candle,
}

pub struct CandleStore {
    pool: MySqlPool,
    deadline: Duration,
    flush_rows: usize,
    buffer: Mutex<Vec<PendingCandle>>,
    kick: Notify,
}

impl CandleStore {
    pub fn new(pool: MySqlPool, deadline: Duration, flush_rows: usize) -> Self {
        Self {
            pool,
            deadline,
            flush_rows,
            buffer: Mutex::new(Vec::new()),
            kick: Notify::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Write path
    // -------------------------------------------------------------------------

    /// Buffer a final candle for persistence. Provisional candles are the
    /// caller's bug; they are dropped with a warning rather than stored.
    pub fn append(&self, symbol: &str, interval: Interval, candle: Candle) {
        if !candle.is_final {
            warn!(symbol, %interval, open_time = candle.open_time, "refusing to buffer provisional candle");
            return;
        }

        let len = {
            let mut buf = self.buffer.lock();
            buf.push(PendingCandle {
                symbol: symbol.to_string(),
                interval,
                candle,
            });
            buf.len()
        };

        if len >= self.flush_rows {
            self.kick.notify_one();
        }
    }

    /// Number of rows currently waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Drain the buffer: group rows by (interval, Beijing date), create any
    /// missing shard, insert ignoring duplicates. Rows from a failed bucket
    /// go back into the buffer for the next tick.
    pub async fn flush(&self) -> Result<usize> {
        let pending = {
            let mut buf = self.buffer.lock();
            std::mem::take(&mut *buf)
        };
        if pending.is_empty() {
            return Ok(0);
        }

        // Group by target shard.
        let mut buckets: Vec<((Interval, NaiveDate), Vec<PendingCandle>)> = Vec::new();
        for row in pending {
            let key = (row.interval, shard::beijing_date(row.candle.open_time));
            match buckets.iter_mut().find(|(k, _)| *k == key) {
                Some((_, rows)) => rows.push(row),
                None => buckets.push((key, vec![row])),
            }
        }

        let mut written = 0usize;
        for ((interval, date), rows) in buckets {
            match self.insert_bucket(interval, date, &rows).await {
                Ok(n) => written += n as usize,
                Err(e) => {
                    warn!(%interval, %date, error = %e, count = rows.len(), "candle bucket insert failed, re-buffering");
                    self.buffer.lock().extend(rows);
                }
            }
        }

        if written > 0 {
            debug!(written, "candle buffer flushed");
        }
        Ok(written)
    }

    /// Writer task: one per store, draining the buffer on a timer or when
    /// the buffer crosses the row threshold. Exits after a final flush once
    /// `shutdown` fires.
    pub async fn run_writer(
        self: Arc<Self>,
        flush_interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.kick.notified() => {}
                _ = shutdown.changed() => {
                    if let Err(e) = self.flush().await {
                        warn!(error = %e, "final candle flush failed");
                    }
                    info!("candle writer stopped");
                    return;
                }
            }
            if let Err(e) = self.flush().await {
                warn!(error = %e, "candle flush failed");
            }
        }
    }

    async fn insert_bucket(
        &self,
        interval: Interval,
        date: NaiveDate,
        rows: &[PendingCandle],
    ) -> Result<u64> {
        self.ensure_shard(interval, date).await?;
        let table = shard::candle_shard(interval.as_str(), date);

        let mut qb = sqlx::QueryBuilder::<sqlx::MySql>::new(format!(
            "INSERT IGNORE INTO `{table}` \
             (symbol, open_time, close_time, open, high, low, close, volume) "
        ));
        qb.push_values(rows.iter(), |mut b, row| {
            b.push_bind(&row.symbol)
                .push_bind(row.candle.open_time)
                .push_bind(row.candle.close_time)
                .push_bind(row.candle.open)
                .push_bind(row.candle.high)
                .push_bind(row.candle.low)
                .push_bind(row.candle.close)
                .push_bind(row.candle.volume);
        });

        let res = with_deadline(self.deadline, &table, qb.build().execute(&self.pool)).await?;
        Ok(res.rows_affected())
    }

    async fn ensure_shard(&self, interval: Interval, date: NaiveDate) -> Result<()> {
        let table = shard::candle_shard(interval.as_str(), date);
        let stmt = format!(
            r#"
            CREATE TABLE IF NOT EXISTS `{table}` (
                id         BIGINT AUTO_INCREMENT PRIMARY KEY,
                symbol     VARCHAR(32) NOT NULL,
                open_time  BIGINT      NOT NULL,
                close_time BIGINT      NOT NULL,
                open       DOUBLE      NOT NULL,
                high       DOUBLE      NOT NULL,
                low        DOUBLE      NOT NULL,
                close      DOUBLE      NOT NULL,
                volume     DOUBLE      NOT NULL,
                UNIQUE KEY uniq_symbol_open (symbol, open_time),
                KEY idx_open_time (open_time)
            )
            "#
        );

        let res = with_deadline(self.deadline, &table, sqlx::query(&stmt).execute(&self.pool)).await;
        match res {
            Ok(_) => Ok(()),
            Err(e) if is_already_exists(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // -------------------------------------------------------------------------
    // Read path
    // -------------------------------------------------------------------------

    /// The most recent `n` final candles for (symbol, interval), ascending by
    /// open_time. Walks backwards from today's shard until `n` are collected
    /// or the shards run out.
    pub async fn recent(&self, symbol: &str, interval: Interval, n: usize) -> Result<Vec<Candle>> {
        let mut date = shard::beijing_date(chrono::Utc::now().timestamp_millis());
        let mut collected: Vec<Candle> = Vec::with_capacity(n);

        // Bounded walk: candles older than the retention window are gone.
        for _ in 0..32 {
            if collected.len() >= n {
                break;
            }
            let table = shard::candle_shard(interval.as_str(), date);
            let remaining = n - collected.len();
            let sql = format!(
                "SELECT symbol, open_time, close_time, open, high, low, close, volume \
                 FROM `{table}` WHERE symbol = ? \
                 ORDER BY open_time DESC LIMIT {remaining}"
            );

            match with_deadline(
                self.deadline,
                &table,
                sqlx::query(&sql).bind(symbol).fetch_all(&self.pool),
            )
            .await
            {
                Ok(rows) => collected.extend(rows.iter().map(row_to_candle)),
                // A missing shard (e.g. today's before the first write) is
                // just empty; keep walking backwards.
                Err(e) if is_missing_table(&e) => {}
                Err(e) => return Err(e),
            }

            date = match date.pred_opt() {
                Some(prev) => prev,
                None => break,
            };
        }

        // Collected newest-first across shards; flip to ascending.
        collected.reverse();
        Ok(collected)
    }

    /// All final candles for (symbol, interval) in `[start_ms, end_ms]`,
    /// ascending, merged across every intersecting shard.
    pub async fn range(
        &self,
        symbol: &str,
        interval: Interval,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>> {
        let mut out = Vec::new();
        for date in shard::dates_for_range(start_ms, end_ms) {
            let table = shard::candle_shard(interval.as_str(), date);
            let sql = format!(
                "SELECT symbol, open_time, close_time, open, high, low, close, volume \
                 FROM `{table}` \
                 WHERE symbol = ? AND open_time >= ? AND open_time <= ? \
                 ORDER BY open_time ASC"
            );

            match with_deadline(
                self.deadline,
                &table,
                sqlx::query(&sql)
                    .bind(symbol)
                    .bind(start_ms)
                    .bind(end_ms)
                    .fetch_all(&self.pool),
            )
            .await
            {
                Ok(rows) => out.extend(rows.iter().map(row_to_candle)),
                Err(e) if is_missing_table(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Retention
    // -------------------------------------------------------------------------

    /// Drop candle shards older than `days_to_keep` across all intervals.
    pub async fn cleanup(&self, days_to_keep: i64) -> Result<()> {
        let today = shard::beijing_date(chrono::Utc::now().timestamp_millis());
        let cutoff = today - chrono::Duration::days(days_to_keep);

        let rows = with_deadline(
            self.deadline,
            "information_schema",
            sqlx::query(
                "SELECT table_name AS t FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name LIKE 'candles\\_%'",
            )
            .fetch_all(&self.pool),
        )
        .await?;

        for row in rows {
            let table: String = match row.try_get("t") {
                Ok(t) => t,
                Err(_) => continue,
            };
            // candles_{interval}_YYYYMMDD — the date is the final component.
            let Some(idx) = table.rfind('_') else { continue };
            let prefix = &table[..idx + 1];
            if let Some(date) = shard::parse_suffix(&table, prefix) {
                if date < cutoff {
                    let stmt = format!("DROP TABLE IF EXISTS `{table}`");
                    with_deadline(self.deadline, &table, sqlx::query(&stmt).execute(&self.pool))
                        .await?;
                    info!(table, "dropped expired candle shard");
                }
            }
        }
        Ok(())
    }
}

fn row_to_candle(row: &sqlx::mysql::MySqlRow) -> Candle {
    Candle {
        open_time: row.try_get("open_time").unwrap_or_default(),
        close_time: row.try_get("close_time").unwrap_or_default(),
        open: row.try_get("open").unwrap_or_default(),
        high: row.try_get("high").unwrap_or_default(),
        low: row.try_get("low").unwrap_or_default(),
        close: row.try_get("close").unwrap_or_default(),
        volume: row.try_get("volume").unwrap_or_default(),
        is_final: true,
    }
}
