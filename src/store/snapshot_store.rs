// =============================================================================
// ShardedSnapshotStore — daily-sharded open-interest snapshot persistence
// =============================================================================
//
// Rows land in `open_interest_snapshots_YYYYMMDD` shards named by the
// Beijing-time date of their timestamp.  Writes bucket a batch by date and
// use INSERT IGNORE so replayed batches are idempotent.  Reads enumerate
// every shard intersecting the requested range and merge ascending; missing
// shards are skipped silently, and only when every shard is missing does the
// legacy unified table answer instead.
// =============================================================================

use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, TimeZone, Utc};
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::store::db::{is_already_exists, is_missing_table, with_deadline};
use crate::store::shard;
use crate::types::OISnapshot;

pub struct ShardedSnapshotStore {
    pool: MySqlPool,
    deadline: Duration,
    retention_days: i64,
}

impl ShardedSnapshotStore {
    pub fn new(pool: MySqlPool, deadline: Duration, retention_days: i64) -> Self {
        Self {
            pool,
            deadline,
            retention_days,
        }
    }

    // -------------------------------------------------------------------------
    // Shard creation
    // -------------------------------------------------------------------------

    /// Idempotently create the shard for `date`. A lost creation race
    /// ("table already exists") counts as success.
    pub async fn ensure_shard(&self, date: NaiveDate) -> Result<()> {
        let table = shard::snapshot_shard(date);
        let stmt = format!(
            r#"
            CREATE TABLE IF NOT EXISTS `{table}` (
                id                BIGINT AUTO_INCREMENT PRIMARY KEY,
                symbol            VARCHAR(32) NOT NULL,
                open_interest     DOUBLE      NOT NULL,
                timestamp_ms      BIGINT      NOT NULL,
                snapshot_time     DATETIME    NOT NULL,
                mark_price        DOUBLE      NULL,
                funding_rate      DOUBLE      NULL,
                next_funding_time BIGINT      NULL,
                UNIQUE KEY uniq_symbol_ts (symbol, timestamp_ms),
                KEY idx_snapshot_time (snapshot_time),
                KEY idx_symbol (symbol)
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
    // Write path
    // -------------------------------------------------------------------------

    /// Persist a batch of snapshots. The batch is bucketed by Beijing date
    /// and each bucket inserted into its shard with duplicate keys ignored.
    /// Returns the number of rows actually inserted.
    pub async fn insert_batch(&self, batch: &[OISnapshot]) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        // Bucket by shard date, preserving per-symbol timestamp order.
        let mut buckets: Vec<(NaiveDate, Vec<&OISnapshot>)> = Vec::new();
        for snap in batch {
            let date = shard::beijing_date(snap.timestamp_ms);
            match buckets.iter_mut().find(|(d, _)| *d == date) {
                Some((_, rows)) => rows.push(snap),
                None => buckets.push((date, vec![snap])),
            }
        }

        let mut inserted = 0u64;
        for (date, rows) in buckets {
            self.ensure_shard(date).await?;
            let table = shard::snapshot_shard(date);

            let mut qb = sqlx::QueryBuilder::<sqlx::MySql>::new(format!(
                "INSERT IGNORE INTO `{table}` \
                 (symbol, open_interest, timestamp_ms, snapshot_time, \
                  mark_price, funding_rate, next_funding_time) "
            ));
            qb.push_values(rows.iter(), |mut b, snap| {
                b.push_bind(&snap.symbol)
                    .push_bind(snap.open_interest)
                    .push_bind(snap.timestamp_ms)
                    .push_bind(ms_to_datetime(snap.timestamp_ms))
                    .push_bind(snap.mark_price)
                    .push_bind(snap.funding_rate)
                    .push_bind(snap.next_funding_time);
            });

            let res =
                with_deadline(self.deadline, &table, qb.build().execute(&self.pool)).await?;
            inserted += res.rows_affected();
        }

        debug!(rows = batch.len(), inserted, "snapshot batch persisted");
        Ok(inserted)
    }

    // -------------------------------------------------------------------------
    // Read path
    // -------------------------------------------------------------------------

    /// Snapshots for `symbol` in `[start_ms, end_ms]`, ascending by
    /// timestamp. Missing shards are skipped; if every shard is missing the
    /// legacy unified table answers instead.
    pub async fn range(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<OISnapshot>> {
        let mut out = Vec::new();
        let mut any_shard_present = false;

        for date in shard::dates_for_range(start_ms, end_ms) {
            let table = shard::snapshot_shard(date);
            match self.query_range(&table, symbol, start_ms, end_ms).await {
                Ok(mut rows) => {
                    any_shard_present = true;
                    out.append(&mut rows);
                }
                Err(e) if is_missing_table(&e) => continue,
                Err(e) => return Err(e),
            }
        }

        if !any_shard_present {
            match self
                .query_range(shard::LEGACY_SNAPSHOT_TABLE, symbol, start_ms, end_ms)
                .await
            {
                Ok(rows) => out = rows,
                Err(e) if is_missing_table(&e) => {}
                Err(e) => return Err(e),
            }
        }

        // Shards were visited oldest-first and each shard reads ascending,
        // so the merge stays ascending by timestamp_ms.
        Ok(out)
    }

    /// Most recent snapshot for `symbol`: today's shard first, then
    /// yesterday's, then the legacy table.
    pub async fn latest(&self, symbol: &str) -> Result<Option<OISnapshot>> {
        let now_ms = Utc::now().timestamp_millis();
        let today = shard::beijing_date(now_ms);

        let mut candidates = vec![shard::snapshot_shard(today)];
        if let Some(yesterday) = today.pred_opt() {
            candidates.push(shard::snapshot_shard(yesterday));
        }
        candidates.push(shard::LEGACY_SNAPSHOT_TABLE.to_string());

        for table in candidates {
            match self.query_latest(&table, symbol).await {
                Ok(Some(snap)) => return Ok(Some(snap)),
                Ok(None) => continue,
                Err(e) if is_missing_table(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// MIN/MAX of mark_price for `symbol` over a single day's shard.
    /// Returns `None` when the shard is missing or holds no priced rows.
    pub async fn day_price_extremes(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<(f64, f64)>> {
        let table = shard::snapshot_shard(date);
        let sql = format!(
            "SELECT MIN(mark_price) AS lo, MAX(mark_price) AS hi \
             FROM `{table}` WHERE symbol = ? AND mark_price IS NOT NULL"
        );

        let res = with_deadline(
            self.deadline,
            &table,
            sqlx::query(&sql).bind(symbol).fetch_one(&self.pool),
        )
        .await;

        match res {
            Ok(row) => {
                let lo: Option<f64> = row.try_get("lo").ok().flatten();
                let hi: Option<f64> = row.try_get("hi").ok().flatten();
                Ok(lo.zip(hi))
            }
            Err(e) if is_missing_table(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // -------------------------------------------------------------------------
    // Retention
    // -------------------------------------------------------------------------

    /// Drop shards older than the retention window and pre-create tomorrow's
    /// shard. Runs once per day from the retention ticker.
    pub async fn run_retention(&self) -> Result<()> {
        let now_ms = Utc::now().timestamp_millis();
        let today = shard::beijing_date(now_ms);
        let cutoff = today - chrono::Duration::days(self.retention_days);

        let tables = self.list_shard_tables().await?;
        for table in tables {
            if let Some(date) = shard::parse_suffix(&table, "open_interest_snapshots_") {
                if date < cutoff {
                    let stmt = format!("DROP TABLE IF EXISTS `{table}`");
                    with_deadline(self.deadline, &table, sqlx::query(&stmt).execute(&self.pool))
                        .await?;
                    info!(table, "dropped expired snapshot shard");
                }
            }
        }

        if let Some(tomorrow) = today.succ_opt() {
            self.ensure_shard(tomorrow).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn query_range(
        &self,
        table: &str,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<OISnapshot>> {
        let sql = format!(
            "SELECT symbol, open_interest, timestamp_ms, mark_price, \
                    funding_rate, next_funding_time \
             FROM `{table}` \
             WHERE symbol = ? AND timestamp_ms >= ? AND timestamp_ms <= ? \
             ORDER BY timestamp_ms ASC"
        );

        let rows = with_deadline(
            self.deadline,
            table,
            sqlx::query(&sql)
                .bind(symbol)
                .bind(start_ms)
                .bind(end_ms)
                .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows.iter().map(row_to_snapshot).collect())
    }

    async fn query_latest(&self, table: &str, symbol: &str) -> Result<Option<OISnapshot>> {
        let sql = format!(
            "SELECT symbol, open_interest, timestamp_ms, mark_price, \
                    funding_rate, next_funding_time \
             FROM `{table}` WHERE symbol = ? \
             ORDER BY timestamp_ms DESC LIMIT 1"
        );

        let row = with_deadline(
            self.deadline,
            table,
            sqlx::query(&sql).bind(symbol).fetch_optional(&self.pool),
        )
        .await?;

        Ok(row.as_ref().map(row_to_snapshot))
    }

    async fn list_shard_tables(&self) -> Result<Vec<String>> {
        let rows = with_deadline(
            self.deadline,
            "information_schema",
            sqlx::query(
                "SELECT table_name AS t FROM information_schema.tables \
                 WHERE table_schema = DATABASE() \
                   AND table_name LIKE 'open_interest_snapshots\\_%'",
            )
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .iter()
            .filter_map(|r| r.try_get::<String, _>("t").ok())
            .collect())
    }
}

fn row_to_snapshot(row: &sqlx::mysql::MySqlRow) -> OISnapshot {
    OISnapshot {
        symbol: row.try_get("symbol").unwrap_or_default(),
        timestamp_ms: row.try_get("timestamp_ms").unwrap_or_default(),
        open_interest: row.try_get("open_interest").unwrap_or_default(),
        mark_price: row.try_get("mark_price").ok().flatten(),
        funding_rate: row.try_get("funding_rate").ok().flatten(),
        next_funding_time: row.try_get("next_funding_time").ok().flatten(),
        source: "db".to_string(),
    }
}

/// Unix ms -> naive UTC datetime for the secondary `snapshot_time` column.
/// The timezone mismatch with the Beijing shard name is intentional.
fn ms_to_datetime(ms: i64) -> chrono::NaiveDateTime {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.naive_utc())
        .unwrap_or_else(|| {
            warn!(ms, "timestamp out of range, clamping to epoch");
            chrono::DateTime::<Utc>::UNIX_EPOCH.naive_utc()
        })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_to_datetime_is_utc() {
        // 2024-03-09 16:00:00 UTC == 2024-03-10 00:00:00 Beijing.
        let dt = ms_to_datetime(1_710_000_000_000);
        assert_eq!(dt.to_string(), "2024-03-09 16:00:00");
        // The shard for that instant is named by the Beijing date.
        let date = shard::beijing_date(1_710_000_000_000);
        assert_eq!(shard::snapshot_shard(date), "open_interest_snapshots_20240310");
    }
}
