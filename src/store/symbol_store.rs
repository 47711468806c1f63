// =============================================================================
// SymbolStore — contract_symbols_config persistence
// =============================================================================
//
// Reconciliation is one transaction: disable every row, then upsert the
// symbols the exchange currently reports as enabled.  Symbols that vanished
// stay in the table disabled, so historical data keeps resolving.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tracing::info;

use crate::store::db::with_deadline;
use crate::types::{SymbolInfo, SymbolStatus};

pub struct SymbolStore {
    pool: MySqlPool,
    deadline: Duration,
}

impl SymbolStore {
    pub fn new(pool: MySqlPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }

    /// Atomically replace the enabled set: disable all, upsert `symbols` as
    /// enabled. Never deletes.
    pub async fn reconcile(&self, symbols: &[SymbolInfo]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin symbol reconcile transaction")?;

        sqlx::query("UPDATE contract_symbols_config SET enabled = 0")
            .execute(&mut *tx)
            .await
            .context("failed to disable symbols")?;

        for info in symbols {
            sqlx::query(
                "INSERT INTO contract_symbols_config \
                 (symbol, base_asset, quote_asset, contract_type, status, enabled, \
                  priority, price_precision, quantity_precision, step_size, min_notional) \
                 VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?) \
                 ON DUPLICATE KEY UPDATE \
                    base_asset = VALUES(base_asset), \
                    quote_asset = VALUES(quote_asset), \
                    contract_type = VALUES(contract_type), \
                    status = VALUES(status), \
                    enabled = 1, \
                    price_precision = VALUES(price_precision), \
                    quantity_precision = VALUES(quantity_precision), \
                    step_size = VALUES(step_size), \
                    min_notional = VALUES(min_notional)",
            )
            .bind(&info.symbol)
            .bind(&info.base_asset)
            .bind(&info.quote_asset)
            .bind(&info.contract_type)
            .bind(info.status.as_str())
            .bind(info.priority)
            .bind(info.price_precision as i32)
            .bind(info.quantity_precision as i32)
            .bind(info.step_size)
            .bind(info.min_notional)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to upsert symbol {}", info.symbol))?;
        }

        tx.commit()
            .await
            .context("failed to commit symbol reconcile")?;

        info!(count = symbols.len(), "symbol set reconciled");
        Ok(())
    }

    /// Enabled symbols with metadata, highest priority first.
    pub async fn enabled(&self) -> Result<Vec<SymbolInfo>> {
        let rows = with_deadline(
            self.deadline,
            "contract_symbols_config enabled",
            sqlx::query(
                "SELECT symbol, base_asset, quote_asset, contract_type, status, \
                        enabled, priority, price_precision, quantity_precision, \
                        step_size, min_notional \
                 FROM contract_symbols_config \
                 WHERE enabled = 1 \
                 ORDER BY priority DESC, symbol ASC",
            )
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .iter()
            .map(|row| SymbolInfo {
                symbol: row.try_get("symbol").unwrap_or_default(),
                base_asset: row.try_get("base_asset").unwrap_or_default(),
                quote_asset: row.try_get("quote_asset").unwrap_or_default(),
                contract_type: row.try_get("contract_type").unwrap_or_default(),
                status: match row.try_get::<String, _>("status").as_deref() {
                    Ok("TRADING") => SymbolStatus::Trading,
                    _ => SymbolStatus::Break,
                },
                enabled: row.try_get::<bool, _>("enabled").unwrap_or(true),
                priority: row.try_get("priority").unwrap_or(0),
                price_precision: row.try_get::<i32, _>("price_precision").unwrap_or(2) as u32,
                quantity_precision: row.try_get::<i32, _>("quantity_precision").unwrap_or(3) as u32,
                step_size: row.try_get("step_size").unwrap_or(0.0),
                min_notional: row.try_get("min_notional").unwrap_or(0.0),
            })
            .collect())
    }
}
