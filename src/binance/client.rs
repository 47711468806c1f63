// =============================================================================
// Binance Futures REST Client — unsigned market-data endpoints
// =============================================================================
//
// Every endpoint this engine needs (exchangeInfo, openInterest,
// premiumIndex, globalLongShortAccountRatio) is public, so there is no
// request signing here.  Binance returns most numeric values as JSON
// strings; parsing tolerates both framings.
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::binance::rate_limit::RateLimitTracker;
use crate::types::{SymbolInfo, SymbolStatus};

/// Mark price, funding rate, and next funding time for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremiumIndex {
    pub symbol: String,
    pub mark_price: f64,
    pub funding_rate: f64,
    pub next_funding_time: i64,
}

/// Latest global long/short account ratio for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongShortSnapshot {
    pub symbol: String,
    pub long_account_pct: f64,
    pub short_account_pct: f64,
    pub ratio: f64,
    pub timestamp_ms: i64,
}

pub struct BinanceFuturesClient {
    base_url: String,
    client: reqwest::Client,
    rate_limits: RateLimitTracker,
}

impl BinanceFuturesClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client for BinanceFuturesClient");

        Self {
            base_url: base_url.into(),
            client,
            rate_limits: RateLimitTracker::new(),
        }
    }

    pub fn rate_limits(&self) -> &RateLimitTracker {
        &self.rate_limits
    }

    /// GET and parse a JSON body, folding non-2xx statuses into the error.
    async fn get_json(&self, path_and_query: &str) -> Result<serde_json::Value> {
        if !self.rate_limits.can_request() {
            anyhow::bail!("request weight budget exhausted, backing off: {path_and_query}");
        }

        let url = format!("{}{}", self.base_url, path_and_query);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path_and_query}"))?;

        self.rate_limits.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse response for {path_and_query}"))?;

        if !status.is_success() {
            anyhow::bail!("{path_and_query} returned {status}: {body}");
        }
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // exchangeInfo
    // -------------------------------------------------------------------------

    /// Current perpetual contracts with status and precision metadata.
    /// Non-perpetual contract types are ignored.
    pub async fn exchange_info(&self) -> Result<Vec<SymbolInfo>> {
        let body = self.get_json("/fapi/v1/exchangeInfo").await?;
        let symbols = body["symbols"]
            .as_array()
            .context("exchangeInfo response has no symbols array")?;

        let mut out = Vec::with_capacity(symbols.len());
        for entry in symbols {
            let contract_type = entry["contractType"].as_str().unwrap_or("");
            if contract_type != "PERPETUAL" {
                continue;
            }

            let symbol = match entry["symbol"].as_str() {
                Some(s) => s.to_string(),
                None => {
                    warn!("exchangeInfo entry missing symbol, skipping");
                    continue;
                }
            };

            let status = match entry["status"].as_str() {
                Some("TRADING") => SymbolStatus::Trading,
                _ => SymbolStatus::Break,
            };

            // LOT_SIZE / MIN_NOTIONAL live in the filters array.
            let mut step_size = 0.0;
            let mut min_notional = 0.0;
            if let Some(filters) = entry["filters"].as_array() {
                for f in filters {
                    match f["filterType"].as_str() {
                        Some("LOT_SIZE") => {
                            step_size = string_f64(&f["stepSize"]).unwrap_or(0.0);
                        }
                        Some("MIN_NOTIONAL") => {
                            min_notional = string_f64(&f["notional"]).unwrap_or(0.0);
                        }
                        _ => {}
                    }
                }
            }

            out.push(SymbolInfo {
                symbol,
                base_asset: entry["baseAsset"].as_str().unwrap_or("").to_string(),
                quote_asset: entry["quoteAsset"].as_str().unwrap_or("").to_string(),
                contract_type: contract_type.to_string(),
                status,
                enabled: status == SymbolStatus::Trading,
                priority: 0,
                price_precision: entry["pricePrecision"].as_u64().unwrap_or(2) as u32,
                quantity_precision: entry["quantityPrecision"].as_u64().unwrap_or(3) as u32,
                step_size,
                min_notional,
            });
        }

        debug!(count = out.len(), "exchangeInfo fetched");
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // openInterest
    // -------------------------------------------------------------------------

    /// Current open interest for one symbol, in contracts.
    pub async fn open_interest(&self, symbol: &str) -> Result<f64> {
        let body = self
            .get_json(&format!("/fapi/v1/openInterest?symbol={symbol}"))
            .await?;
        string_f64(&body["openInterest"])
            .with_context(|| format!("openInterest missing for {symbol}"))
    }

    // -------------------------------------------------------------------------
    // premiumIndex
    // -------------------------------------------------------------------------

    /// Mark price and funding data for every symbol in one call. The
    /// symbol-less premiumIndex endpoint returns the whole universe, which
    /// is what the OI poller wants.
    pub async fn premium_index_all(&self) -> Result<Vec<PremiumIndex>> {
        let body = self.get_json("/fapi/v1/premiumIndex").await?;
        let arr = body
            .as_array()
            .context("premiumIndex response is not an array")?;

        let mut out = Vec::with_capacity(arr.len());
        for entry in arr {
            let Some(symbol) = entry["symbol"].as_str() else {
                continue;
            };
            out.push(PremiumIndex {
                symbol: symbol.to_string(),
                mark_price: string_f64(&entry["markPrice"]).unwrap_or(0.0),
                funding_rate: string_f64(&entry["lastFundingRate"]).unwrap_or(0.0),
                next_funding_time: entry["nextFundingTime"].as_i64().unwrap_or(0),
            });
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // globalLongShortAccountRatio
    // -------------------------------------------------------------------------

    /// Latest long/short account ratio for `symbol` (5m period, one point).
    pub async fn long_short_ratio(&self, symbol: &str) -> Result<LongShortSnapshot> {
        let body = self
            .get_json(&format!(
                "/futures/data/globalLongShortAccountRatio?symbol={symbol}&period=5m&limit=1"
            ))
            .await?;

        let arr = body
            .as_array()
            .context("long/short ratio response is not an array")?;
        let entry = arr
            .first()
            .context("long/short ratio response array is empty")?;

        let long_account = string_f64(&entry["longAccount"]).unwrap_or(0.5);
        let short_account = string_f64(&entry["shortAccount"]).unwrap_or(0.5);

        Ok(LongShortSnapshot {
            symbol: symbol.to_string(),
            long_account_pct: long_account * 100.0,
            short_account_pct: short_account * 100.0,
            ratio: string_f64(&entry["longShortRatio"]).unwrap_or(1.0),
            timestamp_ms: entry["timestamp"].as_i64().unwrap_or(0),
        })
    }
}

/// Binance sends numeric values as JSON strings on most endpoints; accept
/// both strings and raw numbers.
fn string_f64(val: &serde_json::Value) -> Option<f64> {
    match val {
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_f64_accepts_both_framings() {
        assert_eq!(string_f64(&serde_json::json!("37020.5")), Some(37020.5));
        assert_eq!(string_f64(&serde_json::json!(42)), Some(42.0));
        assert_eq!(string_f64(&serde_json::json!(null)), None);
        assert_eq!(string_f64(&serde_json::json!("not a number")), None);
    }
}
