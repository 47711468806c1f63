// =============================================================================
// Exchange frame parsing — tagged variants over both wire framings
// =============================================================================
//
// Two incoming framings are accepted:
//
//   1. Direct event: `{ "e": "kline", "s": "BTCUSDT", ... }`
//   2. Aggregate envelope: `{ "stream": "...", "data": <object or array> }`
//
// Array payloads (e.g. `!markPrice@arr`) fan out into one event per symbol.
// Unknown event types become `Skipped`, never errors: a new exchange event
// type must not break the read loop.
// =============================================================================

use anyhow::{Context, Result};
use serde_json::Value;

use crate::types::{Candle, Interval};

/// A kline update. `candle.is_final` mirrors the exchange's `x` flag.
#[derive(Debug, Clone)]
pub struct KlineEvent {
    pub symbol: String,
    pub interval: Interval,
    pub candle: Candle,
}

/// 24-hour rolling ticker statistics.
#[derive(Debug, Clone)]
pub struct TickerEvent {
    pub symbol: String,
    pub last_price: f64,
    pub price_change_pct: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub event_time: i64,
}

/// Mark-price / funding update.
#[derive(Debug, Clone)]
pub struct MarkPriceEvent {
    pub symbol: String,
    pub mark_price: f64,
    pub funding_rate: f64,
    pub next_funding_time: i64,
    pub event_time: i64,
}

/// A single aggregated trade.
#[derive(Debug, Clone)]
pub struct TradeEvent {
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    pub is_buyer_maker: bool,
    pub event_time: i64,
}

/// Order-book delta. Only the best levels are carried; full book
/// maintenance is not this engine's concern.
#[derive(Debug, Clone)]
pub struct DepthEvent {
    pub symbol: String,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub event_time: i64,
}

/// Every event the dispatcher can emit. Unknown wire variants map to
/// `Skipped` so callers can count them without special-casing errors.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Kline(KlineEvent),
    Ticker(TickerEvent),
    MarkPrice(MarkPriceEvent),
    Trade(TradeEvent),
    Depth(DepthEvent),
    Skipped,
}

impl MarketEvent {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Kline(e) => Some(&e.symbol),
            Self::Ticker(e) => Some(&e.symbol),
            Self::MarkPrice(e) => Some(&e.symbol),
            Self::Trade(e) => Some(&e.symbol),
            Self::Depth(e) => Some(&e.symbol),
            Self::Skipped => None,
        }
    }
}

/// Parse one text frame into zero or more events.
///
/// Subscription acks (`{"result":null,"id":N}`) yield an empty vec; a frame
/// that is not JSON at all is an error the caller logs and drops.
pub fn parse_frame(text: &str) -> Result<Vec<MarketEvent>> {
    let root: Value = serde_json::from_str(text).context("frame is not valid JSON")?;

    // Aggregate envelope: unwrap and recurse into the payload.
    let payload = if root.get("stream").is_some() {
        root.get("data").context("envelope frame missing data")?
    } else {
        &root
    };

    let mut events = Vec::new();
    match payload {
        Value::Array(items) => {
            for item in items {
                events.push(parse_event_object(item));
            }
        }
        Value::Object(_) => {
            // Subscription ack / command response: no event type, no symbol.
            if payload.get("e").is_none() {
                return Ok(events);
            }
            events.push(parse_event_object(payload));
        }
        _ => anyhow::bail!("frame payload is neither object nor array"),
    }
    Ok(events)
}

/// Parse a single `e`-tagged event object.
fn parse_event_object(obj: &Value) -> MarketEvent {
    let Some(event_type) = obj.get("e").and_then(Value::as_str) else {
        return MarketEvent::Skipped;
    };
    let Some(symbol) = obj.get("s").and_then(Value::as_str) else {
        return MarketEvent::Skipped;
    };
    let symbol = symbol.to_uppercase();
    let event_time = obj.get("E").and_then(Value::as_i64).unwrap_or(0);

    match event_type {
        "kline" => parse_kline(obj, symbol).unwrap_or(MarketEvent::Skipped),
        "24hrTicker" => MarketEvent::Ticker(TickerEvent {
            symbol,
            last_price: field_f64(obj, "c").unwrap_or(0.0),
            price_change_pct: field_f64(obj, "P").unwrap_or(0.0),
            high_24h: field_f64(obj, "h").unwrap_or(0.0),
            low_24h: field_f64(obj, "l").unwrap_or(0.0),
            event_time,
        }),
        "markPriceUpdate" => MarketEvent::MarkPrice(MarkPriceEvent {
            symbol,
            mark_price: field_f64(obj, "p").unwrap_or(0.0),
            funding_rate: field_f64(obj, "r").unwrap_or(0.0),
            next_funding_time: obj.get("T").and_then(Value::as_i64).unwrap_or(0),
            event_time,
        }),
        "trade" | "aggTrade" => MarketEvent::Trade(TradeEvent {
            symbol,
            price: field_f64(obj, "p").unwrap_or(0.0),
            quantity: field_f64(obj, "q").unwrap_or(0.0),
            is_buyer_maker: obj.get("m").and_then(Value::as_bool).unwrap_or(false),
            event_time,
        }),
        "depthUpdate" => MarketEvent::Depth(DepthEvent {
            symbol,
            best_bid: first_level(obj, "b"),
            best_ask: first_level(obj, "a"),
            event_time,
        }),
        _ => MarketEvent::Skipped,
    }
}

fn parse_kline(obj: &Value, symbol: String) -> Option<MarketEvent> {
    let k = obj.get("k")?;
    let interval = Interval::parse(k.get("i")?.as_str()?)?;

    let candle = Candle {
        open_time: k.get("t")?.as_i64()?,
        close_time: k.get("T")?.as_i64()?,
        open: field_f64(k, "o")?,
        high: field_f64(k, "h")?,
        low: field_f64(k, "l")?,
        close: field_f64(k, "c")?,
        volume: field_f64(k, "v")?,
        is_final: k.get("x")?.as_bool()?,
    };

    Some(MarketEvent::Kline(KlineEvent {
        symbol,
        interval,
        candle,
    }))
}

/// Numeric field that may arrive as a JSON string or a raw number.
fn field_f64(obj: &Value, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Price of the first [price, qty] level in a depth array.
fn first_level(obj: &Value, key: &str) -> Option<f64> {
    let level = obj.get(key)?.as_array()?.first()?.as_array()?;
    match level.first()? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
