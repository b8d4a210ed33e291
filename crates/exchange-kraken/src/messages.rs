//! WebSocket v2 frame decoding.
//!
//! Envelopes are `{method, ...}` for acks and `{channel, type, data}` for
//! data frames. Decoding is tolerant: a malformed item is an error for that
//! item only, and the read loop logs and drops it.

use crate::error::{KrakenError, Result};
use crate::types::{canonical_symbol, ExecutionFill, OhlcEvent, OrderSide};
use chrono::DateTime;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

/// A parsed inbound frame, classified by envelope.
#[derive(Debug)]
pub enum InboundFrame {
    /// `{method: "subscribe"|"unsubscribe", success, result, error}`
    Ack(MethodAck),
    /// `{channel, type, data}`
    Data {
        channel: String,
        frame_type: String,
        data: Vec<Value>,
    },
    /// `heartbeat` frames and anything else worth ignoring silently.
    Ignored,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MethodAck {
    pub method: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

/// Classifies one raw text frame.
///
/// # Errors
///
/// Returns a parse error when the text is not valid JSON.
pub fn classify(text: &str) -> Result<InboundFrame> {
    let value: Value = serde_json::from_str(text)?;

    if value.get("method").is_some() {
        let ack: MethodAck = serde_json::from_value(value)?;
        return Ok(InboundFrame::Ack(ack));
    }

    let Some(channel) = value.get("channel").and_then(Value::as_str) else {
        return Ok(InboundFrame::Ignored);
    };
    match channel {
        "heartbeat" | "status" => Ok(InboundFrame::Ignored),
        _ => {
            let frame_type = value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("update")
                .to_string();
            let data = value
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            Ok(InboundFrame::Data {
                channel: channel.to_string(),
                frame_type,
                data,
            })
        }
    }
}

// =============================================================================
// OHLC
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawOhlc {
    symbol: String,
    interval: u32,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    vwap: f64,
    volume: f64,
    #[serde(default)]
    trades: u64,
    interval_begin: String,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Decodes one `ohlc` data item.
///
/// # Errors
///
/// Returns a parse error on a malformed item or timestamp.
pub fn decode_ohlc(item: &Value) -> Result<OhlcEvent> {
    let raw: RawOhlc = serde_json::from_value(item.clone())?;
    let interval_begin_ms = parse_rfc3339_ms(&raw.interval_begin)?;
    let ts_ms = match raw.timestamp.as_deref() {
        Some(ts) => parse_rfc3339_ms(ts)?,
        None => interval_begin_ms,
    };
    Ok(OhlcEvent {
        symbol: canonical_symbol(&raw.symbol),
        interval: raw.interval,
        open: raw.open,
        high: raw.high,
        low: raw.low,
        close: raw.close,
        vwap: raw.vwap,
        volume: raw.volume,
        trades: raw.trades,
        interval_begin_ms,
        ts_ms,
    })
}

// =============================================================================
// Book
// =============================================================================

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawLevel {
    pub price: f64,
    pub qty: f64,
}

#[derive(Debug, Deserialize)]
pub struct RawBook {
    pub symbol: String,
    #[serde(default)]
    pub bids: Vec<RawLevel>,
    #[serde(default)]
    pub asks: Vec<RawLevel>,
    /// Delivered by the exchange, preserved but not verified here.
    #[serde(default)]
    pub checksum: Option<u32>,
}

/// Decodes one `book` data item.
///
/// # Errors
///
/// Returns a parse error on a malformed item.
pub fn decode_book(item: &Value) -> Result<RawBook> {
    Ok(serde_json::from_value(item.clone())?)
}

// =============================================================================
// Executions
// =============================================================================

/// Decodes one `executions` data item, returning `None` for entries whose
/// `exec_type` is not `trade` (order status noise stays off the fill path).
///
/// # Errors
///
/// Returns a parse error when a trade entry is missing required fields.
pub fn decode_execution(item: &Value) -> Result<Option<ExecutionFill>> {
    let exec_type = item.get("exec_type").and_then(Value::as_str).unwrap_or("");
    if exec_type != "trade" {
        return Ok(None);
    }

    let side = match item.get("side").and_then(Value::as_str) {
        Some("buy") => OrderSide::Buy,
        Some("sell") => OrderSide::Sell,
        other => {
            return Err(KrakenError::parse(format!(
                "execution with unknown side: {other:?}"
            )))
        }
    };
    let exec_price = field_decimal(item, &["exec_price", "last_price"])
        .ok_or_else(|| KrakenError::parse("execution missing exec_price"))?;
    let exec_qty = field_decimal(item, &["exec_qty", "last_qty"])
        .ok_or_else(|| KrakenError::parse("execution missing exec_qty"))?;
    let fee = field_decimal(item, &["fee", "fee_usd_equiv"]).unwrap_or(Decimal::ZERO);
    let ts_ms = match item.get("timestamp").and_then(Value::as_str) {
        Some(ts) => parse_rfc3339_ms(ts)?,
        None => 0,
    };

    Ok(Some(ExecutionFill {
        exec_id: string_field(item, "exec_id"),
        order_id: string_field(item, "order_id"),
        symbol: canonical_symbol(&string_field(item, "symbol")),
        side,
        exec_price,
        exec_qty,
        fee,
        vol: field_decimal(item, &["vol", "order_qty"]),
        vol_exec: field_decimal(item, &["vol_exec", "cum_qty"]),
        ts_ms,
    }))
}

fn string_field(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Reads the first present key as a `Decimal`, accepting both JSON numbers
/// and numeric strings.
fn field_decimal(item: &Value, keys: &[&str]) -> Option<Decimal> {
    for key in keys {
        match item.get(*key) {
            Some(Value::String(s)) => return Decimal::from_str(s).ok(),
            Some(Value::Number(n)) => {
                return Decimal::from_str(&n.to_string()).ok();
            }
            _ => {}
        }
    }
    None
}

fn parse_rfc3339_ms(ts: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| KrakenError::parse(format!("bad timestamp {ts:?}: {e}")))
}
