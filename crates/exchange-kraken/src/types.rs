use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spot_bot_core::types::{Candle, EntryType};

/// Uppercases and strips the slash: the form subscription handlers are
/// keyed by (`DOGE/USD` and `dogeusd` both map to `DOGEUSD`).
#[must_use]
pub fn canonical_symbol(symbol: &str) -> String {
    symbol.to_uppercase().replace('/', "")
}

// =============================================================================
// Pair metadata
// =============================================================================

/// Tradable-pair metadata from `AssetPairs`, fetched once per pair at start.
///
/// All submitted prices and volumes are rounded to `price_decimals` /
/// `volume_decimals` before transmission.
#[derive(Debug, Clone, Deserialize)]
pub struct PairMetadata {
    pub altname: String,
    pub wsname: String,
    pub base: String,
    pub quote: String,
    #[serde(rename = "pair_decimals")]
    pub price_decimals: u32,
    #[serde(rename = "lot_decimals")]
    pub volume_decimals: u32,
    #[serde(rename = "ordermin")]
    pub min_order_volume: Decimal,
    #[serde(rename = "costmin", default)]
    pub min_order_cost: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetInfo {
    pub altname: String,
    pub decimals: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerTime {
    pub unixtime: i64,
    pub rfc1123: String,
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// An order as submitted to `AddOrder`. Numeric fields travel as strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub pair: String,
    pub side: OrderSide,
    pub order_type: EntryType,
    pub volume: Decimal,
    pub price: Option<Decimal>,
}

impl OrderRequest {
    /// Form parameters in the shape `AddOrder` expects.
    #[must_use]
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("pair".to_string(), self.pair.clone()),
            ("type".to_string(), self.side.as_str().to_string()),
            (
                "ordertype".to_string(),
                match self.order_type {
                    EntryType::Market => "market".to_string(),
                    EntryType::Limit => "limit".to_string(),
                },
            ),
            ("volume".to_string(), self.volume.to_string()),
        ];
        if let Some(price) = self.price {
            params.push(("price".to_string(), price.to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderDescription {
    #[serde(default)]
    pub order: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddOrderResponse {
    #[serde(default)]
    pub txid: Vec<String>,
    #[serde(default)]
    pub descr: OrderDescription,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrdersResponse {
    #[serde(default)]
    pub open: std::collections::HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClosedOrdersResponse {
    #[serde(default)]
    pub closed: std::collections::HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelOrderResponse {
    pub count: u64,
}

// =============================================================================
// WebSocket events
// =============================================================================

/// A decoded OHLC frame item. `symbol` is canonical (uppercase, no slash).
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcEvent {
    pub symbol: String,
    pub interval: u32,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub vwap: f64,
    pub volume: f64,
    pub trades: u64,
    pub interval_begin_ms: i64,
    pub ts_ms: i64,
}

impl OhlcEvent {
    #[must_use]
    pub fn to_candle(&self) -> Candle {
        Candle {
            ts: self.interval_begin_ms / 1000,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// A trade execution from the private `executions` channel.
/// Only `exec_type == "trade"` entries are dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionFill {
    pub exec_id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub exec_price: Decimal,
    pub exec_qty: Decimal,
    pub fee: Decimal,
    pub vol: Option<Decimal>,
    pub vol_exec: Option<Decimal>,
    pub ts_ms: i64,
}

/// Events the gateway delivers to its consumer.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ohlc(OhlcEvent),
    /// The shared book for `symbol` was just mutated by a snapshot or delta.
    BookUpdate { symbol: String },
    Fill(ExecutionFill),
}
