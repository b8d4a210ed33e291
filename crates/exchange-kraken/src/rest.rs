//! Signed REST client for the Kraken spot API.
//!
//! Public endpoints are plain GETs; private endpoints carry a monotonically
//! increasing millisecond nonce in a form-encoded body signed per `auth`.
//! Calls are rate limited and retried with linear backoff on transport
//! failures (3 attempts, 250 ms × attempt). `OpenOrders` additionally retries
//! through `Invalid nonce` / `timeout` exchange errors, up to 5 attempts.

use crate::auth::KrakenCredentials;
use crate::error::{KrakenError, Result};
use crate::types::{
    AddOrderResponse, AssetInfo, CancelOrderResponse, ClosedOrdersResponse, OpenOrdersResponse,
    OrderRequest, PairMetadata, ServerTime,
};
use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use spot_bot_core::config::KrakenConfig;
use spot_bot_core::types::Candle;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const OPEN_ORDERS_ATTEMPTS: u32 = 5;

/// Builds the form-urlencoded body synchronously so the non-`Send`
/// `url::form_urlencoded::Serializer` never lives across an `.await` point.
fn encode_private_body(nonce: &str, params: &[(String, String)]) -> String {
    let mut body = url::form_urlencoded::Serializer::new(String::new());
    body.append_pair("nonce", nonce);
    for (key, value) in params {
        body.append_pair(key, value);
    }
    body.finish()
}
const BACKOFF_STEP: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: Vec<String>,
    result: Option<Value>,
}

pub struct KrakenRestClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<KrakenCredentials>,
    limiter: DefaultDirectRateLimiter,
    nonce: AtomicU64,
}

impl std::fmt::Debug for KrakenRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KrakenRestClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

impl KrakenRestClient {
    /// Creates a client. Private endpoints require `credentials`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: &KrakenConfig, credentials: Option<KrakenCredentials>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KrakenError::Configuration(format!("failed to build HTTP client: {e}")))?;

        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(nonzero!(1u32));
        let limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            http,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            credentials,
            limiter,
            nonce: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Millisecond-timestamp nonce, strictly increasing across calls.
    fn next_nonce(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let mut prev = self.nonce.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self
                .nonce
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    // =========================================================================
    // Transport
    // =========================================================================

    async fn public_get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Value> {
        let path = format!("/0/public/{endpoint}");
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.public_get_once(&path, query).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transport() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(endpoint, attempt, error = %e, "public request failed, retrying");
                    tokio::time::sleep(BACKOFF_STEP * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn public_get_once(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.limiter.until_ready().await;
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "GET");
        let response = self.http.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(KrakenError::transport(format!("HTTP {status} from {path}")));
        }
        let text = response.text().await?;
        parse_envelope(&text)
    }

    async fn private_post(&self, endpoint: &str, params: &[(String, String)]) -> Result<Value> {
        self.private_post_with_retry(endpoint, params, MAX_ATTEMPTS, |e| e.is_transport())
            .await
    }

    async fn private_post_with_retry(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        max_attempts: u32,
        retry_on: impl Fn(&KrakenError) -> bool,
    ) -> Result<Value> {
        let path = format!("/0/private/{endpoint}");
        let mut attempt = 0;
        loop {
            attempt += 1;
            // The body is rebuilt every attempt so a nonce-collision retry
            // carries a fresh nonce.
            match self.private_post_once(&path, params).await {
                Ok(value) => return Ok(value),
                Err(e) if retry_on(&e) && attempt < max_attempts => {
                    tracing::warn!(endpoint, attempt, error = %e, "private request failed, retrying");
                    tokio::time::sleep(BACKOFF_STEP * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn private_post_once(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            KrakenError::Configuration("private endpoint requires API credentials".to_string())
        })?;

        let nonce = self.next_nonce().to_string();
        let body = encode_private_body(&nonce, params);
        let signature = credentials.sign(path, &nonce, &body)?;

        self.limiter.until_ready().await;
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "POST");
        let response = self
            .http
            .post(&url)
            .header("API-Key", credentials.api_key())
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(KrakenError::transport(format!("HTTP {status} from {path}")));
        }
        let text = response.text().await?;
        parse_envelope(&text)
    }

    // =========================================================================
    // Public endpoints
    // =========================================================================

    /// Historical OHLC, ascending by time. The final candle is provisional.
    ///
    /// # Errors
    ///
    /// Fails on transport, exchange or payload-shape errors.
    pub async fn ohlc(
        &self,
        pair: &str,
        interval_min: u32,
        since: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let mut query = vec![
            ("pair", pair.to_string()),
            ("interval", interval_min.to_string()),
        ];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }
        let result = self.public_get("OHLC", &query).await?;

        let rows = result
            .as_object()
            .and_then(|map| map.values().find(|v| v.is_array()))
            .and_then(Value::as_array)
            .ok_or_else(|| KrakenError::parse("OHLC result carries no candle array"))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let row = row
                .as_array()
                .ok_or_else(|| KrakenError::parse("OHLC row is not an array"))?;
            candles.push(Candle {
                ts: row_f64(row, 0)? as i64,
                open: row_f64(row, 1)?,
                high: row_f64(row, 2)?,
                low: row_f64(row, 3)?,
                close: row_f64(row, 4)?,
                volume: row_f64(row, 6)?,
            });
        }
        Ok(candles)
    }

    /// The most recent `count` candles for `pair`.
    ///
    /// # Errors
    ///
    /// Fails on transport, exchange or payload-shape errors.
    pub async fn ohlc_recent(
        &self,
        pair: &str,
        interval_min: u32,
        count: usize,
    ) -> Result<Vec<Candle>> {
        let mut candles = self.ohlc(pair, interval_min, None).await?;
        if candles.len() > count {
            candles.drain(..candles.len() - count);
        }
        Ok(candles)
    }

    /// Metadata for one tradable pair.
    ///
    /// # Errors
    ///
    /// Fails when the pair is unknown to the exchange.
    pub async fn asset_pairs(&self, pair: &str) -> Result<PairMetadata> {
        let result = self
            .public_get("AssetPairs", &[("pair", pair.to_string())])
            .await?;
        let entry = result
            .as_object()
            .and_then(|map| map.values().next())
            .cloned()
            .ok_or_else(|| KrakenError::parse(format!("no AssetPairs entry for {pair}")))?;
        Ok(serde_json::from_value(entry)?)
    }

    /// Last trade price from the ticker.
    ///
    /// # Errors
    ///
    /// Fails on transport, exchange or payload-shape errors.
    pub async fn ticker_last_price(&self, pair: &str) -> Result<Decimal> {
        let result = self
            .public_get("Ticker", &[("pair", pair.to_string())])
            .await?;
        let price = result
            .as_object()
            .and_then(|map| map.values().next())
            .and_then(|entry| entry.get("c"))
            .and_then(|c| c.get(0))
            .and_then(Value::as_str)
            .ok_or_else(|| KrakenError::parse("ticker result missing last trade price"))?;
        Decimal::from_str(price).map_err(|e| KrakenError::parse(format!("bad ticker price: {e}")))
    }

    /// Exchange clock, for startup diagnostics.
    ///
    /// # Errors
    ///
    /// Fails on transport, exchange or payload-shape errors.
    pub async fn server_time(&self) -> Result<ServerTime> {
        let result = self.public_get("Time", &[]).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Asset registry (altnames and display decimals).
    ///
    /// # Errors
    ///
    /// Fails on transport, exchange or payload-shape errors.
    pub async fn assets(&self) -> Result<HashMap<String, AssetInfo>> {
        let result = self.public_get("Assets", &[]).await?;
        Ok(serde_json::from_value(result)?)
    }

    // =========================================================================
    // Private endpoints
    // =========================================================================

    /// Account balances by asset code.
    ///
    /// # Errors
    ///
    /// Fails on transport, exchange or payload-shape errors.
    pub async fn balance(&self) -> Result<HashMap<String, Decimal>> {
        let result = self.private_post("Balance", &[]).await?;
        let map = result
            .as_object()
            .ok_or_else(|| KrakenError::parse("Balance result is not an object"))?;
        let mut balances = HashMap::with_capacity(map.len());
        for (asset, value) in map {
            let text = value
                .as_str()
                .ok_or_else(|| KrakenError::parse(format!("balance for {asset} is not a string")))?;
            let amount = Decimal::from_str(text)
                .map_err(|e| KrakenError::parse(format!("bad balance for {asset}: {e}")))?;
            balances.insert(asset.clone(), amount);
        }
        Ok(balances)
    }

    /// Submits an order. Numeric fields travel as strings.
    ///
    /// # Errors
    ///
    /// Fails on transport or when the exchange rejects the order.
    pub async fn add_order(&self, request: &OrderRequest) -> Result<AddOrderResponse> {
        let result = self.private_post("AddOrder", &request.to_params()).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Open orders, with the extended nonce/timeout retry (up to 5 attempts).
    ///
    /// # Errors
    ///
    /// Fails with the last exchange error once attempts are exhausted.
    pub async fn open_orders(&self) -> Result<OpenOrdersResponse> {
        let result = self
            .private_post_with_retry("OpenOrders", &[], OPEN_ORDERS_ATTEMPTS, |e| {
                e.is_transport() || e.is_nonce_or_timeout()
            })
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Closed orders.
    ///
    /// # Errors
    ///
    /// Fails on transport, exchange or payload-shape errors.
    pub async fn closed_orders(&self) -> Result<ClosedOrdersResponse> {
        let result = self.private_post("ClosedOrders", &[]).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Cancels one order by transaction id.
    ///
    /// # Errors
    ///
    /// Fails on transport, exchange or payload-shape errors.
    pub async fn cancel_order(&self, txid: &str) -> Result<CancelOrderResponse> {
        let params = [("txid".to_string(), txid.to_string())];
        let result = self.private_post("CancelOrder", &params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Issues a WebSocket authentication token. Returns the token and its
    /// declared lifetime in seconds.
    ///
    /// # Errors
    ///
    /// Fails on transport, exchange or payload-shape errors.
    pub async fn websockets_token(&self) -> Result<(String, i64)> {
        let result = self.private_post("GetWebSocketsToken", &[]).await?;
        let token = result
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| KrakenError::parse("token response missing token"))?
            .to_string();
        let expires = result.get("expires").and_then(Value::as_i64).unwrap_or(900);
        Ok((token, expires))
    }
}

fn parse_envelope(text: &str) -> Result<Value> {
    let envelope: Envelope = serde_json::from_str(text)?;
    if !envelope.error.is_empty() {
        return Err(KrakenError::exchange(envelope.error.join(", ")));
    }
    envelope
        .result
        .ok_or_else(|| KrakenError::parse("response carries no result"))
}

fn row_f64(row: &[Value], idx: usize) -> Result<f64> {
    match row.get(idx) {
        Some(Value::String(s)) => s
            .parse()
            .map_err(|e| KrakenError::parse(format!("bad OHLC field {idx}: {e}"))),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| KrakenError::parse(format!("bad OHLC field {idx}"))),
        _ => Err(KrakenError::parse(format!("missing OHLC field {idx}"))),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderSide;
    use rust_decimal_macros::dec;
    use secrecy::SecretString;
    use spot_bot_core::types::EntryType;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_SECRET: &str =
        "kQH5HW/8p1uGOVjbgWA7FunAmGO8lsSUXNsu3eow76sz84Q18fWxnyRzBHCd3pd5nE9qa99HAZtuZuj6F1huXg==";

    fn client_for(server: &MockServer, with_creds: bool) -> KrakenRestClient {
        let config = KrakenConfig {
            rest_url: server.uri(),
            timeout_secs: 5,
            requests_per_second: 1000,
            ..KrakenConfig::default()
        };
        let credentials = with_creds.then(|| {
            KrakenCredentials::new("test-key", SecretString::from(TEST_SECRET.to_string()))
        });
        KrakenRestClient::new(&config, credentials).unwrap()
    }

    // ==================== Nonce Tests ====================

    #[test]
    fn nonces_are_strictly_increasing() {
        let config = KrakenConfig::default();
        let client = KrakenRestClient::new(&config, None).unwrap();
        let a = client.next_nonce();
        let b = client.next_nonce();
        let c = client.next_nonce();
        assert!(a < b && b < c);
    }

    // ==================== Envelope Tests ====================

    #[test]
    fn non_empty_error_array_is_fatal() {
        let err = parse_envelope(r#"{"error":["EGeneral:Invalid arguments"],"result":{}}"#)
            .unwrap_err();
        assert!(matches!(err, KrakenError::Exchange(_)));
        assert!(err.to_string().contains("EGeneral:Invalid arguments"));
    }

    #[test]
    fn missing_result_is_a_parse_error() {
        let err = parse_envelope(r#"{"error":[]}"#).unwrap_err();
        assert!(matches!(err, KrakenError::Parse(_)));
    }

    // ==================== Public Endpoint Tests ====================

    #[tokio::test]
    async fn ohlc_parses_string_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/OHLC"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": [],
                "result": {
                    "XDGUSD": [
                        [1714564800, "0.20", "0.21", "0.195", "0.205", "0.202", "12345.0", 42],
                        [1714564860, "0.205", "0.21", "0.20", "0.208", "0.206", "2345.0", 17]
                    ],
                    "last": 1714564860
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, false);
        let candles = client.ohlc("XDGUSD", 1, None).await.unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].ts, 1_714_564_800);
        assert!((candles[1].close - 0.208).abs() < 1e-12);
    }

    #[tokio::test]
    async fn ohlc_recent_keeps_the_tail() {
        let server = MockServer::start().await;
        let rows: Vec<_> = (0..10)
            .map(|i| {
                serde_json::json!([1714564800 + i * 60, "1", "1", "1", "1", "1", "1", 1])
            })
            .collect();
        Mock::given(method("GET"))
            .and(path("/0/public/OHLC"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": [],
                "result": { "XDGUSD": rows, "last": 0 }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, false);
        let candles = client.ohlc_recent("XDGUSD", 1, 3).await.unwrap();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].ts, 1_714_564_800 + 7 * 60);
    }

    #[tokio::test]
    async fn asset_pairs_maps_decimals_and_minima() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/AssetPairs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": [],
                "result": {
                    "XDGUSD": {
                        "altname": "XDGUSD", "wsname": "XDG/USD",
                        "base": "XXDG", "quote": "ZUSD",
                        "pair_decimals": 7, "lot_decimals": 8,
                        "ordermin": "40", "costmin": "0.5"
                    }
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, false);
        let meta = client.asset_pairs("DOGEUSD").await.unwrap();
        assert_eq!(meta.wsname, "XDG/USD");
        assert_eq!(meta.price_decimals, 7);
        assert_eq!(meta.min_order_volume, dec!(40));
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Time"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server, false);
        let err = client.server_time().await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn exchange_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": ["EQuery:Unknown asset pair"],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, false);
        let err = client.ticker_last_price("NOPE").await.unwrap_err();
        assert!(matches!(err, KrakenError::Exchange(_)));
    }

    // ==================== Private Endpoint Tests ====================

    #[tokio::test]
    async fn balance_requires_credentials() {
        let server = MockServer::start().await;
        let client = client_for(&server, false);
        let err = client.balance().await.unwrap_err();
        assert!(matches!(err, KrakenError::Configuration(_)));
    }

    #[tokio::test]
    async fn balance_is_signed_and_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/Balance"))
            .and(header_exists("API-Key"))
            .and(header_exists("API-Sign"))
            .and(body_string_contains("nonce="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": [],
                "result": { "ZUSD": "1000.0000", "XXDG": "0.00000000" }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let balances = client.balance().await.unwrap();
        assert_eq!(balances["ZUSD"], dec!(1000));
        assert_eq!(balances["XXDG"], Decimal::ZERO);
    }

    #[tokio::test]
    async fn add_order_sends_numeric_strings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/AddOrder"))
            .and(body_string_contains("volume=41.5"))
            .and(body_string_contains("price=0.2015"))
            .and(body_string_contains("ordertype=limit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": [],
                "result": {
                    "descr": { "order": "buy 41.5 XDGUSD @ limit 0.2015" },
                    "txid": ["OUF4EM-FRGI2-MQMWZD"]
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let request = OrderRequest {
            pair: "XDGUSD".to_string(),
            side: OrderSide::Buy,
            order_type: EntryType::Limit,
            volume: dec!(41.5),
            price: Some(dec!(0.2015)),
        };
        let response = client.add_order(&request).await.unwrap();
        assert_eq!(response.txid, vec!["OUF4EM-FRGI2-MQMWZD".to_string()]);
    }

    #[tokio::test]
    async fn open_orders_retries_through_invalid_nonce() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/OpenOrders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": ["EAPI:Invalid nonce"],
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/0/private/OpenOrders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": [],
                "result": { "open": {} }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let response = client.open_orders().await.unwrap();
        assert!(response.open.is_empty());
    }

    #[tokio::test]
    async fn open_orders_gives_up_after_five_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/OpenOrders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": ["EAPI:Invalid nonce"],
            })))
            .expect(5)
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let err = client.open_orders().await.unwrap_err();
        assert!(err.is_nonce_or_timeout());
    }

    #[tokio::test]
    async fn other_exchange_errors_fail_open_orders_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/OpenOrders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": ["EGeneral:Permission denied"],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let err = client.open_orders().await.unwrap_err();
        assert!(matches!(err, KrakenError::Exchange(_)));
    }

    #[tokio::test]
    async fn websockets_token_returns_token_and_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/GetWebSocketsToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": [],
                "result": { "token": "WW91ciBhdXRoZW50aWNhdGlvbiB0b2tlbg", "expires": 900 }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let (token, expires) = client.websockets_token().await.unwrap();
        assert_eq!(token, "WW91ciBhdXRoZW50aWNhdGlvbiB0b2tlbg");
        assert_eq!(expires, 900);
    }
}
