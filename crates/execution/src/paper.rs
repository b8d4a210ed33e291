//! Paper order gateway: simulated fills against live or replayed prices.
//!
//! Implements [`OrderGateway`] without ever touching the exchange, so a bot
//! wired to it can run with real market data and zero order risk. Fills are
//! simulated at the reference price with configurable slippage and
//! commission, and a local asset ledger enforces balances.

use crate::engine::OrderGateway;
use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use spot_bot_kraken::types::OrderDescription;
use spot_bot_kraken::{AddOrderResponse, ExecutionFill, KrakenError, OrderRequest, OrderSide};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct PaperOrderGateway {
    quote_asset: String,
    base_asset: String,
    commission_rate: Decimal,
    slippage_bps: Decimal,
    balances: Mutex<HashMap<String, Decimal>>,
    last_price: Mutex<Decimal>,
    fills: Mutex<Vec<ExecutionFill>>,
    sequence: AtomicU64,
}

impl PaperOrderGateway {
    /// Creates a paper gateway holding `starting_quote` of the quote asset.
    ///
    /// `commission_rate` is a decimal fraction (0.001 = 0.1%); slippage is
    /// applied against the fill in basis points.
    #[must_use]
    pub fn new(
        quote_asset: impl Into<String>,
        base_asset: impl Into<String>,
        starting_quote: Decimal,
        commission_rate: f64,
        slippage_bps: f64,
    ) -> Self {
        let quote_asset = quote_asset.into();
        let base_asset = base_asset.into();
        let mut balances = HashMap::new();
        balances.insert(quote_asset.clone(), starting_quote);
        balances.insert(base_asset.clone(), Decimal::ZERO);
        Self {
            quote_asset,
            base_asset,
            commission_rate: Decimal::from_f64(commission_rate).unwrap_or(Decimal::ZERO),
            slippage_bps: Decimal::from_f64(slippage_bps).unwrap_or(Decimal::ZERO),
            balances: Mutex::new(balances),
            last_price: Mutex::new(Decimal::ZERO),
            fills: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Feeds the simulator the latest traded price.
    pub fn set_last_price(&self, price: Decimal) {
        if let Ok(mut guard) = self.last_price.lock() {
            *guard = price;
        }
    }

    /// Every simulated fill so far, oldest first.
    #[must_use]
    pub fn fills(&self) -> Vec<ExecutionFill> {
        self.fills.lock().map(|f| f.clone()).unwrap_or_default()
    }

    fn fill_price(&self, request: &OrderRequest) -> spot_bot_kraken::Result<Decimal> {
        // Limit orders fill at their limit; market orders take slippage
        // against the last price.
        if let Some(price) = request.price {
            return Ok(price);
        }
        let reference = self
            .last_price
            .lock()
            .map(|p| *p)
            .unwrap_or(Decimal::ZERO);
        if reference <= Decimal::ZERO {
            return Err(KrakenError::exchange("EOrder:No market price available"));
        }
        let slip = reference * self.slippage_bps / Decimal::from(10_000);
        Ok(match request.side {
            OrderSide::Buy => reference + slip,
            OrderSide::Sell => reference - slip,
        })
    }
}

#[async_trait]
impl OrderGateway for PaperOrderGateway {
    async fn add_order(&self, request: &OrderRequest) -> spot_bot_kraken::Result<AddOrderResponse> {
        let price = self.fill_price(request)?;
        let notional = price * request.volume;
        let commission = notional * self.commission_rate;

        {
            let mut balances = self
                .balances
                .lock()
                .map_err(|_| KrakenError::exchange("EGeneral:Internal error"))?;
            match request.side {
                OrderSide::Buy => {
                    let quote = balances
                        .get(&self.quote_asset)
                        .copied()
                        .unwrap_or(Decimal::ZERO);
                    if quote < notional + commission {
                        return Err(KrakenError::exchange("EOrder:Insufficient funds"));
                    }
                    balances.insert(self.quote_asset.clone(), quote - notional - commission);
                    *balances.entry(self.base_asset.clone()).or_default() += request.volume;
                }
                OrderSide::Sell => {
                    let base = balances
                        .get(&self.base_asset)
                        .copied()
                        .unwrap_or(Decimal::ZERO);
                    if base < request.volume {
                        return Err(KrakenError::exchange("EOrder:Insufficient funds"));
                    }
                    balances.insert(self.base_asset.clone(), base - request.volume);
                    *balances.entry(self.quote_asset.clone()).or_default() +=
                        notional - commission;
                }
            }
        }

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let txid = format!("PAPER-{seq}");
        let fill = ExecutionFill {
            exec_id: format!("PAPERX-{seq}"),
            order_id: txid.clone(),
            symbol: request.pair.clone(),
            side: request.side,
            exec_price: price,
            exec_qty: request.volume,
            fee: commission,
            vol: Some(request.volume),
            vol_exec: Some(request.volume),
            ts_ms: chrono::Utc::now().timestamp_millis(),
        };
        if let Ok(mut fills) = self.fills.lock() {
            fills.push(fill);
        }
        tracing::info!(txid = %txid, price = %price, volume = %request.volume, "paper fill");

        Ok(AddOrderResponse {
            txid: vec![txid],
            descr: OrderDescription {
                order: format!(
                    "{} {} {} @ {}",
                    request.side.as_str(),
                    request.volume,
                    request.pair,
                    price
                ),
            },
        })
    }

    async fn balances(&self) -> spot_bot_kraken::Result<HashMap<String, Decimal>> {
        self.balances
            .lock()
            .map(|b| b.clone())
            .map_err(|_| KrakenError::exchange("EGeneral:Internal error"))
    }

    async fn last_price(&self, _pair: &str) -> spot_bot_kraken::Result<Decimal> {
        let price = self
            .last_price
            .lock()
            .map(|p| *p)
            .unwrap_or(Decimal::ZERO);
        if price <= Decimal::ZERO {
            return Err(KrakenError::exchange("EOrder:No market price available"));
        }
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use spot_bot_core::types::EntryType;

    fn gateway() -> PaperOrderGateway {
        let gateway = PaperOrderGateway::new("ZUSD", "XXDG", dec!(1000), 0.001, 10.0);
        gateway.set_last_price(dec!(0.20));
        gateway
    }

    fn market_order(side: OrderSide, volume: Decimal) -> OrderRequest {
        OrderRequest {
            pair: "XDGUSD".to_string(),
            side,
            order_type: EntryType::Market,
            volume,
            price: None,
        }
    }

    #[tokio::test]
    async fn market_buy_applies_slippage_and_commission() {
        let gateway = gateway();
        let response = gateway
            .add_order(&market_order(OrderSide::Buy, dec!(100)))
            .await
            .unwrap();
        assert_eq!(response.txid.len(), 1);

        let fills = gateway.fills();
        assert_eq!(fills.len(), 1);
        // 10 bps above the 0.20 reference.
        assert_eq!(fills[0].exec_price, dec!(0.2002));
        assert!(fills[0].fee > Decimal::ZERO);

        let balances = gateway.balances().await.unwrap();
        assert_eq!(balances["XXDG"], dec!(100));
        assert!(balances["ZUSD"] < dec!(1000) - dec!(20));
    }

    #[tokio::test]
    async fn market_sell_slips_down() {
        let gateway = gateway();
        gateway
            .add_order(&market_order(OrderSide::Buy, dec!(100)))
            .await
            .unwrap();
        gateway
            .add_order(&market_order(OrderSide::Sell, dec!(100)))
            .await
            .unwrap();

        let fills = gateway.fills();
        assert_eq!(fills[1].exec_price, dec!(0.1998));
        let balances = gateway.balances().await.unwrap();
        assert_eq!(balances["XXDG"], Decimal::ZERO);
        // Round trip loses the spread and two commissions.
        assert!(balances["ZUSD"] < dec!(1000));
    }

    #[tokio::test]
    async fn limit_orders_fill_at_the_limit() {
        let gateway = gateway();
        let request = OrderRequest {
            pair: "XDGUSD".to_string(),
            side: OrderSide::Buy,
            order_type: EntryType::Limit,
            volume: dec!(50),
            price: Some(dec!(0.1990)),
        };
        gateway.add_order(&request).await.unwrap();
        assert_eq!(gateway.fills()[0].exec_price, dec!(0.1990));
    }

    #[tokio::test]
    async fn insufficient_quote_rejects_the_buy() {
        let gateway = gateway();
        let err = gateway
            .add_order(&market_order(OrderSide::Buy, dec!(100_000)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Insufficient funds"));
        // Ledger untouched on rejection.
        let balances = gateway.balances().await.unwrap();
        assert_eq!(balances["ZUSD"], dec!(1000));
    }

    #[tokio::test]
    async fn selling_more_than_held_is_rejected() {
        let gateway = gateway();
        let err = gateway
            .add_order(&market_order(OrderSide::Sell, dec!(1)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Insufficient funds"));
    }

    #[tokio::test]
    async fn no_market_price_is_an_error() {
        let gateway = PaperOrderGateway::new("ZUSD", "XXDG", dec!(1000), 0.0, 0.0);
        let err = gateway
            .add_order(&market_order(OrderSide::Buy, dec!(1)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No market price"));
        assert!(gateway.last_price("XDGUSD").await.is_err());
    }
}
