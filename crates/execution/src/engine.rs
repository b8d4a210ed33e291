//! Execution engine: decision → precision-rounded orders, fills → ledger.
//!
//! All outcomes are result values, never exceptions: HOLD is a noop, risk
//! violations are rejections, cooldowns are `Paused`, transport problems are
//! `Failed`. The engine is driven from a single orchestrator task (see the
//! concurrency contract); methods take `&mut self`.

use crate::risk::RiskLedger;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use spot_bot_core::config::RiskConfig;
use spot_bot_core::precision::{round_price, round_volume};
use spot_bot_core::symbol::SymbolPair;
use spot_bot_core::types::{Action, Decision, EntrySpec, EntryType, Position, PositionSide};
use spot_bot_kraken::types::canonical_symbol;
use spot_bot_kraken::{
    AddOrderResponse, ExecutionFill, KrakenRestClient, OrderRequest, OrderSide, PairMetadata,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const BALANCE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 6); // 0.000001

/// Order-submission seam so the engine can be exercised against a mock.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn add_order(&self, request: &OrderRequest) -> spot_bot_kraken::Result<AddOrderResponse>;
    async fn balances(&self) -> spot_bot_kraken::Result<HashMap<String, Decimal>>;
    async fn last_price(&self, pair: &str) -> spot_bot_kraken::Result<Decimal>;
}

#[async_trait]
impl OrderGateway for KrakenRestClient {
    async fn add_order(&self, request: &OrderRequest) -> spot_bot_kraken::Result<AddOrderResponse> {
        KrakenRestClient::add_order(self, request).await
    }

    async fn balances(&self) -> spot_bot_kraken::Result<HashMap<String, Decimal>> {
        self.balance().await
    }

    async fn last_price(&self, pair: &str) -> spot_bot_kraken::Result<Decimal> {
        self.ticker_last_price(pair).await
    }
}

/// Injected status capability (keeps the orchestrator out of our type
/// graph; see the dependency-injection note in DESIGN.md).
pub trait StatusSink: Send + Sync {
    fn report(&self, message: &str);
}

pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn report(&self, _message: &str) {}
}

/// Market context pushed in by the orchestrator before each evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketContext {
    pub close_5m: Option<f64>,
    pub atr_5m: Option<f64>,
}

/// Risk state as exposed to snapshot consumers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskView {
    pub daily_pnl_pct: f64,
    pub realized_pnl_quote: f64,
    pub paused: bool,
    pub loss_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Noop { reason: String },
    Paused { until_ms: i64 },
    Rejected { reason: String },
    DryRun { payload: OrderRequest },
    Submitted { txids: Vec<String>, payload: OrderRequest },
    Deferred { instruction: String },
    Failed { message: String },
}

pub struct ExecutionEngine {
    gateway: Arc<dyn OrderGateway>,
    status: Arc<dyn StatusSink>,
    pair: SymbolPair,
    meta: PairMetadata,
    config: RiskConfig,
    ledger: RiskLedger,
    position: Position,
    market: MarketContext,
    dry_run: bool,
    balances: HashMap<String, Decimal>,
    balances_fetched_at_ms: Option<i64>,
    /// Order ids whose fills were already applied locally; a later
    /// executions-channel echo for the same id is skipped.
    applied_orders: HashSet<String>,
    dry_run_seq: u64,
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn OrderGateway>,
        status: Arc<dyn StatusSink>,
        pair: SymbolPair,
        meta: PairMetadata,
        config: RiskConfig,
        dry_run: bool,
    ) -> Self {
        Self {
            gateway,
            status,
            pair,
            meta,
            config: config.clone(),
            ledger: RiskLedger::new(config),
            position: Position::flat(),
            market: MarketContext::default(),
            dry_run,
            balances: HashMap::new(),
            balances_fetched_at_ms: None,
            applied_orders: HashSet::new(),
            dry_run_seq: 0,
        }
    }

    #[must_use]
    pub const fn position(&self) -> &Position {
        &self.position
    }

    #[must_use]
    pub fn risk_view(&self) -> RiskView {
        let now = Utc::now().timestamp_millis();
        RiskView {
            daily_pnl_pct: self.ledger.daily_pnl_pct(),
            realized_pnl_quote: self.ledger.realized_pnl_quote().to_f64().unwrap_or(0.0),
            paused: self.ledger.is_paused(now),
            loss_count: self.ledger.loss_count(),
        }
    }

    /// Refreshes the unrealized-R and position-age fields from fresh market
    /// data.
    pub fn update_market_context(&mut self, market: MarketContext, now_ms: i64) {
        self.market = market;
        if let Some(opened) = self.position.opened_at_ms {
            self.position.bars_open_5m = ((now_ms - opened).max(0) / 300_000) as u32;
        }
        if self.position.side == PositionSide::Long {
            if let (Some(close), Some(atr)) = (self.market.close_5m, self.market.atr_5m) {
                let avg = self.position.avg_price.to_f64().unwrap_or(0.0);
                if atr > 0.0 {
                    self.position.unrealized_r = (close - avg) / atr;
                }
            }
        }
    }

    // =========================================================================
    // Balances
    // =========================================================================

    /// Refreshes the balance cache when forced or older than the TTL.
    /// Deltas beyond ε are logged; the first snapshot seeds the daily
    /// starting balance.
    ///
    /// # Errors
    ///
    /// Fails when the balance endpoint fails; the stale cache stays usable.
    pub async fn refresh_balances(&mut self, force: bool) -> spot_bot_kraken::Result<()> {
        let now = Utc::now().timestamp_millis();
        if !force {
            if let Some(at) = self.balances_fetched_at_ms {
                if now - at < self.config.balance_cache_secs as i64 * 1000 {
                    return Ok(());
                }
            }
        }
        let fresh = self.gateway.balances().await?;
        for (asset, value) in &fresh {
            let old = self.balances.get(asset).copied().unwrap_or(Decimal::ZERO);
            if (*value - old).abs() > BALANCE_EPSILON {
                tracing::info!(asset = %asset, old = %old, new = %value, "balance changed");
            }
        }
        self.balances = fresh;
        self.balances_fetched_at_ms = Some(now);
        let quote = self.quote_balance();
        self.ledger.capture_starting_balance(quote);
        Ok(())
    }

    /// Quote-asset balance, tolerant of Kraken's `Z`-prefixed asset codes.
    #[must_use]
    pub fn quote_balance(&self) -> Decimal {
        let quote = &self.meta.quote;
        if let Some(balance) = self.balances.get(quote) {
            return *balance;
        }
        let stripped = quote.trim_start_matches(['Z', 'X']);
        if let Some(balance) = self.balances.get(stripped) {
            return *balance;
        }
        self.balances
            .get(&format!("Z{stripped}"))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    // =========================================================================
    // Decision execution
    // =========================================================================

    /// Translates a normalised decision into orders, gated by risk controls.
    pub async fn execute(&mut self, decision: &Decision) -> ExecutionResult {
        let now = Utc::now().timestamp_millis();

        if decision.action == Action::Hold {
            return ExecutionResult::Noop {
                reason: "hold".to_string(),
            };
        }
        if self.ledger.is_paused(now) && decision.action != Action::Pause {
            let until_ms = self.ledger.pause_until_ms().unwrap_or(now);
            tracing::info!(action = decision.action.as_str(), until_ms, "paused, rejecting");
            return ExecutionResult::Paused { until_ms };
        }

        match decision.action {
            Action::Hold => unreachable!("handled above"),
            Action::Pause => {
                self.ledger.pause_for(now, self.config.pause_minutes);
                let until = self.ledger.pause_until_ms().unwrap_or(now);
                self.status.report(&format!("pause engaged until {until}"));
                ExecutionResult::Noop {
                    reason: format!("pause engaged until {until}"),
                }
            }
            Action::OpenLong | Action::Add => self.open_long(decision, now).await,
            Action::Trim | Action::ClosePartial => self.reduce(decision, false, now).await,
            Action::CloseAll => self.reduce(decision, true, now).await,
            Action::MoveStop => ExecutionResult::Deferred {
                instruction: format!("move stop to {:?} ATR", decision.stop_atr),
            },
            Action::SetTp => ExecutionResult::Deferred {
                instruction: format!("set take profit at {:?} ATR", decision.tp_atr),
            },
        }
    }

    async fn open_long(&mut self, decision: &Decision, now_ms: i64) -> ExecutionResult {
        let reference = match self.reference_price().await {
            Ok(price) => price,
            Err(e) => {
                return ExecutionResult::Failed {
                    message: format!("no reference price: {e}"),
                }
            }
        };
        if reference <= Decimal::ZERO {
            return ExecutionResult::Rejected {
                reason: "non-positive reference price".to_string(),
            };
        }

        if self.balances_fetched_at_ms.is_none() {
            if let Err(e) = self.refresh_balances(true).await {
                return ExecutionResult::Failed {
                    message: format!("cannot fetch balances: {e}"),
                };
            }
        }

        let entry = decision.entry.unwrap_or(EntrySpec {
            entry_type: EntryType::Market,
            offset_bps: None,
        });
        let price = match entry.entry_type {
            EntryType::Limit => {
                let offset = Decimal::from_f64(entry.offset_bps.unwrap_or(0.0) / 10_000.0)
                    .unwrap_or(Decimal::ZERO);
                round_price(reference * (Decimal::ONE + offset), self.meta.price_decimals)
            }
            EntryType::Market => reference,
        };

        let quote_balance = self.quote_balance();
        let size_pct = decision.size_pct.unwrap_or(self.config.default_size_pct);
        let risk_cap = quote_balance * pct(self.config.max_trade_risk_pct);
        let size_cap = quote_balance * pct(size_pct);
        let notional = risk_cap.min(size_cap);
        if notional < self.config.min_notional {
            return ExecutionResult::Rejected {
                reason: format!(
                    "notional {notional} below minimum {}",
                    self.config.min_notional
                ),
            };
        }

        let exposure = self.position.size * reference;
        let total_cap = quote_balance * pct(self.config.max_total_risk_pct);
        if exposure + notional > total_cap {
            return ExecutionResult::Rejected {
                reason: format!(
                    "total exposure {} would exceed cap {total_cap}",
                    exposure + notional
                ),
            };
        }

        let volume = round_volume(notional / price, self.meta.volume_decimals);
        if volume < self.meta.min_order_volume {
            return ExecutionResult::Rejected {
                reason: format!(
                    "volume {volume} below pair minimum {}",
                    self.meta.min_order_volume
                ),
            };
        }

        let payload = OrderRequest {
            pair: self.meta.altname.clone(),
            side: OrderSide::Buy,
            order_type: entry.entry_type,
            volume,
            price: (entry.entry_type == EntryType::Limit).then_some(price),
        };
        // Live buys reconcile through the executions channel; only dry-run
        // synthesises a local fill.
        self.submit(payload, price, false, now_ms).await
    }

    async fn reduce(&mut self, decision: &Decision, close_all: bool, now_ms: i64) -> ExecutionResult {
        if self.position.is_flat() {
            return ExecutionResult::Rejected {
                reason: "no position to reduce".to_string(),
            };
        }

        let volume = if close_all {
            self.position.size
        } else {
            let size_pct = decision.size_pct.unwrap_or(self.config.default_size_pct);
            let volume = round_volume(
                self.position.size * pct(size_pct),
                self.meta.volume_decimals,
            );
            if volume < self.meta.min_order_volume {
                return ExecutionResult::Rejected {
                    reason: format!(
                        "trim volume {volume} below pair minimum {}",
                        self.meta.min_order_volume
                    ),
                };
            }
            volume
        };
        if volume <= Decimal::ZERO {
            return ExecutionResult::Rejected {
                reason: "nothing to sell".to_string(),
            };
        }

        let fill_price = match self.reference_price().await {
            Ok(price) => price,
            Err(e) => {
                return ExecutionResult::Failed {
                    message: format!("no reference price: {e}"),
                }
            }
        };
        let payload = OrderRequest {
            pair: self.meta.altname.clone(),
            side: OrderSide::Sell,
            order_type: EntryType::Market,
            volume,
            price: None,
        };
        // Sells apply the expected fill locally, pending reconciliation.
        self.submit(payload, fill_price, true, now_ms).await
    }

    /// Reference price: latest 5m close, ticker as fallback.
    async fn reference_price(&self) -> spot_bot_kraken::Result<Decimal> {
        if let Some(close) = self.market.close_5m {
            if let Some(price) = Decimal::from_f64(close) {
                if price > Decimal::ZERO {
                    return Ok(price);
                }
            }
        }
        self.gateway.last_price(&self.pair.rest_pair).await
    }

    async fn submit(
        &mut self,
        payload: OrderRequest,
        fill_price: Decimal,
        apply_locally: bool,
        now_ms: i64,
    ) -> ExecutionResult {
        if self.dry_run {
            let order_ref = format!("dryrun-{}", self.dry_run_seq);
            self.dry_run_seq += 1;
            tracing::info!(?payload, %order_ref, "dry run: order constructed, not submitted");
            let fill = self.synthetic_fill(&payload, fill_price, &order_ref, now_ms);
            self.apply_fill(&fill, now_ms);
            self.applied_orders.insert(order_ref);
            return ExecutionResult::DryRun { payload };
        }

        match self.gateway.add_order(&payload).await {
            Ok(response) => {
                tracing::info!(txids = ?response.txid, descr = %response.descr.order, "order submitted");
                self.status
                    .report(&format!("order submitted: {}", response.descr.order));
                if apply_locally {
                    for txid in &response.txid {
                        self.applied_orders.insert(txid.clone());
                    }
                    let order_ref = response.txid.first().cloned().unwrap_or_default();
                    let fill = self.synthetic_fill(&payload, fill_price, &order_ref, now_ms);
                    self.apply_fill(&fill, now_ms);
                }
                ExecutionResult::Submitted {
                    txids: response.txid,
                    payload,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "order submission failed");
                ExecutionResult::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    fn synthetic_fill(
        &self,
        payload: &OrderRequest,
        fill_price: Decimal,
        order_ref: &str,
        now_ms: i64,
    ) -> ExecutionFill {
        ExecutionFill {
            exec_id: order_ref.to_string(),
            order_id: order_ref.to_string(),
            symbol: canonical_symbol(&self.pair.ws_pair),
            side: payload.side,
            exec_price: payload.price.unwrap_or(fill_price),
            exec_qty: payload.volume,
            fee: Decimal::ZERO,
            vol: Some(payload.volume),
            vol_exec: Some(payload.volume),
            ts_ms: now_ms,
        }
    }

    // =========================================================================
    // Fills
    // =========================================================================

    /// Applies an executions-channel fill. Fills whose order id was already
    /// applied locally (dry-run synthesis, sell pre-application) are skipped,
    /// so an echo cannot double-count.
    pub fn handle_fill(&mut self, fill: &ExecutionFill) {
        if !fill.order_id.is_empty() && self.applied_orders.contains(&fill.order_id) {
            tracing::debug!(order_id = %fill.order_id, "fill already applied locally, skipping");
            return;
        }
        self.apply_fill(fill, Utc::now().timestamp_millis());
    }

    fn apply_fill(&mut self, fill: &ExecutionFill, now_ms: i64) {
        match fill.side {
            OrderSide::Buy => {
                let new_size = self.position.size + fill.exec_qty;
                if new_size <= Decimal::ZERO {
                    return;
                }
                let cost = self.position.avg_price * self.position.size
                    + fill.exec_price * fill.exec_qty;
                self.position.avg_price = cost / new_size;
                self.position.size = new_size;
                self.position.side = PositionSide::Long;
                if self.position.opened_at_ms.is_none() {
                    self.position.opened_at_ms =
                        Some(if fill.ts_ms > 0 { fill.ts_ms } else { now_ms });
                }
                self.status.report(&format!(
                    "buy fill {} @ {} (size {})",
                    fill.exec_qty, fill.exec_price, self.position.size
                ));
            }
            OrderSide::Sell => {
                if self.position.is_flat() {
                    tracing::warn!("sell fill with no position, ignoring");
                    return;
                }
                let close_qty = fill.exec_qty.min(self.position.size);
                let pnl = (fill.exec_price - self.position.avg_price) * close_qty;
                self.ledger.record_outcome(pnl, now_ms);
                self.position.size -= close_qty;
                if self.position.size == Decimal::ZERO {
                    self.position.reset();
                }
                self.status.report(&format!(
                    "sell fill {close_qty} @ {} (pnl {pnl}, size {})",
                    fill.exec_price, self.position.size
                ));
            }
        }
    }
}

/// Percentage as a decimal multiplier (`25.0` → `0.25`).
fn pct(value: f64) -> Decimal {
    Decimal::from_f64(value / 100.0).unwrap_or(Decimal::ZERO)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use spot_bot_kraken::types::OrderDescription;
    use std::sync::Mutex;

    struct MockGateway {
        balances: HashMap<String, Decimal>,
        last_price: Decimal,
        submitted: Mutex<Vec<OrderRequest>>,
        fail_submit: bool,
    }

    impl MockGateway {
        fn with_quote_balance(balance: Decimal) -> Self {
            let mut balances = HashMap::new();
            balances.insert("ZUSD".to_string(), balance);
            balances.insert("XXDG".to_string(), Decimal::ZERO);
            Self {
                balances,
                last_price: dec!(0.205),
                submitted: Mutex::new(Vec::new()),
                fail_submit: false,
            }
        }

        fn submitted(&self) -> Vec<OrderRequest> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OrderGateway for MockGateway {
        async fn add_order(
            &self,
            request: &OrderRequest,
        ) -> spot_bot_kraken::Result<AddOrderResponse> {
            if self.fail_submit {
                return Err(spot_bot_kraken::KrakenError::exchange(
                    "EOrder:Insufficient funds",
                ));
            }
            self.submitted.lock().unwrap().push(request.clone());
            Ok(AddOrderResponse {
                txid: vec![format!("TX-{}", self.submitted.lock().unwrap().len())],
                descr: OrderDescription {
                    order: "mock order".to_string(),
                },
            })
        }

        async fn balances(&self) -> spot_bot_kraken::Result<HashMap<String, Decimal>> {
            Ok(self.balances.clone())
        }

        async fn last_price(&self, _pair: &str) -> spot_bot_kraken::Result<Decimal> {
            Ok(self.last_price)
        }
    }

    fn metadata() -> PairMetadata {
        serde_json::from_value(serde_json::json!({
            "altname": "XDGUSD",
            "wsname": "XDG/USD",
            "base": "XXDG",
            "quote": "ZUSD",
            "pair_decimals": 7,
            "lot_decimals": 8,
            "ordermin": "40",
            "costmin": "0.5"
        }))
        .unwrap()
    }

    fn engine_with(gateway: Arc<MockGateway>, dry_run: bool) -> ExecutionEngine {
        ExecutionEngine::new(
            gateway,
            Arc::new(NullStatusSink),
            SymbolPair::parse("DOGE/USD").unwrap(),
            metadata(),
            RiskConfig::default(),
            dry_run,
        )
    }

    fn open_long_decision(size_pct: f64) -> Decision {
        Decision {
            action: Action::OpenLong,
            size_pct: Some(size_pct),
            entry: Some(EntrySpec {
                entry_type: EntryType::Limit,
                offset_bps: Some(0.0),
            }),
            stop_atr: Some(1.0),
            tp_atr: Some(2.0),
            followups: Vec::new(),
            comment: String::new(),
        }
    }

    fn buy_fill(order_id: &str, qty: Decimal, price: Decimal) -> ExecutionFill {
        ExecutionFill {
            exec_id: format!("E-{order_id}"),
            order_id: order_id.to_string(),
            symbol: "XDGUSD".to_string(),
            side: OrderSide::Buy,
            exec_price: price,
            exec_qty: qty,
            fee: Decimal::ZERO,
            vol: Some(qty),
            vol_exec: Some(qty),
            ts_ms: 1_714_564_800_000,
        }
    }

    fn sell_fill(order_id: &str, qty: Decimal, price: Decimal) -> ExecutionFill {
        ExecutionFill {
            side: OrderSide::Sell,
            ..buy_fill(order_id, qty, price)
        }
    }

    // ==================== Hold / Pause ====================

    #[tokio::test]
    async fn hold_is_a_noop() {
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(10000)));
        let mut engine = engine_with(gateway.clone(), true);
        let result = engine.execute(&Decision::hold("nothing")).await;
        assert!(matches!(result, ExecutionResult::Noop { .. }));
        assert!(gateway.submitted().is_empty());
    }

    #[tokio::test]
    async fn pause_decision_engages_cooldown() {
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(10000)));
        let mut engine = engine_with(gateway, true);
        let pause = Decision {
            action: Action::Pause,
            ..Decision::hold("")
        };
        let result = engine.execute(&pause).await;
        assert!(matches!(result, ExecutionResult::Noop { .. }));

        let result = engine.execute(&open_long_decision(25.0)).await;
        assert!(matches!(result, ExecutionResult::Paused { .. }));

        // PAUSE still applies while paused.
        let result = engine.execute(&pause).await;
        assert!(matches!(result, ExecutionResult::Noop { .. }));
    }

    // ==================== Sizing ====================

    #[tokio::test]
    async fn dry_run_open_long_sizes_and_rounds() {
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(10000)));
        let mut engine = engine_with(gateway.clone(), true);

        let result = engine.execute(&open_long_decision(25.0)).await;
        let ExecutionResult::DryRun { payload } = result else {
            panic!("expected dry run, got {result:?}");
        };
        // notional = min(10000 · 0.75%, 10000 · 25%) = 75; volume = 75 / 0.205.
        assert_eq!(payload.side, OrderSide::Buy);
        assert_eq!(payload.price, Some(dec!(0.205)));
        assert_eq!(payload.volume, dec!(365.85365853));

        // Dry run never reaches the exchange; the fill is synthesised.
        assert!(gateway.submitted().is_empty());
        assert_eq!(engine.position().side, PositionSide::Long);
        assert_eq!(engine.position().size, dec!(365.85365853));
        assert_eq!(engine.position().avg_price, dec!(0.205));
    }

    #[tokio::test]
    async fn notional_below_minimum_is_rejected() {
        // 1000 · 0.75% = 7.5, under the 20-quote minimum.
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(1000)));
        let mut engine = engine_with(gateway.clone(), true);
        let result = engine.execute(&open_long_decision(25.0)).await;
        assert!(matches!(result, ExecutionResult::Rejected { .. }));
        assert!(engine.position().is_flat());
    }

    #[tokio::test]
    async fn exact_minimum_notional_is_accepted() {
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(10000)));
        let mut engine = ExecutionEngine::new(
            gateway,
            Arc::new(NullStatusSink),
            SymbolPair::parse("DOGE/USD").unwrap(),
            metadata(),
            RiskConfig {
                max_trade_risk_pct: 0.2, // 10000 · 0.2% = 20 exactly
                ..RiskConfig::default()
            },
            true,
        );
        let result = engine.execute(&open_long_decision(25.0)).await;
        assert!(matches!(result, ExecutionResult::DryRun { .. }));
    }

    #[tokio::test]
    async fn volume_below_pair_minimum_is_rejected() {
        // 20 quote at 0.60 is ~33 DOGE, under the 40 DOGE pair minimum.
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(10000)));
        let mut engine = ExecutionEngine::new(
            gateway.clone(),
            Arc::new(NullStatusSink),
            SymbolPair::parse("DOGE/USD").unwrap(),
            metadata(),
            RiskConfig {
                max_trade_risk_pct: 0.2,
                ..RiskConfig::default()
            },
            true,
        );
        engine.update_market_context(
            MarketContext {
                close_5m: Some(0.60),
                atr_5m: None,
            },
            0,
        );
        let result = engine.execute(&open_long_decision(25.0)).await;
        let ExecutionResult::Rejected { reason } = result else {
            panic!("expected rejection");
        };
        assert!(reason.contains("below pair minimum"));
    }

    #[tokio::test]
    async fn adds_stop_at_the_total_exposure_cap() {
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(10000)));
        let mut engine = engine_with(gateway, true);

        // Each tranche is 75 quote; the aggregate cap is 10000 · 1.5% = 150.
        let open = engine.execute(&open_long_decision(25.0)).await;
        assert!(matches!(open, ExecutionResult::DryRun { .. }));
        let add = engine.execute(&open_long_decision(25.0)).await;
        assert!(matches!(add, ExecutionResult::DryRun { .. }));

        let third = engine.execute(&open_long_decision(25.0)).await;
        let ExecutionResult::Rejected { reason } = third else {
            panic!("expected rejection, got {third:?}");
        };
        assert!(reason.contains("exceed cap"));
    }

    // ==================== Reduce ====================

    #[tokio::test]
    async fn trim_without_position_is_rejected() {
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(10000)));
        let mut engine = engine_with(gateway, true);
        let trim = Decision {
            action: Action::Trim,
            size_pct: Some(50.0),
            ..Decision::hold("")
        };
        let result = engine.execute(&trim).await;
        assert!(matches!(result, ExecutionResult::Rejected { .. }));
    }

    #[tokio::test]
    async fn close_all_sells_the_entire_position() {
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(10000)));
        let mut engine = engine_with(gateway, true);
        engine.handle_fill(&buy_fill("OPEN-1", dec!(100), dec!(1.00)));

        let close = Decision {
            action: Action::CloseAll,
            ..Decision::hold("")
        };
        let result = engine.execute(&close).await;
        let ExecutionResult::DryRun { payload } = result else {
            panic!("expected dry run");
        };
        assert_eq!(payload.side, OrderSide::Sell);
        assert_eq!(payload.volume, dec!(100));
        assert!(engine.position().is_flat());
    }

    // ==================== Loss streak ====================

    #[tokio::test]
    async fn two_losses_pause_the_engine() {
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(1000)));
        let mut engine = engine_with(gateway, true);
        engine.refresh_balances(true).await.unwrap();

        engine.handle_fill(&buy_fill("O1", dec!(100), dec!(1.00)));
        engine.handle_fill(&sell_fill("O2", dec!(100), dec!(0.98)));
        engine.handle_fill(&buy_fill("O3", dec!(100), dec!(0.97)));
        engine.handle_fill(&sell_fill("O4", dec!(100), dec!(0.96)));

        let view = engine.risk_view();
        assert!(view.paused);
        assert_eq!(view.loss_count, 2);
        // -2 then -1 on a 1000 starting balance.
        assert!((view.daily_pnl_pct + 0.3).abs() < 1e-9);

        let result = engine.execute(&open_long_decision(25.0)).await;
        assert!(matches!(result, ExecutionResult::Paused { .. }));
    }

    // ==================== Fill ledger ====================

    #[tokio::test]
    async fn pnl_conserves_cash_flow() {
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(1000)));
        let mut engine = engine_with(gateway, true);
        engine.refresh_balances(true).await.unwrap();

        engine.handle_fill(&buy_fill("O1", dec!(100), dec!(1.00)));
        engine.handle_fill(&buy_fill("O2", dec!(100), dec!(1.10)));
        assert_eq!(engine.position().avg_price, dec!(1.05));

        engine.handle_fill(&sell_fill("O3", dec!(150), dec!(1.20)));
        // Realised: (1.20 − 1.05) · 150 = 22.5; 50 remain at 1.05.
        assert_eq!(engine.position().size, dec!(50));
        let view = engine.risk_view();
        assert!((view.realized_pnl_quote - 22.5).abs() < 1e-9);

        engine.handle_fill(&sell_fill("O4", dec!(50), dec!(1.00)));
        assert!(engine.position().is_flat());
        assert_eq!(engine.position().avg_price, Decimal::ZERO);
    }

    #[tokio::test]
    async fn dry_run_fill_echo_is_idempotent() {
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(10000)));
        let mut engine = engine_with(gateway, true);
        engine.execute(&open_long_decision(25.0)).await;
        let size = engine.position().size;

        // A later executions-channel echo for the same logical order.
        engine.handle_fill(&buy_fill("dryrun-0", dec!(365.85365853), dec!(0.205)));
        assert_eq!(engine.position().size, size);
    }

    #[tokio::test]
    async fn oversell_clamps_to_position_size() {
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(1000)));
        let mut engine = engine_with(gateway, true);
        engine.handle_fill(&buy_fill("O1", dec!(100), dec!(1.00)));
        engine.handle_fill(&sell_fill("O2", dec!(250), dec!(1.10)));
        assert!(engine.position().is_flat());
        let view = engine.risk_view();
        assert!((view.realized_pnl_quote - 10.0).abs() < 1e-9);
    }

    // ==================== Live submission ====================

    #[tokio::test]
    async fn live_buy_waits_for_channel_fill() {
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(10000)));
        let mut engine = engine_with(gateway.clone(), false);

        let result = engine.execute(&open_long_decision(25.0)).await;
        let ExecutionResult::Submitted { txids, .. } = result else {
            panic!("expected submission");
        };
        assert_eq!(gateway.submitted().len(), 1);
        // Not applied locally: the executions channel is authoritative.
        assert!(engine.position().is_flat());

        engine.handle_fill(&buy_fill(&txids[0], dec!(365.85365853), dec!(0.205)));
        assert_eq!(engine.position().side, PositionSide::Long);
    }

    #[tokio::test]
    async fn live_submit_failure_is_reported_not_thrown() {
        let gateway = Arc::new(MockGateway {
            fail_submit: true,
            ..MockGateway::with_quote_balance(dec!(10000))
        });
        let mut engine = engine_with(gateway, false);
        let result = engine.execute(&open_long_decision(25.0)).await;
        let ExecutionResult::Failed { message } = result else {
            panic!("expected failure result");
        };
        assert!(message.contains("Insufficient funds"));
    }

    // ==================== Deferred ====================

    #[tokio::test]
    async fn move_stop_is_deferred() {
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(10000)));
        let mut engine = engine_with(gateway, true);
        let decision = Decision {
            action: Action::MoveStop,
            stop_atr: Some(1.5),
            ..Decision::hold("")
        };
        let result = engine.execute(&decision).await;
        assert!(matches!(result, ExecutionResult::Deferred { .. }));
    }

    // ==================== Market context ====================

    #[tokio::test]
    async fn market_context_updates_age_and_r() {
        let gateway = Arc::new(MockGateway::with_quote_balance(dec!(1000)));
        let mut engine = engine_with(gateway, true);
        engine.handle_fill(&buy_fill("O1", dec!(100), dec!(1.00)));
        let opened = engine.position().opened_at_ms.unwrap();

        engine.update_market_context(
            MarketContext {
                close_5m: Some(1.10),
                atr_5m: Some(0.05),
            },
            opened + 36 * 300_000,
        );
        assert_eq!(engine.position().bars_open_5m, 36);
        assert!((engine.position().unrealized_r - 2.0).abs() < 1e-9);
    }
}
