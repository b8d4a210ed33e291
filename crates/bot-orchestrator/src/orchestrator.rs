//! The conductor: owns the gateway, feature builder, event engine, decision
//! adapter, execution engine and decision log, and runs the per-tick path
//! and the guarded evaluation cycle.

use crate::status::StatusReporter;
use crate::strategy::{PriceTick, Strategy};
use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use spot_bot_core::config::AppConfig;
use spot_bot_core::symbol::SymbolPair;
use spot_bot_core::types::Position;
use spot_bot_engine::{
    Constraints, DecisionAdapter, DecisionLog, DecisionMaker, DecisionRecord, DecisionRequest,
    EventEngine, PriceChangeDetector, Reason, TickMeta,
};
use spot_bot_execution::{ExecutionEngine, MarketContext, RiskView};
use spot_bot_features::{FeatureBuilder, FeatureSnapshot, PositionSummary, RiskSummary};
use spot_bot_kraken::{
    GatewayEvent, KrakenRestClient, KrakenWsManager, OhlcEvent, SubscriptionHandle,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Flips the orchestrator's run loop into shutdown.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct Orchestrator {
    config: AppConfig,
    pair: SymbolPair,
    ws: KrakenWsManager,
    features: Arc<FeatureBuilder>,
    events: EventEngine,
    adapter: DecisionAdapter,
    execution: ExecutionEngine,
    decision_log: DecisionLog,
    strategy: Box<dyn Strategy>,
    status: Arc<StatusReporter>,
    detector: PriceChangeDetector,
    subscriptions: Vec<SubscriptionHandle>,
    events_tx: mpsc::UnboundedSender<GatewayEvent>,
    events_rx: mpsc::UnboundedReceiver<GatewayEvent>,
    shutdown_rx: watch::Receiver<bool>,
    /// Re-entrancy guard: at most one evaluation cycle at a time.
    processing: bool,
}

impl Orchestrator {
    /// Resolves pair metadata and wires every subsystem together. Fatal
    /// failures here (unresolvable pair, unopenable decision log) abort
    /// startup.
    ///
    /// # Errors
    ///
    /// Fails when the pair cannot be resolved or the decision log cannot be
    /// opened.
    pub async fn connect(
        config: AppConfig,
        rest: Arc<KrakenRestClient>,
        maker: Arc<dyn DecisionMaker>,
        strategy: Box<dyn Strategy>,
    ) -> Result<(Self, ShutdownHandle)> {
        let pair = SymbolPair::parse(&config.bot.pair)
            .with_context(|| format!("invalid pair: {}", config.bot.pair))?;
        let meta = rest
            .asset_pairs(&pair.rest_pair)
            .await
            .with_context(|| format!("cannot resolve pair {} on the exchange", pair.ws_pair))?;
        tracing::info!(
            pair = %pair.ws_pair,
            altname = %meta.altname,
            price_decimals = meta.price_decimals,
            volume_decimals = meta.volume_decimals,
            ordermin = %meta.min_order_volume,
            "resolved pair metadata"
        );

        let ws = KrakenWsManager::new(
            config.kraken.ws_public_url.clone(),
            config.kraken.ws_private_url.clone(),
            Arc::clone(&rest),
        );
        let book = ws.book_handle(&pair.ws_pair).await;
        let features = Arc::new(FeatureBuilder::new(
            Arc::clone(&rest) as Arc<dyn spot_bot_features::CandleSource>,
            book,
            pair.clone(),
            config.features.clone(),
        ));

        let status = Arc::new(StatusReporter::new(config.bot.heartbeat_secs));
        let execution = ExecutionEngine::new(
            Arc::clone(&rest) as Arc<dyn spot_bot_execution::OrderGateway>,
            Arc::clone(&status) as Arc<dyn spot_bot_execution::StatusSink>,
            pair.clone(),
            meta,
            config.risk.clone(),
            config.bot.dry_run,
        );
        let decision_log = DecisionLog::open(&config.bot.decision_log_path)?;
        let events = EventEngine::new(config.engine.clone());
        let adapter = DecisionAdapter::new(maker);
        let detector = PriceChangeDetector::from_config(&config.engine);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok((
            Self {
                config,
                pair,
                ws,
                features,
                events,
                adapter,
                execution,
                decision_log,
                strategy,
                status,
                detector,
                subscriptions: Vec::new(),
                events_tx,
                events_rx,
                shutdown_rx,
                processing: false,
            },
            ShutdownHandle { tx: shutdown_tx },
        ))
    }

    /// Subscribes to the market and account streams and runs the startup
    /// evaluation.
    ///
    /// # Errors
    ///
    /// In live mode a failed subscription aborts startup; in dry-run it
    /// degrades to a warning so the bot can run against a flaky feed.
    pub async fn start(&mut self) -> Result<()> {
        if let Err(e) = self.strategy.on_init().await {
            tracing::error!(error = %e, hook = "on_init", "strategy hook failed");
            self.strategy.on_error(&format!("on_init: {e}")).await;
        }

        let ohlc = self
            .ws
            .subscribe_ohlc(
                &self.pair.ws_pair,
                self.config.bot.primary_interval_min,
                self.events_tx.clone(),
            )
            .await;
        self.track_subscription("ohlc", ohlc)?;

        let book = self
            .ws
            .subscribe_book(
                &self.pair.ws_pair,
                self.config.bot.book_depth,
                self.events_tx.clone(),
            )
            .await;
        self.track_subscription("book", book)?;

        let executions = self.ws.subscribe_executions(self.events_tx.clone()).await;
        self.track_subscription("executions", executions)?;

        self.evaluate(vec![Reason::Startup], TickMeta::default()).await;
        tracing::info!(pair = %self.pair.ws_pair, dry_run = self.config.bot.dry_run, "bot started");
        Ok(())
    }

    fn track_subscription(
        &mut self,
        label: &str,
        result: spot_bot_kraken::Result<SubscriptionHandle>,
    ) -> Result<()> {
        match result {
            Ok(handle) => {
                self.subscriptions.push(handle);
                Ok(())
            }
            Err(e) if self.config.bot.dry_run => {
                tracing::warn!(channel = label, error = %e, "subscription failed, continuing (dry run)");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("cannot subscribe to {label}")),
        }
    }

    /// Event loop: gateway events, the periodic timer and shutdown.
    pub async fn run(&mut self) {
        let mut timer =
            tokio::time::interval(Duration::from_secs(self.config.bot.eval_interval_secs));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        timer.tick().await; // the first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => break,
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                _ = timer.tick() => {
                    self.evaluate(vec![Reason::Periodic], TickMeta::default()).await;
                }
            }
        }
        self.stop().await;
    }

    async fn handle_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Ohlc(ohlc) => self.handle_tick(&ohlc).await,
            GatewayEvent::BookUpdate { .. } => {
                // Deltas are already applied to the shared book by the
                // gateway read loop.
            }
            GatewayEvent::Fill(fill) => {
                self.execution.handle_fill(&fill);
                if let Err(e) = self.strategy.on_fill(&fill).await {
                    tracing::error!(error = %e, hook = "on_fill", "strategy hook failed");
                    self.strategy.on_error(&format!("on_fill: {e}")).await;
                }
            }
        }
    }

    async fn handle_tick(&mut self, ohlc: &OhlcEvent) {
        let tick = PriceTick {
            symbol: ohlc.symbol.clone(),
            price: ohlc.close,
            ts_ms: ohlc.ts_ms,
        };
        self.features.set_last_price(tick.price);
        self.status
            .on_tick(&tick, self.execution.position(), &self.execution.risk_view());
        if let Err(e) = self.strategy.on_price_update(&tick).await {
            tracing::error!(error = %e, hook = "on_price_update", "strategy hook failed");
            self.strategy
                .on_error(&format!("on_price_update: {e}"))
                .await;
        }

        let meta = TickMeta {
            threshold_triggered: self.detector.update(tick.ts_ms, tick.price),
        };
        if self.events.should_evaluate(tick.ts_ms, &meta) {
            self.evaluate(Vec::new(), meta).await;
        }
    }

    /// The evaluation cycle, serialised by the `processing` guard.
    pub async fn evaluate(&mut self, extra_reasons: Vec<Reason>, meta: TickMeta) {
        if self.processing {
            tracing::debug!("evaluation already in progress, skipping");
            return;
        }
        self.processing = true;
        self.run_evaluation(extra_reasons, meta).await;
        self.processing = false;
    }

    async fn run_evaluation(&mut self, extra_reasons: Vec<Reason>, meta: TickMeta) {
        let now = Utc::now().timestamp_millis();
        let snapshot = self
            .features
            .build(
                position_summary(self.execution.position()),
                risk_summary(&self.execution.risk_view()),
            )
            .await;

        if let Err(e) = self.execution.refresh_balances(false).await {
            tracing::warn!(error = %e, "balance refresh failed, using cached values");
        }
        self.execution.update_market_context(
            MarketContext {
                close_5m: snapshot.close_of("5m"),
                atr_5m: snapshot.timeframe("5m").and_then(|tf| tf.atr14),
            },
            now,
        );

        let mut reasons = self.events.detect(&snapshot, &meta, now);
        for reason in extra_reasons.into_iter().chain(self.strategy.drain_reasons()) {
            let text = reason.to_string();
            if !reasons.iter().any(|r| r.to_string() == text) {
                reasons.push(reason);
            }
        }
        if reasons.is_empty() {
            return;
        }
        let reason_texts: Vec<String> = reasons.iter().map(ToString::to_string).collect();
        tracing::info!(reasons = ?reason_texts, "evaluation triggered");

        let request = DecisionRequest {
            snapshot: &snapshot,
            reasons: &reasons,
            constraints: Constraints {
                max_trade_risk_pct: self.config.risk.max_trade_risk_pct,
                default_size_pct: self.config.risk.default_size_pct,
                min_notional: self.config.risk.min_notional.to_f64().unwrap_or(0.0),
            },
            dry_run: self.config.bot.dry_run,
        };
        let decision = self.adapter.decide(&request).await;
        tracing::info!(
            action = decision.action.as_str(),
            comment = %decision.comment,
            "decision"
        );

        self.decision_log.append(decision_record(
            now,
            &self.pair,
            &snapshot,
            &decision,
            reason_texts,
            self.config.bot.dry_run,
            self.features.last_price(),
        ));

        let result = self.execution.execute(&decision).await;
        tracing::info!(?result, "execution result");
        if let Err(e) = self.strategy.on_decision(&decision, &result).await {
            tracing::error!(error = %e, hook = "on_decision", "strategy hook failed");
            self.strategy.on_error(&format!("on_decision: {e}")).await;
        }
    }

    /// Unsubscribes everything, resets the event engine and closes sockets.
    pub async fn stop(&mut self) {
        for handle in self.subscriptions.drain(..) {
            handle.unsubscribe().await;
        }
        self.ws.close().await;
        self.events.reset();
        tracing::info!("bot stopped");
    }
}

fn position_summary(position: &Position) -> PositionSummary {
    PositionSummary {
        side: position.side,
        size: position.size.to_f64().unwrap_or(0.0),
        avg_price: position.avg_price.to_f64().unwrap_or(0.0),
        unrealized_r: position.unrealized_r,
        bars_open_5m: position.bars_open_5m,
    }
}

fn risk_summary(view: &RiskView) -> RiskSummary {
    RiskSummary {
        daily_pnl_pct: view.daily_pnl_pct,
        realized_pnl_quote: view.realized_pnl_quote,
        paused: view.paused,
        loss_count: view.loss_count,
    }
}

#[allow(clippy::too_many_arguments)]
fn decision_record(
    ts_ms: i64,
    pair: &SymbolPair,
    snapshot: &FeatureSnapshot,
    decision: &spot_bot_core::types::Decision,
    reasons: Vec<String>,
    dry_run: bool,
    last_price: Option<f64>,
) -> DecisionRecord {
    DecisionRecord {
        ts_ms,
        pair: pair.ws_pair.clone(),
        decision: decision.clone(),
        price: snapshot.close_of("5m").or(last_price),
        confluence_score: snapshot.confluence.score,
        volatility_regime: format!("{:?}", snapshot.regime.volatility).to_lowercase(),
        trend_regime: format!("{:?}", snapshot.regime.trend).to_lowercase(),
        momentum_regime: format!("{:?}", snapshot.regime.momentum).to_lowercase(),
        reasons,
        dry_run,
    }
}
