//! Strategy hook surface.
//!
//! The orchestrator accepts a `Strategy` object with a fixed set of hook
//! methods; every method has a default no-op implementation, so an override
//! implements only what it cares about. Hook failures are caught by the
//! orchestrator, logged, and surfaced through `on_error`; they never crash
//! the bot.

use anyhow::Result;
use async_trait::async_trait;
use spot_bot_core::types::Decision;
use spot_bot_engine::Reason;
use spot_bot_execution::ExecutionResult;
use spot_bot_kraken::ExecutionFill;

/// One live price observation.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    pub ts_ms: i64,
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str {
        "default"
    }

    async fn on_init(&mut self) -> Result<()> {
        Ok(())
    }

    async fn on_price_update(&mut self, _tick: &PriceTick) -> Result<()> {
        Ok(())
    }

    async fn on_decision(
        &mut self,
        _decision: &Decision,
        _result: &ExecutionResult,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_fill(&mut self, _fill: &ExecutionFill) -> Result<()> {
        Ok(())
    }

    /// Called after a hook failure with a description of what went wrong.
    async fn on_error(&mut self, _message: &str) {}

    /// Extra evaluation reasons the strategy wants merged into the next
    /// cycle (drained each time).
    fn drain_reasons(&mut self) -> Vec<Reason> {
        Vec::new()
    }
}

/// The stock no-op strategy.
pub struct DefaultStrategy;

#[async_trait]
impl Strategy for DefaultStrategy {}
