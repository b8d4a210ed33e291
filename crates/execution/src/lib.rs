//! Execution engine, risk ledger and the paper-trading gateway.

pub mod engine;
pub mod paper;
pub mod risk;

pub use engine::{
    ExecutionEngine, ExecutionResult, MarketContext, NullStatusSink, OrderGateway, RiskView,
    StatusSink,
};
pub use paper::PaperOrderGateway;
pub use risk::{RiskLedger, TradeOutcome};
