//! Event engine, decision adapter and decision log.

pub mod decision;
pub mod decision_log;
pub mod event_engine;
pub mod llm;
pub mod prompt;

pub use decision::{
    AdapterError, Constraints, DecisionAdapter, DecisionMaker, DecisionRequest, MockDecisionMaker,
};
pub use decision_log::{DecisionLog, DecisionRecord};
pub use event_engine::{EventEngine, PriceChangeDetector, Reason, TickMeta};
pub use llm::OpenAiDecisionMaker;
