//! Bot lifecycle: subscriptions, the per-tick path, the guarded evaluation
//! cycle and strategy hooks.

pub mod orchestrator;
pub mod status;
pub mod strategy;

pub use orchestrator::{Orchestrator, ShutdownHandle};
pub use status::StatusReporter;
pub use strategy::{DefaultStrategy, PriceTick, Strategy};
