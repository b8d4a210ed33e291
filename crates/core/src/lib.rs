pub mod config;
pub mod precision;
pub mod symbol;
pub mod types;

pub use config::{
    AppConfig, BotConfig, ConfigLoader, EngineConfig, FeatureConfig, KrakenConfig, LlmConfig,
    RiskConfig,
};
pub use precision::{round_price, round_volume};
pub use symbol::SymbolPair;
pub use types::{Action, Candle, Decision, EntrySpec, EntryType, Position, PositionSide};
