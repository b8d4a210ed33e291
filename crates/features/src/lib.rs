//! Multi-timeframe feature builder: indicators, snapshot types and the
//! builder that assembles them.

pub mod builder;
pub mod indicators;
pub mod snapshot;

pub use builder::{CandleSource, FeatureBuilder, TimeframeSpec, TIMEFRAMES};
pub use snapshot::{
    Confluence, FeatureSnapshot, HtfAnchors, LiquidityFlags, MaStack, MomentumRegime,
    OrderbookFeatures, PositionSummary, Regime, RiskSummary, TimeframeFeatures, TrendRegime,
    VolatilityRegime,
};
