//! Feature snapshot types.
//!
//! The snapshot is the language-neutral record handed to the event engine
//! and, serialised, to the decision maker. Keep it `Serialize`-clean.

use serde::Serialize;
use spot_bot_core::types::PositionSide;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MaStack {
    Bull,
    Bear,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendRegime {
    Bull,
    Bear,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityRegime {
    High,
    Normal,
    Low,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MomentumRegime {
    Positive,
    Mixed,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BarSummary {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SwingFeatures {
    /// Distance from close up to the highest high of the last 50 bars, ATRs.
    pub to_last_high_atr: Option<f64>,
    /// Distance from close down to the lowest low of the last 50 bars, ATRs.
    pub to_last_low_atr: Option<f64>,
    pub upper_wick_pct: Option<f64>,
    pub lower_wick_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BarFlags {
    pub liquidity_sweep: bool,
    pub breakout: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeframeFeatures {
    pub close: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
    pub ma_stack: MaStack,
    pub price_z20: Option<f64>,
    pub vwap20: Option<f64>,
    pub vwap_z: Option<f64>,
    pub atr14: Option<f64>,
    pub atr_pct: Option<f64>,
    pub atr_percentile: Option<f64>,
    pub range_ratio: Option<f64>,
    pub rsi14: Option<f64>,
    pub rsi_slope: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub macd_slope: Option<f64>,
    pub volume_z20: Option<f64>,
    /// Sign of the OBV change over the last 5 bars.
    pub obv_direction: i8,
    pub swing: SwingFeatures,
    pub flags: BarFlags,
    pub last_3_bars: Vec<BarSummary>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HtfAnchors {
    pub prev_day_high: Option<f64>,
    pub prev_day_low: Option<f64>,
    pub prev_week_high: Option<f64>,
    pub prev_week_low: Option<f64>,
    pub daily_open: Option<f64>,
    pub distance_prev_day_high_atr: Option<f64>,
    pub distance_prev_day_low_atr: Option<f64>,
    pub distance_prev_week_high_atr: Option<f64>,
    pub distance_prev_week_low_atr: Option<f64>,
    pub distance_daily_open_atr: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OrderbookFeatures {
    /// `(Σbid − Σask) / (Σbid + Σask)` in `[-1, 1]`.
    pub imbalance: Option<f64>,
    pub spread_bps: Option<f64>,
    pub slippage_bps_for_size: Option<f64>,
    pub top_bid: Option<f64>,
    pub top_ask: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Confluence {
    pub score: i32,
    pub components: Vec<String>,
}

impl Confluence {
    /// Records a contributing signal and its points.
    pub fn add(&mut self, points: i32, tag: &str) {
        self.score += points;
        self.components.push(format!("{tag}{points:+}"));
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LiquidityFlags {
    pub sweep_low: bool,
    pub sweep_high: bool,
    pub break_and_hold_high: bool,
    pub break_and_hold_low: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Regime {
    pub trend: TrendRegime,
    pub volatility: VolatilityRegime,
    pub momentum: MomentumRegime,
}

impl Default for Regime {
    fn default() -> Self {
        Self {
            trend: TrendRegime::Neutral,
            volatility: VolatilityRegime::Unknown,
            momentum: MomentumRegime::Neutral,
        }
    }
}

/// Position state as seen by the snapshot consumers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionSummary {
    pub side: PositionSide,
    pub size: f64,
    pub avg_price: f64,
    pub unrealized_r: f64,
    pub bars_open_5m: u32,
}

impl Default for PositionSummary {
    fn default() -> Self {
        Self {
            side: PositionSide::Flat,
            size: 0.0,
            avg_price: 0.0,
            unrealized_r: 0.0,
            bars_open_5m: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RiskSummary {
    pub daily_pnl_pct: f64,
    pub realized_pnl_quote: f64,
    pub paused: bool,
    pub loss_count: usize,
}

/// One full feature record for a pair at a moment in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSnapshot {
    pub pair: String,
    pub ts_unix_ms: i64,
    /// Keyed by timeframe name (`1m`, `5m`, ...). Failed timeframes are
    /// simply absent; consumers must tolerate the gaps.
    pub timeframes: BTreeMap<String, TimeframeFeatures>,
    pub htf_anchors: HtfAnchors,
    pub orderbook: OrderbookFeatures,
    pub confluence: Confluence,
    pub liquidity: LiquidityFlags,
    pub regime: Regime,
    pub position: PositionSummary,
    pub risk: RiskSummary,
}

impl FeatureSnapshot {
    #[must_use]
    pub fn timeframe(&self, name: &str) -> Option<&TimeframeFeatures> {
        self.timeframes.get(name)
    }

    /// Close of the named timeframe, when present.
    #[must_use]
    pub fn close_of(&self, name: &str) -> Option<f64> {
        self.timeframes.get(name).map(|tf| tf.close)
    }
}
