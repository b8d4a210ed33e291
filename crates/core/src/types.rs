use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single OHLC candle. The most recent candle from a live feed is
/// provisional and is replaced tick by tick until its interval closes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Interval begin, unix seconds.
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Typical price `(h + l + c) / 3`.
    #[must_use]
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Bar range `high - low`.
    #[must_use]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// Normalised decision action set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Hold,
    OpenLong,
    Add,
    Trim,
    ClosePartial,
    CloseAll,
    MoveStop,
    SetTp,
    Pause,
}

impl Action {
    /// Parses the wire form (`"OPEN_LONG"` etc.); unknown input is `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "HOLD" => Some(Self::Hold),
            "OPEN_LONG" => Some(Self::OpenLong),
            "ADD" => Some(Self::Add),
            "TRIM" => Some(Self::Trim),
            "CLOSE_PARTIAL" => Some(Self::ClosePartial),
            "CLOSE_ALL" => Some(Self::CloseAll),
            "MOVE_STOP" => Some(Self::MoveStop),
            "SET_TP" => Some(Self::SetTp),
            "PAUSE" => Some(Self::Pause),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hold => "HOLD",
            Self::OpenLong => "OPEN_LONG",
            Self::Add => "ADD",
            Self::Trim => "TRIM",
            Self::ClosePartial => "CLOSE_PARTIAL",
            Self::CloseAll => "CLOSE_ALL",
            Self::MoveStop => "MOVE_STOP",
            Self::SetTp => "SET_TP",
            Self::Pause => "PAUSE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntrySpec {
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Limit offset from the reference price, basis points. Negative bids
    /// below the reference.
    pub offset_bps: Option<f64>,
}

/// A normalised trading decision as produced by the decision adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub size_pct: Option<f64>,
    pub entry: Option<EntrySpec>,
    pub stop_atr: Option<f64>,
    pub tp_atr: Option<f64>,
    #[serde(default)]
    pub followups: Vec<String>,
    #[serde(default)]
    pub comment: String,
}

impl Decision {
    /// A HOLD decision with an explanatory comment.
    #[must_use]
    pub fn hold(comment: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            size_pct: None,
            entry: None,
            stop_atr: None,
            tp_atr: None,
            followups: Vec::new(),
            comment: comment.into(),
        }
    }
}

// =============================================================================
// Position
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Flat,
    Long,
}

/// Spot position ledger entry. Invariant: `side == Flat` exactly when
/// `size == 0` exactly when `avg_price == 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: PositionSide,
    pub size: Decimal,
    pub avg_price: Decimal,
    pub opened_at_ms: Option<i64>,
    /// Unrealised move in ATR units, refreshed by the market-context update.
    pub unrealized_r: f64,
    /// Age of the position in closed 5m bars.
    pub bars_open_5m: u32,
}

impl Position {
    #[must_use]
    pub const fn flat() -> Self {
        Self {
            side: PositionSide::Flat,
            size: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            opened_at_ms: None,
            unrealized_r: 0.0,
            bars_open_5m: 0,
        }
    }

    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.side == PositionSide::Flat
    }

    /// Restores the flat-state invariant after a full close.
    pub fn reset(&mut self) {
        *self = Self::flat();
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::flat()
    }
}
