//! Debounced trigger detection.
//!
//! The engine remembers the last observed closed-bar buckets, regimes,
//! confluence score and liquidity flags; `detect` diffs a fresh snapshot
//! against that memory and accumulates reasons into a pending set. The set
//! drains at most once per debounce window (default 60 s); duplicates never
//! enter it.

use spot_bot_core::config::EngineConfig;
use spot_bot_core::types::PositionSide;
use spot_bot_features::{FeatureSnapshot, LiquidityFlags, TrendRegime, VolatilityRegime};
use std::collections::VecDeque;
use std::fmt;

/// A reason to consult the decision maker.
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    TrendFlip(TrendRegime),
    VolatilityShift(VolatilityRegime),
    ConfluenceDelta { prev: i32, cur: i32 },
    LiquiditySweepLow,
    LiquiditySweepHigh,
    BreakAndHoldHigh,
    BreakAndHoldLow,
    DrawdownGuardrail { pct: f64 },
    TimeStop { bars: u32 },
    MomentumSpike,
    Startup,
    Periodic,
    Manual,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrendFlip(trend) => {
                let direction = match trend {
                    TrendRegime::Bull => "Up",
                    TrendRegime::Bear => "Down",
                    TrendRegime::Neutral => "Neutral",
                };
                write!(f, "TrendFlip-{direction}(15m)")
            }
            Self::VolatilityShift(volatility) => {
                let label = match volatility {
                    VolatilityRegime::High => "High",
                    VolatilityRegime::Low => "Low",
                    VolatilityRegime::Normal => "Normal",
                    VolatilityRegime::Unknown => "Unknown",
                };
                write!(f, "VolatilityRegime{label}(15m)")
            }
            Self::ConfluenceDelta { prev, cur } => write!(f, "ConfluenceDelta({prev}→{cur})"),
            Self::LiquiditySweepLow => write!(f, "LiquiditySweep(Low)"),
            Self::LiquiditySweepHigh => write!(f, "LiquiditySweep(High)"),
            Self::BreakAndHoldHigh => write!(f, "BreakAndHold(High)"),
            Self::BreakAndHoldLow => write!(f, "BreakAndHold(Low)"),
            Self::DrawdownGuardrail { pct } => write!(f, "DrawdownGuardrail({pct:.2}%)"),
            Self::TimeStop { bars } => write!(f, "TimeStop({bars} bars)"),
            Self::MomentumSpike => write!(f, "MomentumSpike(PriceFeed)"),
            Self::Startup => write!(f, "Startup"),
            Self::Periodic => write!(f, "Periodic"),
            Self::Manual => write!(f, "Manual"),
        }
    }
}

/// Per-tick metadata supplied by the price feed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickMeta {
    /// Set by the rolling price-change detector.
    pub threshold_triggered: bool,
}

pub struct EventEngine {
    config: EngineConfig,
    last_bucket_5m: Option<i64>,
    last_bucket_15m: Option<i64>,
    last_bucket_60m: Option<i64>,
    last_trend: Option<TrendRegime>,
    last_volatility: Option<VolatilityRegime>,
    last_confluence: Option<i32>,
    last_liquidity: LiquidityFlags,
    drawdown_breached: bool,
    pending: Vec<Reason>,
    last_emission_ms: Option<i64>,
}

impl EventEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            last_bucket_5m: None,
            last_bucket_15m: None,
            last_bucket_60m: None,
            last_trend: None,
            last_volatility: None,
            last_confluence: None,
            last_liquidity: LiquidityFlags::default(),
            drawdown_breached: false,
            pending: Vec::new(),
            last_emission_ms: None,
        }
    }

    /// Forgets all remembered state (used on `stop`).
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    /// Whether this tick warrants an evaluation cycle: a 5m/15m/60m bar just
    /// closed, the price feed tripped its threshold, or pending reasons are
    /// waiting and the debounce window has elapsed.
    pub fn should_evaluate(&mut self, ts_ms: i64, meta: &TickMeta) -> bool {
        let sec = ts_ms / 1000;
        let mut due = false;
        due |= advance_bucket(&mut self.last_bucket_5m, sec / 300);
        due |= advance_bucket(&mut self.last_bucket_15m, sec / 900);
        due |= advance_bucket(&mut self.last_bucket_60m, sec / 3600);
        if meta.threshold_triggered {
            due = true;
        }
        if !self.pending.is_empty() && self.debounce_open(ts_ms) {
            due = true;
        }
        due
    }

    /// Diffs the snapshot against remembered state, accumulates reasons, and
    /// drains the pending set if the debounce gate allows.
    pub fn detect(&mut self, snapshot: &FeatureSnapshot, meta: &TickMeta, now_ms: i64) -> Vec<Reason> {
        let trend = snapshot.regime.trend;
        if let Some(last) = self.last_trend {
            if last != trend {
                self.push_pending(Reason::TrendFlip(trend));
            }
        }
        self.last_trend = Some(trend);

        let volatility = snapshot.regime.volatility;
        if volatility != VolatilityRegime::Unknown {
            match self.last_volatility {
                Some(last) if last != volatility => {
                    self.push_pending(Reason::VolatilityShift(volatility));
                }
                None if matches!(volatility, VolatilityRegime::High | VolatilityRegime::Low) => {
                    self.push_pending(Reason::VolatilityShift(volatility));
                }
                _ => {}
            }
            self.last_volatility = Some(volatility);
        }

        let confluence = snapshot.confluence.score;
        if let Some(prev) = self.last_confluence {
            if (confluence - prev).abs() >= self.config.confluence_delta_min {
                self.push_pending(Reason::ConfluenceDelta {
                    prev,
                    cur: confluence,
                });
            }
        }
        self.last_confluence = Some(confluence);

        self.detect_liquidity_edges(snapshot.liquidity);

        if snapshot.risk.daily_pnl_pct <= -self.config.drawdown_guard_pct {
            if !self.drawdown_breached {
                self.push_pending(Reason::DrawdownGuardrail {
                    pct: snapshot.risk.daily_pnl_pct,
                });
                self.drawdown_breached = true;
            }
        } else {
            self.drawdown_breached = false;
        }

        if snapshot.position.side == PositionSide::Long
            && snapshot.position.bars_open_5m >= self.config.time_stop_bars
            && snapshot.position.unrealized_r.abs() < self.config.time_stop_max_r
        {
            self.push_pending(Reason::TimeStop {
                bars: snapshot.position.bars_open_5m,
            });
        }

        if meta.threshold_triggered {
            self.push_pending(Reason::MomentumSpike);
        }

        if self.pending.is_empty() || !self.debounce_open(now_ms) {
            return Vec::new();
        }
        self.last_emission_ms = Some(now_ms);
        std::mem::take(&mut self.pending)
    }

    /// One-shot reasons fire on the rising edge only and re-arm when the
    /// flag drops back to false.
    fn detect_liquidity_edges(&mut self, flags: LiquidityFlags) {
        if flags.sweep_low && !self.last_liquidity.sweep_low {
            self.push_pending(Reason::LiquiditySweepLow);
        }
        if flags.sweep_high && !self.last_liquidity.sweep_high {
            self.push_pending(Reason::LiquiditySweepHigh);
        }
        if flags.break_and_hold_high && !self.last_liquidity.break_and_hold_high {
            self.push_pending(Reason::BreakAndHoldHigh);
        }
        if flags.break_and_hold_low && !self.last_liquidity.break_and_hold_low {
            self.push_pending(Reason::BreakAndHoldLow);
        }
        self.last_liquidity = flags;
    }

    fn debounce_open(&self, now_ms: i64) -> bool {
        let debounce_ms = self.config.debounce_secs as i64 * 1000;
        self.last_emission_ms
            .map_or(true, |last| now_ms - last >= debounce_ms)
    }

    fn push_pending(&mut self, reason: Reason) {
        // A TimeStop re-fires with a growing bar count; one per window is
        // plenty.
        if matches!(reason, Reason::TimeStop { .. })
            && self
                .pending
                .iter()
                .any(|p| matches!(p, Reason::TimeStop { .. }))
        {
            return;
        }
        let text = reason.to_string();
        if !self.pending.iter().any(|p| p.to_string() == text) {
            self.pending.push(reason);
        }
    }
}

fn advance_bucket(slot: &mut Option<i64>, index: i64) -> bool {
    match slot {
        Some(previous) if *previous == index => false,
        Some(_) => {
            *slot = Some(index);
            true
        }
        None => {
            *slot = Some(index);
            false
        }
    }
}

// =============================================================================
// Rolling price-change detector
// =============================================================================

/// Flags when price moves more than a threshold percentage inside a rolling
/// window. Once tripped, the window restarts.
pub struct PriceChangeDetector {
    window_ms: i64,
    threshold_pct: f64,
    samples: VecDeque<(i64, f64)>,
}

impl PriceChangeDetector {
    #[must_use]
    pub fn new(window_ms: i64, threshold_pct: f64) -> Self {
        Self {
            window_ms,
            threshold_pct,
            samples: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.price_move_window_secs as i64 * 1000,
            config.price_move_pct,
        )
    }

    /// Records a tick; returns true when the threshold trips.
    pub fn update(&mut self, ts_ms: i64, price: f64) -> bool {
        while let Some((front_ts, _)) = self.samples.front() {
            if *front_ts < ts_ms - self.window_ms {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        let triggered = self.samples.front().is_some_and(|(_, first)| {
            *first > 0.0 && ((price - first) / first).abs() * 100.0 >= self.threshold_pct
        });
        if triggered {
            self.samples.clear();
        }
        self.samples.push_back((ts_ms, price));
        triggered
    }
}

// =============================================================================
// Tests
// =============================================================================
