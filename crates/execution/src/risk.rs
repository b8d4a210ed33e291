//! Risk ledger: daily PnL, loss streaks and cooldowns.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use spot_bot_core::config::RiskConfig;
use std::collections::VecDeque;

/// Outcomes remembered for the loss-streak window.
const OUTCOME_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeOutcome {
    Win,
    Loss,
    Breakeven,
}

#[derive(Debug)]
pub struct RiskLedger {
    config: RiskConfig,
    daily_starting_balance: Option<Decimal>,
    realized_pnl_quote: Decimal,
    outcomes: VecDeque<TradeOutcome>,
    pause_until_ms: Option<i64>,
}

impl RiskLedger {
    #[must_use]
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            daily_starting_balance: None,
            realized_pnl_quote: Decimal::ZERO,
            outcomes: VecDeque::with_capacity(OUTCOME_WINDOW),
            pause_until_ms: None,
        }
    }

    /// Captures the day's starting balance on the first snapshot; later
    /// calls are ignored.
    pub fn capture_starting_balance(&mut self, balance: Decimal) {
        if self.daily_starting_balance.is_none() {
            tracing::info!(balance = %balance, "captured daily starting balance");
            self.daily_starting_balance = Some(balance);
        }
    }

    #[must_use]
    pub const fn daily_starting_balance(&self) -> Option<Decimal> {
        self.daily_starting_balance
    }

    #[must_use]
    pub const fn realized_pnl_quote(&self) -> Decimal {
        self.realized_pnl_quote
    }

    /// Realised PnL as a percentage of the starting balance. Stays 0 while
    /// the starting balance is unknown or zero.
    #[must_use]
    pub fn daily_pnl_pct(&self) -> f64 {
        match self.daily_starting_balance {
            Some(start) if start > Decimal::ZERO => (self.realized_pnl_quote / start * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Records a realised trade outcome. Enters a cooldown when the loss
    /// count inside the window reaches the configured threshold.
    pub fn record_outcome(&mut self, pnl: Decimal, now_ms: i64) {
        self.realized_pnl_quote += pnl;
        let outcome = if pnl > Decimal::ZERO {
            TradeOutcome::Win
        } else if pnl < Decimal::ZERO {
            TradeOutcome::Loss
        } else {
            TradeOutcome::Breakeven
        };
        self.outcomes.push_back(outcome);
        while self.outcomes.len() > OUTCOME_WINDOW {
            self.outcomes.pop_front();
        }

        if self.loss_count() >= self.config.pause_after_losses {
            self.pause_for(now_ms, self.config.pause_minutes);
            tracing::warn!(
                losses = self.loss_count(),
                pause_minutes = self.config.pause_minutes,
                "loss streak, entering cooldown"
            );
        }
    }

    #[must_use]
    pub fn loss_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| **o == TradeOutcome::Loss)
            .count()
    }

    pub fn pause_for(&mut self, now_ms: i64, minutes: i64) {
        self.pause_until_ms = Some(now_ms + minutes * 60_000);
    }

    #[must_use]
    pub fn is_paused(&self, now_ms: i64) -> bool {
        self.pause_until_ms.is_some_and(|until| now_ms < until)
    }

    #[must_use]
    pub const fn pause_until_ms(&self) -> Option<i64> {
        self.pause_until_ms
    }
}
