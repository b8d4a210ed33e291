//! Heartbeat logging and the status capability injected into the
//! execution engine.

use crate::strategy::PriceTick;
use spot_bot_core::types::{Position, PositionSide};
use spot_bot_execution::{RiskView, StatusSink};
use std::sync::atomic::{AtomicI64, Ordering};

pub struct StatusReporter {
    heartbeat_ms: i64,
    last_heartbeat_ms: AtomicI64,
}

impl StatusReporter {
    #[must_use]
    pub fn new(heartbeat_secs: u64) -> Self {
        Self {
            heartbeat_ms: heartbeat_secs as i64 * 1000,
            last_heartbeat_ms: AtomicI64::new(0),
        }
    }

    /// Logs a heartbeat line at most once per configured interval.
    pub fn on_tick(&self, tick: &PriceTick, position: &Position, risk: &RiskView) {
        let last = self.last_heartbeat_ms.load(Ordering::Relaxed);
        if tick.ts_ms - last < self.heartbeat_ms {
            return;
        }
        if self
            .last_heartbeat_ms
            .compare_exchange(last, tick.ts_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let position_desc = match position.side {
            PositionSide::Flat => "flat".to_string(),
            PositionSide::Long => format!(
                "long {} @ {} ({:+.2}R)",
                position.size, position.avg_price, position.unrealized_r
            ),
        };
        tracing::info!(
            symbol = %tick.symbol,
            price = tick.price,
            position = %position_desc,
            daily_pnl_pct = risk.daily_pnl_pct,
            paused = risk.paused,
            "heartbeat"
        );
    }
}

impl StatusSink for StatusReporter {
    fn report(&self, message: &str) {
        tracing::info!(target: "spot_bot::status", "{message}");
    }
}
