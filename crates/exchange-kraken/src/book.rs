//! Local L2 order book state.
//!
//! Price keys are fixed-precision strings (12 decimal places) so float noise
//! cannot split one price level across two map entries. The exchange
//! checksum is preserved on the state but not verified.

use crate::messages::RawLevel;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: f64,
    pub qty: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Bids,
    Asks,
}

fn price_key(price: f64) -> String {
    format!("{price:.12}")
}

/// Book state for one symbol: price→qty maps per side plus the last trade
/// price. Created at first subscription, destroyed at unsubscribe.
#[derive(Debug, Default)]
pub struct BookState {
    bids: HashMap<String, BookLevel>,
    asks: HashMap<String, BookLevel>,
    last_price: Option<f64>,
    last_checksum: Option<u32>,
}

impl BookState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole book. Both sides are cleared before the snapshot
    /// levels are applied.
    pub fn apply_snapshot(&mut self, bids: &[RawLevel], asks: &[RawLevel], checksum: Option<u32>) {
        self.bids.clear();
        self.asks.clear();
        self.apply_update(BookSide::Bids, bids);
        self.apply_update(BookSide::Asks, asks);
        self.last_checksum = checksum;
    }

    /// Applies per-level deltas: `qty <= 0` removes the price, anything else
    /// inserts or replaces it.
    pub fn apply_update(&mut self, side: BookSide, levels: &[RawLevel]) {
        let map = match side {
            BookSide::Bids => &mut self.bids,
            BookSide::Asks => &mut self.asks,
        };
        for level in levels {
            let key = price_key(level.price);
            if level.qty <= 0.0 {
                map.remove(&key);
            } else {
                map.insert(
                    key,
                    BookLevel {
                        price: level.price,
                        qty: level.qty,
                    },
                );
            }
        }
    }

    pub fn set_checksum(&mut self, checksum: Option<u32>) {
        self.last_checksum = checksum;
    }

    #[must_use]
    pub const fn last_checksum(&self) -> Option<u32> {
        self.last_checksum
    }

    pub fn set_last_price(&mut self, price: f64) {
        self.last_price = Some(price);
    }

    #[must_use]
    pub const fn last_price(&self) -> Option<f64> {
        self.last_price
    }

    #[must_use]
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids
            .values()
            .copied()
            .max_by(|a, b| a.price.total_cmp(&b.price))
    }

    #[must_use]
    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks
            .values()
            .copied()
            .min_by(|a, b| a.price.total_cmp(&b.price))
    }

    /// Mid price; `None` while either side is empty.
    #[must_use]
    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / 2.0),
            _ => None,
        }
    }

    /// Spread in basis points of mid; `None` while either side is empty.
    #[must_use]
    pub fn spread_bps(&self) -> Option<f64> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        let mid = (bid.price + ask.price) / 2.0;
        if mid <= 0.0 {
            return None;
        }
        Some((ask.price - bid.price) / mid * 10_000.0)
    }

    /// `(Σbid_qty − Σask_qty) / (Σbid_qty + Σask_qty)`, in `[-1, 1]`.
    /// `None` when the book is empty.
    #[must_use]
    pub fn imbalance(&self) -> Option<f64> {
        let bid_qty: f64 = self.bids.values().map(|l| l.qty).sum();
        let ask_qty: f64 = self.asks.values().map(|l| l.qty).sum();
        let total = bid_qty + ask_qty;
        if total <= 0.0 {
            return None;
        }
        Some((bid_qty - ask_qty) / total)
    }

    /// Average absolute bps deviation from mid when consuming `notional`
    /// quote units from each side. Walks whatever depth exists; `None` while
    /// either side is empty.
    #[must_use]
    pub fn slippage_bps_for_notional(&self, notional: f64) -> Option<f64> {
        let mid = self.mid()?;
        if notional <= 0.0 || mid <= 0.0 {
            return None;
        }

        let mut bids: Vec<BookLevel> = self.bids.values().copied().collect();
        bids.sort_by(|a, b| b.price.total_cmp(&a.price));
        let mut asks: Vec<BookLevel> = self.asks.values().copied().collect();
        asks.sort_by(|a, b| a.price.total_cmp(&b.price));

        let buy_avg = consume_notional(&asks, notional)?;
        let sell_avg = consume_notional(&bids, notional)?;

        let buy_bps = (buy_avg - mid).abs() / mid * 10_000.0;
        let sell_bps = (sell_avg - mid).abs() / mid * 10_000.0;
        Some((buy_bps + sell_bps) / 2.0)
    }

    #[must_use]
    pub fn depth(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }
}

/// Volume-weighted average fill price when sweeping `notional` quote units
/// through `levels` (already sorted best-first).
fn consume_notional(levels: &[BookLevel], notional: f64) -> Option<f64> {
    if levels.is_empty() {
        return None;
    }
    let mut remaining = notional;
    let mut cost = 0.0;
    let mut qty = 0.0;
    for level in levels {
        let level_notional = level.price * level.qty;
        let take = level_notional.min(remaining);
        let take_qty = take / level.price;
        cost += take_qty * level.price;
        qty += take_qty;
        remaining -= take;
        if remaining <= 0.0 {
            break;
        }
    }
    if qty <= 0.0 {
        None
    } else {
        Some(cost / qty)
    }
}
