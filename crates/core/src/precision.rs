//! Exchange precision rounding.
//!
//! All prices and volumes are rounded to the pair's declared decimal places
//! before transmission. Volumes round toward zero so a rounded order can
//! never exceed the computed size.

use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds a price to `decimals` places, half away from zero.
#[must_use]
pub fn round_price(price: Decimal, decimals: u32) -> Decimal {
    price.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds a volume down to `decimals` places.
#[must_use]
pub fn round_volume(volume: Decimal, decimals: u32) -> Decimal {
    volume.round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
}
