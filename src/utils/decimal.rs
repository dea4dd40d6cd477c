//! Decimal arithmetic utilities for price calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Round a decimal to a specific number of decimal places.
pub fn round_to_precision(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp(decimals)
}

/// Midpoint between bid and ask.
pub fn mid_price(bid: Decimal, ask: Decimal) -> Decimal {
    (bid + ask) / dec!(2)
}

/// Convert a price distance into venue points, rounded to 2 dp.
///
/// `scale` is the number of points per unit of price (100000 for a
/// 5-digit FX quote).
pub fn price_to_points(distance: Decimal, scale: Decimal) -> Decimal {
    round_to_precision(distance * scale, 2)
}
