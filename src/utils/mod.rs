//! Shared utilities.

mod decimal;

pub use decimal::{mid_price, price_to_points, round_to_precision};
