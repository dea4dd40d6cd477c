//! Bracket geometry, breach detection and trailing-stop arithmetic.

use crate::utils::price_to_points;
use rust_decimal::Decimal;

/// Trigger levels of one straddle, captured at placement time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    pub midpoint: Decimal,
    pub upper: Decimal,
    pub lower: Decimal,
    pub barrier_height: Decimal,
}

/// Direction in which price left the bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breach {
    /// Below the sell-stop trigger
    Below,
    /// Above the buy-stop trigger
    Above,
}

impl Bracket {
    /// Bracket centred on `midpoint` with half-width `barrier_height`.
    pub fn around(midpoint: Decimal, barrier_height: Decimal) -> Self {
        Self {
            midpoint,
            upper: midpoint + barrier_height,
            lower: midpoint - barrier_height,
            barrier_height,
        }
    }

    pub fn breach(&self, price: Decimal) -> Option<Breach> {
        if price < self.lower {
            Some(Breach::Below)
        } else if price > self.upper {
            Some(Breach::Above)
        } else {
            None
        }
    }

    /// Stop distance (points) for the sell leg with price at `price`.
    ///
    /// Measured from one barrier height beyond the lower trigger, so the
    /// distance shrinks as price extends downwards.
    pub fn sell_trail_distance(&self, price: Decimal, scale: Decimal) -> Decimal {
        price_to_points(price - (self.lower - self.barrier_height), scale)
    }

    /// Stop distance (points) for the buy leg with price at `price`.
    pub fn buy_trail_distance(&self, price: Decimal, scale: Decimal) -> Decimal {
        price_to_points(self.upper - (price - self.barrier_height), scale)
    }
}

/// Clamp a trailing candidate and accept it only if it tightens the stop.
///
/// Returns `None` when the clamped candidate is not strictly smaller than
/// `current`, so stop distances never widen.
pub fn tightened_stop(current: Decimal, candidate: Decimal, floor: Decimal) -> Option<Decimal> {
    let clamped = candidate.max(floor);
    (clamped < current).then_some(clamped)
}

/// Mid prices sampled by a worker, oldest first.
#[derive(Debug, Clone, Default)]
pub struct PriceHistory {
    samples: Vec<Decimal>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, price: Decimal) {
        self.samples.push(price);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<Decimal> {
        self.samples.last().copied()
    }

    /// Latest sample is the minimum so far (ties count).
    pub fn at_low(&self) -> bool {
        match (self.last(), self.samples.iter().min()) {
            (Some(last), Some(min)) => last <= *min,
            _ => false,
        }
    }

    /// Latest sample is the maximum so far (ties count).
    pub fn at_high(&self) -> bool {
        match (self.last(), self.samples.iter().max()) {
            (Some(last), Some(max)) => last >= *max,
            _ => false,
        }
    }
}
