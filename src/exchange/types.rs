//! Type definitions for venue orders, tickets, quotes and status.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instruction carried by an order descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderAction {
    Open,
    Modify,
    Close,
    CloseAll,
}

/// Order type as understood by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    BuyMarket,
    SellMarket,
    BuyStop,
    SellStop,
}

impl OrderKind {
    /// Numeric order-type code used on the venue wire.
    pub fn venue_code(&self) -> u8 {
        match self {
            OrderKind::BuyMarket => 0,
            OrderKind::SellMarket => 1,
            OrderKind::BuyStop => 4,
            OrderKind::SellStop => 5,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, OrderKind::BuyMarket | OrderKind::BuyStop)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, OrderKind::BuyStop | OrderKind::SellStop)
    }
}

/// Which side of a bracket an order belongs to.
///
/// The discriminant doubles as the order's magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegSide {
    Buy = 1,
    Sell = 2,
}

impl LegSide {
    pub fn magic(&self) -> u32 {
        *self as u32
    }

    pub fn order_kind(&self) -> OrderKind {
        match self {
            LegSide::Buy => OrderKind::BuyStop,
            LegSide::Sell => OrderKind::SellStop,
        }
    }
}

impl fmt::Display for LegSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegSide::Buy => write!(f, "buy"),
            LegSide::Sell => write!(f, "sell"),
        }
    }
}

/// Order request sent to the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDescriptor {
    pub action: OrderAction,
    pub kind: OrderKind,
    pub symbol: String,
    /// Trigger price, meaningful for stop kinds only
    pub price: Decimal,
    /// Stop-loss distance in points
    pub stop_loss: Decimal,
    /// Take-profit distance in points
    pub take_profit: Decimal,
    pub lots: Decimal,
    /// Identifies the owning worker in open-trade queries
    pub tag: String,
    pub magic: u32,
}

impl OrderDescriptor {
    /// Build one leg of a symmetric bracket. SL and TP start equal.
    pub fn bracket_leg(
        side: LegSide,
        symbol: &str,
        lots: Decimal,
        distance_points: Decimal,
        tag: &str,
    ) -> Self {
        Self {
            action: OrderAction::Open,
            kind: side.order_kind(),
            symbol: symbol.to_string(),
            price: Decimal::ZERO,
            stop_loss: distance_points,
            take_profit: distance_points,
            lots,
            tag: tag.to_string(),
            magic: side.magic(),
        }
    }
}

/// Venue-assigned trade identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ticket(pub u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Best bid/ask for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl Quote {
    pub fn new(bid: Decimal, ask: Decimal) -> Self {
        Self { bid, ask }
    }

    pub fn mid(&self) -> Decimal {
        crate::utils::mid_price(self.bid, self.ask)
    }

    /// Both sides positive and not crossed.
    pub fn is_valid(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask >= self.bid
    }
}

/// An open trade (pending or filled) as reported by the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenTrade {
    pub ticket: Ticket,
    pub symbol: String,
    pub kind: OrderKind,
    pub price: Decimal,
    pub lots: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub tag: String,
    pub magic: u32,
    /// False while a stop order is still pending
    pub filled: bool,
    pub opened_at: DateTime<Utc>,
}

/// Snapshot of the venue connection for the liveness reporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub connected: bool,
    pub requests_served: u64,
    pub open_trades: usize,
    /// Last response line received from the venue, if any
    pub last_response: Option<String>,
    pub at: DateTime<Utc>,
}
