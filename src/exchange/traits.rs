//! The venue gateway seam.
//!
//! The gateway is a single physical connection to the execution venue. It
//! is only ever reached through [`super::ChannelGuard`], which serializes
//! calls across workers.

use super::types::{GatewayStatus, OpenTrade, OrderDescriptor, Quote, Ticket};
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// Failures reported by a venue gateway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Order rejected by venue: {0}")]
    Rejected(String),

    #[error("Venue did not respond in time")]
    Timeout,

    #[error("Venue connection lost")]
    Disconnected,

    #[error("No quote available for {0}")]
    NoQuote(String),

    #[error("Unknown ticket {0}")]
    UnknownTicket(Ticket),

    #[error("Ticket {0} is already closed")]
    StaleTicket(Ticket),
}

impl GatewayError {
    /// The call targeted a ticket the venue no longer tracks.
    pub fn is_stale_ticket(&self) -> bool {
        matches!(
            self,
            GatewayError::StaleTicket(_) | GatewayError::UnknownTicket(_)
        )
    }
}

/// Result type alias for gateway calls.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Operations the strategy consumes from the venue.
#[async_trait]
pub trait VenueGateway: Send + Sync {
    /// Submit an OPEN order, returning the assigned ticket.
    async fn submit_order(&self, order: &OrderDescriptor) -> GatewayResult<Ticket>;

    /// Change SL/TP distances (points) on an open ticket.
    async fn modify_order(
        &self,
        ticket: Ticket,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> GatewayResult<()>;

    /// Close or cancel a ticket.
    async fn close_order(&self, ticket: Ticket) -> GatewayResult<()>;

    /// Close every open trade, or only those on `symbol`.
    async fn close_all(&self, symbol: Option<&str>) -> GatewayResult<()>;

    /// Open trades carrying `tag`, ordered by ticket.
    async fn open_trades(&self, tag: &str) -> GatewayResult<Vec<OpenTrade>>;

    async fn bid_ask(&self, symbol: &str) -> GatewayResult<Quote>;

    async fn last_status(&self) -> GatewayResult<GatewayStatus>;
}
