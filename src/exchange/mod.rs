//! Venue gateway integration.
//!
//! The execution venue is reached through one shared connection. This
//! module defines:
//! - The `VenueGateway` contract the strategy consumes
//! - Order, ticket, quote and status types
//! - `ChannelGuard`, the mutual-exclusion region around the connection
//! - `MockVenue`, an in-memory venue for paper trading and tests

mod guard;
pub mod mock;
mod traits;
mod types;

pub use guard::{ChannelGuard, ChannelLease};
pub use mock::MockVenue;
pub use traits::{GatewayError, GatewayResult, VenueGateway};
pub use types::*;
