//! Mutual exclusion around the shared venue connection.
//!
//! Every worker and the liveness reporter hold a clone of the same
//! [`ChannelGuard`]. The gateway lives inside the guard's mutex, so there is
//! no way to reach it without holding the region. Release happens when the
//! lease drops, which covers early returns, `?` and panics alike.

use super::traits::{GatewayResult, VenueGateway};
use super::types::{GatewayStatus, OpenTrade, OrderDescriptor, Quote, Ticket};
use futures_util::future::BoxFuture;
use rust_decimal::Decimal;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

/// Shared handle serializing all gateway round-trips.
#[derive(Clone)]
pub struct ChannelGuard {
    gateway: Arc<Mutex<Box<dyn VenueGateway>>>,
}

/// Exclusive access to the gateway for as long as it is alive.
pub struct ChannelLease<'a> {
    inner: MutexGuard<'a, Box<dyn VenueGateway>>,
}

impl Deref for ChannelLease<'_> {
    type Target = dyn VenueGateway;

    fn deref(&self) -> &Self::Target {
        &**self.inner
    }
}

impl ChannelGuard {
    pub fn new<G>(gateway: G) -> Self
    where
        G: VenueGateway + 'static,
    {
        Self {
            gateway: Arc::new(Mutex::new(Box::new(gateway))),
        }
    }

    /// Wait for the region and hold it until the lease is dropped.
    pub async fn lease(&self) -> ChannelLease<'_> {
        let inner = self.gateway.lock().await;
        trace!("Channel acquired");
        ChannelLease { inner }
    }

    /// Run `f` against the gateway while holding the region.
    ///
    /// ```rust,ignore
    /// let status = channel.with_exclusive_access(|gw| gw.last_status()).await?;
    /// ```
    pub async fn with_exclusive_access<T, F>(&self, f: F) -> T
    where
        F: for<'g> FnOnce(&'g dyn VenueGateway) -> BoxFuture<'g, T>,
    {
        let lease = self.lease().await;
        f(&*lease).await
    }

    pub async fn submit_order(&self, order: &OrderDescriptor) -> GatewayResult<Ticket> {
        self.lease().await.submit_order(order).await
    }

    pub async fn modify_order(
        &self,
        ticket: Ticket,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> GatewayResult<()> {
        self.lease()
            .await
            .modify_order(ticket, stop_loss, take_profit)
            .await
    }

    pub async fn close_order(&self, ticket: Ticket) -> GatewayResult<()> {
        self.lease().await.close_order(ticket).await
    }

    pub async fn close_all(&self, symbol: Option<&str>) -> GatewayResult<()> {
        self.lease().await.close_all(symbol).await
    }

    pub async fn open_trades(&self, tag: &str) -> GatewayResult<Vec<OpenTrade>> {
        self.lease().await.open_trades(tag).await
    }

    pub async fn bid_ask(&self, symbol: &str) -> GatewayResult<Quote> {
        self.lease().await.bid_ask(symbol).await
    }

    pub async fn last_status(&self) -> GatewayResult<GatewayStatus> {
        self.lease().await.last_status().await
    }
}
