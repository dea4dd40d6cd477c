//! Mock venue for paper trading and tests.
//!
//! Implements the full gateway contract in memory: ticket issuance, pending
//! stop orders that fill when the quote crosses them, tag-filtered queries,
//! idempotent close, and close-all. Failures can be injected per call type,
//! and every mutating call is journaled so tests can assert on it.

use super::traits::{GatewayError, GatewayResult, VenueGateway};
use super::types::*;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A mutating call as seen by the venue.
#[derive(Debug, Clone, PartialEq)]
pub enum VenueCall {
    Submit {
        symbol: String,
        kind: OrderKind,
        price: Decimal,
        magic: u32,
    },
    Modify {
        ticket: Ticket,
        stop_loss: Decimal,
        take_profit: Decimal,
    },
    Close {
        ticket: Ticket,
    },
    CloseAll {
        symbol: Option<String>,
    },
}

/// Simulated venue state.
#[derive(Debug, Default)]
pub struct MockVenueState {
    pub quotes: HashMap<String, Quote>,
    pub trades: BTreeMap<Ticket, OpenTrade>,
    pub closed: HashSet<Ticket>,
    pub journal: Vec<VenueCall>,
    pub last_response: Option<String>,
    /// Queued outcomes for upcoming submits; `true` rejects
    submit_failures: VecDeque<bool>,
    close_failures: u32,
    modify_failures: u32,
    close_all_failures: u32,
}

/// In-memory venue implementing [`VenueGateway`].
///
/// Cheap to clone; clones share state, so a test can keep one handle while
/// the strategy owns another behind the channel guard.
#[derive(Clone)]
pub struct MockVenue {
    state: Arc<RwLock<MockVenueState>>,
    ticket_counter: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    requests: Arc<AtomicU64>,
    latency: Duration,
}

impl Default for MockVenue {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter when a round trip ends.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockVenue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockVenueState::default())),
            ticket_counter: Arc::new(AtomicU64::new(1)),
            connected: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(AtomicU64::new(0)),
            latency: Duration::ZERO,
        }
    }

    /// Simulate a round-trip delay on every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Update the quote and fill any pending stop orders it crosses.
    pub async fn set_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        let mut state = self.state.write().await;
        state.quotes.insert(symbol.to_string(), Quote::new(bid, ask));

        for trade in state.trades.values_mut() {
            if trade.symbol != symbol || trade.filled {
                continue;
            }
            let triggered = match (trade.kind.is_pending(), trade.kind.is_buy()) {
                (false, _) => true,
                (true, true) => ask >= trade.price,
                (true, false) => bid <= trade.price,
            };
            if triggered {
                trade.filled = true;
                debug!(ticket = %trade.ticket, %symbol, price = %trade.price, "Mock stop order filled");
            }
        }
    }

    /// Set the quote from a mid price with a zero spread.
    pub async fn set_mid(&self, symbol: &str, mid: Decimal) {
        self.set_quote(symbol, mid, mid).await;
    }

    /// Queue outcomes for the next submits (`true` = reject).
    pub async fn fail_next_submits(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.state.write().await.submit_failures.extend(outcomes);
    }

    pub async fn fail_next_closes(&self, count: u32) {
        self.state.write().await.close_failures = count;
    }

    pub async fn fail_next_modifies(&self, count: u32) {
        self.state.write().await.modify_failures = count;
    }

    pub async fn fail_next_close_alls(&self, count: u32) {
        self.state.write().await.close_all_failures = count;
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// All mutating calls received so far.
    pub async fn journal(&self) -> Vec<VenueCall> {
        self.state.read().await.journal.clone()
    }

    pub async fn close_all_count(&self) -> usize {
        self.state
            .read()
            .await
            .journal
            .iter()
            .filter(|c| matches!(c, VenueCall::CloseAll { .. }))
            .count()
    }

    pub async fn trade(&self, ticket: Ticket) -> Option<OpenTrade> {
        self.state.read().await.trades.get(&ticket).cloned()
    }

    pub async fn open_trade_count(&self) -> usize {
        self.state.read().await.trades.len()
    }

    /// Highest number of calls ever observed in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests_served(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    fn next_ticket(&self) -> Ticket {
        Ticket(self.ticket_counter.fetch_add(1, Ordering::SeqCst))
    }

    async fn round_trip(&self) -> GatewayResult<InFlight<'_>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.requests.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(GatewayError::Disconnected);
        }
        Ok(in_flight)
    }
}

#[async_trait]
impl VenueGateway for MockVenue {
    async fn submit_order(&self, order: &OrderDescriptor) -> GatewayResult<Ticket> {
        let _call = self.round_trip().await?;
        let mut state = self.state.write().await;

        state.journal.push(VenueCall::Submit {
            symbol: order.symbol.clone(),
            kind: order.kind,
            price: order.price,
            magic: order.magic,
        });

        if state.submit_failures.pop_front().unwrap_or(false) {
            state.last_response = Some(format!("OPEN {} rejected", order.symbol));
            return Err(GatewayError::Rejected("injected failure".to_string()));
        }
        if order.action != OrderAction::Open {
            return Err(GatewayError::Rejected(format!(
                "unsupported action {:?}",
                order.action
            )));
        }
        if order.lots <= Decimal::ZERO {
            return Err(GatewayError::Rejected("lots must be positive".to_string()));
        }
        if !state.quotes.contains_key(&order.symbol) {
            return Err(GatewayError::NoQuote(order.symbol.clone()));
        }
        if order.kind.is_pending() && order.price <= Decimal::ZERO {
            return Err(GatewayError::Rejected(
                "stop order needs a trigger price".to_string(),
            ));
        }

        let ticket = self.next_ticket();
        state.trades.insert(
            ticket,
            OpenTrade {
                ticket,
                symbol: order.symbol.clone(),
                kind: order.kind,
                price: order.price,
                lots: order.lots,
                stop_loss: order.stop_loss,
                take_profit: order.take_profit,
                tag: order.tag.clone(),
                magic: order.magic,
                filled: !order.kind.is_pending(),
                opened_at: Utc::now(),
            },
        );
        state.last_response = Some(format!(
            "OPEN {} type={} @ {} -> {}",
            order.symbol,
            order.kind.venue_code(),
            order.price,
            ticket
        ));

        info!(
            %ticket,
            symbol = %order.symbol,
            kind = ?order.kind,
            price = %order.price,
            lots = %order.lots,
            "Mock order accepted"
        );

        Ok(ticket)
    }

    async fn modify_order(
        &self,
        ticket: Ticket,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> GatewayResult<()> {
        let _call = self.round_trip().await?;
        let mut state = self.state.write().await;

        state.journal.push(VenueCall::Modify {
            ticket,
            stop_loss,
            take_profit,
        });

        if state.modify_failures > 0 {
            state.modify_failures -= 1;
            return Err(GatewayError::Timeout);
        }
        if state.closed.contains(&ticket) {
            return Err(GatewayError::StaleTicket(ticket));
        }
        let trade = state
            .trades
            .get_mut(&ticket)
            .ok_or(GatewayError::UnknownTicket(ticket))?;
        trade.stop_loss = stop_loss;
        trade.take_profit = take_profit;
        state.last_response = Some(format!("MODIFY {} sl={} tp={}", ticket, stop_loss, take_profit));

        debug!(%ticket, %stop_loss, %take_profit, "Mock order modified");
        Ok(())
    }

    async fn close_order(&self, ticket: Ticket) -> GatewayResult<()> {
        let _call = self.round_trip().await?;
        let mut state = self.state.write().await;

        state.journal.push(VenueCall::Close { ticket });

        if state.close_failures > 0 {
            state.close_failures -= 1;
            return Err(GatewayError::Timeout);
        }
        if state.closed.contains(&ticket) {
            debug!(%ticket, "Mock close on already closed ticket");
            return Ok(());
        }
        if state.trades.remove(&ticket).is_none() {
            return Err(GatewayError::UnknownTicket(ticket));
        }
        state.closed.insert(ticket);
        state.last_response = Some(format!("CLOSE {}", ticket));

        info!(%ticket, "Mock order closed");
        Ok(())
    }

    async fn close_all(&self, symbol: Option<&str>) -> GatewayResult<()> {
        let _call = self.round_trip().await?;
        let mut state = self.state.write().await;

        state.journal.push(VenueCall::CloseAll {
            symbol: symbol.map(str::to_string),
        });

        if state.close_all_failures > 0 {
            state.close_all_failures -= 1;
            return Err(GatewayError::Timeout);
        }

        let tickets: Vec<Ticket> = state
            .trades
            .values()
            .filter(|t| symbol.map_or(true, |s| t.symbol == s))
            .map(|t| t.ticket)
            .collect();
        for ticket in &tickets {
            state.trades.remove(ticket);
            state.closed.insert(*ticket);
        }
        state.last_response = Some(format!(
            "CLOSE_ALL {} -> {} closed",
            symbol.unwrap_or("*"),
            tickets.len()
        ));

        info!(symbol = symbol.unwrap_or("*"), closed = tickets.len(), "Mock close all");
        Ok(())
    }

    async fn open_trades(&self, tag: &str) -> GatewayResult<Vec<OpenTrade>> {
        let _call = self.round_trip().await?;
        let state = self.state.read().await;

        Ok(state
            .trades
            .values()
            .filter(|t| t.tag == tag)
            .cloned()
            .collect())
    }

    async fn bid_ask(&self, symbol: &str) -> GatewayResult<Quote> {
        let _call = self.round_trip().await?;
        let state = self.state.read().await;

        state
            .quotes
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::NoQuote(symbol.to_string()))
    }

    async fn last_status(&self) -> GatewayResult<GatewayStatus> {
        let _call = self.round_trip().await?;
        let state = self.state.read().await;

        Ok(GatewayStatus {
            connected: true,
            requests_served: self.requests_served(),
            open_trades: state.trades.len(),
            last_response: state.last_response.clone(),
            at: Utc::now(),
        })
    }
}
