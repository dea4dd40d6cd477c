//! Per-instrument straddle worker.
//!
//! Each worker owns one bracket lifecycle:
//!
//! ```text
//! AwaitingWindow --(window open, no trades, both legs placed)--> BracketPlaced
//! BracketPlaced  --(event time passed)-------------------------> Monitoring
//! Monitoring     --(post-event window idle / hard deadline)----> Terminated
//! AwaitingWindow --(placement window missed)-------------------> Terminated
//! ```
//!
//! Every gateway call goes through the shared [`ChannelGuard`]. Gateway
//! failures never escape a cycle: the worker logs them and retries the same
//! transition on the next poll.

use crate::config::{InstrumentConfig, StrategyConfig};
use crate::exchange::{ChannelGuard, LegSide, OrderDescriptor, Ticket};
use crate::strategy::bracket::{tightened_stop, Breach, Bracket, PriceHistory};
use crate::utils::price_to_points;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle state of an instrument worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    AwaitingWindow,
    BracketPlaced,
    Monitoring,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::AwaitingWindow => write!(f, "AWAITING_WINDOW"),
            WorkerState::BracketPlaced => write!(f, "BRACKET_PLACED"),
            WorkerState::Monitoring => write!(f, "MONITORING"),
            WorkerState::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// Everything a worker needs to know about its instrument and timing.
#[derive(Debug, Clone)]
pub struct WorkerParams {
    pub symbol: String,
    pub lots: Decimal,
    pub barrier_height: Decimal,
    pub event_time: DateTime<Utc>,
    pub tag: String,
    pub pre_event_lead: Duration,
    pub pre_event_buffer: Duration,
    pub post_event: Duration,
    pub max_monitoring: Duration,
    pub trailing_scale: Decimal,
    pub trailing_take_profit: Decimal,
    pub min_stop_distance: Decimal,
    pub poll_delay: std::time::Duration,
}

impl WorkerParams {
    pub fn new(
        strategy: &StrategyConfig,
        instrument: &InstrumentConfig,
        event_time: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: instrument.symbol.clone(),
            lots: instrument.lots,
            barrier_height: instrument.barrier_height,
            event_time,
            tag: strategy.tag_for(&instrument.symbol),
            pre_event_lead: strategy.pre_event_lead(),
            pre_event_buffer: strategy.pre_event_buffer(),
            post_event: strategy.post_event(),
            max_monitoring: strategy.max_monitoring(),
            trailing_scale: strategy.trailing_scale,
            trailing_take_profit: strategy.trailing_take_profit,
            min_stop_distance: strategy.min_stop_distance,
            poll_delay: strategy.poll_delay(),
        }
    }

    /// Instant the placement window opens.
    pub fn window_opens_at(&self) -> DateTime<Utc> {
        self.event_time - self.pre_event_lead
    }
}

/// One side of the bracket and its venue ticket.
#[derive(Debug, Clone)]
struct Leg {
    order: OrderDescriptor,
    ticket: Option<Ticket>,
}

/// Summary returned when a worker exits.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub symbol: String,
    pub final_state: WorkerState,
    pub cycles: u64,
    pub trail_updates: u32,
    pub bracket: Option<Bracket>,
}

/// State machine trading one instrument around one event.
pub struct InstrumentWorker {
    params: WorkerParams,
    channel: ChannelGuard,
    shutdown: Arc<AtomicBool>,
    state: WorkerState,
    buy: Leg,
    sell: Leg,
    bracket: Option<Bracket>,
    history: PriceHistory,
    /// Leg left behind by a half-placed bracket, still to be closed
    orphan: Option<Ticket>,
    /// Trail whose modify failed, resent on the next monitoring cycle
    pending_trail: Option<(LegSide, Decimal)>,
    cycles: u64,
    trail_updates: u32,
}

impl InstrumentWorker {
    pub fn new(params: WorkerParams, channel: ChannelGuard, shutdown: Arc<AtomicBool>) -> Self {
        let initial_distance = price_to_points(params.barrier_height, params.trailing_scale);
        let leg = |side| Leg {
            order: OrderDescriptor::bracket_leg(
                side,
                &params.symbol,
                params.lots,
                initial_distance,
                &params.tag,
            ),
            ticket: None,
        };
        let buy = leg(LegSide::Buy);
        let sell = leg(LegSide::Sell);

        Self {
            params,
            channel,
            shutdown,
            state: WorkerState::AwaitingWindow,
            buy,
            sell,
            bracket: None,
            history: PriceHistory::new(),
            orphan: None,
            pending_trail: None,
            cycles: 0,
            trail_updates: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.params.symbol
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn bracket(&self) -> Option<Bracket> {
        self.bracket
    }

    pub fn history(&self) -> &PriceHistory {
        &self.history
    }

    pub fn ticket(&self, side: LegSide) -> Option<Ticket> {
        self.leg(side).ticket
    }

    /// Current order descriptor of a leg, including its trailed stop.
    pub fn order(&self, side: LegSide) -> &OrderDescriptor {
        &self.leg(side).order
    }

    /// Run until terminated or the shutdown flag is raised.
    pub async fn run(mut self) -> WorkerReport {
        info!(
            symbol = %self.params.symbol,
            tag = %self.params.tag,
            lots = %self.params.lots,
            barrier = %self.params.barrier_height,
            event_time = %self.params.event_time,
            window_opens = %self.params.window_opens_at(),
            "Worker started"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            if self.poll(Utc::now()).await == WorkerState::Terminated {
                break;
            }
            tokio::time::sleep(self.params.poll_delay).await;
        }

        if self.state != WorkerState::Terminated {
            info!(symbol = %self.params.symbol, state = %self.state, "Shutdown observed, worker exiting");
            self.transition(WorkerState::Terminated);
        }

        self.report()
    }

    pub fn report(&self) -> WorkerReport {
        WorkerReport {
            symbol: self.params.symbol.clone(),
            final_state: self.state,
            cycles: self.cycles,
            trail_updates: self.trail_updates,
            bracket: self.bracket,
        }
    }

    /// Run exactly one poll cycle as of `now`.
    pub async fn poll(&mut self, now: DateTime<Utc>) -> WorkerState {
        self.cycles += 1;

        match self.state {
            WorkerState::AwaitingWindow => self.await_window(now).await,
            WorkerState::BracketPlaced => {
                if now > self.params.event_time {
                    self.transition(WorkerState::Monitoring);
                }
            }
            WorkerState::Monitoring => self.monitor(now).await,
            WorkerState::Terminated => {}
        }

        self.state
    }

    /// Time elapsed since the placement window opened.
    fn window_elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.params.window_opens_at()
    }

    pub fn window_open(&self, now: DateTime<Utc>) -> bool {
        let elapsed = self.window_elapsed(now);
        elapsed > Duration::zero() && elapsed < self.params.pre_event_buffer
    }

    async fn await_window(&mut self, now: DateTime<Utc>) {
        if let Some(ticket) = self.orphan {
            if !self.close_ticket(ticket).await {
                return;
            }
            self.orphan = None;
        }

        if self.window_elapsed(now) >= self.params.pre_event_buffer {
            warn!(
                symbol = %self.params.symbol,
                window_opens = %self.params.window_opens_at(),
                "Placement window missed, not trading this event"
            );
            self.transition(WorkerState::Terminated);
            return;
        }
        if !self.window_open(now) {
            return;
        }

        let open = match self.channel.open_trades(&self.params.tag).await {
            Ok(open) => open,
            Err(e) => {
                warn!(symbol = %self.params.symbol, error = %e, "Open trades query failed");
                return;
            }
        };
        if !open.is_empty() {
            debug!(
                symbol = %self.params.symbol,
                open = open.len(),
                "Trades already open for tag, waiting"
            );
            return;
        }

        let quote = match self.channel.bid_ask(&self.params.symbol).await {
            Ok(quote) if quote.is_valid() => quote,
            Ok(quote) => {
                warn!(symbol = %self.params.symbol, bid = %quote.bid, ask = %quote.ask, "Invalid quote");
                return;
            }
            Err(e) => {
                warn!(symbol = %self.params.symbol, error = %e, "Quote request failed");
                return;
            }
        };

        self.place_bracket(quote.mid()).await;
    }

    /// Submit both legs. Either both are live afterwards or neither is.
    async fn place_bracket(&mut self, midpoint: Decimal) {
        let bracket = Bracket::around(midpoint, self.params.barrier_height);
        self.buy.order.price = bracket.upper;
        self.sell.order.price = bracket.lower;

        let buy_ticket = match self.channel.submit_order(&self.buy.order).await {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(symbol = %self.params.symbol, error = %e, "Buy stop rejected, retrying next cycle");
                return;
            }
        };

        let sell_ticket = match self.channel.submit_order(&self.sell.order).await {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(
                    symbol = %self.params.symbol,
                    error = %e,
                    %buy_ticket,
                    "Sell stop rejected, unwinding buy leg"
                );
                if !self.close_ticket(buy_ticket).await {
                    self.orphan = Some(buy_ticket);
                }
                return;
            }
        };

        self.buy.ticket = Some(buy_ticket);
        self.sell.ticket = Some(sell_ticket);
        self.bracket = Some(bracket);
        self.history = PriceHistory::new();
        self.history.push(midpoint);

        info!(
            symbol = %self.params.symbol,
            mid = %midpoint,
            upper = %bracket.upper,
            lower = %bracket.lower,
            %buy_ticket,
            %sell_ticket,
            "Bracket placed"
        );
        self.transition(WorkerState::BracketPlaced);
    }

    async fn monitor(&mut self, now: DateTime<Utc>) {
        let Some(bracket) = self.bracket else {
            error!(symbol = %self.params.symbol, "Monitoring without a bracket");
            self.teardown("no bracket").await;
            return;
        };

        let since_event = now - self.params.event_time;
        if since_event >= self.params.max_monitoring {
            self.teardown("monitoring deadline reached").await;
            return;
        }

        if let Some((side, stop_loss)) = self.pending_trail.take() {
            debug!(symbol = %self.params.symbol, %side, %stop_loss, "Resending failed trail");
            self.trail(side, stop_loss).await;
        }

        let price = match self.channel.bid_ask(&self.params.symbol).await {
            Ok(quote) if quote.is_valid() => quote.mid(),
            Ok(_) | Err(_) => {
                warn!(symbol = %self.params.symbol, "No usable quote this cycle");
                return;
            }
        };
        self.history.push(price);

        match bracket.breach(price) {
            Some(Breach::Below) => {
                self.close_leg(LegSide::Buy).await;
                if self.history.len() >= 2 && self.history.at_low() {
                    let candidate =
                        bracket.sell_trail_distance(price, self.params.trailing_scale);
                    self.trail(LegSide::Sell, candidate).await;
                }
            }
            Some(Breach::Above) => {
                self.close_leg(LegSide::Sell).await;
                if self.history.len() >= 2 && self.history.at_high() {
                    let candidate =
                        bracket.buy_trail_distance(price, self.params.trailing_scale);
                    self.trail(LegSide::Buy, candidate).await;
                }
            }
            None if since_event > self.params.post_event => {
                self.teardown("post-event window elapsed").await;
            }
            None => {
                debug!(symbol = %self.params.symbol, %price, "Inside bracket");
            }
        }
    }

    async fn close_leg(&mut self, side: LegSide) {
        let Some(ticket) = self.leg(side).ticket else {
            return;
        };
        if self.close_ticket(ticket).await {
            self.leg_mut(side).ticket = None;
            info!(symbol = %self.params.symbol, %side, %ticket, "Opposite leg closed");
        }
    }

    /// Close a ticket, folding stale-ticket errors into success.
    async fn close_ticket(&self, ticket: Ticket) -> bool {
        match self.channel.close_order(ticket).await {
            Ok(()) => true,
            Err(e) if e.is_stale_ticket() => {
                debug!(symbol = %self.params.symbol, %ticket, "Ticket already closed");
                true
            }
            Err(e) => {
                warn!(symbol = %self.params.symbol, %ticket, error = %e, "Close failed, retrying next cycle");
                false
            }
        }
    }

    async fn trail(&mut self, side: LegSide, candidate: Decimal) {
        let leg = self.leg(side);
        let Some(ticket) = leg.ticket else {
            return;
        };
        let current = leg.order.stop_loss;
        let Some(stop_loss) = tightened_stop(current, candidate, self.params.min_stop_distance)
        else {
            return;
        };
        let take_profit = self.params.trailing_take_profit;

        match self.channel.modify_order(ticket, stop_loss, take_profit).await {
            Ok(()) => {
                let leg = self.leg_mut(side);
                leg.order.stop_loss = stop_loss;
                leg.order.take_profit = take_profit;
                self.trail_updates += 1;
                info!(
                    symbol = %self.params.symbol,
                    %side,
                    %ticket,
                    from = %current,
                    to = %stop_loss,
                    "Trailing stop tightened"
                );
            }
            Err(e) if e.is_stale_ticket() => {
                debug!(symbol = %self.params.symbol, %side, %ticket, "Leg closed by venue, trail skipped");
                self.leg_mut(side).ticket = None;
            }
            Err(e) => {
                warn!(
                    symbol = %self.params.symbol,
                    %side,
                    %ticket,
                    error = %e,
                    "Trail modify failed, retrying next cycle"
                );
                self.pending_trail = Some((side, stop_loss));
            }
        }
    }

    async fn teardown(&mut self, reason: &str) {
        match self.channel.close_all(Some(&self.params.symbol)).await {
            Ok(()) => {
                self.buy.ticket = None;
                self.sell.ticket = None;
                info!(symbol = %self.params.symbol, reason, "Instrument closed");
                self.transition(WorkerState::Terminated);
            }
            Err(e) => {
                warn!(symbol = %self.params.symbol, error = %e, "Close-all failed, retrying next cycle");
            }
        }
    }

    fn transition(&mut self, next: WorkerState) {
        info!(symbol = %self.params.symbol, from = %self.state, to = %next, "State transition");
        self.state = next;
    }

    fn leg(&self, side: LegSide) -> &Leg {
        match side {
            LegSide::Buy => &self.buy,
            LegSide::Sell => &self.sell,
        }
    }

    fn leg_mut(&mut self, side: LegSide) -> &mut Leg {
        match side {
            LegSide::Buy => &mut self.buy,
            LegSide::Sell => &mut self.sell,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::VenueCall;
    use crate::exchange::{MockVenue, OrderKind, VenueGateway};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    // =========================================================================
    // Helper functions
    // =========================================================================

    fn event_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 5, 16, 14, 49, 0).unwrap()
    }

    /// `secs` seconds after the placement window opened.
    fn in_window(secs: i64) -> DateTime<Utc> {
        event_time() - Duration::seconds(120) + Duration::seconds(secs)
    }

    fn after_event(secs: i64) -> DateTime<Utc> {
        event_time() + Duration::seconds(secs)
    }

    fn test_params() -> WorkerParams {
        let strategy = StrategyConfig {
            poll_delay_ms: 5,
            ..StrategyConfig::default()
        };
        let instrument = InstrumentConfig {
            symbol: "EURUSD".to_string(),
            lots: dec!(0.01),
            barrier_height: dec!(0.0012),
            event_time: None,
        };
        WorkerParams::new(&strategy, &instrument, event_time())
    }

    async fn setup() -> (MockVenue, InstrumentWorker) {
        let venue = MockVenue::new();
        venue.set_quote("EURUSD", dec!(1.0999), dec!(1.1001)).await;
        let worker = InstrumentWorker::new(
            test_params(),
            ChannelGuard::new(venue.clone()),
            Arc::new(AtomicBool::new(false)),
        );
        (venue, worker)
    }

    /// Worker with a live bracket around 1.1000, already monitoring.
    async fn monitoring_worker() -> (MockVenue, InstrumentWorker) {
        let (venue, mut worker) = setup().await;
        assert_eq!(worker.poll(in_window(45)).await, WorkerState::BracketPlaced);
        assert_eq!(worker.poll(after_event(1)).await, WorkerState::Monitoring);
        (venue, worker)
    }

    fn submits(journal: &[VenueCall]) -> Vec<(OrderKind, Decimal)> {
        journal
            .iter()
            .filter_map(|c| match c {
                VenueCall::Submit { kind, price, .. } => Some((*kind, *price)),
                _ => None,
            })
            .collect()
    }

    // =========================================================================
    // Placement window
    // =========================================================================

    #[tokio::test]
    async fn test_places_bracket_inside_window() {
        let (venue, mut worker) = setup().await;

        let state = worker.poll(in_window(45)).await;

        assert_eq!(state, WorkerState::BracketPlaced);
        assert_eq!(
            submits(&venue.journal().await),
            vec![
                (OrderKind::BuyStop, dec!(1.1012)),
                (OrderKind::SellStop, dec!(1.0988)),
            ]
        );
        assert!(worker.ticket(LegSide::Buy).is_some());
        assert!(worker.ticket(LegSide::Sell).is_some());

        let bracket = worker.bracket().unwrap();
        assert_eq!(bracket.upper - bracket.midpoint, dec!(0.0012));
        assert_eq!(bracket.midpoint - bracket.lower, dec!(0.0012));
        assert_eq!(worker.order(LegSide::Buy).stop_loss, dec!(120));
        assert_eq!(worker.order(LegSide::Buy).take_profit, dec!(120));
    }

    #[tokio::test]
    async fn test_window_bounds_are_exclusive() {
        let (venue, mut worker) = setup().await;

        assert!(!worker.window_open(in_window(-1)));
        assert!(!worker.window_open(in_window(0)));
        assert!(worker.window_open(in_window(1)));
        assert!(worker.window_open(in_window(59)));
        assert!(!worker.window_open(in_window(60)));

        // Exactly at the opening instant nothing happens.
        assert_eq!(worker.poll(in_window(0)).await, WorkerState::AwaitingWindow);
        assert!(venue.journal().await.is_empty());
    }

    #[tokio::test]
    async fn test_before_window_no_calls() {
        let (venue, mut worker) = setup().await;

        assert_eq!(worker.poll(in_window(-30)).await, WorkerState::AwaitingWindow);
        assert_eq!(venue.requests_served(), 0);
    }

    #[tokio::test]
    async fn test_missed_window_terminates() {
        let (venue, mut worker) = setup().await;

        assert_eq!(worker.poll(in_window(60)).await, WorkerState::Terminated);
        assert!(venue.journal().await.is_empty());
    }

    #[tokio::test]
    async fn test_existing_trades_block_placement() {
        let (venue, mut worker) = setup().await;
        let mut stray = OrderDescriptor::bracket_leg(
            LegSide::Buy,
            "EURUSD",
            dec!(0.01),
            dec!(120),
            "EURUSD_Trader",
        );
        stray.price = dec!(1.2);
        venue.submit_order(&stray).await.unwrap();

        assert_eq!(worker.poll(in_window(10)).await, WorkerState::AwaitingWindow);
        assert_eq!(submits(&venue.journal().await).len(), 1);
    }

    // =========================================================================
    // Half-placed brackets
    // =========================================================================

    #[tokio::test]
    async fn test_first_leg_failure_skips_second() {
        let (venue, mut worker) = setup().await;
        venue.fail_next_submits([true]).await;

        assert_eq!(worker.poll(in_window(10)).await, WorkerState::AwaitingWindow);
        assert_eq!(submits(&venue.journal().await).len(), 1);

        assert_eq!(worker.poll(in_window(11)).await, WorkerState::BracketPlaced);
    }

    #[tokio::test]
    async fn test_sibling_failure_unwinds_surviving_leg() {
        let (venue, mut worker) = setup().await;
        venue.fail_next_submits([false, true]).await;

        assert_eq!(worker.poll(in_window(10)).await, WorkerState::AwaitingWindow);
        assert_eq!(venue.open_trade_count().await, 0);
        assert!(worker.ticket(LegSide::Buy).is_none());
        assert!(matches!(
            venue.journal().await.last(),
            Some(VenueCall::Close { .. })
        ));

        // Next cycle retries from scratch.
        assert_eq!(worker.poll(in_window(11)).await, WorkerState::BracketPlaced);
        assert_eq!(venue.open_trade_count().await, 2);
    }

    #[tokio::test]
    async fn test_failed_unwind_retried_before_anything_else() {
        let (venue, mut worker) = setup().await;
        venue.fail_next_submits([false, true]).await;
        venue.fail_next_closes(1).await;

        worker.poll(in_window(10)).await;
        assert_eq!(venue.open_trade_count().await, 1);

        // Next cycle closes the orphan, then places a fresh pair.
        assert_eq!(worker.poll(in_window(11)).await, WorkerState::BracketPlaced);
        let trades = venue.open_trades("EURUSD_Trader").await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].kind, OrderKind::BuyStop);
        assert_eq!(trades[1].kind, OrderKind::SellStop);
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    #[tokio::test]
    async fn test_waits_for_event_before_monitoring() {
        let (_venue, mut worker) = setup().await;
        worker.poll(in_window(45)).await;

        assert_eq!(worker.poll(event_time()).await, WorkerState::BracketPlaced);
        assert_eq!(worker.poll(after_event(1)).await, WorkerState::Monitoring);
    }

    #[tokio::test]
    async fn test_downside_breach_closes_buy_and_trails_sell() {
        let (venue, mut worker) = monitoring_worker().await;
        let buy = worker.ticket(LegSide::Buy).unwrap();
        let sell = worker.ticket(LegSide::Sell).unwrap();

        for (i, price) in [dec!(1.1000), dec!(1.0995)].into_iter().enumerate() {
            venue.set_mid("EURUSD", price).await;
            worker.poll(after_event(2 + i as i64)).await;
        }
        assert!(worker.ticket(LegSide::Buy).is_some());

        venue.set_mid("EURUSD", dec!(1.0980)).await;
        assert_eq!(worker.poll(after_event(4)).await, WorkerState::Monitoring);

        assert!(worker.ticket(LegSide::Buy).is_none());
        assert!(venue.trade(buy).await.is_none());
        assert_eq!(worker.order(LegSide::Sell).stop_loss, dec!(40));

        let trade = venue.trade(sell).await.unwrap();
        assert!(trade.filled);
        assert_eq!(trade.stop_loss, dec!(40));
        assert_eq!(trade.take_profit, dec!(10000));
    }

    #[tokio::test]
    async fn test_upside_breach_closes_sell_and_trails_buy() {
        let (venue, mut worker) = monitoring_worker().await;
        let sell = worker.ticket(LegSide::Sell).unwrap();

        venue.set_mid("EURUSD", dec!(1.1020)).await;
        worker.poll(after_event(2)).await;

        assert!(worker.ticket(LegSide::Sell).is_none());
        assert!(venue.trade(sell).await.is_none());
        assert_eq!(worker.order(LegSide::Buy).stop_loss, dec!(40));
    }

    #[tokio::test]
    async fn test_trailing_stop_is_monotonic() {
        let (venue, mut worker) = monitoring_worker().await;

        let path = [
            dec!(1.0985),
            dec!(1.0982),
            dec!(1.0986), // pullback: not a new low
            dec!(1.0982), // tie with the low
            dec!(1.0979),
            dec!(1.0975), // beyond the far edge, clamps to the floor
            dec!(1.0970),
        ];
        let mut stops = Vec::new();
        for (i, price) in path.into_iter().enumerate() {
            venue.set_mid("EURUSD", price).await;
            worker.poll(after_event(2 + i as i64)).await;
            stops.push(worker.order(LegSide::Sell).stop_loss);
        }

        assert_eq!(
            stops,
            vec![
                dec!(90),
                dec!(60),
                dec!(60),
                dec!(60),
                dec!(30),
                dec!(1),
                dec!(1)
            ]
        );
        assert!(stops.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(worker.report().trail_updates, 4);
    }

    #[tokio::test]
    async fn test_failed_trail_resent_without_new_extreme() {
        let (venue, mut worker) = monitoring_worker().await;
        venue.fail_next_modifies(1).await;

        venue.set_mid("EURUSD", dec!(1.0980)).await;
        worker.poll(after_event(2)).await;
        assert_eq!(worker.order(LegSide::Sell).stop_loss, dec!(120));
        assert_eq!(worker.report().trail_updates, 0);

        // Still breached but off the low: only the failed trail may be sent.
        venue.set_mid("EURUSD", dec!(1.0981)).await;
        for i in 0..3 {
            worker.poll(after_event(3 + i)).await;
        }

        assert_eq!(worker.order(LegSide::Sell).stop_loss, dec!(40));
        assert_eq!(worker.report().trail_updates, 1);

        let modifies: Vec<Decimal> = venue
            .journal()
            .await
            .iter()
            .filter_map(|c| match c {
                VenueCall::Modify { stop_loss, .. } => Some(*stop_loss),
                _ => None,
            })
            .collect();
        assert_eq!(modifies, vec![dec!(40), dec!(40)]);

        let sell = worker.ticket(LegSide::Sell).unwrap();
        assert_eq!(venue.trade(sell).await.unwrap().stop_loss, dec!(40));
    }

    #[tokio::test]
    async fn test_close_failure_retried_next_cycle() {
        let (venue, mut worker) = monitoring_worker().await;
        venue.fail_next_closes(1).await;

        venue.set_mid("EURUSD", dec!(1.0980)).await;
        worker.poll(after_event(2)).await;
        assert!(worker.ticket(LegSide::Buy).is_some());

        venue.set_mid("EURUSD", dec!(1.0983)).await;
        worker.poll(after_event(3)).await;
        assert!(worker.ticket(LegSide::Buy).is_none());
    }

    #[tokio::test]
    async fn test_modify_on_closed_ticket_is_tolerated() {
        let (venue, mut worker) = monitoring_worker().await;
        let sell = worker.ticket(LegSide::Sell).unwrap();

        // Venue closes the sell leg on its own (stop hit).
        venue.close_order(sell).await.unwrap();

        venue.set_mid("EURUSD", dec!(1.0980)).await;
        assert_eq!(worker.poll(after_event(2)).await, WorkerState::Monitoring);
        assert!(worker.ticket(LegSide::Sell).is_none());
        assert_eq!(worker.order(LegSide::Sell).stop_loss, dec!(120));

        // No further modify attempts once the ticket is invalidated.
        venue.set_mid("EURUSD", dec!(1.0978)).await;
        worker.poll(after_event(3)).await;
        let modifies = venue
            .journal()
            .await
            .iter()
            .filter(|c| matches!(c, VenueCall::Modify { .. }))
            .count();
        assert_eq!(modifies, 1);
    }

    #[tokio::test]
    async fn test_idle_post_event_window_closes_instrument_once() {
        let (venue, mut worker) = monitoring_worker().await;

        for secs in [30, 120, 299, 300] {
            assert_eq!(worker.poll(after_event(secs)).await, WorkerState::Monitoring);
        }
        assert_eq!(venue.close_all_count().await, 0);

        assert_eq!(worker.poll(after_event(301)).await, WorkerState::Terminated);
        assert_eq!(worker.poll(after_event(302)).await, WorkerState::Terminated);

        assert_eq!(venue.close_all_count().await, 1);
        assert_eq!(
            venue.journal().await.last(),
            Some(&VenueCall::CloseAll {
                symbol: Some("EURUSD".to_string())
            })
        );
        assert_eq!(venue.open_trade_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_teardown_retried() {
        let (venue, mut worker) = monitoring_worker().await;
        venue.fail_next_close_alls(1).await;

        assert_eq!(worker.poll(after_event(301)).await, WorkerState::Monitoring);
        assert_eq!(worker.poll(after_event(302)).await, WorkerState::Terminated);
        assert_eq!(venue.close_all_count().await, 2);
    }

    #[tokio::test]
    async fn test_breach_keeps_trailing_past_post_event_window() {
        let (venue, mut worker) = monitoring_worker().await;

        venue.set_mid("EURUSD", dec!(1.0980)).await;
        assert_eq!(worker.poll(after_event(400)).await, WorkerState::Monitoring);

        // Hard deadline closes regardless.
        assert_eq!(worker.poll(after_event(1800)).await, WorkerState::Terminated);
        assert_eq!(venue.close_all_count().await, 1);
    }

    // =========================================================================
    // Run loop
    // =========================================================================

    #[tokio::test]
    async fn test_run_exits_on_shutdown_flag() {
        let venue = MockVenue::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut params = test_params();
        // Event far in the future: the worker just waits.
        params.event_time = Utc::now() + Duration::hours(1);
        let worker = InstrumentWorker::new(params, ChannelGuard::new(venue), shutdown.clone());

        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        shutdown.store(true, Ordering::SeqCst);

        let report = handle.await.unwrap();
        assert_eq!(report.final_state, WorkerState::Terminated);
        assert!(report.cycles >= 1);
        assert!(report.bracket.is_none());
    }
}
