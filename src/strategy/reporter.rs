//! Liveness reporter: periodic venue status output.
//!
//! Read-only with respect to trading. The channel is held only for the
//! single status round trip, never while printing or sleeping.

use crate::exchange::{ChannelGuard, GatewayStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct LivenessReporter {
    channel: ChannelGuard,
    shutdown: Arc<AtomicBool>,
    interval: Duration,
}

impl LivenessReporter {
    pub fn new(channel: ChannelGuard, shutdown: Arc<AtomicBool>, interval: Duration) -> Self {
        Self {
            channel,
            shutdown,
            interval,
        }
    }

    /// Fetch one status snapshot.
    pub async fn snapshot(&self) -> Option<GatewayStatus> {
        let result = self
            .channel
            .with_exclusive_access(|gateway| gateway.last_status())
            .await;

        match result {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, "Status request failed");
                None
            }
        }
    }

    /// Report until the shutdown flag is raised. Returns the number of
    /// snapshots printed.
    pub async fn run(self) -> u64 {
        let mut reports = 0;

        while !self.shutdown.load(Ordering::SeqCst) {
            if let Some(status) = self.snapshot().await {
                reports += 1;
                info!(
                    connected = status.connected,
                    requests = status.requests_served,
                    open_trades = status.open_trades,
                    last = status.last_response.as_deref().unwrap_or("-"),
                    "Venue status"
                );
            }
            tokio::time::sleep(self.interval).await;
        }

        info!(reports, "Liveness reporter stopped");
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockVenue;

    fn reporter(venue: &MockVenue, shutdown: Arc<AtomicBool>) -> LivenessReporter {
        LivenessReporter::new(
            ChannelGuard::new(venue.clone()),
            shutdown,
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn test_snapshot_reads_status() {
        let venue = MockVenue::new();
        let status = reporter(&venue, Arc::new(AtomicBool::new(false)))
            .snapshot()
            .await
            .unwrap();
        assert!(status.connected);
        assert_eq!(status.open_trades, 0);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_reporter() {
        let venue = MockVenue::new();
        venue.set_connected(false);
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(reporter(&venue, shutdown.clone()).run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        venue.set_connected(true);
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.store(true, Ordering::SeqCst);

        let reports = handle.await.unwrap();
        assert!(reports >= 1);
        assert!(venue.requests_served() > reports);
    }

    #[tokio::test]
    async fn test_exits_immediately_when_already_stopped() {
        let venue = MockVenue::new();
        let reports = reporter(&venue, Arc::new(AtomicBool::new(true)))
            .run()
            .await;
        assert_eq!(reports, 0);
        assert_eq!(venue.requests_served(), 0);
    }
}
