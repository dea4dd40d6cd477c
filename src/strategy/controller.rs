//! Strategy controller: owns the workers and the liveness reporter.

use crate::config::{InstrumentConfig, ReporterConfig, StrategyConfig};
use crate::exchange::ChannelGuard;
use crate::strategy::reporter::LivenessReporter;
use crate::strategy::worker::{InstrumentWorker, WorkerParams, WorkerReport};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

/// Outcome of [`StrategyController::stop`].
#[derive(Debug, Default)]
pub struct StopSummary {
    pub reports: Vec<WorkerReport>,
    /// Workers whose task panicked
    pub failed_workers: Vec<String>,
    /// Whether the final close-all was acknowledged by the venue
    pub closed_all: bool,
}

/// Starts one worker per instrument plus the liveness reporter, and tears
/// everything down on stop.
pub struct StrategyController {
    channel: ChannelGuard,
    strategy: StrategyConfig,
    reporter: ReporterConfig,
    shutdown: Arc<AtomicBool>,
    workers: Vec<(String, JoinHandle<WorkerReport>)>,
    reporter_task: Option<JoinHandle<u64>>,
    phase: Phase,
}

impl StrategyController {
    pub fn new(channel: ChannelGuard, strategy: StrategyConfig, reporter: ReporterConfig) -> Self {
        Self {
            channel,
            strategy,
            reporter,
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            reporter_task: None,
            phase: Phase::Idle,
        }
    }

    /// Spawn a worker per instrument and the reporter.
    ///
    /// Every instrument is validated before anything is spawned, so a bad
    /// entry means nothing trades.
    pub fn start(&mut self, instruments: &[InstrumentConfig]) -> Result<()> {
        anyhow::ensure!(self.phase == Phase::Idle, "strategy already started");
        anyhow::ensure!(!instruments.is_empty(), "no instruments configured");
        self.strategy.validate()?;

        let mut params = Vec::with_capacity(instruments.len());
        for instrument in instruments {
            anyhow::ensure!(
                instrument.lots > Decimal::ZERO && instrument.barrier_height > Decimal::ZERO,
                "{}: lots and barrier_height must be positive",
                instrument.symbol
            );
            let event_time = instrument
                .event_time
                .or(self.strategy.event_time)
                .with_context(|| format!("{}: no event time configured", instrument.symbol))?;
            params.push(WorkerParams::new(&self.strategy, instrument, event_time));
        }

        for p in params {
            let symbol = p.symbol.clone();
            let worker = InstrumentWorker::new(p, self.channel.clone(), self.shutdown.clone());
            info!(%symbol, "Launching worker");
            self.workers.push((symbol, tokio::spawn(worker.run())));
        }

        let reporter = LivenessReporter::new(
            self.channel.clone(),
            self.shutdown.clone(),
            Duration::from_millis(self.reporter.interval_ms),
        );
        self.reporter_task = Some(tokio::spawn(reporter.run()));
        self.phase = Phase::Running;

        info!(workers = self.workers.len(), "Strategy started");
        Ok(())
    }

    /// True once every worker has exited on its own.
    pub fn workers_finished(&self) -> bool {
        self.workers.iter().all(|(_, handle)| handle.is_finished())
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Signal every worker to exit, wait for them and the reporter, then
    /// close everything left at the venue. Calling it again is a no-op.
    pub async fn stop(&mut self) -> StopSummary {
        if self.phase != Phase::Running {
            return StopSummary::default();
        }
        self.phase = Phase::Stopped;
        self.shutdown.store(true, Ordering::SeqCst);
        info!("Stopping strategy");

        let mut summary = StopSummary::default();
        for (symbol, handle) in self.workers.drain(..) {
            match handle.await {
                Ok(report) => {
                    info!(
                        %symbol,
                        state = %report.final_state,
                        cycles = report.cycles,
                        trail_updates = report.trail_updates,
                        "Worker finished"
                    );
                    summary.reports.push(report);
                }
                Err(e) => {
                    error!(%symbol, error = %e, "Worker task failed");
                    summary.failed_workers.push(symbol);
                }
            }
        }

        if let Some(reporter) = self.reporter_task.take() {
            if let Err(e) = reporter.await {
                warn!(error = %e, "Liveness reporter task failed");
            }
        }

        match self.channel.close_all(None).await {
            Ok(()) => {
                info!("Final close-all sent");
                summary.closed_all = true;
            }
            Err(e) => error!(error = %e, "Final close-all failed, check the venue manually"),
        }

        summary
    }
}
