//! Straddle trading logic.
//!
//! - `bracket`: Bracket geometry, breach detection and stop arithmetic
//! - `worker`: Per-instrument state machine
//! - `reporter`: Periodic venue status output
//! - `controller`: Starts and stops the workers and the reporter

mod bracket;
mod controller;
mod reporter;
mod worker;

pub use bracket::{tightened_stop, Breach, Bracket, PriceHistory};
pub use controller::{StopSummary, StrategyController};
pub use reporter::LivenessReporter;
pub use worker::{InstrumentWorker, WorkerParams, WorkerReport, WorkerState};
