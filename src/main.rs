//! News Straddle - Main Entry Point
//!
//! Runs the straddle strategy against the in-memory paper venue.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use news_straddle::config::Config;
use news_straddle::exchange::{ChannelGuard, MockVenue};
use news_straddle::strategy::{StrategyController, WorkerParams};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// News Straddle CLI
#[derive(Parser)]
#[command(name = "news-straddle")]
#[command(version, about = "Straddle scheduled news releases with trailing stops")]
struct Cli {
    /// Config file path, without extension
    #[arg(short, long, default_value = "config")]
    config: String,

    /// Event time (RFC 3339), overrides strategy.event_time
    #[arg(short, long)]
    event_time: Option<DateTime<Utc>>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the strategy until every worker terminates or Ctrl-C
    Run,

    /// Validate the configuration and print the placement schedule
    Check,
}

/// Resolved timing for one instrument, as printed by `check`.
#[derive(Debug, Serialize)]
struct ScheduleEntry {
    symbol: String,
    tag: String,
    lots: Decimal,
    barrier_height: Decimal,
    event_time: DateTime<Utc>,
    window_opens: DateTime<Utc>,
    window_closes: DateTime<Utc>,
    idle_close_after: DateTime<Utc>,
    hard_deadline: DateTime<Utc>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.json_logs)?;

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration rejected: {:#}", e);
            return Err(e);
        }
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Check => print_schedule(&config),
        Commands::Run => run(config).await,
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_from(&cli.config)?;
    if let Some(event_time) = cli.event_time {
        config.strategy.event_time = Some(event_time);
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn schedule(config: &Config) -> Result<Vec<ScheduleEntry>> {
    config
        .instruments
        .iter()
        .map(|instrument| {
            let event_time = config
                .event_time_for(instrument)
                .with_context(|| format!("{}: no event time", instrument.symbol))?;
            let params = WorkerParams::new(&config.strategy, instrument, event_time);
            let window_opens = params.window_opens_at();
            Ok(ScheduleEntry {
                window_closes: window_opens + params.pre_event_buffer,
                idle_close_after: event_time + params.post_event,
                hard_deadline: event_time + params.max_monitoring,
                window_opens,
                event_time,
                symbol: params.symbol,
                tag: params.tag,
                lots: params.lots,
                barrier_height: params.barrier_height,
            })
        })
        .collect()
}

fn print_schedule(config: &Config) -> Result<()> {
    let entries = schedule(config)?;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    info!(
        "News Straddle v{} - paper venue",
        env!("CARGO_PKG_VERSION")
    );
    log_config(&config);

    let venue = MockVenue::new().with_latency(Duration::from_millis(config.paper.latency_ms));
    for quote in &config.paper.quotes {
        venue.set_quote(&quote.symbol, quote.bid, quote.ask).await;
    }
    for instrument in &config.instruments {
        if !config.paper.quotes.iter().any(|q| q.symbol == instrument.symbol) {
            warn!(symbol = %instrument.symbol, "No paper quote configured, worker will not place");
        }
    }

    let mut controller = StrategyController::new(
        ChannelGuard::new(venue),
        config.strategy.clone(),
        config.reporter.clone(),
    );
    controller
        .start(&config.instruments)
        .context("Failed to start strategy")?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut check = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Shutdown signal received");
                break;
            }
            _ = check.tick() => {
                if controller.workers_finished() {
                    info!("All workers terminated");
                    break;
                }
            }
        }
    }

    let summary = controller.stop().await;
    for report in &summary.reports {
        info!(
            symbol = %report.symbol,
            state = %report.final_state,
            cycles = report.cycles,
            trail_updates = report.trail_updates,
            "Worker report"
        );
    }

    if !summary.failed_workers.is_empty() {
        anyhow::bail!("workers failed: {}", summary.failed_workers.join(", "));
    }
    if !summary.closed_all {
        anyhow::bail!("final close-all was not acknowledged");
    }

    info!("News Straddle shutdown complete");
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging(json: bool) -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "news-straddle.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    let filter = EnvFilter::from_default_env()
        .add_directive("news_straddle=debug".parse()?)
        .add_directive(Level::INFO.into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.with_ansi(true).init();
    }

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let strategy = &config.strategy;
    info!(
        name = %strategy.name,
        poll_delay_ms = strategy.poll_delay_ms,
        lead_secs = strategy.pre_event_lead_secs,
        buffer_secs = strategy.pre_event_buffer_secs,
        post_event_secs = strategy.post_event_secs,
        max_monitoring_secs = strategy.max_monitoring_secs,
        "Strategy configuration"
    );
    for instrument in &config.instruments {
        info!(
            symbol = %instrument.symbol,
            lots = %instrument.lots,
            barrier = %instrument.barrier_height,
            event_time = ?config.event_time_for(instrument),
            "Instrument"
        );
    }
}
