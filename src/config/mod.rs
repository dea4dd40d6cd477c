//! Configuration management for the straddle engine.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Timing and trailing parameters shared by every worker
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Instruments to trade, one worker each
    #[serde(default = "default_instruments")]
    pub instruments: Vec<InstrumentConfig>,
    /// Liveness reporter settings
    #[serde(default)]
    pub reporter: ReporterConfig,
    /// Paper venue settings
    #[serde(default)]
    pub paper: PaperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Suffix of the correlation tag (`{symbol}_{name}`)
    #[serde(default = "default_name")]
    pub name: String,
    /// Scheduled event time (UTC). Required before trading starts.
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    /// Delay between poll cycles
    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,
    /// The placement window opens this long before the event
    #[serde(default = "default_pre_event_lead_secs")]
    pub pre_event_lead_secs: u64,
    /// Length of the placement window
    #[serde(default = "default_pre_event_buffer_secs")]
    pub pre_event_buffer_secs: u64,
    /// Monitoring time after the event before an idle instrument is closed
    #[serde(default = "default_post_event_secs")]
    pub post_event_secs: u64,
    /// Hard stop after the event, even while a breach is being trailed
    #[serde(default = "default_max_monitoring_secs")]
    pub max_monitoring_secs: u64,
    /// Points per unit of price (100000 for 5-digit FX quotes)
    #[serde(default = "default_trailing_scale")]
    pub trailing_scale: Decimal,
    /// Take-profit distance (points) sent with each trailing modification
    #[serde(default = "default_trailing_take_profit")]
    pub trailing_take_profit: Decimal,
    /// Smallest stop distance (points) a trail may set
    #[serde(default = "default_min_stop_distance")]
    pub min_stop_distance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub symbol: String,
    /// Position size, fixed for the worker's lifetime
    pub lots: Decimal,
    /// Half-width of the bracket in price units
    pub barrier_height: Decimal,
    /// Overrides `strategy.event_time` for this instrument
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Delay between status prints
    #[serde(default = "default_reporter_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Initial quotes for the paper venue
    #[serde(default = "default_paper_quotes")]
    pub quotes: Vec<PaperQuote>,
    /// Simulated round-trip latency
    #[serde(default)]
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperQuote {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
}

// Default value functions
fn default_name() -> String {
    "Trader".to_string()
}

fn default_poll_delay_ms() -> u64 {
    1000
}

fn default_pre_event_lead_secs() -> u64 {
    120 // Window opens 2 minutes before the release
}

fn default_pre_event_buffer_secs() -> u64 {
    60
}

fn default_post_event_secs() -> u64 {
    300
}

fn default_max_monitoring_secs() -> u64 {
    1800
}

fn default_trailing_scale() -> Decimal {
    Decimal::new(100_000, 0)
}

fn default_trailing_take_profit() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_min_stop_distance() -> Decimal {
    Decimal::ONE
}

fn default_reporter_interval_ms() -> u64 {
    1000
}

fn default_instruments() -> Vec<InstrumentConfig> {
    vec![InstrumentConfig {
        symbol: "EURUSD".to_string(),
        lots: Decimal::new(1, 2),           // 0.01
        barrier_height: Decimal::new(12, 4), // 0.0012 = 12 pips
        event_time: None,
    }]
}

fn default_paper_quotes() -> Vec<PaperQuote> {
    vec![PaperQuote {
        symbol: "EURUSD".to_string(),
        bid: Decimal::new(109_990, 5),
        ask: Decimal::new(110_010, 5),
    }]
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Load using `path` (without extension) as the optional config file.
    pub fn load_from(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("STRADDLE"),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.instruments.is_empty(),
            "at least one instrument must be configured"
        );

        let mut seen = HashSet::new();
        for instrument in &self.instruments {
            anyhow::ensure!(
                !instrument.symbol.trim().is_empty(),
                "instrument symbol must not be empty"
            );
            anyhow::ensure!(
                seen.insert(instrument.symbol.as_str()),
                "duplicate instrument {}",
                instrument.symbol
            );
            anyhow::ensure!(
                instrument.lots > Decimal::ZERO,
                "{}: lots must be positive",
                instrument.symbol
            );
            anyhow::ensure!(
                instrument.barrier_height > Decimal::ZERO,
                "{}: barrier_height must be positive",
                instrument.symbol
            );
            anyhow::ensure!(
                self.event_time_for(instrument).is_some(),
                "{}: no event_time configured",
                instrument.symbol
            );
        }

        self.strategy.validate()?;

        anyhow::ensure!(
            self.reporter.interval_ms > 0,
            "reporter.interval_ms must be positive"
        );

        Ok(())
    }

    /// Event time for an instrument, falling back to the strategy default.
    pub fn event_time_for(&self, instrument: &InstrumentConfig) -> Option<DateTime<Utc>> {
        instrument.event_time.or(self.strategy.event_time)
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.name.is_empty(), "strategy.name must not be empty");
        anyhow::ensure!(self.poll_delay_ms > 0, "poll_delay_ms must be positive");
        anyhow::ensure!(
            self.pre_event_buffer_secs > 0,
            "pre_event_buffer_secs must be positive"
        );
        anyhow::ensure!(
            self.pre_event_buffer_secs <= self.pre_event_lead_secs,
            "pre_event_buffer_secs must not exceed pre_event_lead_secs"
        );
        anyhow::ensure!(
            self.max_monitoring_secs >= self.post_event_secs,
            "max_monitoring_secs must be at least post_event_secs"
        );
        anyhow::ensure!(
            self.trailing_scale > Decimal::ZERO,
            "trailing_scale must be positive"
        );
        anyhow::ensure!(
            self.min_stop_distance > Decimal::ZERO,
            "min_stop_distance must be positive"
        );
        Ok(())
    }

    pub fn poll_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_delay_ms)
    }

    pub fn pre_event_lead(&self) -> Duration {
        Duration::seconds(self.pre_event_lead_secs as i64)
    }

    pub fn pre_event_buffer(&self) -> Duration {
        Duration::seconds(self.pre_event_buffer_secs as i64)
    }

    pub fn post_event(&self) -> Duration {
        Duration::seconds(self.post_event_secs as i64)
    }

    pub fn max_monitoring(&self) -> Duration {
        Duration::seconds(self.max_monitoring_secs as i64)
    }

    /// Correlation tag for orders owned by `symbol`'s worker.
    pub fn tag_for(&self, symbol: &str) -> String {
        format!("{}_{}", symbol, self.name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: StrategyConfig::default(),
            instruments: default_instruments(),
            reporter: ReporterConfig::default(),
            paper: PaperConfig::default(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            event_time: None,
            poll_delay_ms: default_poll_delay_ms(),
            pre_event_lead_secs: default_pre_event_lead_secs(),
            pre_event_buffer_secs: default_pre_event_buffer_secs(),
            post_event_secs: default_post_event_secs(),
            max_monitoring_secs: default_max_monitoring_secs(),
            trailing_scale: default_trailing_scale(),
            trailing_take_profit: default_trailing_take_profit(),
            min_stop_distance: default_min_stop_distance(),
        }
    }
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_reporter_interval_ms(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            quotes: default_paper_quotes(),
            latency_ms: 0,
        }
    }
}
