//! # News Straddle
//!
//! Places a symmetric pair of stop orders around the price shortly before
//! a scheduled news release, trails whichever side gets triggered, and
//! closes everything once the move is over.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Venue gateway contract, serialized channel and paper venue
//! - `strategy`: Instrument workers, liveness reporter and controller
//! - `utils`: Shared decimal arithmetic

pub mod config;
pub mod exchange;
pub mod strategy;
pub mod utils;

pub use config::Config;
