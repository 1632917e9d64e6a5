//! # Trigger Rebalancer
//!
//! A bar-by-bar portfolio rebalance engine. Target weights are held until a
//! trigger fires; each rebalance then runs as a sell phase followed by a
//! buy phase on the next bar.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `broker`: Host-engine seam (market view, account) and a simulated host
//! - `strategy`: Weights, valuation, triggers, the rebalance cycle and carry
//! - `analyzer`: Pair-ratio statistics, daily snapshots, instruction ledger
//! - `backtest`: Historical bar replay and performance metrics
//! - `utils`: Shared utilities and decimal arithmetic

pub mod analyzer;
pub mod backtest;
pub mod broker;
pub mod config;
pub mod error;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::{BrokerError, ConfigError};
pub use strategy::RebalanceStrategy;
