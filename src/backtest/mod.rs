//! Backtesting module: replays historical bars through the rebalance
//! strategy against a simulated account.
//!
//! This module provides:
//! - Historical bar loading (CSV import)
//! - Bar-by-bar replay engine with next-open fills
//! - Performance metrics calculation
//!
//! # Example
//!
//! ```rust,ignore
//! use trigger_rebalancer::backtest::{BacktestEngine, CsvDataLoader};
//!
//! let loader = CsvDataLoader::new("data/bars.csv")?;
//! let mut engine = BacktestEngine::new(loader, config);
//!
//! let result = engine.run(start, end)?;
//! println!("Return: {:.2}%", result.metrics.total_return_pct);
//! ```

mod data;
mod engine;
mod metrics;

pub use data::{BarSnapshot, BarWindow, CsvDataLoader, DataLoader, SymbolBar};
pub use engine::{BacktestEngine, BacktestResult};
pub use metrics::{Activity, BacktestMetrics, EquityPoint};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Simulated account settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Starting cash of the simulated account
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,

    /// Commission charged on fill notional (0 = commission free)
    #[serde(default)]
    pub commission_rate: Decimal,
}

fn default_initial_cash() -> Decimal {
    Decimal::new(1_000_000, 0)
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_cash: default_initial_cash(),
            commission_rate: Decimal::ZERO,
        }
    }
}
