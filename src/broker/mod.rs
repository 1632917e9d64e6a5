//! Host-engine seam.
//!
//! ## Traits
//! - [`MarketView`]: bar prices, factors and dividends for the current bar
//! - [`Broker`]: cash, positions and instruction submission
//!
//! ## Simulated host
//! [`SimulatedBroker`] fills queued instructions at the next bar's open and
//! backs the replay engine and tests.

pub mod simulated;
mod traits;
mod types;

pub use simulated::{ExecutionReport, SimulatedBroker};
pub use traits::{Broker, MarketView};
pub use types::*;

#[cfg(test)]
pub use traits::MockMarketView;
