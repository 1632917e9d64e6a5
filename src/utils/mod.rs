//! Shared utilities.

pub mod decimal;

pub use decimal::{accrue, floor_units, mean_and_std, safe_div};
