//! Rebalance decision core.
//!
//! Contains:
//! - Target weights and portfolio valuation
//! - Calendar schedules and the four trigger policies
//! - The two-phase sell/buy orchestrator
//! - Financing, dividend and cash-interest carry

mod financing;
mod income;
mod orchestrator;
mod rebalance;
pub mod schedule;
pub mod trigger;
pub mod valuation;
pub mod weights;

pub use financing::{FinancingAction, FinancingBook, FinancingTrade};
pub use income::{credit_dividends, CashInterest};
pub use orchestrator::{buy_phase, sell_phase, Orchestrator, PhaseEvent, RebalanceState};
pub use rebalance::{Lifecycle, RebalanceStrategy};
pub use schedule::{Frequency, PeriodSpec, Schedule};
pub use trigger::{BandSide, Trigger, TriggerContext, TriggerOutcome, COOLDOWN_BARS};
pub use valuation::{FinancedLeg, PortfolioSnapshot, Valuation};
pub use weights::TargetWeights;
