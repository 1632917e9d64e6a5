//! Host-engine seams.
//!
//! The decision core never touches bar storage or order matching directly.
//! It reads prices through [`MarketView`] and reads balances / submits
//! instructions through [`Broker`]. Any replay engine or live adapter that
//! implements both can drive a [`RebalanceStrategy`](crate::strategy::RebalanceStrategy).

use super::types::{Holding, Instruction};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Read-only view of the market at the current bar.
#[cfg_attr(test, mockall::automock)]
pub trait MarketView {
    /// Date of the current bar.
    fn date(&self) -> NaiveDate;

    /// Date of the previous bar, if any.
    fn previous_date(&self) -> Option<NaiveDate>;

    /// Date of the next bar, if any.
    fn next_date(&self) -> Option<NaiveDate>;

    /// Zero-based index of the current bar.
    fn bar_index(&self) -> usize;

    /// Every symbol the host carries, sorted.
    fn symbols(&self) -> Vec<String>;

    /// Latest close on or before the current bar.
    fn close(&self, symbol: &str) -> Option<Decimal>;

    /// Open of the current bar, only if the symbol traded on it.
    fn open(&self, symbol: &str) -> Option<Decimal>;

    /// Open of the next bar, used to size instructions.
    fn next_open(&self, symbol: &str) -> Option<Decimal>;

    /// Whether the symbol has a bar on the current date.
    fn traded_today(&self, symbol: &str) -> bool;

    /// Latest value of a named per-symbol factor series.
    fn factor(&self, symbol: &str, name: &str) -> Option<Decimal>;

    /// Per-unit dividend paid on the current bar.
    fn dividend(&self, symbol: &str) -> Option<Decimal>;
}

/// Account access granted to the strategy by the host.
pub trait Broker {
    /// Current cash balance.
    fn cash(&self) -> Decimal;

    /// Credit (positive) or debit (negative) cash outside of trading.
    fn adjust_cash(&mut self, delta: Decimal);

    /// Held position for a symbol.
    fn holding(&self, symbol: &str) -> Holding;

    /// Non-zero quantities by symbol.
    fn holdings(&self) -> BTreeMap<String, Decimal>;

    /// Queue an instruction for execution. Returns the host's id for it.
    fn submit(&mut self, instruction: &Instruction) -> u64;

    /// Signed quantity held.
    fn position(&self, symbol: &str) -> Decimal {
        self.holding(symbol).quantity
    }
}
