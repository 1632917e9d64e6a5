//! Mutable target-weight map shared by the orchestrator and its triggers.

use crate::config::WeightEntry;
use rust_decimal::Decimal;
use serde::Serialize;

/// Symbol -> fraction of total asset, in declared order. The weights need
/// not sum to 1; the residual is held as cash reserve.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TargetWeights {
    entries: Vec<(String, Decimal)>,
}

impl TargetWeights {
    pub fn new(entries: Vec<(String, Decimal)>) -> Self {
        Self { entries }
    }

    pub fn from_entries(entries: &[WeightEntry]) -> Self {
        Self::new(
            entries
                .iter()
                .map(|e| (e.symbol.clone(), e.weight))
                .collect(),
        )
    }

    pub fn get(&self, symbol: &str) -> Option<Decimal> {
        self.entries
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, w)| *w)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.entries.iter().any(|(s, _)| s == symbol)
    }

    /// Update a weight in place, appending unknown symbols.
    pub fn set(&mut self, symbol: &str, weight: Decimal) {
        match self.entries.iter_mut().find(|(s, _)| s == symbol) {
            Some(entry) => entry.1 = weight,
            None => self.entries.push((symbol.to_string(), weight)),
        }
    }

    /// Overwrite the whole map. Symbols not listed drop out.
    pub fn replace(&mut self, entries: Vec<(String, Decimal)>) {
        self.entries = entries;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.entries.iter().map(|(s, w)| (s.as_str(), *w))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(s, _)| s.as_str())
    }

    pub fn total(&self) -> Decimal {
        self.entries.iter().map(|(_, w)| *w).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
