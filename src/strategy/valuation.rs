//! Portfolio valuation at a point in time.
//!
//! Total asset value is cash plus the mark-to-market of every holding.
//! Financed legs are tracked beside the holdings and only enter through
//! `total_financing`. Missing or non-positive prices contribute zero.

use super::weights::TargetWeights;
use crate::broker::{Broker, MarketView};
use crate::utils::safe_div;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Borrowed quantity of a financed symbol and the interest accrued on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancedLeg {
    pub quantity: Decimal,
    pub accrued_interest: Decimal,
}

/// Cash, holdings and financed legs captured at one bar.
#[derive(Debug, Clone, Default)]
pub struct PortfolioSnapshot {
    pub cash: Decimal,
    pub holdings: BTreeMap<String, Decimal>,
    pub financing: BTreeMap<String, FinancedLeg>,
}

impl PortfolioSnapshot {
    pub fn capture(broker: &dyn Broker, financing: &BTreeMap<String, FinancedLeg>) -> Self {
        Self {
            cash: broker.cash(),
            holdings: broker.holdings(),
            financing: financing.clone(),
        }
    }

    pub fn quantity(&self, symbol: &str) -> Decimal {
        self.holdings.get(symbol).copied().unwrap_or_default()
    }
}

/// Valuation of a snapshot against the current bar's prices.
pub struct Valuation<'a> {
    snapshot: &'a PortfolioSnapshot,
    market: &'a dyn MarketView,
}

impl<'a> Valuation<'a> {
    pub fn new(snapshot: &'a PortfolioSnapshot, market: &'a dyn MarketView) -> Self {
        Self { snapshot, market }
    }

    pub fn snapshot(&self) -> &PortfolioSnapshot {
        self.snapshot
    }

    pub fn cash(&self) -> Decimal {
        self.snapshot.cash
    }

    /// Latest usable price.
    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.market.close(symbol).filter(|p| *p > Decimal::ZERO)
    }

    pub fn market_value(&self, symbol: &str, quantity: Decimal) -> Decimal {
        self.price(symbol)
            .map(|p| p * quantity)
            .unwrap_or(Decimal::ZERO)
    }

    /// Quantity held times latest price.
    pub fn current_position_value(&self, symbol: &str) -> Decimal {
        self.market_value(symbol, self.snapshot.quantity(symbol))
    }

    /// Market value per held symbol.
    pub fn asset_values(&self) -> BTreeMap<String, Decimal> {
        self.snapshot
            .holdings
            .iter()
            .map(|(symbol, qty)| (symbol.clone(), self.market_value(symbol, *qty)))
            .collect()
    }

    /// Cash plus the market value of every holding.
    pub fn total_asset(&self) -> Decimal {
        self.snapshot.cash + self.asset_values().values().sum::<Decimal>()
    }

    /// Market value of all borrowed quantities.
    pub fn total_financing(&self) -> Decimal {
        self.snapshot
            .financing
            .iter()
            .map(|(symbol, leg)| self.market_value(symbol, leg.quantity))
            .sum()
    }

    pub fn financing_interest(&self) -> Decimal {
        self.snapshot
            .financing
            .values()
            .map(|leg| leg.accrued_interest)
            .sum()
    }

    /// Total asset net of financed exposure.
    pub fn net_asset(&self) -> Decimal {
        self.total_asset() - self.total_financing()
    }

    /// Total asset times the symbol's target weight. Zero (with a warning)
    /// when the symbol is not targeted or its weight is not positive.
    pub fn target_position_value(&self, symbol: &str, weights: &TargetWeights) -> Decimal {
        match weights.get(symbol) {
            Some(weight) if weight > Decimal::ZERO => self.total_asset() * weight,
            Some(weight) => {
                warn!(symbol = %symbol, weight = %weight, "Target weight is not positive");
                Decimal::ZERO
            }
            None => {
                warn!(symbol = %symbol, "Symbol has no target weight");
                Decimal::ZERO
            }
        }
    }

    /// Current value of the symbol as a fraction of total asset.
    pub fn current_weight(&self, symbol: &str) -> Decimal {
        safe_div(self.current_position_value(symbol), self.total_asset())
    }

    /// Absolute weight deviation for every target symbol, in target order.
    pub fn weight_deviations(&self, weights: &TargetWeights) -> Vec<(String, Decimal)> {
        weights
            .iter()
            .map(|(symbol, target)| {
                (
                    symbol.to_string(),
                    (self.current_weight(symbol) - target).abs(),
                )
            })
            .collect()
    }
}
