//! Financed (borrowed) legs.
//!
//! A leg borrows a fraction of net asset value in some instrument (typically
//! a currency pair). The borrowed value sits in cash and can be spent like
//! any other cash, while the leg itself is carried as a liability: it is
//! never a broker holding and never counts toward free asset value.

use super::valuation::{FinancedLeg, PortfolioSnapshot, Valuation};
use crate::broker::{Broker, MarketView};
use crate::config::{FinancingConfig, FinancingLegConfig};
use crate::utils::{accrue, floor_units, safe_div};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinancingAction {
    Open,
    Increase,
    Decrease,
}

/// A change in borrowed quantity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancingTrade {
    pub id: usize,
    pub date: NaiveDate,
    pub symbol: String,
    pub action: FinancingAction,
    /// Absolute change in borrowed units
    pub quantity: Decimal,
    pub price: Decimal,
    pub amount: Decimal,
    pub annual_rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct FinancingBook {
    legs_config: Vec<FinancingLegConfig>,
    adjust_threshold: Decimal,
    legs: BTreeMap<String, FinancedLeg>,
    last_accrual: Option<NaiveDate>,
    trades: Vec<FinancingTrade>,
}

impl FinancingBook {
    pub fn from_config(config: &FinancingConfig) -> Self {
        Self {
            legs_config: config.legs.clone(),
            adjust_threshold: config.adjust_threshold,
            legs: BTreeMap::new(),
            last_accrual: None,
            trades: Vec::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.legs_config.is_empty()
    }

    pub fn legs(&self) -> &BTreeMap<String, FinancedLeg> {
        &self.legs
    }

    pub fn trades(&self) -> &[FinancingTrade] {
        &self.trades
    }

    /// Total interest charged so far.
    pub fn total_interest(&self) -> Decimal {
        self.legs.values().map(|leg| leg.accrued_interest).sum()
    }

    /// Borrow every configured leg against current cash.
    pub fn open(&mut self, market: &dyn MarketView, broker: &mut dyn Broker) {
        if !self.is_configured() {
            return;
        }
        let date = market.date();
        self.last_accrual = Some(date);
        let cash = broker.cash();

        for config in self.legs_config.clone() {
            let Some(price) = market.close(&config.symbol).filter(|p| *p > Decimal::ZERO) else {
                warn!(symbol = %config.symbol, date = %date, "No price for financed leg, not borrowed");
                continue;
            };

            let quantity = floor_units(cash * config.ratio, price);
            if quantity.is_zero() {
                continue;
            }

            broker.adjust_cash(quantity * price);
            self.legs.insert(
                config.symbol.clone(),
                FinancedLeg {
                    quantity,
                    accrued_interest: Decimal::ZERO,
                },
            );
            self.record(date, &config, FinancingAction::Open, quantity, price);
            info!(
                symbol = %config.symbol,
                quantity = %quantity,
                price = %price,
                "Financed leg opened"
            );
        }
    }

    /// Charge interest since the last accrual and resize drifted legs.
    pub fn on_bar(&mut self, market: &dyn MarketView, broker: &mut dyn Broker) {
        let date = market.date();
        let Some(last) = self.last_accrual else {
            return;
        };
        let days = (date - last).num_days();
        if days <= 0 {
            return;
        }
        self.last_accrual = Some(date);

        let mut total_interest = Decimal::ZERO;
        for config in &self.legs_config {
            let (Some(leg), Some(price)) = (
                self.legs.get_mut(&config.symbol),
                market.close(&config.symbol).filter(|p| *p > Decimal::ZERO),
            ) else {
                continue;
            };
            let interest = accrue(leg.quantity * price, config.annual_rate, days);
            leg.accrued_interest += interest;
            total_interest += interest;
        }
        if total_interest > Decimal::ZERO {
            broker.adjust_cash(-total_interest);
            debug!(date = %date, days, interest = %total_interest.round_dp(4), "Financing interest charged");
        }

        self.resize(market, broker);
    }

    fn resize(&mut self, market: &dyn MarketView, broker: &mut dyn Broker) {
        let date = market.date();
        let net_asset = {
            let snapshot = PortfolioSnapshot::capture(&*broker, &self.legs);
            Valuation::new(&snapshot, market).net_asset()
        };

        for config in self.legs_config.clone() {
            let Some(price) = market.close(&config.symbol).filter(|p| *p > Decimal::ZERO) else {
                continue;
            };
            let Some(current_qty) = self.legs.get(&config.symbol).map(|leg| leg.quantity) else {
                continue;
            };

            let target = net_asset * config.ratio;
            if target <= Decimal::ZERO {
                continue;
            }
            let current = current_qty * price;
            let drift = safe_div((current - target).abs(), target);
            if drift <= self.adjust_threshold {
                continue;
            }

            let target_qty = floor_units(target, price);
            let delta = target_qty - current_qty;
            if delta.is_zero() {
                continue;
            }

            broker.adjust_cash(delta * price);
            if let Some(leg) = self.legs.get_mut(&config.symbol) {
                leg.quantity = target_qty;
            }
            let action = if delta > Decimal::ZERO {
                FinancingAction::Increase
            } else {
                FinancingAction::Decrease
            };
            self.record(date, &config, action, delta.abs(), price);
            info!(
                symbol = %config.symbol,
                drift = %drift.round_dp(4),
                from = %current_qty,
                to = %target_qty,
                "Financed leg resized"
            );
        }
    }

    fn record(
        &mut self,
        date: NaiveDate,
        config: &FinancingLegConfig,
        action: FinancingAction,
        quantity: Decimal,
        price: Decimal,
    ) {
        self.trades.push(FinancingTrade {
            id: self.trades.len() + 1,
            date,
            symbol: config.symbol.clone(),
            action,
            quantity,
            price,
            amount: quantity * price,
            annual_rate: config.annual_rate,
        });
    }
}
