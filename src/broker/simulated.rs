//! Simulated host account for backtesting.
//!
//! Instructions submitted on one bar are queued and filled at the open of
//! the following bar, in submission order. Buys that would overdraw cash
//! and instructions without an execution price are rejected; sells are
//! clamped to the quantity held.

use super::traits::{Broker, MarketView};
use super::types::{Fill, Holding, Instruction};
use crate::error::BrokerError;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Outcome of one queued instruction.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub id: u64,
    pub result: Result<Fill, BrokerError>,
}

/// In-memory account with next-open fills.
#[derive(Debug)]
pub struct SimulatedBroker {
    initial_cash: Decimal,
    cash: Decimal,
    holdings: BTreeMap<String, Holding>,
    pending: Vec<(u64, Instruction)>,
    next_id: u64,
    /// Commission charged on notional (0 = commission free)
    commission_rate: Decimal,
    total_commission: Decimal,
}

impl SimulatedBroker {
    /// Create a new account with initial cash.
    pub fn new(initial_cash: Decimal, commission_rate: Decimal) -> Self {
        Self {
            initial_cash,
            cash: initial_cash,
            holdings: BTreeMap::new(),
            pending: Vec::new(),
            next_id: 1,
            commission_rate,
            total_commission: Decimal::ZERO,
        }
    }

    pub fn initial_cash(&self) -> Decimal {
        self.initial_cash
    }

    pub fn total_commission(&self) -> Decimal {
        self.total_commission
    }

    /// Number of instructions waiting for the next bar.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fill everything queued before the current bar at its open.
    pub fn execute_pending(&mut self, market: &dyn MarketView) -> Vec<ExecutionReport> {
        let pending = std::mem::take(&mut self.pending);

        pending
            .into_iter()
            .map(|(id, instruction)| {
                let result = self.execute(id, &instruction, market);
                match &result {
                    Ok(fill) => debug!(
                        id,
                        symbol = %fill.symbol,
                        size = %fill.size,
                        price = %fill.price,
                        "Instruction filled"
                    ),
                    Err(e) => warn!(id, symbol = %instruction.symbol, error = %e, "Instruction rejected"),
                }
                ExecutionReport { id, result }
            })
            .collect()
    }

    fn execute(
        &mut self,
        id: u64,
        instruction: &Instruction,
        market: &dyn MarketView,
    ) -> Result<Fill, BrokerError> {
        let symbol = instruction.symbol.as_str();
        if instruction.size.is_zero() {
            return Err(BrokerError::ZeroSize(symbol.to_string()));
        }

        let price = market
            .open(symbol)
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| BrokerError::NoPrice {
                symbol: symbol.to_string(),
                date: market.date(),
            })?;

        let size = if instruction.is_buy() {
            let cost = instruction.size * price;
            let commission = cost * self.commission_rate;
            if cost + commission > self.cash {
                return Err(BrokerError::InsufficientCash {
                    symbol: symbol.to_string(),
                    required: cost + commission,
                    available: self.cash,
                });
            }

            self.cash -= cost + commission;
            self.total_commission += commission;

            let holding = self.holdings.entry(symbol.to_string()).or_default();
            let quantity = holding.quantity + instruction.size;
            holding.avg_cost =
                (holding.quantity * holding.avg_cost + instruction.size * price) / quantity;
            holding.quantity = quantity;

            instruction.size
        } else {
            let held = self.position(symbol);
            if held <= Decimal::ZERO {
                return Err(BrokerError::NoPosition(symbol.to_string()));
            }

            let quantity = instruction.size.abs().min(held);
            let proceeds = quantity * price;
            let commission = proceeds * self.commission_rate;
            self.cash += proceeds - commission;
            self.total_commission += commission;

            let remaining = held - quantity;
            if remaining.is_zero() {
                self.holdings.remove(symbol);
            } else if let Some(holding) = self.holdings.get_mut(symbol) {
                holding.quantity = remaining;
            }

            -quantity
        };

        Ok(Fill {
            id,
            date: market.date(),
            symbol: symbol.to_string(),
            size,
            price,
            commission: size.abs() * price * self.commission_rate,
        })
    }
}

impl Broker for SimulatedBroker {
    fn cash(&self) -> Decimal {
        self.cash
    }

    fn adjust_cash(&mut self, delta: Decimal) {
        self.cash += delta;
    }

    fn holding(&self, symbol: &str) -> Holding {
        self.holdings.get(symbol).cloned().unwrap_or_default()
    }

    fn holdings(&self) -> BTreeMap<String, Decimal> {
        self.holdings
            .iter()
            .filter(|(_, h)| !h.quantity.is_zero())
            .map(|(s, h)| (s.clone(), h.quantity))
            .collect()
    }

    fn submit(&mut self, instruction: &Instruction) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.push((id, instruction.clone()));
        id
    }
}
