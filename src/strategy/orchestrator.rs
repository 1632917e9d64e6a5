//! Two-phase rebalance state machine.
//!
//! A firing trigger starts a cycle: overweight symbols are sold on the
//! firing bar, the freed cash is spent on underweight symbols one bar later,
//! and the resulting positions are logged for audit on the bar after that.
//! Instructions are sized with the next bar's open because that is where
//! the host fills them.

use super::trigger::{Trigger, TriggerContext};
use super::valuation::Valuation;
use super::weights::TargetWeights;
use crate::broker::{Instruction, InstructionKind, MarketView};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Where the current rebalance cycle stands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RebalanceState {
    #[default]
    Idle,
    /// Sells went out; the buy phase runs on the next bar.
    SellIssued { reason: String, deferrals: u32 },
    /// Buys went out; positions are audited on the next bar.
    BuyIssued { reason: String },
}

/// Inputs to [`RebalanceState::transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    Fired(String),
    BuysIssued,
    BuyDeferred,
    BuyAbandoned,
    Audited,
    /// Close-out liquidation preempts whatever was in flight.
    Liquidated,
}

impl RebalanceState {
    pub fn name(&self) -> &'static str {
        match self {
            RebalanceState::Idle => "idle",
            RebalanceState::SellIssued { .. } => "sell_issued",
            RebalanceState::BuyIssued { .. } => "buy_issued",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, RebalanceState::Idle)
    }

    /// Apply an event. Events that do not apply to the current state leave
    /// it unchanged.
    pub fn transition(self, event: PhaseEvent) -> Self {
        use RebalanceState::*;

        match (self, event) {
            (_, PhaseEvent::Liquidated) => Idle,
            (Idle, PhaseEvent::Fired(reason)) => SellIssued {
                reason,
                deferrals: 0,
            },
            (SellIssued { reason, .. }, PhaseEvent::BuysIssued) => BuyIssued { reason },
            (SellIssued { reason, deferrals }, PhaseEvent::BuyDeferred) => SellIssued {
                reason,
                deferrals: deferrals + 1,
            },
            (SellIssued { .. }, PhaseEvent::BuyAbandoned) => Idle,
            (BuyIssued { .. }, PhaseEvent::Audited) => Idle,
            (state, _) => state,
        }
    }
}

/// Drives rebalance cycles for one strategy run.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    state: RebalanceState,
    max_buy_deferrals: u32,
    cycles: usize,
}

impl Orchestrator {
    pub fn new(max_buy_deferrals: u32) -> Self {
        Self {
            state: RebalanceState::Idle,
            max_buy_deferrals,
            cycles: 0,
        }
    }

    pub fn state(&self) -> &RebalanceState {
        &self.state
    }

    /// Rebalance cycles started so far.
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    fn apply(&mut self, event: PhaseEvent) {
        let from = self.state.name();
        self.state = std::mem::take(&mut self.state).transition(event);
        debug!(from, to = self.state.name(), "Rebalance state transition");
    }

    /// Initial allocation: a buy phase over every target symbol, no trigger
    /// involved.
    pub fn open_allocation(
        &self,
        valuation: &Valuation<'_>,
        weights: &TargetWeights,
        market: &dyn MarketView,
    ) -> Vec<Instruction> {
        info!(date = %market.date(), "Opening positions");
        match buy_phase(valuation, weights, market, InstructionKind::Open, "open") {
            Some(buys) => buys,
            None => {
                warn!(
                    date = %market.date(),
                    cash = %valuation.cash(),
                    "Cash below reserve at open, initial allocation skipped"
                );
                Vec::new()
            }
        }
    }

    /// Advance one bar.
    pub fn step(&mut self, triggers: &mut [Trigger], ctx: &mut TriggerContext<'_>) -> Vec<Instruction> {
        let date = ctx.date();

        match self.state.clone() {
            RebalanceState::Idle => {
                let Some(reason) = first_fired(triggers, ctx) else {
                    return Vec::new();
                };

                let valuation = ctx.valuation();
                log_positions(&valuation, ctx.weights, date, "before rebalance");
                info!(date = %date, reason = %reason, "Rebalance sell phase");

                let sells = sell_phase(&valuation, ctx.weights, ctx.market, &reason);
                self.cycles += 1;
                self.apply(PhaseEvent::Fired(reason));
                sells
            }
            RebalanceState::SellIssued { reason, deferrals } => {
                let valuation = ctx.valuation();
                match buy_phase(&valuation, ctx.weights, ctx.market, InstructionKind::RebalanceBuy, &reason) {
                    Some(buys) => {
                        info!(date = %date, reason = %reason, orders = buys.len(), "Rebalance buy phase");
                        self.apply(PhaseEvent::BuysIssued);
                        buys
                    }
                    None if deferrals >= self.max_buy_deferrals => {
                        warn!(
                            date = %date,
                            deferrals,
                            "Buy phase still blocked by cash reserve, abandoning rebalance"
                        );
                        self.apply(PhaseEvent::BuyAbandoned);
                        Vec::new()
                    }
                    None => {
                        warn!(
                            date = %date,
                            cash = %valuation.cash(),
                            "Buyable cash negative, buy phase deferred"
                        );
                        self.apply(PhaseEvent::BuyDeferred);
                        Vec::new()
                    }
                }
            }
            RebalanceState::BuyIssued { .. } => {
                log_positions(&ctx.valuation(), ctx.weights, date, "after rebalance");
                self.apply(PhaseEvent::Audited);
                Vec::new()
            }
        }
    }

    /// Sell every held symbol outright, abandoning any cycle in flight.
    pub fn liquidate(&mut self, valuation: &Valuation<'_>, market: &dyn MarketView) -> Vec<Instruction> {
        let date = market.date();
        if !self.state.is_idle() {
            info!(date = %date, state = self.state.name(), "Close preempts rebalance in progress");
        }
        self.apply(PhaseEvent::Liquidated);

        valuation
            .snapshot()
            .holdings
            .iter()
            .filter(|(_, qty)| **qty > Decimal::ZERO)
            .map(|(symbol, qty)| {
                let price = execution_price(market, symbol)
                    .or_else(|| valuation.price(symbol))
                    .unwrap_or(Decimal::ZERO);
                Instruction::new(date, symbol.clone(), -*qty, price, InstructionKind::Liquidation, "close")
            })
            .collect()
    }
}

/// Check triggers in order and return the first firing reason.
fn first_fired(triggers: &mut [Trigger], ctx: &mut TriggerContext<'_>) -> Option<String> {
    for trigger in triggers.iter_mut() {
        let outcome = trigger.check(ctx);
        if outcome.fired {
            return Some(format!("{}: {}", trigger.name(), outcome.reason));
        }
    }
    None
}

fn execution_price(market: &dyn MarketView, symbol: &str) -> Option<Decimal> {
    market.next_open(symbol).filter(|p| *p > Decimal::ZERO)
}

/// Sell orders for every overweight symbol. Held symbols that are no longer
/// targeted count as weight zero.
pub fn sell_phase(
    valuation: &Valuation<'_>,
    weights: &TargetWeights,
    market: &dyn MarketView,
    reason: &str,
) -> Vec<Instruction> {
    let date = market.date();
    let mut candidates: Vec<(String, Decimal)> = weights
        .symbols()
        .map(|symbol| (symbol.to_string(), valuation.target_position_value(symbol, weights)))
        .collect();
    for symbol in valuation.snapshot().holdings.keys() {
        if !weights.contains(symbol) {
            candidates.push((symbol.clone(), Decimal::ZERO));
        }
    }

    let mut sells = Vec::new();
    for (symbol, target) in candidates {
        let diff = target - valuation.current_position_value(&symbol);
        if diff >= Decimal::ZERO {
            continue;
        }
        let Some(price) = execution_price(market, &symbol) else {
            debug!(symbol = %symbol, date = %date, "No next open, sell skipped");
            continue;
        };

        let size = (diff / price).floor();
        debug!(
            symbol = %symbol,
            size = %size,
            price = %price,
            target = %target.round_dp(2),
            "Sell sized"
        );
        sells.push(Instruction::new(date, symbol, size, price, InstructionKind::RebalanceSell, reason));
    }
    sells
}

/// Buy orders for every underweight symbol, splitting buyable cash in
/// proportion to each symbol's shortfall. `None` when cash does not cover
/// the reserve.
pub fn buy_phase(
    valuation: &Valuation<'_>,
    weights: &TargetWeights,
    market: &dyn MarketView,
    kind: InstructionKind,
    reason: &str,
) -> Option<Vec<Instruction>> {
    let date = market.date();
    let total = valuation.total_asset();
    let reserve = (Decimal::ONE - weights.total()) * total;
    let buyable = valuation.cash() - reserve;
    if buyable < Decimal::ZERO {
        return None;
    }

    let shortfalls: Vec<(&str, Decimal)> = weights
        .symbols()
        .filter_map(|symbol| {
            let diff = valuation.target_position_value(symbol, weights)
                - valuation.current_position_value(symbol);
            (diff > Decimal::ZERO).then_some((symbol, diff))
        })
        .collect();
    let total_diff: Decimal = shortfalls.iter().map(|(_, diff)| *diff).sum();
    if total_diff <= Decimal::ZERO {
        return Some(Vec::new());
    }

    debug!(
        date = %date,
        total = %total.round_dp(2),
        reserve = %reserve.round_dp(2),
        buyable = %buyable.round_dp(2),
        "Buy phase budget"
    );

    let mut buys = Vec::new();
    for (symbol, diff) in shortfalls {
        let Some(price) = execution_price(market, symbol) else {
            debug!(symbol = %symbol, date = %date, "No next open, buy skipped");
            continue;
        };
        let size = (diff / total_diff * buyable / price).floor();
        if size <= Decimal::ZERO {
            continue;
        }
        buys.push(Instruction::new(date, symbol, size, price, kind, reason));
    }
    Some(buys)
}

fn log_positions(valuation: &Valuation<'_>, weights: &TargetWeights, date: NaiveDate, tag: &str) {
    let total = valuation.total_asset();
    info!(
        date = %date,
        cash = %valuation.cash().round_dp(2),
        total_asset = %total.round_dp(2),
        financing = %valuation.total_financing().round_dp(2),
        "Positions {}", tag
    );
    for (symbol, value) in valuation.asset_values() {
        info!(
            symbol = %symbol,
            value = %value.round_dp(2),
            weight = %valuation.current_weight(&symbol).round_dp(4),
            target = %weights.get(&symbol).unwrap_or_default(),
            "Position"
        );
    }
}
