//! The composed strategy the host drives once per bar.
//!
//! Per bar, in order: pairing statistics update, income and financing carry
//! (only while open), then at most one of open / close / orchestrator step.
//! Every decision is sized against the next bar's open, so nothing is
//! decided on the last bar of the data.

use super::financing::FinancingBook;
use super::income::{credit_dividends, CashInterest};
use super::orchestrator::{Orchestrator, RebalanceState};
use super::trigger::{build_triggers, Trigger, TriggerContext};
use super::valuation::{PortfolioSnapshot, Valuation};
use super::weights::TargetWeights;
use crate::analyzer::PairingTracker;
use crate::broker::{Broker, Instruction, MarketView};
use crate::config::{Config, DividendMethod};
use crate::error::{ConfigError, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

/// Where the strategy is in its open/close window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Pending,
    Open,
    Closed,
}

pub struct RebalanceStrategy {
    name: String,
    open_date: NaiveDate,
    close_date: Option<NaiveDate>,
    dividend_method: DividendMethod,
    weights: TargetWeights,
    triggers: Vec<Trigger>,
    orchestrator: Orchestrator,
    pairing: PairingTracker,
    financing: FinancingBook,
    cash_interest: CashInterest,
    lifecycle: Lifecycle,
}

impl RebalanceStrategy {
    /// Validate the configuration and build every trigger. `schedule_end`
    /// bounds the precomputed calendars when no close date is configured.
    pub fn new(config: &Config, schedule_end: NaiveDate) -> Result<Self> {
        config.validate()?;
        let strategy = &config.strategy;

        let entries = strategy
            .target_weights
            .as_deref()
            .ok_or(ConfigError::MissingTargetWeights)?;
        let triggers_config = strategy
            .triggers
            .as_ref()
            .ok_or(ConfigError::MissingTriggers)?;

        let weights = TargetWeights::from_entries(entries);
        let schedule_end = strategy.close_date.unwrap_or(schedule_end);
        let triggers = build_triggers(triggers_config, &weights, strategy.open_date, schedule_end)?;

        let mut pairing = PairingTracker::from_config(&config.pairing);
        for trigger in &triggers {
            if let Trigger::Pairwise(pairwise) = trigger {
                pairing.track(pairwise.key().clone());
            }
        }

        info!(
            name = %strategy.name,
            open_date = %strategy.open_date,
            close_date = ?strategy.close_date,
            symbols = weights.len(),
            triggers = ?triggers.iter().map(Trigger::name).collect::<Vec<_>>(),
            "Strategy configured"
        );

        Ok(Self {
            name: strategy.name.clone(),
            open_date: strategy.open_date,
            close_date: strategy.close_date,
            dividend_method: strategy.dividend_method,
            weights,
            triggers,
            orchestrator: Orchestrator::new(strategy.max_buy_deferrals),
            pairing,
            financing: FinancingBook::from_config(&config.financing),
            cash_interest: CashInterest::new(config.cash_interest.clone()),
            lifecycle: Lifecycle::Pending,
        })
    }

    /// Track every pair among the given symbols in addition to the
    /// pairwise trigger's own pair.
    pub fn track_pairs(&mut self, symbols: &[String]) {
        self.pairing.track_combinations(symbols);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn open_date(&self) -> NaiveDate {
        self.open_date
    }

    pub fn close_date(&self) -> Option<NaiveDate> {
        self.close_date
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn weights(&self) -> &TargetWeights {
        &self.weights
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn state(&self) -> &RebalanceState {
        self.orchestrator.state()
    }

    pub fn cycles(&self) -> usize {
        self.orchestrator.cycles()
    }

    pub fn pairing(&self) -> &PairingTracker {
        &self.pairing
    }

    pub fn financing(&self) -> &FinancingBook {
        &self.financing
    }

    pub fn cash_interest(&self) -> &CashInterest {
        &self.cash_interest
    }

    /// Whether `date` falls inside the open/close window.
    pub fn in_window(&self, date: NaiveDate) -> bool {
        date >= self.open_date && self.close_date.map_or(true, |close| date <= close)
    }

    /// Process one bar and return the instructions to submit.
    pub fn on_bar(&mut self, market: &dyn MarketView, broker: &mut dyn Broker) -> Vec<Instruction> {
        self.pairing.update(market);

        let mut instructions = match self.lifecycle {
            Lifecycle::Closed => return Vec::new(),
            Lifecycle::Open => self.carry(market, broker),
            Lifecycle::Pending => Vec::new(),
        };

        let Some(next_date) = market.next_date() else {
            return instructions;
        };

        if self.lifecycle == Lifecycle::Pending {
            if next_date >= self.open_date {
                instructions.extend(self.open(market, broker));
            }
            return instructions;
        }

        if self.close_date.is_some_and(|close| next_date >= close) {
            return self.close(market, broker);
        }

        let snapshot = PortfolioSnapshot::capture(&*broker, self.financing.legs());
        let mut ctx = TriggerContext {
            market,
            snapshot: &snapshot,
            weights: &mut self.weights,
            pairing: &self.pairing,
        };
        instructions.extend(self.orchestrator.step(&mut self.triggers, &mut ctx));
        instructions
    }

    /// Dividends, financing interest and cash interest.
    fn carry(&mut self, market: &dyn MarketView, broker: &mut dyn Broker) -> Vec<Instruction> {
        let reinvest = credit_dividends(market, broker, self.dividend_method);
        self.financing.on_bar(market, broker);
        self.cash_interest.on_bar(market, broker);
        reinvest
    }

    fn open(&mut self, market: &dyn MarketView, broker: &mut dyn Broker) -> Vec<Instruction> {
        info!(date = %market.date(), strategy = %self.name, "Strategy open");
        self.financing.open(market, broker);
        self.cash_interest.open(market.date());

        let snapshot = PortfolioSnapshot::capture(&*broker, self.financing.legs());
        let mut ctx = TriggerContext {
            market,
            snapshot: &snapshot,
            weights: &mut self.weights,
            pairing: &self.pairing,
        };
        for trigger in self.triggers.iter_mut() {
            trigger.open(&mut ctx);
        }

        let valuation = ctx.valuation();
        let buys = self.orchestrator.open_allocation(&valuation, ctx.weights, market);
        self.lifecycle = Lifecycle::Open;
        buys
    }

    fn close(&mut self, market: &dyn MarketView, broker: &mut dyn Broker) -> Vec<Instruction> {
        info!(date = %market.date(), strategy = %self.name, "Strategy close");

        let snapshot = PortfolioSnapshot::capture(&*broker, self.financing.legs());
        let orders = {
            let valuation = Valuation::new(&snapshot, market);
            self.orchestrator.liquidate(&valuation, market)
        };

        let mut ctx = TriggerContext {
            market,
            snapshot: &snapshot,
            weights: &mut self.weights,
            pairing: &self.pairing,
        };
        for trigger in self.triggers.iter_mut() {
            trigger.close(&mut ctx);
        }

        self.lifecycle = Lifecycle::Closed;
        orders
    }
}
