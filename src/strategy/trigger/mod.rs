//! Rebalance triggers.
//!
//! Every trigger exposes the same `check` / `open` / `close` contract and
//! returns a [`TriggerOutcome`] carrying a human-readable reason. Triggers
//! own their configuration and memory; the only shared mutable state they
//! see is the target-weight map passed in through [`TriggerContext`].

mod calendar;
mod deviation;
mod pairwise;
mod ranking;

pub use calendar::CalendarTrigger;
pub use deviation::DeviationTrigger;
pub use pairwise::{BandSide, PairwiseTrigger};
pub use ranking::RankingTrigger;

use super::valuation::{PortfolioSnapshot, Valuation};
use super::weights::TargetWeights;
use crate::analyzer::PairingTracker;
use crate::broker::MarketView;
use crate::config::TriggersConfig;
use crate::error::Result;
use chrono::NaiveDate;

/// Bars a rate-limited trigger stays silent after open or after firing.
pub const COOLDOWN_BARS: usize = 3;

/// Everything a trigger may read, plus the weights it may rewrite.
pub struct TriggerContext<'a> {
    pub market: &'a dyn MarketView,
    pub snapshot: &'a PortfolioSnapshot,
    pub weights: &'a mut TargetWeights,
    pub pairing: &'a PairingTracker,
}

impl<'a> TriggerContext<'a> {
    pub fn valuation(&self) -> Valuation<'_> {
        Valuation::new(self.snapshot, self.market)
    }

    pub fn date(&self) -> NaiveDate {
        self.market.date()
    }
}

/// Result of asking a trigger whether a rebalance is due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerOutcome {
    pub fired: bool,
    pub reason: String,
}

impl TriggerOutcome {
    pub fn fire(reason: impl Into<String>) -> Self {
        Self {
            fired: true,
            reason: reason.into(),
        }
    }

    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            fired: false,
            reason: reason.into(),
        }
    }

    pub fn idle() -> Self {
        Self::hold("")
    }
}

/// Bar-counted rate limit.
#[derive(Debug, Clone, Default)]
pub struct Cooldown {
    last: Option<usize>,
}

impl Cooldown {
    /// Start (or restart) the quiet period at `bar`.
    pub fn arm(&mut self, bar: usize) {
        self.last = Some(bar);
    }

    /// True once more than [`COOLDOWN_BARS`] bars separate `bar` from the
    /// last arming.
    pub fn ready(&self, bar: usize) -> bool {
        match self.last {
            Some(last) => bar > last + COOLDOWN_BARS,
            None => true,
        }
    }
}

/// Closed set of trigger policies.
#[derive(Debug, Clone)]
pub enum Trigger {
    Calendar(CalendarTrigger),
    Deviation(DeviationTrigger),
    Ranking(RankingTrigger),
    Pairwise(PairwiseTrigger),
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::Calendar(_) => "calendar",
            Trigger::Deviation(_) => "deviation",
            Trigger::Ranking(_) => "ranking",
            Trigger::Pairwise(_) => "pairwise",
        }
    }

    /// Per-bar evaluation.
    pub fn check(&mut self, ctx: &mut TriggerContext<'_>) -> TriggerOutcome {
        match self {
            Trigger::Calendar(t) => t.check(ctx),
            Trigger::Deviation(t) => t.check(ctx),
            Trigger::Ranking(t) => t.check(ctx),
            Trigger::Pairwise(t) => t.check(ctx),
        }
    }

    /// Strategy open, before the initial allocation.
    pub fn open(&mut self, ctx: &mut TriggerContext<'_>) -> TriggerOutcome {
        match self {
            Trigger::Calendar(_) => TriggerOutcome::idle(),
            Trigger::Deviation(t) => t.open(ctx),
            Trigger::Ranking(t) => t.open(ctx),
            Trigger::Pairwise(t) => t.open(ctx),
        }
    }

    /// Strategy close.
    pub fn close(&mut self, _ctx: &mut TriggerContext<'_>) -> TriggerOutcome {
        if let Trigger::Pairwise(t) = self {
            t.reset();
        }
        TriggerOutcome::idle()
    }

    /// Dates this trigger is scheduled on, if it is calendar driven.
    pub fn scheduled_dates(&self) -> &[NaiveDate] {
        match self {
            Trigger::Calendar(t) => t.schedule().dates(),
            Trigger::Ranking(t) => t.schedule().dates(),
            _ => &[],
        }
    }
}

/// Build triggers in evaluation order: ranking, calendar, deviation,
/// pairwise. `schedule_end` bounds the precomputed calendars.
pub fn build_triggers(
    config: &TriggersConfig,
    initial_weights: &TargetWeights,
    open_date: NaiveDate,
    schedule_end: NaiveDate,
) -> Result<Vec<Trigger>> {
    let mut triggers = Vec::new();

    if let Some(ranking) = &config.ranking {
        triggers.push(Trigger::Ranking(RankingTrigger::new(
            ranking,
            initial_weights,
            open_date,
            schedule_end,
        )?));
    }
    if let Some(calendar) = &config.calendar {
        triggers.push(Trigger::Calendar(CalendarTrigger::new(
            calendar,
            open_date,
            schedule_end,
        )?));
    }
    if let Some(deviation) = &config.deviation {
        triggers.push(Trigger::Deviation(DeviationTrigger::new(deviation)?));
    }
    if let Some(pairwise) = &config.pairwise {
        triggers.push(Trigger::Pairwise(PairwiseTrigger::new(pairwise)?));
    }

    Ok(triggers)
}
