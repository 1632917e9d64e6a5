//! Pairwise band trigger for a two-symbol statistical-arbitrage pair.
//!
//! Reads today's ratio and bands from the [`PairingTracker`](crate::analyzer::PairingTracker).
//! Breaking above the upper band tilts the weights toward B, breaking below
//! the lower band tilts them toward A. The trigger remembers which side it
//! last fired on and will not fire for the same side again until it has
//! fired for the other one.

use super::{Cooldown, TriggerContext, TriggerOutcome};
use crate::analyzer::PairKey;
use crate::config::PairwiseTriggerConfig;
use crate::error::{ConfigError, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BandSide {
    #[default]
    Neutral,
    Upper,
    Lower,
}

#[derive(Debug, Clone)]
pub struct PairwiseTrigger {
    key: PairKey,
    upper_weights: [Decimal; 2],
    side: BandSide,
    cooldown: Cooldown,
}

impl PairwiseTrigger {
    pub fn new(config: &PairwiseTriggerConfig) -> Result<Self> {
        let [first, second] = config.symbols.as_slice() else {
            return Err(ConfigError::PairwiseSymbols(config.symbols.len()));
        };

        Ok(Self {
            key: PairKey::new(first.clone(), second.clone()),
            upper_weights: config.upper_weights,
            side: BandSide::Neutral,
            cooldown: Cooldown::default(),
        })
    }

    pub fn key(&self) -> &PairKey {
        &self.key
    }

    pub fn side(&self) -> BandSide {
        self.side
    }

    pub fn reset(&mut self) {
        self.side = BandSide::Neutral;
    }

    pub fn open(&mut self, ctx: &mut TriggerContext<'_>) -> TriggerOutcome {
        self.cooldown.arm(ctx.market.bar_index());
        TriggerOutcome::idle()
    }

    pub fn check(&mut self, ctx: &mut TriggerContext<'_>) -> TriggerOutcome {
        let bar = ctx.market.bar_index();
        if !self.cooldown.ready(bar) {
            return TriggerOutcome::hold("pairwise trigger cooling down");
        }

        let date = ctx.date();
        let record = match ctx.pairing.latest(&self.key) {
            Some(record) if record.warmed_up && record.date == date => record,
            _ => {
                debug!(pair = %self.key, date = %date, "Pair bands not available");
                return TriggerOutcome::hold("pair bands not available");
            }
        };

        let [heavy_a, heavy_b] = self.upper_weights;
        let (side, weights) = if record.ratio > record.upper && self.side != BandSide::Upper {
            (BandSide::Upper, (heavy_a, heavy_b))
        } else if record.ratio < record.lower && self.side != BandSide::Lower {
            (BandSide::Lower, (heavy_b, heavy_a))
        } else {
            return TriggerOutcome::hold("ratio inside bands");
        };

        ctx.weights.set(&self.key.first, weights.0);
        ctx.weights.set(&self.key.second, weights.1);
        self.side = side;
        self.cooldown.arm(bar);

        let reason = format!(
            "{} ratio {} broke {:?} band [{}, {}]",
            self.key,
            record.ratio.round_dp(6),
            side,
            record.lower.round_dp(6),
            record.upper.round_dp(6)
        )
        .to_lowercase();
        info!(date = %date, pair = %self.key, "Pairwise trigger fired: {}", reason);
        TriggerOutcome::fire(reason)
    }
}
