//! Deviation trigger: fires when a symbol's live weight drifts past its
//! rise/fall threshold. Symbols are checked in declared order and the first
//! breach wins. Rate limited by [`Cooldown`].

use super::{Cooldown, TriggerContext, TriggerOutcome};
use crate::config::{DeviationThreshold, DeviationTriggerConfig};
use crate::error::{ConfigError, Result};
use rust_decimal::Decimal;
use tracing::info;

#[derive(Debug, Clone)]
pub struct DeviationTrigger {
    thresholds: Vec<DeviationThreshold>,
    cooldown: Cooldown,
}

impl DeviationTrigger {
    pub fn new(config: &DeviationTriggerConfig) -> Result<Self> {
        for threshold in &config.symbols {
            if threshold.rise < Decimal::ZERO || threshold.fall < Decimal::ZERO {
                return Err(ConfigError::NegativeThreshold {
                    symbol: threshold.symbol.clone(),
                });
            }
        }

        Ok(Self {
            thresholds: config.symbols.clone(),
            cooldown: Cooldown::default(),
        })
    }

    pub fn open(&mut self, ctx: &mut TriggerContext<'_>) -> TriggerOutcome {
        self.cooldown.arm(ctx.market.bar_index());
        TriggerOutcome::idle()
    }

    pub fn check(&mut self, ctx: &mut TriggerContext<'_>) -> TriggerOutcome {
        let bar = ctx.market.bar_index();
        if !self.cooldown.ready(bar) {
            return TriggerOutcome::hold("deviation trigger cooling down");
        }

        let valuation = ctx.valuation();
        for threshold in &self.thresholds {
            let symbol = threshold.symbol.as_str();
            let current = valuation.current_weight(symbol);
            let target = ctx.weights.get(symbol).unwrap_or(Decimal::ZERO);
            let deviation = current - target;

            let breach = if deviation > Decimal::ZERO && deviation > threshold.rise {
                Some(("above", threshold.rise))
            } else if deviation < Decimal::ZERO && deviation.abs() > threshold.fall {
                Some(("below", threshold.fall))
            } else {
                None
            };

            if let Some((side, limit)) = breach {
                let reason = format!(
                    "{} weight {} {} target {} by {} (limit {})",
                    symbol,
                    current.round_dp(4),
                    side,
                    target,
                    deviation.abs().round_dp(4),
                    limit
                );
                info!(date = %ctx.date(), symbol = %symbol, "Deviation trigger fired: {}", reason);
                self.cooldown.arm(bar);
                return TriggerOutcome::fire(reason);
            }
        }

        TriggerOutcome::hold("weights within thresholds")
    }
}
