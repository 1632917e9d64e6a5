//! Cross-sectional ranking trigger.
//!
//! On each scheduled date (and once at open) every candidate is scored by
//! `(price - factor) / factor`, the top `N` are selected in the configured
//! direction, and the target weights are overwritten with exactly those `N`
//! symbols carrying the configured weights in rank order.

use super::{TriggerContext, TriggerOutcome};
use crate::config::RankingTriggerConfig;
use crate::error::{ConfigError, Result};
use crate::strategy::schedule::Schedule;
use crate::strategy::weights::TargetWeights;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RankingTrigger {
    schedule: Schedule,
    factor: String,
    ascending: bool,
    top_n: usize,
    weights: Vec<Decimal>,
    universe: Vec<String>,
}

impl RankingTrigger {
    pub fn new(
        config: &RankingTriggerConfig,
        initial_weights: &TargetWeights,
        open: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self> {
        config.period.validate()?;
        if config.weights.len() != config.top_n {
            return Err(ConfigError::RankingWeightCount {
                expected: config.top_n,
                actual: config.weights.len(),
            });
        }
        let sum: Decimal = config.weights.iter().sum();
        if (sum - Decimal::ONE).abs() > dec!(0.000001) {
            return Err(ConfigError::RankingWeightSum(sum));
        }

        let universe = if config.universe.is_empty() {
            initial_weights.symbols().map(str::to_string).collect()
        } else {
            config.universe.clone()
        };

        Ok(Self {
            schedule: Schedule::new(&[], Some(&config.period), open, end),
            factor: config.factor.clone(),
            ascending: config.ascending,
            top_n: config.top_n,
            weights: config.weights.clone(),
            universe,
        })
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn universe(&self) -> &[String] {
        &self.universe
    }

    pub fn open(&mut self, ctx: &mut TriggerContext<'_>) -> TriggerOutcome {
        self.rank(ctx)
    }

    pub fn check(&mut self, ctx: &mut TriggerContext<'_>) -> TriggerOutcome {
        match self.schedule.crossed(ctx.date(), ctx.market.previous_date()) {
            Some(_) => self.rank(ctx),
            None => TriggerOutcome::hold("not a ranking date"),
        }
    }

    fn rank(&self, ctx: &mut TriggerContext<'_>) -> TriggerOutcome {
        let mut scored: Vec<(&str, Decimal)> = Vec::with_capacity(self.universe.len());
        {
            let valuation = ctx.valuation();
            for symbol in &self.universe {
                let factor = match ctx.market.factor(symbol, &self.factor) {
                    Some(f) if f > Decimal::ZERO => f,
                    other => {
                        debug!(symbol = %symbol, factor = ?other, "Skipping symbol without usable factor");
                        continue;
                    }
                };
                let Some(price) = valuation.price(symbol) else {
                    debug!(symbol = %symbol, "Skipping symbol without price");
                    continue;
                };
                scored.push((symbol.as_str(), (price - factor) / factor));
            }
        }

        if scored.len() < self.top_n {
            warn!(
                date = %ctx.date(),
                candidates = scored.len(),
                top_n = self.top_n,
                "Not enough ranked symbols, keeping current weights"
            );
            return TriggerOutcome::hold("not enough ranked symbols");
        }

        // Stable sort: ties keep universe order
        if self.ascending {
            scored.sort_by(|a, b| a.1.cmp(&b.1));
        } else {
            scored.sort_by(|a, b| b.1.cmp(&a.1));
        }

        let selected: Vec<(String, Decimal)> = scored
            .iter()
            .take(self.top_n)
            .zip(&self.weights)
            .map(|((symbol, _), weight)| (symbol.to_string(), *weight))
            .collect();

        let reason = format!(
            "ranking by {}: {}",
            self.factor,
            selected
                .iter()
                .map(|(s, w)| format!("{}={}", s, w))
                .collect::<Vec<_>>()
                .join(", ")
        );
        info!(date = %ctx.date(), "{}", reason);

        ctx.weights.replace(selected);
        TriggerOutcome::fire(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::PairingTracker;
    use crate::broker::MockMarketView;
    use crate::strategy::trigger::test_support::scripted_market;
    use crate::strategy::valuation::PortfolioSnapshot;
    use crate::strategy::{Frequency, PeriodSpec};
    use rust_decimal_macros::dec;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn config(ascending: bool, top_n: usize, weights: Vec<Decimal>) -> RankingTriggerConfig {
        RankingTriggerConfig {
            period: PeriodSpec::new(Frequency::Month, 1),
            factor: "MA".to_string(),
            ascending,
            top_n,
            weights,
            universe: Vec::new(),
        }
    }

    fn initial() -> TargetWeights {
        TargetWeights::new(vec![
            ("AAA".to_string(), dec!(0.25)),
            ("BBB".to_string(), dec!(0.25)),
            ("CCC".to_string(), dec!(0.25)),
            ("DDD".to_string(), dec!(0.25)),
        ])
    }

    /// Prices are all 10; factors give AAA +25%, BBB -50%, CCC +100%, DDD no factor.
    fn scored_market(day: NaiveDate, previous: Option<NaiveDate>) -> MockMarketView {
        let mut market = scripted_market(
            day,
            previous,
            3,
            &[("AAA", dec!(10)), ("BBB", dec!(10)), ("CCC", dec!(10)), ("DDD", dec!(10))],
        );
        market.expect_factor().returning(|symbol, _| match symbol {
            "AAA" => Some(dec!(8)),
            "BBB" => Some(dec!(20)),
            "CCC" => Some(dec!(5)),
            "DDD" => Some(dec!(0)),
            _ => None,
        });
        market
    }

    fn run(trigger: &mut RankingTrigger, day: NaiveDate, previous: NaiveDate, weights: &mut TargetWeights) -> TriggerOutcome {
        let market = scored_market(day, Some(previous));
        let snapshot = PortfolioSnapshot::default();
        let pairing = PairingTracker::new(200, dec!(1.5));
        let mut ctx = TriggerContext {
            market: &market,
            snapshot: &snapshot,
            weights,
            pairing: &pairing,
        };
        trigger.check(&mut ctx)
    }

    #[test]
    fn test_descending_selection_rewrites_weights() {
        let mut weights = initial();
        let mut trigger =
            RankingTrigger::new(&config(false, 2, vec![dec!(0.6), dec!(0.4)]), &weights, date(1, 1), date(6, 30))
                .unwrap();

        let outcome = run(&mut trigger, date(2, 1), date(1, 31), &mut weights);
        assert!(outcome.fired);
        assert_eq!(weights.len(), 2);
        assert_eq!(weights.get("CCC"), Some(dec!(0.6)));
        assert_eq!(weights.get("AAA"), Some(dec!(0.4)));
        assert_eq!(weights.get("BBB"), None);
        assert_eq!(weights.total(), Decimal::ONE);
    }

    #[test]
    fn test_ascending_selection() {
        let mut weights = initial();
        let mut trigger =
            RankingTrigger::new(&config(true, 1, vec![dec!(1)]), &weights, date(1, 1), date(6, 30)).unwrap();

        run(&mut trigger, date(3, 1), date(2, 29), &mut weights);
        assert_eq!(weights.iter().collect::<Vec<_>>(), vec![("BBB", dec!(1))]);
    }

    #[test]
    fn test_too_few_candidates_keeps_weights() {
        let mut weights = initial();
        let mut trigger = RankingTrigger::new(
            &config(false, 4, vec![dec!(0.25), dec!(0.25), dec!(0.25), dec!(0.25)]),
            &weights,
            date(1, 1),
            date(6, 30),
        )
        .unwrap();

        let outcome = run(&mut trigger, date(2, 1), date(1, 31), &mut weights);
        assert!(!outcome.fired);
        assert_eq!(weights, initial());
    }

    #[test]
    fn test_open_ranks_without_schedule_date() {
        let mut weights = initial();
        let mut trigger =
            RankingTrigger::new(&config(false, 2, vec![dec!(0.7), dec!(0.3)]), &weights, date(1, 1), date(6, 30))
                .unwrap();

        // First bar: no previous date and not a scheduled day
        let market = scored_market(date(1, 2), None);
        let snapshot = PortfolioSnapshot::default();
        let pairing = PairingTracker::new(200, dec!(1.5));
        let mut ctx = TriggerContext {
            market: &market,
            snapshot: &snapshot,
            weights: &mut weights,
            pairing: &pairing,
        };
        assert!(!trigger.check(&mut ctx).fired);
        assert_eq!(ctx.weights.len(), 4);

        let outcome = trigger.open(&mut ctx);
        assert!(outcome.fired);
        assert_eq!(outcome.reason, "ranking by MA: CCC=0.7, AAA=0.3");
        assert_eq!(
            weights.iter().collect::<Vec<_>>(),
            vec![("CCC", dec!(0.7)), ("AAA", dec!(0.3))]
        );
    }

    #[test]
    fn test_off_schedule_does_not_rank() {
        let mut weights = initial();
        let mut trigger =
            RankingTrigger::new(&config(false, 1, vec![dec!(1)]), &weights, date(1, 1), date(6, 30)).unwrap();

        let outcome = run(&mut trigger, date(2, 14), date(2, 13), &mut weights);
        assert!(!outcome.fired);
        assert_eq!(weights.len(), 4);
    }

    #[test]
    fn test_universe_survives_rewrites() {
        let mut weights = initial();
        let mut trigger =
            RankingTrigger::new(&config(false, 1, vec![dec!(1)]), &weights, date(1, 1), date(6, 30)).unwrap();

        run(&mut trigger, date(2, 1), date(1, 31), &mut weights);
        assert_eq!(weights.len(), 1);
        assert_eq!(trigger.universe().len(), 4);
    }

    #[test]
    fn test_weight_validation() {
        let weights = initial();
        assert!(matches!(
            RankingTrigger::new(&config(false, 2, vec![dec!(1)]), &weights, date(1, 1), date(6, 30)),
            Err(ConfigError::RankingWeightCount { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            RankingTrigger::new(&config(false, 2, vec![dec!(0.5), dec!(0.4)]), &weights, date(1, 1), date(6, 30)),
            Err(ConfigError::RankingWeightSum(_))
        ));
    }
}
