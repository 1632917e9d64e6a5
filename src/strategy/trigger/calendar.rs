//! Calendar trigger: explicit dates and/or a periodic schedule, optionally
//! gated by a weight-deviation watermark.

use super::{TriggerContext, TriggerOutcome};
use crate::config::CalendarTriggerConfig;
use crate::error::Result;
use crate::strategy::schedule::Schedule;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fmt::Write;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CalendarTrigger {
    schedule: Schedule,
    watermark: Decimal,
}

impl CalendarTrigger {
    pub fn new(config: &CalendarTriggerConfig, open: NaiveDate, end: NaiveDate) -> Result<Self> {
        if let Some(period) = &config.period {
            period.validate()?;
        }
        let schedule = Schedule::new(&config.dates, config.period.as_ref(), open, end);
        debug!(dates = schedule.dates().len(), "Calendar schedule built");

        Ok(Self {
            schedule,
            watermark: config.watermark,
        })
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn check(&mut self, ctx: &mut TriggerContext<'_>) -> TriggerOutcome {
        let date = ctx.date();
        let Some(crossed) = self.schedule.crossed(date, ctx.market.previous_date()) else {
            return TriggerOutcome::hold("not a scheduled date");
        };

        if self.watermark <= Decimal::ZERO {
            return TriggerOutcome::fire(format!("scheduled rebalance {}", crossed));
        }

        let deviations = ctx.valuation().weight_deviations(ctx.weights);
        let max_deviation = deviations
            .iter()
            .map(|(_, d)| *d)
            .max()
            .unwrap_or(Decimal::ZERO);

        if max_deviation <= self.watermark {
            info!(
                date = %date,
                max_deviation = %max_deviation.round_dp(4),
                watermark = %self.watermark,
                "Scheduled rebalance suppressed by watermark"
            );
            return TriggerOutcome::hold("deviation within watermark");
        }

        let mut reason = format!(
            "scheduled rebalance {}: max deviation {} above watermark {}",
            crossed,
            max_deviation.round_dp(4),
            self.watermark
        );
        for (symbol, deviation) in deviations.iter().filter(|(_, d)| *d > self.watermark) {
            let _ = write!(reason, "; {} {}", symbol, deviation.round_dp(4));
        }
        TriggerOutcome::fire(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::PairingTracker;
    use crate::strategy::trigger::test_support::scripted_market;
    use crate::strategy::valuation::PortfolioSnapshot;
    use crate::strategy::weights::TargetWeights;
    use crate::strategy::{Frequency, PeriodSpec};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn trigger(watermark: Decimal) -> CalendarTrigger {
        CalendarTrigger::new(
            &CalendarTriggerConfig {
                dates: Vec::new(),
                period: Some(PeriodSpec::new(Frequency::Month, -1)),
                watermark,
            },
            date(2024, 1, 1),
            date(2024, 6, 30),
        )
        .unwrap()
    }

    fn check(trigger: &mut CalendarTrigger, day: NaiveDate, snapshot: &PortfolioSnapshot) -> TriggerOutcome {
        let market = scripted_market(
            day,
            Some(day - Duration::days(1)),
            10,
            &[("AAA", dec!(10)), ("BBB", dec!(10))],
        );
        let mut weights = TargetWeights::new(vec![
            ("AAA".to_string(), dec!(0.5)),
            ("BBB".to_string(), dec!(0.5)),
        ]);
        let pairing = PairingTracker::new(200, dec!(1.5));
        let mut ctx = TriggerContext {
            market: &market,
            snapshot,
            weights: &mut weights,
            pairing: &pairing,
        };
        trigger.check(&mut ctx)
    }

    fn balanced() -> PortfolioSnapshot {
        let mut snapshot = PortfolioSnapshot::default();
        snapshot.holdings.insert("AAA".to_string(), dec!(50));
        snapshot.holdings.insert("BBB".to_string(), dec!(50));
        snapshot
    }

    fn skewed() -> PortfolioSnapshot {
        let mut snapshot = PortfolioSnapshot::default();
        snapshot.holdings.insert("AAA".to_string(), dec!(80));
        snapshot.holdings.insert("BBB".to_string(), dec!(20));
        snapshot
    }

    #[test]
    fn test_fires_exactly_on_schedule_without_watermark() {
        let mut trigger = trigger(Decimal::ZERO);
        let snapshot = balanced();
        let qualifying: Vec<NaiveDate> = trigger.schedule().dates().to_vec();

        let mut day = date(2024, 1, 2);
        while day <= date(2024, 6, 30) {
            let outcome = check(&mut trigger, day, &snapshot);
            assert_eq!(outcome.fired, qualifying.contains(&day), "day {}", day);
            day += Duration::days(1);
        }
    }

    #[test]
    fn test_watermark_suppresses_balanced_portfolio() {
        let mut trigger = trigger(dec!(0.05));

        let outcome = check(&mut trigger, date(2024, 1, 31), &balanced());
        assert!(!outcome.fired);

        let outcome = check(&mut trigger, date(2024, 1, 31), &skewed());
        assert!(outcome.fired);
        assert!(outcome.reason.contains("AAA"));
    }

    #[test]
    fn test_off_schedule_never_fires() {
        let mut trigger = trigger(Decimal::ZERO);
        assert!(!check(&mut trigger, date(2024, 1, 15), &skewed()).fired);
    }
}
