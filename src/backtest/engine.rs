//! Backtesting simulation engine.
//!
//! Replays historical bars through the rebalance strategy. Each bar:
//! queued instructions fill at the bar's open, the strategy decides, the
//! new instructions are queued for the next bar, and a daily snapshot is
//! recorded while the strategy window is active.

use crate::analyzer::{DailySnapshot, InstructionLedger, InstructionRecord, PairRecord, SnapshotRecorder};
use crate::backtest::metrics::{Activity, BacktestMetrics, EquityPoint};
use crate::backtest::{BarWindow, DataLoader};
use crate::broker::{Broker, MarketView, SimulatedBroker};
use crate::config::Config;
use crate::strategy::{FinancingTrade, PortfolioSnapshot, RebalanceState, RebalanceStrategy, TargetWeights, Valuation};
use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Complete result of a backtest run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub config: Config,
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub snapshots: Vec<DailySnapshot>,
    pub instructions: Vec<InstructionRecord>,
    pub pairing: BTreeMap<String, Vec<PairRecord>>,
    pub financing_trades: Vec<FinancingTrade>,
    pub final_state: RebalanceState,
    pub final_weights: TargetWeights,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub bars_processed: usize,
}

impl BacktestResult {
    /// Export daily snapshots to CSV.
    pub fn snapshots_to_csv(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "date,cash,total_asset,financing,financing_interest,cash_interest,total_value,net_value")?;

        for s in &self.snapshots {
            writeln!(
                file,
                "{},{},{},{},{},{},{},{}",
                s.date,
                s.cash,
                s.total_asset,
                s.financing,
                s.financing_interest,
                s.total_cash_interest,
                s.total_value,
                s.net_value,
            )?;
        }

        Ok(())
    }

    /// Get a summary string.
    pub fn summary(&self) -> String {
        format!(
            "{}\n\nBacktest Period: {} to {}\nBars: {}\nFinal State: {}",
            self.metrics.summary(),
            self.start_date.format("%Y-%m-%d"),
            self.end_date.format("%Y-%m-%d"),
            self.bars_processed,
            self.final_state.name(),
        )
    }
}

/// The backtesting simulation engine.
pub struct BacktestEngine<D: DataLoader> {
    data_loader: D,
    config: Config,
}

impl<D: DataLoader> BacktestEngine<D> {
    /// Create a new backtest engine.
    pub fn new(data_loader: D, config: Config) -> Self {
        Self { data_loader, config }
    }

    /// Replay the whole available data range.
    pub fn run_all(&mut self) -> Result<BacktestResult> {
        let Some((start, end)) = self.data_loader.available_range() else {
            anyhow::bail!("No data available");
        };
        self.run(start, end)
    }

    /// Run the backtest over `[start, end]`.
    pub fn run(&mut self, start: NaiveDate, end: NaiveDate) -> Result<BacktestResult> {
        info!("Starting backtest from {} to {}", start, end);

        let bars = self.data_loader.load_bars(start, end)?;
        let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
            anyhow::bail!("No data available for the specified date range");
        };
        let (first_date, last_date) = (first.date, last.date);
        info!("Loaded {} bars", bars.len());

        let symbols = self.data_loader.available_symbols();
        let mut strategy = RebalanceStrategy::new(&self.config, self.config.schedule_end(last_date))?;
        strategy.track_pairs(&symbols);

        let backtest = &self.config.backtest;
        let mut broker = SimulatedBroker::new(backtest.initial_cash, backtest.commission_rate);
        let mut ledger = InstructionLedger::new();
        let mut recorder = SnapshotRecorder::new();
        let mut window = BarWindow::new(&bars, symbols);

        while window.advance() {
            for report in broker.execute_pending(&window) {
                ledger.apply(&report);
            }

            for instruction in strategy.on_bar(&window, &mut broker) {
                let id = broker.submit(&instruction);
                ledger.submitted(id, instruction);
            }

            let date = window.date();
            if strategy.in_window(date) {
                let portfolio = PortfolioSnapshot::capture(&broker, strategy.financing().legs());
                let valuation = Valuation::new(&portfolio, &window);
                recorder.record(date, &valuation, strategy.cash_interest().accrued());
            }

            let i = window.bar_index();
            if i % 100 == 0 {
                debug!(
                    "Progress: {}/{} ({:.1}%), Cash: {:.2}",
                    i,
                    bars.len(),
                    (i as f64 / bars.len() as f64) * 100.0,
                    broker.cash()
                );
            }
        }

        let snapshots = recorder.into_inner();
        let equity_curve = EquityPoint::curve(&snapshots);
        let activity = Activity {
            rebalance_cycles: strategy.cycles(),
            instructions: ledger.len(),
            filled: ledger.filled_count(),
            rejected: ledger.rejected_count(),
        };
        let metrics = BacktestMetrics::calculate(
            &equity_curve,
            broker.initial_cash(),
            broker.total_commission(),
            strategy.financing().total_interest(),
            strategy.cash_interest().total(),
            activity,
        );

        if broker.pending_count() > 0 {
            debug!(pending = broker.pending_count(), "Instructions left unfilled at end of data");
        }
        info!(
            "Backtest complete. Final cash: {:.2}, cycles: {}",
            broker.cash(),
            strategy.cycles()
        );

        Ok(BacktestResult {
            config: self.config.clone(),
            metrics,
            equity_curve,
            snapshots,
            instructions: ledger.records().to_vec(),
            pairing: strategy.pairing().export(),
            financing_trades: strategy.financing().trades().to_vec(),
            final_state: strategy.state().clone(),
            final_weights: strategy.weights().clone(),
            start_date: first_date,
            end_date: last_date,
            bars_processed: bars.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::InstructionStatus;
    use crate::backtest::{BarSnapshot, CsvDataLoader, SymbolBar};
    use crate::broker::InstructionKind;
    use crate::config::{
        CalendarTriggerConfig, PairwiseTriggerConfig, RankingTriggerConfig, StrategyConfig, TriggersConfig, WeightEntry,
    };
    use crate::strategy::{Frequency, PeriodSpec};
    use chrono::{Datelike, Duration, Weekday};
    use rust_decimal_macros::dec;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut dates = Vec::new();
        let mut day = start;
        while day <= end {
            if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                dates.push(day);
            }
            day += Duration::days(1);
        }
        dates
    }

    /// One bar per date; open equals close.
    fn loader(dates: &[NaiveDate], price: impl Fn(usize, &str) -> Decimal, symbols: &[&str]) -> CsvDataLoader {
        let snapshots = dates
            .iter()
            .enumerate()
            .map(|(i, d)| BarSnapshot {
                date: *d,
                bars: symbols
                    .iter()
                    .map(|s| {
                        let p = price(i, s);
                        SymbolBar::new(*s, p, p)
                    })
                    .collect(),
            })
            .collect();
        CsvDataLoader::from_snapshots(snapshots)
    }

    fn config(close: Option<NaiveDate>, weights: &[(&str, Decimal)], triggers: TriggersConfig) -> Config {
        let mut strategy = StrategyConfig::new(
            date(1, 1),
            close,
            weights.iter().map(|(s, w)| WeightEntry::new(*s, *w)).collect(),
        );
        strategy.triggers = Some(triggers);
        Config::with_strategy(strategy)
    }

    fn kinds(result: &BacktestResult, kind: InstructionKind) -> Vec<&InstructionRecord> {
        result
            .instructions
            .iter()
            .filter(|r| r.instruction.kind == kind)
            .collect()
    }

    fn trending(i: usize, symbol: &str) -> Decimal {
        match symbol {
            "AAA" => dec!(100) + Decimal::from(i as u64) * dec!(0.5),
            _ => dec!(50),
        }
    }

    // =========================================================================
    // Run Tests
    // =========================================================================

    #[test]
    fn test_run_with_empty_data() {
        let loader = CsvDataLoader::from_snapshots(vec![]);
        let config = config(None, &[("AAA", dec!(1))], TriggersConfig::default());
        let mut engine = BacktestEngine::new(loader, config);

        assert!(engine.run_all().is_err());
        assert!(engine.run(date(1, 1), date(12, 31)).is_err());
    }

    #[test]
    fn test_invalid_config_fails_run() {
        let dates = weekdays(date(1, 2), date(1, 12));
        let loader = loader(&dates, trending, &["AAA"]);
        let config = config(None, &[("AAA", dec!(1.2))], TriggersConfig::default());

        assert!(BacktestEngine::new(loader, config).run_all().is_err());
    }

    // =========================================================================
    // Scenario Tests
    // =========================================================================

    #[test]
    fn test_open_only_without_triggers() {
        let dates = weekdays(date(1, 2), date(2, 29));
        let loader = loader(&dates, trending, &["AAA", "BBB"]);
        let config = config(None, &[("AAA", dec!(0.5)), ("BBB", dec!(0.5))], TriggersConfig::default());

        let result = BacktestEngine::new(loader, config).run_all().unwrap();

        assert_eq!(result.instructions.len(), 2);
        for record in &result.instructions {
            assert_eq!(record.instruction.kind, InstructionKind::Open);
            assert_eq!(record.instruction.date, date(1, 2));
            assert!(matches!(
                record.outcome,
                InstructionStatus::Filled { date: d, .. } if d == date(1, 3)
            ));
        }
        assert_eq!(result.metrics.activity.rebalance_cycles, 0);
        assert!(result.final_state.is_idle());
        assert_eq!(result.snapshots.len(), dates.len());
    }

    #[test]
    fn test_ranking_sets_opening_allocation() {
        let dates = weekdays(date(1, 2), date(1, 19));
        let snapshots = dates
            .iter()
            .map(|d| BarSnapshot {
                date: *d,
                bars: [("AAA", Some(dec!(8))), ("BBB", Some(dec!(20))), ("CCC", Some(dec!(5))), ("DDD", None)]
                    .into_iter()
                    .map(|(symbol, ma)| {
                        let mut bar = SymbolBar::new(symbol, dec!(10), dec!(10));
                        if let Some(ma) = ma {
                            bar.factors.insert("MA".to_string(), ma);
                        }
                        bar
                    })
                    .collect(),
            })
            .collect();
        let loader = CsvDataLoader::from_snapshots(snapshots);
        let triggers = TriggersConfig {
            ranking: Some(RankingTriggerConfig {
                period: PeriodSpec::new(Frequency::Month, 1),
                factor: "MA".to_string(),
                ascending: false,
                top_n: 2,
                weights: vec![dec!(0.6), dec!(0.4)],
                universe: Vec::new(),
            }),
            ..Default::default()
        };
        let config = config(
            None,
            &[("AAA", dec!(0.3)), ("BBB", dec!(0.3)), ("CCC", dec!(0.3)), ("DDD", dec!(0.1))],
            triggers,
        );

        let result = BacktestEngine::new(loader, config).run_all().unwrap();

        // CCC (+100%) and AAA (+25%) are the top two; BBB and DDD are never bought
        let opens: Vec<_> = kinds(&result, InstructionKind::Open)
            .into_iter()
            .map(|r| (r.instruction.symbol.as_str(), r.instruction.size, r.instruction.date))
            .collect();
        assert_eq!(
            opens,
            vec![("CCC", dec!(60000), date(1, 2)), ("AAA", dec!(40000), date(1, 2))]
        );
        assert_eq!(result.instructions.len(), 2);
        assert!(result
            .instructions
            .iter()
            .all(|r| matches!(r.outcome, InstructionStatus::Filled { .. })));
        assert_eq!(
            result.final_weights.iter().collect::<Vec<_>>(),
            vec![("CCC", dec!(0.6)), ("AAA", dec!(0.4))]
        );
        assert_eq!(result.metrics.activity.rebalance_cycles, 0);
    }

    #[test]
    fn test_monthly_calendar_cycles() {
        let dates = weekdays(date(1, 2), date(4, 5));
        let loader = loader(&dates, trending, &["AAA", "BBB"]);
        let triggers = TriggersConfig {
            calendar: Some(CalendarTriggerConfig {
                period: Some(PeriodSpec::new(Frequency::Month, -1)),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = config(Some(date(3, 31)), &[("AAA", dec!(0.5)), ("BBB", dec!(0.5))], triggers);

        let result = BacktestEngine::new(loader, config).run_all().unwrap();

        let sell_dates: Vec<NaiveDate> = kinds(&result, InstructionKind::RebalanceSell)
            .iter()
            .map(|r| r.instruction.date)
            .collect();
        let buy_dates: Vec<NaiveDate> = kinds(&result, InstructionKind::RebalanceBuy)
            .iter()
            .map(|r| r.instruction.date)
            .collect();
        assert_eq!(sell_dates, vec![date(1, 31), date(2, 29)]);
        assert_eq!(buy_dates, vec![date(2, 1), date(3, 1)]);
        assert_eq!(result.metrics.activity.rebalance_cycles, 2);

        // AAA drifts up, so it is the one sold and BBB the one bought
        assert!(kinds(&result, InstructionKind::RebalanceSell)
            .iter()
            .all(|r| r.instruction.symbol == "AAA" && r.instruction.reason.starts_with("calendar: ")));
        assert!(kinds(&result, InstructionKind::RebalanceBuy)
            .iter()
            .all(|r| r.instruction.symbol == "BBB"));

        // Close falls on a Sunday: liquidation is decided on the last bar before it
        let liquidation = kinds(&result, InstructionKind::Liquidation);
        assert_eq!(liquidation.len(), 2);
        assert!(liquidation.iter().all(|r| r.instruction.date == date(3, 29)));
        assert_eq!(result.metrics.activity.rejected, 0);

        assert_eq!(result.snapshots.last().map(|s| s.date), Some(date(3, 29)));
        for snapshot in &result.snapshots {
            let assets: Decimal = snapshot.assets.values().sum();
            assert_eq!(snapshot.total_value, snapshot.cash + assets);
            assert!(snapshot.cash >= Decimal::ZERO);
        }
    }

    #[test]
    fn test_pairwise_break_switches_weights_once() {
        let ratios = [
            dec!(1.0), dec!(1.01), dec!(0.99), dec!(1.0), dec!(1.01),
            dec!(0.99), dec!(1.0), dec!(1.01), dec!(1.4),
        ];
        let dates = weekdays(date(1, 2), date(1, 19));
        let price = |i: usize, symbol: &str| match symbol {
            "AAA" => dec!(10) * ratios.get(i).copied().unwrap_or(dec!(1.4)),
            _ => dec!(10),
        };
        let loader = loader(&dates, price, &["AAA", "BBB"]);
        let triggers = TriggersConfig {
            pairwise: Some(PairwiseTriggerConfig {
                symbols: vec!["AAA".to_string(), "BBB".to_string()],
                upper_weights: [dec!(0.45), dec!(0.55)],
            }),
            ..Default::default()
        };
        let mut config = config(None, &[("AAA", dec!(0.5)), ("BBB", dec!(0.5))], triggers);
        config.pairing.window = 5;

        let result = BacktestEngine::new(loader, config).run_all().unwrap();

        assert_eq!(result.metrics.activity.rebalance_cycles, 1);
        assert_eq!(result.final_weights.get("AAA"), Some(dec!(0.45)));
        assert_eq!(result.final_weights.get("BBB"), Some(dec!(0.55)));

        let sells = kinds(&result, InstructionKind::RebalanceSell);
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].instruction.symbol, "AAA");
        assert_eq!(sells[0].instruction.date, date(1, 12));
        assert!(sells[0].instruction.reason.starts_with("pairwise: "));

        let history = &result.pairing["AAA/BBB"];
        assert_eq!(history.len(), dates.len());
        assert!(history[8].ratio > history[8].upper);
    }

    #[test]
    fn test_buy_phase_deferred_below_reserve() {
        let dates = weekdays(date(1, 2), date(1, 10));
        // Everything doubles the bar after the scheduled rebalance
        let price = |i: usize, _: &str| if i >= 5 { dec!(20) } else { dec!(10) };
        let loader = loader(&dates, price, &["AAA", "BBB"]);
        let triggers = TriggersConfig {
            calendar: Some(CalendarTriggerConfig {
                dates: vec![date(1, 8)],
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = config(None, &[("AAA", dec!(0.3)), ("BBB", dec!(0.3))], triggers);

        let result = BacktestEngine::new(loader, config).run_all().unwrap();

        assert_eq!(result.metrics.activity.rebalance_cycles, 1);
        assert!(kinds(&result, InstructionKind::RebalanceBuy).is_empty());
        assert_eq!(
            result.final_state,
            RebalanceState::SellIssued {
                reason: "calendar: scheduled rebalance 2024-01-08".to_string(),
                deferrals: 1,
            }
        );
    }

    #[test]
    fn test_deferred_buy_abandoned() {
        let dates = weekdays(date(1, 2), date(1, 12));
        let price = |i: usize, _: &str| if i >= 5 { dec!(20) } else { dec!(10) };
        let loader = loader(&dates, price, &["AAA", "BBB"]);
        let triggers = TriggersConfig {
            calendar: Some(CalendarTriggerConfig {
                dates: vec![date(1, 8)],
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut config = config(None, &[("AAA", dec!(0.3)), ("BBB", dec!(0.3))], triggers);
        config.strategy.max_buy_deferrals = 1;

        let result = BacktestEngine::new(loader, config).run_all().unwrap();

        assert!(kinds(&result, InstructionKind::RebalanceBuy).is_empty());
        assert!(result.final_state.is_idle());
    }

    #[test]
    fn test_cash_dividend_credited() {
        let dates = weekdays(date(1, 2), date(1, 9));
        let mut loader = loader(&dates, |_, _| dec!(10), &["AAA"]);
        let mut snapshots = loader.load_bars(date(1, 1), date(1, 31)).unwrap();
        snapshots[3].bars[0].dividend = Some(dec!(0.5));
        loader = CsvDataLoader::from_snapshots(snapshots);

        let config = config(None, &[("AAA", dec!(1))], TriggersConfig::default());
        let result = BacktestEngine::new(loader, config).run_all().unwrap();

        let cash: BTreeMap<NaiveDate, Decimal> = result.snapshots.iter().map(|s| (s.date, s.cash)).collect();
        assert_eq!(cash[&date(1, 4)], Decimal::ZERO);
        assert_eq!(cash[&date(1, 5)], dec!(50000));
    }

    // =========================================================================
    // BacktestResult Tests
    // =========================================================================

    #[test]
    fn test_backtest_result_summary() {
        let dates = weekdays(date(1, 2), date(1, 12));
        let loader = loader(&dates, trending, &["AAA", "BBB"]);
        let config = config(None, &[("AAA", dec!(0.5)), ("BBB", dec!(0.5))], TriggersConfig::default());

        let result = BacktestEngine::new(loader, config).run_all().unwrap();
        let summary = result.summary();

        assert!(summary.contains("Backtest Period: 2024-01-02 to 2024-01-12"));
        assert!(summary.contains("Bars: 9"));
        assert!(summary.contains("Final State: idle"));
    }
}
