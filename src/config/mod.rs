//! Configuration management for the rebalancer.
//!
//! Loads strategy, trigger and backtest settings from a config file, with
//! environment overrides (`REBALANCER__STRATEGY__OPEN_DATE=...`). Settings are
//! read once when a strategy is built and never re-read at runtime.

use crate::backtest::BacktestConfig;
use crate::error::{ConfigError, Result};
use crate::strategy::PeriodSpec;
use anyhow::Context;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Strategy window, target weights and triggers
    pub strategy: StrategyConfig,
    /// Pairing statistics window
    #[serde(default)]
    pub pairing: PairingConfig,
    /// Financed (borrowed) legs
    #[serde(default)]
    pub financing: FinancingConfig,
    /// Interest earned on cash or currency holdings
    #[serde(default)]
    pub cash_interest: Vec<CashInterestConfig>,
    /// Simulated host settings
    #[serde(default)]
    pub backtest: BacktestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_strategy_name")]
    pub name: String,
    /// First date on which the initial allocation may execute
    pub open_date: NaiveDate,
    /// Liquidation date; the strategy runs until the data ends when absent
    #[serde(default)]
    pub close_date: Option<NaiveDate>,
    #[serde(default)]
    pub dividend_method: DividendMethod,
    /// Bars a blocked buy phase is retried before the cycle is abandoned
    #[serde(default = "default_max_buy_deferrals")]
    pub max_buy_deferrals: u32,
    /// Target weights in declared order
    #[serde(default)]
    pub target_weights: Option<Vec<WeightEntry>>,
    #[serde(default)]
    pub triggers: Option<TriggersConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightEntry {
    pub symbol: String,
    pub weight: Decimal,
}

impl WeightEntry {
    pub fn new(symbol: impl Into<String>, weight: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            weight,
        }
    }
}

/// How dividends credited to held symbols are used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DividendMethod {
    #[default]
    Cash,
    Reinvest,
}

/// Trigger parameter blocks. Evaluation order is ranking, calendar,
/// deviation, pairwise regardless of declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggersConfig {
    #[serde(default)]
    pub calendar: Option<CalendarTriggerConfig>,
    #[serde(default)]
    pub deviation: Option<DeviationTriggerConfig>,
    #[serde(default)]
    pub ranking: Option<RankingTriggerConfig>,
    #[serde(default)]
    pub pairwise: Option<PairwiseTriggerConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarTriggerConfig {
    /// Explicit rebalance dates
    #[serde(default)]
    pub dates: Vec<NaiveDate>,
    /// Periodic schedule
    #[serde(default)]
    pub period: Option<PeriodSpec>,
    /// Minimum max-weight deviation for a scheduled rebalance; 0 disables it
    #[serde(default)]
    pub watermark: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviationTriggerConfig {
    /// Checked in declared order, first breach wins
    pub symbols: Vec<DeviationThreshold>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviationThreshold {
    pub symbol: String,
    /// Maximum overweight (current - target) tolerated
    #[serde(default)]
    pub rise: Decimal,
    /// Maximum underweight (target - current) tolerated
    #[serde(default)]
    pub fall: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingTriggerConfig {
    pub period: PeriodSpec,
    /// Name of the per-symbol factor series
    pub factor: String,
    #[serde(default)]
    pub ascending: bool,
    pub top_n: usize,
    /// Weights assigned in rank order, one per selected symbol
    pub weights: Vec<Decimal>,
    /// Candidate symbols; defaults to the configured target-weight symbols
    #[serde(default)]
    pub universe: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairwiseTriggerConfig {
    pub symbols: Vec<String>,
    /// Weights for (A, B) when the ratio breaks above the upper band.
    /// The lower side mirrors them.
    #[serde(default = "default_upper_weights")]
    pub upper_weights: [Decimal; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    /// Trailing observations feeding the bands
    #[serde(default = "default_pairing_window")]
    pub window: usize,
    /// Band half-width in standard deviations
    #[serde(default = "default_band_width")]
    pub band_width: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancingConfig {
    #[serde(default)]
    pub legs: Vec<FinancingLegConfig>,
    /// Relative drift from target value that resizes a leg
    #[serde(default = "default_adjust_threshold")]
    pub adjust_threshold: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancingLegConfig {
    pub symbol: String,
    /// Fraction of net asset value borrowed through this leg
    pub ratio: Decimal,
    #[serde(default = "default_financing_rate")]
    pub annual_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashInterestConfig {
    pub currency: String,
    /// Series whose close is the annual rate in percent
    pub rate_symbol: String,
    /// Holding that earns the interest; cash when absent
    #[serde(default)]
    pub symbol: Option<String>,
}

// Default value functions
fn default_strategy_name() -> String {
    "rebalance".to_string()
}

fn default_max_buy_deferrals() -> u32 {
    5
}

fn default_upper_weights() -> [Decimal; 2] {
    [dec!(0.45), dec!(0.55)]
}

fn default_pairing_window() -> usize {
    200
}

fn default_band_width() -> Decimal {
    dec!(1.5)
}

fn default_adjust_threshold() -> Decimal {
    dec!(0.05)
}

fn default_financing_rate() -> Decimal {
    dec!(0.05)
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            window: default_pairing_window(),
            band_width: default_band_width(),
        }
    }
}

impl Default for FinancingConfig {
    fn default() -> Self {
        Self {
            legs: Vec::new(),
            adjust_threshold: default_adjust_threshold(),
        }
    }
}

impl StrategyConfig {
    /// Minimal strategy with the given window and weights and no triggers.
    pub fn new(
        open_date: NaiveDate,
        close_date: Option<NaiveDate>,
        target_weights: Vec<WeightEntry>,
    ) -> Self {
        Self {
            name: default_strategy_name(),
            open_date,
            close_date,
            dividend_method: DividendMethod::default(),
            max_buy_deferrals: default_max_buy_deferrals(),
            target_weights: Some(target_weights),
            triggers: Some(TriggersConfig::default()),
        }
    }
}

impl Config {
    /// Build a configuration around a strategy with default ambient settings.
    pub fn with_strategy(strategy: StrategyConfig) -> Self {
        Self {
            strategy,
            pairing: PairingConfig::default(),
            financing: FinancingConfig::default(),
            cash_interest: Vec::new(),
            backtest: BacktestConfig::default(),
        }
    }

    /// Load configuration from a file plus environment variables.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("REBALANCER"),
            )
            .build()
            .with_context(|| format!("Failed to build configuration from {}", path))?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate configuration values. Every failure is fatal.
    pub fn validate(&self) -> Result<()> {
        let strategy = &self.strategy;

        if let Some(close) = strategy.close_date {
            if close < strategy.open_date {
                return Err(ConfigError::InvalidDateRange {
                    open: strategy.open_date,
                    close,
                });
            }
        }

        let weights = match &strategy.target_weights {
            Some(weights) if !weights.is_empty() => weights,
            _ => return Err(ConfigError::MissingTargetWeights),
        };
        validate_weights(weights)?;

        let triggers = strategy
            .triggers
            .as_ref()
            .ok_or(ConfigError::MissingTriggers)?;

        if let Some(calendar) = &triggers.calendar {
            if let Some(period) = &calendar.period {
                period.validate()?;
            }
        }

        if let Some(deviation) = &triggers.deviation {
            for threshold in &deviation.symbols {
                if threshold.rise < Decimal::ZERO || threshold.fall < Decimal::ZERO {
                    return Err(ConfigError::NegativeThreshold {
                        symbol: threshold.symbol.clone(),
                    });
                }
            }
        }

        if let Some(ranking) = &triggers.ranking {
            ranking.period.validate()?;
            if ranking.weights.len() != ranking.top_n {
                return Err(ConfigError::RankingWeightCount {
                    expected: ranking.top_n,
                    actual: ranking.weights.len(),
                });
            }
            let sum: Decimal = ranking.weights.iter().sum();
            if (sum - Decimal::ONE).abs() > dec!(0.000001) {
                return Err(ConfigError::RankingWeightSum(sum));
            }
        }

        if let Some(pairwise) = &triggers.pairwise {
            if pairwise.symbols.len() != 2 {
                return Err(ConfigError::PairwiseSymbols(pairwise.symbols.len()));
            }
        }

        for leg in &self.financing.legs {
            if leg.ratio <= Decimal::ZERO {
                return Err(ConfigError::InvalidFinancingRatio {
                    symbol: leg.symbol.clone(),
                    ratio: leg.ratio,
                });
            }
        }

        Ok(())
    }

    /// Last date schedules are expanded to.
    pub fn schedule_end(&self, data_end: NaiveDate) -> NaiveDate {
        self.strategy.close_date.unwrap_or(data_end)
    }
}

fn validate_weights(weights: &[WeightEntry]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut sum = Decimal::ZERO;

    for entry in weights {
        if !seen.insert(entry.symbol.as_str()) {
            return Err(ConfigError::DuplicateSymbol(entry.symbol.clone()));
        }
        if entry.weight < Decimal::ZERO || entry.weight > Decimal::ONE {
            return Err(ConfigError::InvalidWeight {
                symbol: entry.symbol.clone(),
                weight: entry.weight,
            });
        }
        sum += entry.weight;
    }

    if sum > Decimal::ONE {
        return Err(ConfigError::WeightSumExceeded(sum));
    }

    Ok(())
}
