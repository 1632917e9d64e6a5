//! Performance metrics calculation for backtesting.
//!
//! Returns, drawdown and risk-adjusted ratios are computed on net value
//! (total value less financed exposure).

use crate::analyzer::DailySnapshot;
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A point on the equity curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub cash: Decimal,
    pub total_value: Decimal,
    pub net_value: Decimal,
    pub drawdown: Decimal,
}

impl EquityPoint {
    /// Create a new equity point.
    pub fn new(
        date: NaiveDate,
        cash: Decimal,
        total_value: Decimal,
        net_value: Decimal,
        peak_value: Decimal,
    ) -> Self {
        let drawdown = if peak_value > Decimal::ZERO && net_value < peak_value {
            (peak_value - net_value) / peak_value
        } else {
            Decimal::ZERO
        };

        Self {
            date,
            cash,
            total_value,
            net_value,
            drawdown,
        }
    }

    /// Build the curve from daily snapshots.
    pub fn curve(snapshots: &[DailySnapshot]) -> Vec<EquityPoint> {
        let mut peak = Decimal::ZERO;
        snapshots
            .iter()
            .map(|s| {
                peak = peak.max(s.net_value);
                EquityPoint::new(s.date, s.cash, s.total_value, s.net_value, peak)
            })
            .collect()
    }
}

/// Counters gathered while replaying.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Activity {
    pub rebalance_cycles: usize,
    pub instructions: usize,
    pub filled: usize,
    pub rejected: usize,
}

/// Backtest performance metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // Returns
    /// Total absolute return (final - initial)
    pub total_return: Decimal,
    /// Total return as percentage
    pub total_return_pct: Decimal,
    /// Annualized return percentage
    pub annualized_return: Decimal,

    // Risk
    /// Maximum drawdown fraction
    pub max_drawdown: Decimal,
    /// Duration of maximum drawdown in days
    pub max_drawdown_duration_days: i64,
    /// Annualized volatility (std dev of returns)
    pub volatility: Decimal,

    // Risk-adjusted
    /// Sharpe ratio (assuming 0 risk-free rate)
    pub sharpe_ratio: Decimal,
    /// Sortino ratio (downside deviation only)
    pub sortino_ratio: Decimal,
    /// Calmar ratio (return / max drawdown)
    pub calmar_ratio: Decimal,

    // Carry
    pub total_commission: Decimal,
    pub financing_interest: Decimal,
    pub cash_interest: Decimal,

    // Activity
    pub activity: Activity,

    // Time
    /// Backtest duration in days
    pub duration_days: f64,
}

impl BacktestMetrics {
    /// Calculate metrics from the equity curve and run totals.
    pub fn calculate(
        equity_curve: &[EquityPoint],
        initial_cash: Decimal,
        total_commission: Decimal,
        financing_interest: Decimal,
        cash_interest: Decimal,
        activity: Activity,
    ) -> Self {
        let (Some(first), Some(last)) = (equity_curve.first(), equity_curve.last()) else {
            return Self {
                total_commission,
                financing_interest,
                cash_interest,
                activity,
                ..Self::empty()
            };
        };

        // Duration
        let duration_days = (last.date - first.date).num_days() as f64;
        let duration_years = duration_days / 365.0;

        // Returns
        let total_return = last.net_value - initial_cash;
        let total_return_pct = if initial_cash > Decimal::ZERO {
            total_return / initial_cash * dec!(100)
        } else {
            Decimal::ZERO
        };

        let annualized_return = if duration_years > 0.0 {
            let factor = 1.0 + to_f64(total_return_pct) / 100.0;
            let annualized = factor.powf(1.0 / duration_years) - 1.0;
            Decimal::from_f64_retain(annualized * 100.0).unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        // Drawdown
        let (max_drawdown, max_dd_duration) = calculate_max_drawdown(equity_curve);

        // Returns for volatility calculation
        let returns = calculate_period_returns(equity_curve);
        let volatility = calculate_volatility(&returns, duration_years);

        // Risk-adjusted metrics
        let sharpe_ratio = calculate_sharpe(&returns, duration_years);
        let sortino_ratio = calculate_sortino(&returns, duration_years);
        let calmar_ratio = if max_drawdown > Decimal::ZERO {
            annualized_return / (max_drawdown * dec!(100))
        } else {
            Decimal::ZERO
        };

        Self {
            total_return,
            total_return_pct,
            annualized_return,
            max_drawdown,
            max_drawdown_duration_days: max_dd_duration,
            volatility,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
            total_commission,
            financing_interest,
            cash_interest,
            activity,
            duration_days,
        }
    }

    /// Create empty metrics (for runs without snapshots).
    pub fn empty() -> Self {
        Self {
            total_return: Decimal::ZERO,
            total_return_pct: Decimal::ZERO,
            annualized_return: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            max_drawdown_duration_days: 0,
            volatility: Decimal::ZERO,
            sharpe_ratio: Decimal::ZERO,
            sortino_ratio: Decimal::ZERO,
            calmar_ratio: Decimal::ZERO,
            total_commission: Decimal::ZERO,
            financing_interest: Decimal::ZERO,
            cash_interest: Decimal::ZERO,
            activity: Activity::default(),
            duration_days: 0.0,
        }
    }

    /// Format metrics as a summary string.
    pub fn summary(&self) -> String {
        format!(
            r#"═══════════════════════════════════════════════
BACKTEST RESULTS ({:.0} days)
═══════════════════════════════════════════════
RETURNS
  Total Return:      {:.2} ({:.2}%)
  Annualized:        {:.2}%

RISK
  Max Drawdown:      {:.2}% ({} days)
  Volatility:        {:.2}%

RISK-ADJUSTED
  Sharpe Ratio:      {:.3}
  Sortino Ratio:     {:.3}
  Calmar Ratio:      {:.3}

CARRY
  Commission:        {:.2}
  Financing Interest:{:.2}
  Cash Interest:     {:.2}

ACTIVITY
  Rebalance Cycles:  {}
  Instructions:      {}
  Filled:            {}
  Rejected:          {}
═══════════════════════════════════════════════"#,
            self.duration_days,
            self.total_return,
            self.total_return_pct,
            self.annualized_return,
            self.max_drawdown * dec!(100),
            self.max_drawdown_duration_days,
            self.volatility * dec!(100),
            self.sharpe_ratio,
            self.sortino_ratio,
            self.calmar_ratio,
            self.total_commission,
            self.financing_interest,
            self.cash_interest,
            self.activity.rebalance_cycles,
            self.activity.instructions,
            self.activity.filled,
            self.activity.rejected,
        )
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Calculate period returns from equity curve.
fn calculate_period_returns(equity_curve: &[EquityPoint]) -> Vec<Decimal> {
    equity_curve
        .windows(2)
        .map(|w| {
            let prev = &w[0];
            let curr = &w[1];
            if prev.net_value > Decimal::ZERO {
                (curr.net_value - prev.net_value) / prev.net_value
            } else {
                Decimal::ZERO
            }
        })
        .collect()
}

/// Calculate maximum drawdown and its duration in days.
fn calculate_max_drawdown(equity_curve: &[EquityPoint]) -> (Decimal, i64) {
    let Some(first) = equity_curve.first() else {
        return (Decimal::ZERO, 0);
    };

    let mut peak = first.net_value;
    let mut peak_date = first.date;
    let mut max_dd = Decimal::ZERO;
    let mut max_dd_duration: i64 = 0;

    for point in equity_curve {
        if point.net_value >= peak {
            peak = point.net_value;
            peak_date = point.date;
            continue;
        }

        if peak > Decimal::ZERO {
            let dd = (peak - point.net_value) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
        max_dd_duration = max_dd_duration.max((point.date - peak_date).num_days());
    }

    (max_dd, max_dd_duration)
}

fn mean_and_std(returns: &[f64]) -> (f64, f64) {
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Calculate annualized volatility from returns.
fn calculate_volatility(returns: &[Decimal], duration_years: f64) -> Decimal {
    if returns.len() < 2 || duration_years <= 0.0 {
        return Decimal::ZERO;
    }

    let returns_f64: Vec<f64> = returns.iter().copied().map(to_f64).collect();
    let (_, std_dev) = mean_and_std(&returns_f64);

    let periods_per_year = returns_f64.len() as f64 / duration_years;
    let annualized = std_dev * periods_per_year.sqrt();

    Decimal::from_f64_retain(annualized).unwrap_or(Decimal::ZERO)
}

/// Calculate Sharpe ratio (assuming 0 risk-free rate).
fn calculate_sharpe(returns: &[Decimal], duration_years: f64) -> Decimal {
    if returns.is_empty() || duration_years <= 0.0 {
        return Decimal::ZERO;
    }

    let returns_f64: Vec<f64> = returns.iter().copied().map(to_f64).collect();
    let (mean, std_dev) = mean_and_std(&returns_f64);

    if std_dev < 1e-10 {
        return Decimal::ZERO;
    }

    // Annualize
    let periods_per_year = returns_f64.len() as f64 / duration_years;
    let annualized_return = mean * periods_per_year;
    let annualized_std = std_dev * periods_per_year.sqrt();

    Decimal::from_f64_retain(annualized_return / annualized_std).unwrap_or(Decimal::ZERO)
}

/// Calculate Sortino ratio (downside deviation only).
fn calculate_sortino(returns: &[Decimal], duration_years: f64) -> Decimal {
    if returns.is_empty() || duration_years <= 0.0 {
        return Decimal::ZERO;
    }

    let returns_f64: Vec<f64> = returns.iter().copied().map(to_f64).collect();
    let (mean, _) = mean_and_std(&returns_f64);

    let downside: Vec<f64> = returns_f64.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        // No negative returns: cap instead of infinity
        return dec!(100);
    }

    let downside_variance = downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64;
    let downside_deviation = downside_variance.sqrt();
    if downside_deviation < 1e-10 {
        return dec!(100);
    }

    let periods_per_year = returns_f64.len() as f64 / duration_years;
    let annualized_return = mean * periods_per_year;
    let annualized_dd = downside_deviation * periods_per_year.sqrt();

    Decimal::from_f64_retain(annualized_return / annualized_dd).unwrap_or(Decimal::ZERO)
}
