//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;

/// Day-count basis used for every annual rate.
pub const DAYS_PER_YEAR: Decimal = dec!(366);

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Whole units of an instrument that `value` buys (or sells, when negative)
/// at `price`. Rounds toward negative infinity, so a negative value yields a
/// sell size at least as large as the exact fraction.
pub fn floor_units(value: Decimal, price: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (value / price).floor()
}

/// Mean and population standard deviation of a sample.
pub fn mean_and_std(values: &[Decimal]) -> (Decimal, Decimal) {
    if values.is_empty() {
        return (Decimal::ZERO, Decimal::ZERO);
    }

    let n = Decimal::from(values.len());
    let mean = values.iter().sum::<Decimal>() / n;
    let variance = values
        .iter()
        .map(|v| (*v - mean) * (*v - mean))
        .sum::<Decimal>()
        / n;

    (mean, variance.sqrt().unwrap_or(Decimal::ZERO))
}

/// Simple interest on `principal` at an annual `rate` for `days` days.
pub fn accrue(principal: Decimal, annual_rate: Decimal, days: i64) -> Decimal {
    if days <= 0 {
        return Decimal::ZERO;
    }
    principal * annual_rate / DAYS_PER_YEAR * Decimal::from(days)
}
