//! Instruction and fill types exchanged with the host.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What produced an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    /// Initial allocation at strategy open
    Open,
    /// Sell phase of a rebalance cycle
    RebalanceSell,
    /// Buy phase of a rebalance cycle
    RebalanceBuy,
    /// Unconditional liquidation at strategy close
    Liquidation,
    /// Dividend cash put back into the paying symbol
    DividendReinvest,
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstructionKind::Open => write!(f, "open"),
            InstructionKind::RebalanceSell => write!(f, "rebalance_sell"),
            InstructionKind::RebalanceBuy => write!(f, "rebalance_buy"),
            InstructionKind::Liquidation => write!(f, "liquidation"),
            InstructionKind::DividendReinvest => write!(f, "dividend_reinvest"),
        }
    }
}

/// A signed-size buy/sell request. Positive size buys, negative sells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Decision date (the bar that sized it)
    pub date: NaiveDate,
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    /// Next-bar open used for sizing
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub kind: InstructionKind,
    /// Human-readable reason threaded from the decision that produced it
    pub reason: String,
}

impl Instruction {
    pub fn new(
        date: NaiveDate,
        symbol: impl Into<String>,
        size: Decimal,
        price: Decimal,
        kind: InstructionKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            date,
            symbol: symbol.into(),
            size,
            price,
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_buy(&self) -> bool {
        self.size > Decimal::ZERO
    }

    /// Notional at the sizing price.
    pub fn notional(&self) -> Decimal {
        self.size.abs() * self.price
    }
}

/// An executed instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: u64,
    pub date: NaiveDate,
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub commission: Decimal,
}

/// A held position as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub quantity: Decimal,
    pub avg_cost: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_instruction_direction() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let sell = Instruction::new(date, "AAA", dec!(-10), dec!(12.5), InstructionKind::RebalanceSell, "calendar");
        assert!(!sell.is_buy());
        assert_eq!(sell.notional(), dec!(125));

        let buy = Instruction::new(date, "AAA", dec!(4), dec!(10), InstructionKind::Open, "open");
        assert!(buy.is_buy());
    }

    #[test]
    fn test_instruction_serializes_decimals_as_strings() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let buy = Instruction::new(date, "AAA", dec!(4), dec!(10.25), InstructionKind::RebalanceBuy, "deviation");
        let json = serde_json::to_value(&buy).unwrap();
        assert_eq!(json["size"], "4");
        assert_eq!(json["price"], "10.25");
        assert_eq!(json["kind"], "rebalance_buy");
    }
}
