//! Income credited outside of trading: dividends and interest on cash.

use crate::broker::{Broker, Instruction, InstructionKind, MarketView};
use crate::config::{CashInterestConfig, DividendMethod};
use crate::utils::{accrue, floor_units};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Credit today's dividends to cash. In reinvest mode, returns a buy for
/// each paying symbol sized from its dividend at the next open.
pub fn credit_dividends(
    market: &dyn MarketView,
    broker: &mut dyn Broker,
    method: DividendMethod,
) -> Vec<Instruction> {
    let date = market.date();
    let mut reinvest = Vec::new();

    for (symbol, quantity) in broker.holdings() {
        let Some(dividend) = market.dividend(&symbol).filter(|d| *d > Decimal::ZERO) else {
            continue;
        };
        if quantity <= Decimal::ZERO {
            continue;
        }

        let amount = (dividend * quantity).round_dp(4);
        broker.adjust_cash(amount);
        info!(
            symbol = %symbol,
            date = %date,
            dividend = %dividend,
            quantity = %quantity,
            amount = %amount,
            "Dividend credited"
        );

        if method != DividendMethod::Reinvest {
            continue;
        }
        let Some(price) = market.next_open(&symbol).filter(|p| *p > Decimal::ZERO) else {
            debug!(symbol = %symbol, "No next open, dividend kept as cash");
            continue;
        };
        let size = floor_units(amount, price);
        if size > Decimal::ZERO {
            reinvest.push(Instruction::new(
                date,
                symbol,
                size,
                price,
                InstructionKind::DividendReinvest,
                "dividend reinvest",
            ));
        }
    }

    reinvest
}

/// Interest earned on cash or on a currency holding, per currency.
///
/// The configured rate series quotes an annual percentage; a bar without a
/// rate reuses the last one seen.
#[derive(Debug, Clone, Default)]
pub struct CashInterest {
    accounts: Vec<CashInterestConfig>,
    last_rate: HashMap<String, Decimal>,
    last_accrual: Option<NaiveDate>,
    accrued: BTreeMap<String, Decimal>,
}

impl CashInterest {
    pub fn new(accounts: Vec<CashInterestConfig>) -> Self {
        Self {
            accounts,
            ..Default::default()
        }
    }

    pub fn open(&mut self, date: NaiveDate) {
        self.last_accrual = Some(date);
    }

    /// Accumulated interest per currency.
    pub fn accrued(&self) -> &BTreeMap<String, Decimal> {
        &self.accrued
    }

    pub fn total(&self) -> Decimal {
        self.accrued.values().sum()
    }

    pub fn on_bar(&mut self, market: &dyn MarketView, broker: &mut dyn Broker) {
        let date = market.date();
        let Some(last) = self.last_accrual else {
            return;
        };
        let days = (date - last).num_days();
        if days <= 0 {
            return;
        }
        self.last_accrual = Some(date);

        for account in &self.accounts {
            let rate = match market.close(&account.rate_symbol) {
                Some(rate) => {
                    self.last_rate.insert(account.currency.clone(), rate);
                    rate
                }
                None => match self.last_rate.get(&account.currency) {
                    Some(rate) => *rate,
                    None => {
                        warn!(currency = %account.currency, rate_symbol = %account.rate_symbol, "No interest rate available");
                        continue;
                    }
                },
            };

            let balance = match &account.symbol {
                Some(symbol) => market
                    .close(symbol)
                    .map(|price| broker.position(symbol) * price)
                    .unwrap_or(Decimal::ZERO),
                None => broker.cash(),
            };

            let interest = accrue(balance, rate / Decimal::ONE_HUNDRED, days);
            broker.adjust_cash(interest);
            *self.accrued.entry(account.currency.clone()).or_default() += interest;
            debug!(
                currency = %account.currency,
                days,
                rate = %rate,
                balance = %balance.round_dp(2),
                interest = %interest.round_dp(4),
                "Cash interest accrued"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MockMarketView, SimulatedBroker};
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    /// Fill a buy of `qty` AAA at 10 so the broker holds a position.
    fn broker_holding(qty: Decimal) -> SimulatedBroker {
        let mut broker = SimulatedBroker::new(dec!(1000), Decimal::ZERO);
        broker.submit(&Instruction::new(day(1), "AAA", qty, dec!(10), InstructionKind::Open, "open"));
        let mut market = MockMarketView::new();
        market.expect_date().return_const(day(2));
        market.expect_open().returning(|_| Some(dec!(10)));
        broker.execute_pending(&market);
        broker
    }

    // =========================================================================
    // Dividend Tests
    // =========================================================================

    #[test]
    fn test_dividend_credited_as_cash() {
        let mut broker = broker_holding(dec!(30));
        let mut market = MockMarketView::new();
        market.expect_date().return_const(day(3));
        market.expect_dividend().returning(|_| Some(dec!(0.12345)));

        let orders = credit_dividends(&market, &mut broker, DividendMethod::Cash);

        assert!(orders.is_empty());
        // round(0.12345 * 30, 4) = 3.7035
        assert_eq!(broker.cash(), dec!(700) + dec!(3.7035));
    }

    #[test]
    fn test_dividend_reinvested_at_next_open() {
        let mut broker = broker_holding(dec!(50));
        let mut market = MockMarketView::new();
        market.expect_date().return_const(day(3));
        market.expect_dividend().returning(|_| Some(dec!(0.5)));
        market.expect_next_open().returning(|_| Some(dec!(8)));

        let orders = credit_dividends(&market, &mut broker, DividendMethod::Reinvest);

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].size, dec!(3));
        assert_eq!(orders[0].kind, InstructionKind::DividendReinvest);
    }

    // =========================================================================
    // Cash Interest Tests
    // =========================================================================

    fn rate_market(d: u32, rate: Option<Decimal>) -> MockMarketView {
        let mut market = MockMarketView::new();
        market.expect_date().return_const(day(d));
        market.expect_close().returning(move |symbol| match symbol {
            "CN_10Y" => rate,
            "AAA" => Some(dec!(10)),
            _ => None,
        });
        market
    }

    #[test]
    fn test_cash_interest_uses_last_known_rate() {
        let mut interest = CashInterest::new(vec![CashInterestConfig {
            currency: "CNY".to_string(),
            rate_symbol: "CN_10Y".to_string(),
            symbol: None,
        }]);
        let mut broker = SimulatedBroker::new(dec!(36600), Decimal::ZERO);
        interest.open(day(1));

        // 36600 * 2% / 366 * 2 days
        interest.on_bar(&rate_market(3, Some(dec!(2))), &mut broker);
        assert_eq!(interest.accrued()["CNY"], dec!(4));

        // No rate today: reuse 2%, one day on the grown balance
        interest.on_bar(&rate_market(4, None), &mut broker);
        let expected = dec!(4) + dec!(36604) * dec!(0.02) / dec!(366);
        assert_eq!(interest.total().round_dp(10), expected.round_dp(10));
        assert_eq!(broker.cash().round_dp(10), (dec!(36600) + expected).round_dp(10));
    }

    #[test]
    fn test_interest_on_holding_value() {
        let mut interest = CashInterest::new(vec![CashInterestConfig {
            currency: "USD".to_string(),
            rate_symbol: "CN_10Y".to_string(),
            symbol: Some("AAA".to_string()),
        }]);
        let mut broker = broker_holding(dec!(30));
        interest.open(day(2));

        // 300 held * 3.66% / 366 * 1 day
        interest.on_bar(&rate_market(3, Some(dec!(3.66))), &mut broker);
        assert_eq!(interest.accrued()["USD"], dec!(0.03));
    }

    #[test]
    fn test_no_rate_ever_skips_account() {
        let mut interest = CashInterest::new(vec![CashInterestConfig {
            currency: "CNY".to_string(),
            rate_symbol: "CN_10Y".to_string(),
            symbol: None,
        }]);
        let mut broker = SimulatedBroker::new(dec!(1000), Decimal::ZERO);
        interest.open(day(1));
        interest.on_bar(&rate_market(2, None), &mut broker);
        assert!(interest.accrued().is_empty());
        assert_eq!(broker.cash(), dec!(1000));
    }
}
