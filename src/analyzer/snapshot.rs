//! Daily Snapshot Recorder.
//!
//! One immutable valuation record per bar inside the strategy window.
//! Symbols without a usable price contribute zero for that bar; records are
//! never revisited.

use crate::strategy::Valuation;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub cash: Decimal,
    /// Market value per held symbol
    pub assets: BTreeMap<String, Decimal>,
    pub total_asset: Decimal,
    /// Market value of financed legs
    pub financing: Decimal,
    pub financing_interest: Decimal,
    /// Accumulated cash interest per currency
    pub cash_interest: BTreeMap<String, Decimal>,
    pub total_cash_interest: Decimal,
    /// Cash plus every asset value
    pub total_value: Decimal,
    /// Total value net of financed exposure
    pub net_value: Decimal,
}

impl DailySnapshot {
    pub fn capture(
        date: NaiveDate,
        valuation: &Valuation<'_>,
        cash_interest: &BTreeMap<String, Decimal>,
    ) -> Self {
        let cash = valuation.cash();
        let assets = valuation.asset_values();
        let total_value = cash + assets.values().sum::<Decimal>();
        let financing = valuation.total_financing();

        Self {
            date,
            cash,
            total_asset: valuation.total_asset(),
            assets,
            financing,
            financing_interest: valuation.financing_interest(),
            total_cash_interest: cash_interest.values().sum(),
            cash_interest: cash_interest.clone(),
            total_value,
            net_value: total_value - financing,
        }
    }
}

/// Append-only sequence of daily snapshots.
#[derive(Debug, Clone, Default)]
pub struct SnapshotRecorder {
    snapshots: Vec<DailySnapshot>,
}

impl SnapshotRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        date: NaiveDate,
        valuation: &Valuation<'_>,
        cash_interest: &BTreeMap<String, Decimal>,
    ) -> &DailySnapshot {
        let snapshot = DailySnapshot::capture(date, valuation, cash_interest);
        debug!(
            date = %date,
            cash = %snapshot.cash.round_dp(2),
            total_value = %snapshot.total_value.round_dp(2),
            "Snapshot recorded"
        );
        self.snapshots.push(snapshot);
        &self.snapshots[self.snapshots.len() - 1]
    }

    pub fn snapshots(&self) -> &[DailySnapshot] {
        &self.snapshots
    }

    pub fn last(&self) -> Option<&DailySnapshot> {
        self.snapshots.last()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn into_inner(self) -> Vec<DailySnapshot> {
        self.snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockMarketView;
    use crate::strategy::{FinancedLeg, PortfolioSnapshot};
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_breakdown() {
        let mut market = MockMarketView::new();
        market.expect_close().returning(|symbol| match symbol {
            "AAA" => Some(dec!(10)),
            "FX" => Some(dec!(7)),
            _ => None,
        });

        let mut portfolio = PortfolioSnapshot {
            cash: dec!(250),
            ..Default::default()
        };
        portfolio.holdings.insert("AAA".to_string(), dec!(20));
        portfolio.holdings.insert("GONE".to_string(), dec!(5));
        portfolio.financing.insert(
            "FX".to_string(),
            FinancedLeg {
                quantity: dec!(10),
                accrued_interest: dec!(0.25),
            },
        );

        let mut interest = BTreeMap::new();
        interest.insert("CNY".to_string(), dec!(1.5));
        interest.insert("USD".to_string(), dec!(0.5));

        let valuation = Valuation::new(&portfolio, &market);
        let mut recorder = SnapshotRecorder::new();
        let date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let snapshot = recorder.record(date, &valuation, &interest).clone();

        assert_eq!(snapshot.assets["AAA"], dec!(200));
        assert_eq!(snapshot.assets["GONE"], Decimal::ZERO);
        assert_eq!(snapshot.total_value, dec!(450));
        assert_eq!(snapshot.total_value, snapshot.total_asset);
        assert_eq!(snapshot.financing, dec!(70));
        assert_eq!(snapshot.financing_interest, dec!(0.25));
        assert_eq!(snapshot.net_value, dec!(380));
        assert_eq!(snapshot.total_cash_interest, dec!(2));
        assert_eq!(recorder.len(), 1);
    }
}
