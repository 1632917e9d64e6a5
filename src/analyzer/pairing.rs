//! Rolling price-ratio statistics per ordered symbol pair.
//!
//! Each bar, every tracked pair whose legs both traded with a positive
//! price appends `ratio = price(A) / price(B)`. Once the pair has at least
//! `window` observations, mean and population std over the trailing window
//! give `upper = mean + k * std` and `lower = mean - k * std`. Before that
//! the bands are reported as zero and must not be read as a signal.
//!
//! History is append-only for the whole run.

use crate::broker::MarketView;
use crate::config::PairingConfig;
use crate::utils::mean_and_std;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Ordered pair of symbols, displayed as `A/B`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    pub first: String,
    pub second: String,
}

impl PairKey {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.first, self.second)
    }
}

impl Serialize for PairKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One observation and the bands derived at that point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairRecord {
    pub date: NaiveDate,
    pub ratio: Decimal,
    pub mean: Decimal,
    pub std: Decimal,
    pub upper: Decimal,
    pub lower: Decimal,
    /// Whether the bands were computed from a full window
    pub warmed_up: bool,
}

/// Derived band values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub mean: Decimal,
    pub std: Decimal,
    pub upper: Decimal,
    pub lower: Decimal,
}

#[derive(Debug, Clone)]
pub struct PairingTracker {
    window: usize,
    band_width: Decimal,
    history: BTreeMap<PairKey, Vec<PairRecord>>,
}

impl PairingTracker {
    pub fn new(window: usize, band_width: Decimal) -> Self {
        Self {
            window: window.max(1),
            band_width,
            history: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &PairingConfig) -> Self {
        Self::new(config.window, config.band_width)
    }

    /// Start tracking an ordered pair. Tracking twice is a no-op.
    pub fn track(&mut self, key: PairKey) {
        self.history.entry(key).or_default();
    }

    /// Track every `(a, b)` with `a` before `b` in the given order.
    pub fn track_combinations(&mut self, symbols: &[String]) {
        for (i, first) in symbols.iter().enumerate() {
            for second in &symbols[i + 1..] {
                self.track(PairKey::new(first.clone(), second.clone()));
            }
        }
    }

    /// Append today's ratio for every pair with valid same-day prices.
    pub fn update(&mut self, market: &dyn MarketView) {
        let date = market.date();
        let window = self.window;
        let band_width = self.band_width;

        for (key, records) in self.history.iter_mut() {
            let Some(ratio) = same_day_ratio(market, key) else {
                debug!(pair = %key, date = %date, "Skipping pair without valid prices");
                continue;
            };

            let mut ratios: Vec<Decimal> = records
                .iter()
                .rev()
                .take(window.saturating_sub(1))
                .map(|r| r.ratio)
                .collect();
            ratios.reverse();
            ratios.push(ratio);

            let warmed_up = records.len() + 1 >= window;
            let bands = if warmed_up {
                compute_bands(&ratios, band_width)
            } else {
                Bands {
                    mean: Decimal::ZERO,
                    std: Decimal::ZERO,
                    upper: Decimal::ZERO,
                    lower: Decimal::ZERO,
                }
            };

            records.push(PairRecord {
                date,
                ratio,
                mean: bands.mean,
                std: bands.std,
                upper: bands.upper,
                lower: bands.lower,
                warmed_up,
            });
        }
    }

    /// Most recent record for a pair.
    pub fn latest(&self, key: &PairKey) -> Option<&PairRecord> {
        self.history.get(key).and_then(|records| records.last())
    }

    /// Full observation history for a pair.
    pub fn history(&self, key: &PairKey) -> &[PairRecord] {
        self.history.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &PairKey> {
        self.history.keys()
    }

    /// Bands over the trailing window as of now, or `None` before warm-up.
    pub fn current_bands(&self, key: &PairKey) -> Option<Bands> {
        let records = self.history.get(key)?;
        if records.len() < self.window {
            return None;
        }
        let ratios: Vec<Decimal> = records[records.len() - self.window..]
            .iter()
            .map(|r| r.ratio)
            .collect();
        Some(compute_bands(&ratios, self.band_width))
    }

    /// History of every pair, keyed by `A/B`.
    pub fn export(&self) -> BTreeMap<String, Vec<PairRecord>> {
        self.history
            .iter()
            .map(|(key, records)| (key.to_string(), records.clone()))
            .collect()
    }
}

fn same_day_ratio(market: &dyn MarketView, key: &PairKey) -> Option<Decimal> {
    if !market.traded_today(&key.first) || !market.traded_today(&key.second) {
        return None;
    }
    let first = market.close(&key.first).filter(|p| *p > Decimal::ZERO)?;
    let second = market.close(&key.second).filter(|p| *p > Decimal::ZERO)?;
    Some(first / second)
}

fn compute_bands(ratios: &[Decimal], band_width: Decimal) -> Bands {
    let (mean, std) = mean_and_std(ratios);
    Bands {
        mean,
        std,
        upper: mean + band_width * std,
        lower: mean - band_width * std,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockMarketView;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(n)
    }

    fn market(date: NaiveDate, a: Option<Decimal>, b: Option<Decimal>) -> MockMarketView {
        let mut market = MockMarketView::new();
        market.expect_date().return_const(date);
        market.expect_traded_today().returning(move |symbol| match symbol {
            "A" => a.is_some(),
            "B" => b.is_some(),
            _ => false,
        });
        market.expect_close().returning(move |symbol| match symbol {
            "A" => a,
            "B" => b,
            _ => None,
        });
        market
    }

    fn key() -> PairKey {
        PairKey::new("A", "B")
    }

    #[test]
    fn test_bands_are_zero_before_warm_up() {
        let mut tracker = PairingTracker::new(5, dec!(1.5));
        tracker.track(key());

        for n in 0..4 {
            tracker.update(&market(day(n), Some(dec!(10) + Decimal::from(n)), Some(dec!(5))));
            let record = tracker.latest(&key()).unwrap();
            assert!(!record.warmed_up);
            assert_eq!(record.upper, Decimal::ZERO);
            assert_eq!(record.lower, Decimal::ZERO);
            assert_eq!(record.mean, Decimal::ZERO);
        }
        assert!(tracker.current_bands(&key()).is_none());

        tracker.update(&market(day(4), Some(dec!(14)), Some(dec!(5))));
        let record = tracker.latest(&key()).unwrap();
        assert!(record.warmed_up);
        // ratios 2.0 2.2 2.4 2.6 2.8
        assert_eq!(record.mean, dec!(2.4));
        assert!(record.upper > record.mean && record.lower < record.mean);
    }

    #[test]
    fn test_bands_use_trailing_window_only() {
        let mut tracker = PairingTracker::new(3, dec!(1.5));
        tracker.track(key());

        let closes = [dec!(100), dec!(1), dec!(2), dec!(3), dec!(2), dec!(1)];
        for (n, close) in closes.iter().enumerate() {
            tracker.update(&market(day(n as i64), Some(*close), Some(dec!(1))));
        }

        let record = tracker.latest(&key()).unwrap();
        // trailing window 3, 2, 1
        assert_eq!(record.mean, dec!(2));
        assert_eq!(tracker.history(&key()).len(), 6);

        let recomputed = tracker.current_bands(&key()).unwrap();
        assert_eq!(recomputed.mean, record.mean);
        assert_eq!(recomputed.std, record.std);
        assert_eq!(recomputed.upper, record.upper);
        assert_eq!(recomputed.lower, record.lower);
    }

    #[test]
    fn test_invalid_prices_are_skipped() {
        let mut tracker = PairingTracker::new(3, dec!(1.5));
        tracker.track(key());

        tracker.update(&market(day(0), Some(dec!(10)), None));
        tracker.update(&market(day(1), Some(dec!(10)), Some(dec!(0))));
        tracker.update(&market(day(2), None, Some(dec!(5))));
        assert!(tracker.history(&key()).is_empty());

        tracker.update(&market(day(3), Some(dec!(10)), Some(dec!(5))));
        assert_eq!(tracker.history(&key()).len(), 1);
        assert_eq!(tracker.latest(&key()).unwrap().ratio, dec!(2));
    }

    #[test]
    fn test_track_combinations() {
        let mut tracker = PairingTracker::new(200, dec!(1.5));
        let symbols: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        tracker.track_combinations(&symbols);
        tracker.track(PairKey::new("A", "B"));

        let keys: Vec<String> = tracker.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["A/B", "A/C", "B/C"]);
    }
}
