//! Calendar schedules for periodic rebalancing.
//!
//! A [`PeriodSpec`] names one day in every month, quarter or year. A positive
//! day counts from the first day of the period (1 = first day), a negative
//! day counts back from the last (-1 = last day). Days past the end of a
//! short period clamp to its boundary.

use crate::error::{ConfigError, Result};
use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Month,
    Quarter,
    Year,
}

impl Frequency {
    fn months(self) -> u32 {
        match self {
            Frequency::Month => 1,
            Frequency::Quarter => 3,
            Frequency::Year => 12,
        }
    }

    /// First day of the period containing `date`.
    fn period_start(self, date: NaiveDate) -> Option<NaiveDate> {
        let month = match self {
            Frequency::Month => date.month(),
            Frequency::Quarter => (date.month() - 1) / 3 * 3 + 1,
            Frequency::Year => 1,
        };
        NaiveDate::from_ymd_opt(date.year(), month, 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodSpec {
    pub freq: Frequency,
    #[serde(default = "default_day")]
    pub day: i32,
}

fn default_day() -> i32 {
    -1
}

impl PeriodSpec {
    pub fn new(freq: Frequency, day: i32) -> Self {
        Self { freq, day }
    }

    pub fn validate(&self) -> Result<()> {
        if self.day == 0 || self.day.abs() > 31 {
            return Err(ConfigError::InvalidPeriodDay(self.day));
        }
        Ok(())
    }

    /// Qualifying date of the period starting at `start`.
    fn date_in_period(&self, start: NaiveDate, next_start: NaiveDate) -> NaiveDate {
        let end = next_start - Duration::days(1);
        let offset = Duration::days(i64::from(self.day.unsigned_abs()) - 1);
        if self.day > 0 {
            (start + offset).min(end)
        } else {
            (end - offset).max(start)
        }
    }

    /// Every qualifying date in `[from, to]`, ascending.
    pub fn dates_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        let mut dates = Vec::new();
        let step = Months::new(self.freq.months());
        let mut start = match self.freq.period_start(from) {
            Some(start) => start,
            None => return dates,
        };

        while start <= to {
            let Some(next_start) = start.checked_add_months(step) else {
                break;
            };
            let date = self.date_in_period(start, next_start);
            if date >= from && date <= to {
                dates.push(date);
            }
            start = next_start;
        }

        dates
    }
}

/// Sorted set of qualifying dates, precomputed once.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    dates: Vec<NaiveDate>,
}

impl Schedule {
    /// Merge explicit dates with a periodic schedule expanded over
    /// `[open, end]`.
    pub fn new(
        explicit: &[NaiveDate],
        period: Option<&PeriodSpec>,
        open: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        let mut dates = explicit.to_vec();
        if let Some(period) = period {
            dates.extend(period.dates_between(open, end));
        }
        dates.sort_unstable();
        dates.dedup();
        Self { dates }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Latest qualifying date on or before `date`.
    pub fn latest_on_or_before(&self, date: NaiveDate) -> Option<NaiveDate> {
        let idx = self.dates.partition_point(|d| *d <= date);
        idx.checked_sub(1).map(|i| self.dates[i])
    }

    /// The qualifying date crossed between the previous bar and `current`.
    /// Without a previous bar nothing can have been crossed.
    pub fn crossed(&self, current: NaiveDate, previous: Option<NaiveDate>) -> Option<NaiveDate> {
        let latest = self.latest_on_or_before(current)?;
        let previous = previous?;
        (latest > previous).then_some(latest)
    }
}
