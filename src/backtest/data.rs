//! Historical bar loading for backtesting.
//!
//! Bars come from CSV with a header row. `date,symbol,open,close` are
//! required; an optional `dividend` column carries per-unit payouts and
//! every other column is a named factor series.

use crate::broker::MarketView;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::debug;

/// Every symbol's bar on one date.
#[derive(Debug, Clone, Serialize)]
pub struct BarSnapshot {
    pub date: NaiveDate,
    pub bars: Vec<SymbolBar>,
}

impl BarSnapshot {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            bars: Vec::new(),
        }
    }

    /// Get a symbol's bar by name.
    pub fn get_symbol(&self, symbol: &str) -> Option<&SymbolBar> {
        self.bars.iter().find(|b| b.symbol == symbol)
    }
}

/// One symbol's prices on one date.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolBar {
    pub symbol: String,
    pub open: Decimal,
    pub close: Decimal,
    pub dividend: Option<Decimal>,
    pub factors: BTreeMap<String, Decimal>,
}

impl SymbolBar {
    pub fn new(symbol: impl Into<String>, open: Decimal, close: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            open,
            close,
            dividend: None,
            factors: BTreeMap::new(),
        }
    }
}

/// Trait for loading historical bars.
pub trait DataLoader {
    /// Load all bars in the given date range, inclusive.
    fn load_bars(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<BarSnapshot>>;

    /// Get the available date range in the data.
    fn available_range(&self) -> Option<(NaiveDate, NaiveDate)>;

    /// Get all available symbols, sorted.
    fn available_symbols(&self) -> Vec<String>;
}

/// CSV bar loader.
///
/// Expected CSV format:
/// ```csv
/// date,symbol,open,close,dividend,MA120
/// 2024-01-02,510300.SS,3.41,3.45,,3.52
/// ```
#[derive(Debug, Clone)]
pub struct CsvDataLoader {
    snapshots: Vec<BarSnapshot>,
    symbols: Vec<String>,
}

impl CsvDataLoader {
    /// Load data from a CSV file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::from_csv_content(&content)
    }

    /// Load data from CSV content string.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut lines = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let (_, header) = lines.next().context("CSV file is empty")?;
        let layout = Layout::parse(header)?;

        let mut by_date: BTreeMap<NaiveDate, Vec<SymbolBar>> = BTreeMap::new();
        let mut symbols = BTreeSet::new();

        for (line_num, line) in lines {
            let parsed = layout
                .parse_row(line)
                .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
            let Some((date, bar)) = parsed else {
                debug!(line = line_num + 1, "Skipping row without prices");
                continue;
            };
            symbols.insert(bar.symbol.clone());
            by_date.entry(date).or_default().push(bar);
        }

        if by_date.is_empty() {
            anyhow::bail!("CSV file contains no data rows");
        }

        let snapshots = by_date
            .into_iter()
            .map(|(date, bars)| BarSnapshot { date, bars })
            .collect();

        Ok(Self {
            snapshots,
            symbols: symbols.into_iter().collect(),
        })
    }

    /// Create a loader from in-memory snapshots.
    pub fn from_snapshots(mut snapshots: Vec<BarSnapshot>) -> Self {
        snapshots.sort_by_key(|s| s.date);
        let symbols: BTreeSet<String> = snapshots
            .iter()
            .flat_map(|s| s.bars.iter().map(|b| b.symbol.clone()))
            .collect();

        Self {
            snapshots,
            symbols: symbols.into_iter().collect(),
        }
    }

    /// Get total number of bars.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Check if the loader has no data.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl DataLoader for CsvDataLoader {
    fn load_bars(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<BarSnapshot>> {
        Ok(self
            .snapshots
            .iter()
            .filter(|s| s.date >= start && s.date <= end)
            .cloned()
            .collect())
    }

    fn available_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.snapshots.first()?;
        let last = self.snapshots.last()?;
        Some((first.date, last.date))
    }

    fn available_symbols(&self) -> Vec<String> {
        self.symbols.clone()
    }
}

/// Column positions derived from the header row.
#[derive(Debug)]
struct Layout {
    dividend: Option<usize>,
    factors: Vec<(usize, String)>,
    width: usize,
}

impl Layout {
    const REQUIRED: [&'static str; 4] = ["date", "symbol", "open", "close"];

    fn parse(header: &str) -> Result<Self> {
        let columns: Vec<&str> = header.split(',').map(str::trim).collect();
        if columns.len() < Self::REQUIRED.len() || columns[..4] != Self::REQUIRED {
            anyhow::bail!(
                "Expected header to start with date,symbol,open,close, got {}",
                header
            );
        }

        let mut dividend = None;
        let mut factors = Vec::new();
        for (i, name) in columns.iter().enumerate().skip(Self::REQUIRED.len()) {
            if name.eq_ignore_ascii_case("dividend") {
                dividend = Some(i);
            } else {
                factors.push((i, name.to_string()));
            }
        }

        Ok(Self {
            dividend,
            factors,
            width: columns.len(),
        })
    }

    /// `None` when the row has no usable open/close.
    fn parse_row(&self, line: &str) -> Result<Option<(NaiveDate, SymbolBar)>> {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < Self::REQUIRED.len() {
            anyhow::bail!("Expected at least 4 columns (date,symbol,open,close), got {}", parts.len());
        }

        let date: NaiveDate = parts[0]
            .parse()
            .with_context(|| format!("Invalid date: {}", parts[0]))?;
        let (Some(open), Some(close)) = (optional(parts[2], "open")?, optional(parts[3], "close")?) else {
            return Ok(None);
        };

        let mut bar = SymbolBar::new(parts[1], open, close);
        if let Some(i) = self.dividend {
            bar.dividend = cell(&parts, i).map(|v| optional(v, "dividend")).transpose()?.flatten();
        }
        for (i, name) in &self.factors {
            if let Some(value) = cell(&parts, *i).map(|v| optional(v, name)).transpose()?.flatten() {
                bar.factors.insert(name.clone(), value);
            }
        }
        if parts.len() > self.width {
            debug!(date = %date, symbol = %bar.symbol, "Ignoring extra columns");
        }

        Ok(Some((date, bar)))
    }
}

fn cell<'a>(parts: &[&'a str], index: usize) -> Option<&'a str> {
    parts.get(index).copied()
}

/// Empty cells and `NaN` are missing values.
fn optional(value: &str, column: &str) -> Result<Option<Decimal>> {
    if value.is_empty() || value.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .with_context(|| format!("Invalid {}: {}", column, value))
}

/// Replay cursor over loaded bars, implementing [`MarketView`].
///
/// Closes and factors carry forward across bars a symbol does not trade on.
pub struct BarWindow<'a> {
    bars: &'a [BarSnapshot],
    symbols: Vec<String>,
    index: Option<usize>,
    last_close: HashMap<String, Decimal>,
    last_factors: HashMap<String, BTreeMap<String, Decimal>>,
}

impl<'a> BarWindow<'a> {
    pub fn new(bars: &'a [BarSnapshot], symbols: Vec<String>) -> Self {
        Self {
            bars,
            symbols,
            index: None,
            last_close: HashMap::new(),
            last_factors: HashMap::new(),
        }
    }

    /// Move to the next bar. Returns false once the data is exhausted.
    pub fn advance(&mut self) -> bool {
        let next = self.index.map_or(0, |i| i + 1);
        let Some(snapshot) = self.bars.get(next) else {
            return false;
        };
        self.index = Some(next);

        for bar in &snapshot.bars {
            if bar.close > Decimal::ZERO {
                self.last_close.insert(bar.symbol.clone(), bar.close);
            }
            if !bar.factors.is_empty() {
                self.last_factors
                    .entry(bar.symbol.clone())
                    .or_default()
                    .extend(bar.factors.iter().map(|(k, v)| (k.clone(), *v)));
            }
        }
        true
    }

    pub fn current(&self) -> Option<&'a BarSnapshot> {
        self.index.and_then(|i| self.bars.get(i))
    }

    fn offset(&self, delta: isize) -> Option<&'a BarSnapshot> {
        let index = self.index?.checked_add_signed(delta)?;
        self.bars.get(index)
    }

    fn current_bar(&self, symbol: &str) -> Option<&'a SymbolBar> {
        self.current()?.get_symbol(symbol)
    }
}

impl MarketView for BarWindow<'_> {
    fn date(&self) -> NaiveDate {
        self.current().map(|s| s.date).unwrap_or_default()
    }

    fn previous_date(&self) -> Option<NaiveDate> {
        self.offset(-1).map(|s| s.date)
    }

    fn next_date(&self) -> Option<NaiveDate> {
        self.offset(1).map(|s| s.date)
    }

    fn bar_index(&self) -> usize {
        self.index.unwrap_or(0)
    }

    fn symbols(&self) -> Vec<String> {
        self.symbols.clone()
    }

    fn close(&self, symbol: &str) -> Option<Decimal> {
        self.last_close.get(symbol).copied()
    }

    fn open(&self, symbol: &str) -> Option<Decimal> {
        self.current_bar(symbol).map(|b| b.open)
    }

    fn next_open(&self, symbol: &str) -> Option<Decimal> {
        self.offset(1)?.get_symbol(symbol).map(|b| b.open)
    }

    fn traded_today(&self, symbol: &str) -> bool {
        self.current_bar(symbol).is_some()
    }

    fn factor(&self, symbol: &str, name: &str) -> Option<Decimal> {
        self.last_factors.get(symbol)?.get(name).copied()
    }

    fn dividend(&self, symbol: &str) -> Option<Decimal> {
        self.current_bar(symbol)?.dividend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    const CSV: &str = r#"date,symbol,open,close,dividend,MA
2024-01-02,AAA,10,10.5,,9
2024-01-02,BBB,20,19.5,,
2024-01-03,AAA,10.6,11,0.2,
2024-01-04,AAA,11,11.2,,9.5
2024-01-04,BBB,19,18,,21
"#;

    #[test]
    fn test_csv_parsing() {
        let loader = CsvDataLoader::from_csv_content(CSV).unwrap();

        assert_eq!(loader.len(), 3);
        assert_eq!(loader.available_symbols(), vec!["AAA", "BBB"]);
        assert_eq!(loader.available_range(), Some((date(2), date(4))));

        let bars = loader.load_bars(date(3), date(4)).unwrap();
        assert_eq!(bars.len(), 2);
        let aaa = bars[0].get_symbol("AAA").unwrap();
        assert_eq!(aaa.dividend, Some(dec!(0.2)));
        assert!(aaa.factors.is_empty());
    }

    #[test]
    fn test_header_is_required() {
        let result = CsvDataLoader::from_csv_content("2024-01-02,AAA,10,10\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_rows_without_prices_are_skipped() {
        let csv = "date,symbol,open,close\n2024-01-02,AAA,10,10\n2024-01-02,BBB,,NaN\n";
        let loader = CsvDataLoader::from_csv_content(csv).unwrap();
        assert_eq!(loader.available_symbols(), vec!["AAA"]);
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let csv = "date,symbol,open,close\n2024-01-02,AAA,ten,10\n";
        assert!(CsvDataLoader::from_csv_content(csv).is_err());
    }

    #[test]
    fn test_window_carries_values_forward() {
        let loader = CsvDataLoader::from_csv_content(CSV).unwrap();
        let bars = loader.load_bars(date(1), date(31)).unwrap();
        let mut window = BarWindow::new(&bars, loader.available_symbols());

        assert!(window.advance());
        assert_eq!(window.date(), date(2));
        assert_eq!(window.previous_date(), None);
        assert_eq!(window.next_date(), Some(date(3)));
        assert_eq!(window.next_open("AAA"), Some(dec!(10.6)));
        assert_eq!(window.next_open("BBB"), None);

        assert!(window.advance());
        // BBB did not trade: close carried, no open
        assert!(!window.traded_today("BBB"));
        assert_eq!(window.close("BBB"), Some(dec!(19.5)));
        assert_eq!(window.open("BBB"), None);
        assert_eq!(window.factor("AAA", "MA"), Some(dec!(9)));
        assert_eq!(window.dividend("AAA"), Some(dec!(0.2)));
        assert_eq!(window.bar_index(), 1);

        assert!(window.advance());
        assert_eq!(window.factor("AAA", "MA"), Some(dec!(9.5)));
        assert_eq!(window.factor("BBB", "MA"), Some(dec!(21)));
        assert_eq!(window.next_date(), None);
        assert!(!window.advance());
    }
}
