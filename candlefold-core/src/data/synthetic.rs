//! Synthetic data provider for offline runs.
//!
//! Produces a deterministic random walk per symbol (seeded from the symbol
//! name) on weekdays inside the requested window. Columns are labelled in the
//! flattened `"{field} {symbol}"` form so offline runs go through the same
//! normalization path as real downloads.

use super::frame::days_since_epoch;
use super::provider::{ColumnLabel, DataProvider, FetchError, FetchWindow, RawTable};
use chrono::{Datelike, Duration, Weekday};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct SyntheticProvider {
    start_price: f64,
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self { start_price: 100.0 }
    }

    pub fn with_start_price(start_price: f64) -> Self {
        Self { start_price }
    }
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch_daily(&self, symbol: &str, window: FetchWindow) -> Result<RawTable, FetchError> {
        let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
        let mut rng = StdRng::from_seed(seed);

        let mut dates = Vec::new();
        let mut opens = Vec::new();
        let mut highs = Vec::new();
        let mut lows = Vec::new();
        let mut closes = Vec::new();
        let mut volumes = Vec::new();

        let mut price = self.start_price;
        let mut current = window.start;
        while current <= window.end {
            if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
                let daily_return: f64 = rng.gen_range(-0.03..0.03);
                let open = price;
                let close = price * (1.0 + daily_return);
                let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
                let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));

                dates.push(days_since_epoch(current));
                opens.push(open);
                highs.push(high);
                lows.push(low);
                closes.push(close);
                volumes.push(rng.gen_range(500_000..5_000_000u64));
                price = close;
            }
            current += Duration::days(1);
        }

        let date_col = Column::new("Date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| FetchError::Other(format!("date cast: {e}")))?;
        let label = |field: &str| ColumnLabel::flat(format!("{field} {symbol}"));

        Ok(RawTable::new()
            .with_column(ColumnLabel::flat("Date"), date_col)
            .with_column(label("Open"), Column::new("Open".into(), opens))
            .with_column(label("High"), Column::new("High".into(), highs))
            .with_column(label("Low"), Column::new("Low".into(), lows))
            .with_column(label("Close"), Column::new("Close".into(), closes.clone()))
            .with_column(label("Volume"), Column::new("Volume".into(), volumes))
            .with_column(label("Adj Close"), Column::new("Adj Close".into(), closes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window() -> FetchWindow {
        FetchWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 14).unwrap(),
        )
    }

    #[test]
    fn weekdays_only() {
        let table = SyntheticProvider::new().fetch_daily("TLKM.JK", window()).unwrap();
        assert_eq!(table.height(), 10);
    }

    #[test]
    fn dates_count_days_from_unix_epoch() {
        let table = SyntheticProvider::new().fetch_daily("TLKM.JK", window()).unwrap();
        let dates = table.columns()[0].1.cast(&DataType::Int32).unwrap();
        let first = dates.i32().unwrap().get(0).unwrap();
        // 2024-01-01 is a Monday, 19723 days after 1970-01-01.
        assert_eq!(first, 19_723);
        assert_eq!(first, days_since_epoch(window().start));
    }

    #[test]
    fn deterministic_per_symbol() {
        let provider = SyntheticProvider::new();
        let a = provider.fetch_daily("TLKM.JK", window()).unwrap();
        let b = provider.fetch_daily("TLKM.JK", window()).unwrap();
        let c = provider.fetch_daily("ASII.JK", window()).unwrap();

        let close = |t: &RawTable| -> Vec<f64> {
            t.columns()[4].1.f64().unwrap().into_no_null_iter().collect()
        };
        assert_eq!(close(&a), close(&b));
        assert_ne!(close(&a), close(&c));
    }

    #[test]
    fn empty_window_yields_empty_table() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap(); // Saturday
        let w = FetchWindow::new(start, start + Duration::days(1));
        let table = SyntheticProvider::new().fetch_daily("X", w).unwrap();
        assert!(table.is_empty());
    }
}
