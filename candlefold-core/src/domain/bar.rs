//! Bar: the fundamental market data unit.

use super::timeframe::Timeframe;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Daily OHLCV bar for a single instrument.
///
/// Prices are taken as delivered by the provider. The `low <= open, close <= high`
/// relation is expected but not guaranteed; see [`Bar::is_consistent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub adjusted_close: Option<f64>,
}

impl Bar {
    /// Returns true if any OHLC field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// OHLC ordering check: high >= low, open and close inside [low, high].
    ///
    /// Void bars are not judged and count as consistent.
    pub fn is_consistent(&self) -> bool {
        if self.is_void() {
            return true;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
    }
}

/// An aggregated bar for one timeframe bucket, ready to be persisted.
///
/// `date` is the bucket start for calendar timeframes and the date of the last
/// constituent year for multi-year timeframes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampledBar {
    pub instrument: String,
    pub timeframe: Timeframe,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub adjusted_close: Option<f64>,
    /// `"{start_year}-{end_year}"` for 3year/5year buckets, `None` otherwise.
    pub period_label: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

impl ResampledBar {
    /// Store key: one record per (instrument, timeframe, date).
    pub fn key(&self) -> (&str, Timeframe, NaiveDate) {
        (&self.instrument, self.timeframe, self.date)
    }
}
