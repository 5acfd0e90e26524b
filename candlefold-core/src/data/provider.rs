//! Data provider trait, raw tables, and structured fetch errors.
//!
//! The DataProvider trait abstracts over upstream sources (Yahoo Finance,
//! synthetic data) so the pipeline can swap implementations and mock them in
//! tests. Providers hand back a [`RawTable`] exactly as the source labels it;
//! turning that into canonical bars is the normalizer's job.

use chrono::{Months, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label of a raw column: a plain name or a multi-level header.
///
/// yfinance-style downloads label columns as `("Open", "BBRI.JK")`; other
/// sources use plain `Open` or an already flattened `Open BBRI.JK`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnLabel {
    Flat(String),
    Levels(Vec<String>),
}

impl ColumnLabel {
    pub fn flat(name: impl Into<String>) -> Self {
        ColumnLabel::Flat(name.into())
    }

    pub fn levels<I, S>(levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ColumnLabel::Levels(levels.into_iter().map(Into::into).collect())
    }

    /// Join levels with a single space and trim.
    pub fn flatten(&self) -> String {
        match self {
            ColumnLabel::Flat(name) => name.trim().to_string(),
            ColumnLabel::Levels(levels) => levels.join(" ").trim().to_string(),
        }
    }
}

/// Per-instrument daily table as delivered by a provider.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    columns: Vec<(ColumnLabel, Column)>,
}

impl RawTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append.
    pub fn with_column(mut self, label: ColumnLabel, values: Column) -> Self {
        self.columns.push((label, values));
        self
    }

    pub fn push(&mut self, label: ColumnLabel, values: Column) {
        self.columns.push((label, values));
    }

    /// Wrap an existing frame; every column gets a flat label.
    pub fn from_frame(df: &DataFrame) -> Self {
        let columns = df
            .get_columns()
            .iter()
            .map(|c| (ColumnLabel::flat(c.name().as_str()), c.clone()))
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[(ColumnLabel, Column)] {
        &self.columns
    }

    /// Number of rows (zero for a table without columns).
    pub fn height(&self) -> usize {
        self.columns.first().map(|(_, c)| c.len()).unwrap_or(0)
    }

    /// Structurally empty: no rows.
    pub fn is_empty(&self) -> bool {
        self.height() == 0
    }
}

/// Inclusive date range requested from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Window covering the `years` calendar years that end on `today`.
    pub fn trailing_years(years: u32, today: NaiveDate) -> Self {
        let start = today
            .checked_sub_months(Months::new(years.saturating_mul(12)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }
}

/// Structured error types for upstream fetches.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("provider circuit breaker is open")]
    CircuitOpen,

    #[error("fetch cancelled")]
    Cancelled,

    #[error("fetch for {instrument} failed after {attempts} attempt(s): {last}")]
    Exhausted {
        instrument: String,
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    #[error("fetch error: {0}")]
    Other(String),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// An open circuit counts as transient: the instrument still goes through
    /// its full attempt budget rather than failing without a try.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FetchError::SymbolNotFound { .. }
                | FetchError::AuthenticationRequired(_)
                | FetchError::Cancelled
                | FetchError::Exhausted { .. }
        )
    }
}

/// Trait for upstream daily-bar sources.
///
/// Implementations handle the specifics of one source. Retrying lives in
/// [`super::retry::RetryingFetcher`], above this trait.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch the raw daily table for one instrument over `window`.
    fn fetch_daily(&self, instrument: &str, window: FetchWindow) -> Result<RawTable, FetchError>;

    /// Check if the provider is currently accepting requests.
    fn is_available(&self) -> bool {
        true
    }
}
