//! Yahoo Finance data provider.
//!
//! Fetches daily OHLCV rows from Yahoo's v8 chart API and returns them in the
//! shape a yfinance download has: a flat `Date` column followed by two-level
//! `(field, symbol)` columns. One call is one HTTP request; retrying is done
//! by the caller.
//!
//! Yahoo Finance has no official API and is subject to unannounced format changes.

use super::circuit_breaker::CircuitBreaker;
use super::frame::days_since_epoch;
use super::provider::{ColumnLabel, DataProvider, FetchError, FetchWindow, RawTable};
use polars::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";

/// Yahoo Finance data provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    base_url: String,
}

impl YahooProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| FetchError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the provider at another host serving the same chart API.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the chart API URL for a symbol and date range.
    fn chart_url(base_url: &str, symbol: &str, window: FetchWindow) -> String {
        let start_ts = window.start.and_hms_opt(0, 0, 0).map_or(0, |dt| dt.and_utc().timestamp());
        let end_ts = window
            .end
            .and_hms_opt(23, 59, 59)
            .map_or(0, |dt| dt.and_utc().timestamp());
        format!(
            "{base_url}/v8/finance/chart/{symbol}\
             ?period1={start_ts}&period2={end_ts}&interval=1d\
             &includeAdjustedClose=true"
        )
    }

    /// Map a non-success HTTP status to a fetch error. Only 403 touches the
    /// circuit breaker; everything else is left to the caller's retry loop.
    fn check_status(
        &self,
        status: reqwest::StatusCode,
        retry_after: Option<u64>,
        symbol: &str,
    ) -> Result<(), FetchError> {
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(FetchError::CircuitOpen);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(60),
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FetchError::AuthenticationRequired(
                "Yahoo Finance requires authentication".into(),
            ));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        Err(FetchError::Other(format!("HTTP {status} for {symbol}")))
    }

    /// Turn a chart response into a yfinance-shaped raw table.
    fn parse_response(symbol: &str, resp: ChartResponse) -> Result<RawTable, FetchError> {
        let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
            Some(err) if err.code == "Not Found" => FetchError::SymbolNotFound {
                symbol: symbol.to_string(),
            },
            Some(err) => {
                FetchError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
            }
            None => FetchError::ResponseFormatChanged("empty result with no error".into()),
        })?;

        let Some(data) = result.into_iter().next() else {
            return Ok(RawTable::new());
        };

        // Listed symbols with no trading in the window come back without timestamps.
        let timestamps = data.timestamp.unwrap_or_default();
        if timestamps.is_empty() {
            return Ok(RawTable::new());
        }

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::ResponseFormatChanged("no quote data".into()))?;

        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose);

        let mut dates = Vec::with_capacity(timestamps.len());
        let mut opens = Vec::with_capacity(timestamps.len());
        let mut highs = Vec::with_capacity(timestamps.len());
        let mut lows = Vec::with_capacity(timestamps.len());
        let mut closes = Vec::with_capacity(timestamps.len());
        let mut volumes = Vec::with_capacity(timestamps.len());
        let mut adjusted = Vec::with_capacity(timestamps.len());

        for (i, &ts) in timestamps.iter().enumerate() {
            let date = chrono::DateTime::from_timestamp(ts, 0)
                .map(|dt| dt.naive_utc().date())
                .ok_or_else(|| {
                    FetchError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
                })?;

            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();

            // Holidays come back as all-null rows.
            if open.is_none() && high.is_none() && low.is_none() && close.is_none() {
                continue;
            }

            dates.push(days_since_epoch(date));
            opens.push(open);
            highs.push(high);
            lows.push(low);
            closes.push(close);
            volumes.push(volume);
            adjusted.push(adj_closes.as_ref().and_then(|v| v.get(i).copied().flatten()));
        }

        let date_col = Column::new("Date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| FetchError::ResponseFormatChanged(format!("date cast: {e}")))?;

        let field = |name: &str| ColumnLabel::levels([name, symbol]);
        let mut table = RawTable::new()
            .with_column(ColumnLabel::flat("Date"), date_col)
            .with_column(field("Open"), Column::new("Open".into(), opens))
            .with_column(field("High"), Column::new("High".into(), highs))
            .with_column(field("Low"), Column::new("Low".into(), lows))
            .with_column(field("Close"), Column::new("Close".into(), closes))
            .with_column(field("Volume"), Column::new("Volume".into(), volumes));
        if adj_closes.is_some() {
            table.push(field("Adj Close"), Column::new("Adj Close".into(), adjusted));
        }

        Ok(table)
    }
}

impl DataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch_daily(&self, symbol: &str, window: FetchWindow) -> Result<RawTable, FetchError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(FetchError::CircuitOpen);
        }

        let url = Self::chart_url(&self.base_url, symbol, window);
        debug!(instrument = symbol, %url, "requesting chart");

        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| FetchError::NetworkUnreachable(e.to_string()))?;

        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        self.check_status(resp.status(), retry_after, symbol)?;

        let chart: ChartResponse = resp.json().map_err(|e| {
            FetchError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
        })?;

        Self::parse_response(symbol, chart)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
