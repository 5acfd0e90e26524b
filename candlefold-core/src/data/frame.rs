//! Conversions between canonical bar frames and `Bar` values.
//!
//! Canonical frame layout:
//! `date: Date, open/high/low/close: Float64, volume: UInt64,
//! [adjusted_close: Float64], instrument: String`.

use super::normalize::SchemaError;
use crate::domain::Bar;
use chrono::{Duration, NaiveDate};
use polars::prelude::*;

pub const DATE: &str = "date";
pub const OPEN: &str = "open";
pub const HIGH: &str = "high";
pub const LOW: &str = "low";
pub const CLOSE: &str = "close";
pub const VOLUME: &str = "volume";
pub const ADJUSTED_CLOSE: &str = "adjusted_close";
pub const INSTRUMENT: &str = "instrument";

pub(crate) fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

pub(crate) fn days_since_epoch(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

fn frame_err(context: &str) -> impl Fn(PolarsError) -> SchemaError + '_ {
    move |e| SchemaError::Frame(format!("{context}: {e}"))
}

/// Build a canonical frame from bars. `adjusted_close` is only emitted when
/// at least one bar carries it.
pub fn bars_to_frame(bars: &[Bar]) -> Result<DataFrame, SchemaError> {
    let dates: Vec<i32> = bars.iter().map(|b| days_since_epoch(b.date)).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();
    let instruments: Vec<&str> = bars.iter().map(|b| b.instrument.as_str()).collect();

    let mut columns = vec![
        Column::new(DATE.into(), dates)
            .cast(&DataType::Date)
            .map_err(frame_err("date cast"))?,
        Column::new(OPEN.into(), opens),
        Column::new(HIGH.into(), highs),
        Column::new(LOW.into(), lows),
        Column::new(CLOSE.into(), closes),
        Column::new(VOLUME.into(), volumes),
    ];
    if bars.iter().any(|b| b.adjusted_close.is_some()) {
        let adjusted: Vec<Option<f64>> = bars.iter().map(|b| b.adjusted_close).collect();
        columns.push(Column::new(ADJUSTED_CLOSE.into(), adjusted));
    }
    columns.push(Column::new(INSTRUMENT.into(), instruments));

    DataFrame::new(columns).map_err(frame_err("dataframe creation"))
}

/// Read bars back out of a canonical frame.
///
/// Rows without a date are dropped; missing prices become NaN and a missing
/// volume becomes 0.
pub fn bars_from_frame(df: &DataFrame) -> Result<Vec<Bar>, SchemaError> {
    let column = |name: &str| {
        df.column(name)
            .map_err(|_| SchemaError::MissingColumn(name.to_string()))
    };
    let mismatch = |name: &'static str| {
        move |e: PolarsError| SchemaError::TypeMismatch {
            column: name.to_string(),
            reason: e.to_string(),
        }
    };

    let date_phys = column(DATE)?
        .cast(&DataType::Int32)
        .map_err(mismatch(DATE))?;
    let date_ca = date_phys.i32().map_err(mismatch(DATE))?;
    let open_ca = column(OPEN)?.f64().map_err(mismatch(OPEN))?;
    let high_ca = column(HIGH)?.f64().map_err(mismatch(HIGH))?;
    let low_ca = column(LOW)?.f64().map_err(mismatch(LOW))?;
    let close_ca = column(CLOSE)?.f64().map_err(mismatch(CLOSE))?;
    let vol_ca = column(VOLUME)?.u64().map_err(mismatch(VOLUME))?;
    let adj_ca = match df.column(ADJUSTED_CLOSE) {
        Ok(c) => Some(c.f64().map_err(mismatch(ADJUSTED_CLOSE))?),
        Err(_) => None,
    };
    let inst_ca = column(INSTRUMENT)?.str().map_err(mismatch(INSTRUMENT))?;

    let epoch = epoch();
    let mut bars = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let Some(days) = date_ca.get(i) else {
            continue;
        };
        bars.push(Bar {
            instrument: inst_ca.get(i).unwrap_or_default().to_string(),
            date: epoch + Duration::days(i64::from(days)),
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
            adjusted_close: adj_ca.and_then(|ca| ca.get(i)),
        });
    }

    Ok(bars)
}
