//! Bar normalizer: raw provider tables to the canonical bar schema.
//!
//! Providers label columns in three ways: plain (`Open`), instrument-suffixed
//! (`Open BBRI.JK`) or two-level (`("Open", "BBRI.JK")`). Every label is
//! flattened, the current instrument symbol is removed token-wise, and the
//! remainder is matched case-insensitively against the canonical field names.

use super::frame::{self, ADJUSTED_CLOSE, CLOSE, DATE, HIGH, INSTRUMENT, LOW, OPEN, VOLUME};
use super::provider::RawTable;
use crate::domain::Bar;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("columns '{first}' and '{second}' both map to '{field}'")]
    DuplicateColumn {
        field: String,
        first: String,
        second: String,
    },

    #[error("column '{column}' has an unusable type: {reason}")]
    TypeMismatch { column: String, reason: String },

    #[error("{count} bar(s) violate low <= open, close <= high")]
    InconsistentBars { count: usize },

    #[error("frame assembly failed: {0}")]
    Frame(String),
}

/// What to do with bars whose OHLC values are out of order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OhlcPolicy {
    /// Keep them and log how many there were.
    #[default]
    PassThrough,
    /// Fail normalization.
    Reject,
}

/// Canonical fields, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Field {
    Date,
    Open,
    High,
    Low,
    Close,
    Volume,
    AdjustedClose,
}

impl Field {
    const REQUIRED: [Field; 6] = [
        Field::Date,
        Field::Open,
        Field::High,
        Field::Low,
        Field::Close,
        Field::Volume,
    ];

    fn name(self) -> &'static str {
        match self {
            Field::Date => DATE,
            Field::Open => OPEN,
            Field::High => HIGH,
            Field::Low => LOW,
            Field::Close => CLOSE,
            Field::Volume => VOLUME,
            Field::AdjustedClose => ADJUSTED_CLOSE,
        }
    }

    fn dtype(self) -> DataType {
        match self {
            Field::Date => DataType::Date,
            Field::Volume => DataType::UInt64,
            _ => DataType::Float64,
        }
    }
}

/// Where a raw column ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Field(Field),
    /// An existing instrument/ticker column; replaced by the requested symbol.
    Instrument,
    Ignored,
}

/// Remove the instrument symbol from a flattened label.
///
/// Matching is per whitespace-separated token so a short symbol never eats
/// part of a field name (`A` inside `Adj Close`).
fn strip_symbol(label: &str, symbol: &str) -> String {
    if symbol.is_empty() || !label.contains(symbol) {
        return label.to_string();
    }
    label
        .split_whitespace()
        .filter(|token| *token != symbol)
        .collect::<Vec<_>>()
        .join(" ")
}

fn classify(name: &str) -> Target {
    let key = name
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    match key.as_str() {
        "date" | "datetime" | "timestamp" => Target::Field(Field::Date),
        "open" => Target::Field(Field::Open),
        "high" => Target::Field(Field::High),
        "low" => Target::Field(Field::Low),
        "close" => Target::Field(Field::Close),
        "volume" => Target::Field(Field::Volume),
        "adj close" | "adjclose" | "adjusted close" => Target::Field(Field::AdjustedClose),
        "instrument" | "ticker" | "symbol" => Target::Instrument,
        _ => Target::Ignored,
    }
}

fn count_inconsistent(df: &DataFrame) -> PolarsResult<usize> {
    let open = df.column(OPEN)?.f64()?;
    let high = df.column(HIGH)?.f64()?;
    let low = df.column(LOW)?.f64()?;
    let close = df.column(CLOSE)?.f64()?;

    let mut count = 0;
    for i in 0..df.height() {
        let (Some(o), Some(h), Some(l), Some(c)) = (open.get(i), high.get(i), low.get(i), close.get(i))
        else {
            continue;
        };
        if [o, h, l, c].iter().any(|v| v.is_nan()) {
            continue;
        }
        if !(h >= l && h >= o && h >= c && l <= o && l <= c) {
            count += 1;
        }
    }
    Ok(count)
}

/// Converts raw provider tables into canonical bar frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    policy: OhlcPolicy,
}

impl Normalizer {
    pub fn new(policy: OhlcPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> OhlcPolicy {
        self.policy
    }

    /// Normalize `raw` for `instrument` into the canonical frame.
    ///
    /// Output columns are `date, open, high, low, close, volume`,
    /// `adjusted_close` when the source has it, and `instrument`.
    pub fn normalize(&self, raw: &RawTable, instrument: &str) -> Result<DataFrame, SchemaError> {
        let mut matched: BTreeMap<Field, (String, &Column)> = BTreeMap::new();

        for (label, values) in raw.columns() {
            let flattened = label.flatten();
            let stripped = strip_symbol(&flattened, instrument);
            match classify(&stripped) {
                Target::Field(field) => {
                    if let Some((first, _)) = matched.get(&field) {
                        return Err(SchemaError::DuplicateColumn {
                            field: field.name().to_string(),
                            first: first.clone(),
                            second: flattened,
                        });
                    }
                    matched.insert(field, (flattened, values));
                }
                Target::Instrument => {}
                Target::Ignored => {
                    debug!(instrument, column = %flattened, "dropping unrecognised column");
                }
            }
        }

        if let Some(missing) = Field::REQUIRED.iter().find(|f| !matched.contains_key(*f)) {
            return Err(SchemaError::MissingColumn(missing.name().to_string()));
        }

        let mut columns = Vec::with_capacity(matched.len() + 1);
        for (field, (source, values)) in &matched {
            let column = values
                .cast(&field.dtype())
                .map_err(|e| SchemaError::TypeMismatch {
                    column: source.clone(),
                    reason: e.to_string(),
                })?
                .with_name(field.name().into());
            columns.push(column);
        }
        columns.push(Column::new(
            INSTRUMENT.into(),
            vec![instrument.to_string(); raw.height()],
        ));

        let df = DataFrame::new(columns).map_err(|e| SchemaError::Frame(e.to_string()))?;

        let inconsistent = count_inconsistent(&df).map_err(|e| SchemaError::Frame(e.to_string()))?;
        if inconsistent > 0 {
            match self.policy {
                OhlcPolicy::PassThrough => {
                    warn!(instrument, count = inconsistent, "passing through inconsistent OHLC bars");
                }
                OhlcPolicy::Reject => {
                    return Err(SchemaError::InconsistentBars {
                        count: inconsistent,
                    });
                }
            }
        }

        Ok(df)
    }

    /// Normalize and convert straight to bars.
    pub fn normalize_bars(&self, raw: &RawTable, instrument: &str) -> Result<Vec<Bar>, SchemaError> {
        let df = self.normalize(raw, instrument)?;
        frame::bars_from_frame(&df)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::bars_to_frame;
    use crate::data::provider::ColumnLabel;
    use chrono::NaiveDate;

    const SYM: &str = "BBRI.JK";

    fn date_column(name: &str) -> Column {
        let start = frame::days_since_epoch(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        Column::new(name.into(), vec![start, start + 1])
            .cast(&DataType::Date)
            .unwrap()
    }

    fn table_with(labels: [ColumnLabel; 7]) -> RawTable {
        let [date, open, high, low, close, adj, volume] = labels;
        RawTable::new()
            .with_column(date, date_column("Date"))
            .with_column(open, Column::new("o".into(), vec![100.0, 104.0]))
            .with_column(high, Column::new("h".into(), vec![105.0, 106.0]))
            .with_column(low, Column::new("l".into(), vec![99.0, 101.0]))
            .with_column(close, Column::new("c".into(), vec![104.0, 105.5]))
            .with_column(adj, Column::new("a".into(), vec![103.0, 104.5]))
            .with_column(volume, Column::new("v".into(), vec![1000i64, 1200]))
    }

    fn expected_names() -> Vec<&'static str> {
        vec!["date", "open", "high", "low", "close", "volume", "adjusted_close", "instrument"]
    }

    fn names(df: &DataFrame) -> Vec<String> {
        df.get_column_names().iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn plain_columns() {
        let raw = table_with([
            ColumnLabel::flat("Date"),
            ColumnLabel::flat("Open"),
            ColumnLabel::flat("High"),
            ColumnLabel::flat("Low"),
            ColumnLabel::flat("Close"),
            ColumnLabel::flat("Adj Close"),
            ColumnLabel::flat("Volume"),
        ]);
        let df = Normalizer::default().normalize(&raw, SYM).unwrap();
        assert_eq!(names(&df), expected_names());
        assert_eq!(df.column("volume").unwrap().dtype(), &DataType::UInt64);
    }

    #[test]
    fn suffixed_columns() {
        let raw = table_with([
            ColumnLabel::flat("Date"),
            ColumnLabel::flat(format!("Open {SYM}")),
            ColumnLabel::flat(format!("High {SYM}")),
            ColumnLabel::flat(format!("Low {SYM}")),
            ColumnLabel::flat(format!("Close {SYM}")),
            ColumnLabel::flat(format!("Adj Close {SYM}")),
            ColumnLabel::flat(format!("Volume {SYM}")),
        ]);
        let df = Normalizer::default().normalize(&raw, SYM).unwrap();
        assert_eq!(names(&df), expected_names());
    }

    #[test]
    fn multi_level_columns() {
        let raw = table_with([
            ColumnLabel::levels(["Date", ""]),
            ColumnLabel::levels(["Open", SYM]),
            ColumnLabel::levels(["High", SYM]),
            ColumnLabel::levels(["Low", SYM]),
            ColumnLabel::levels(["Close", SYM]),
            ColumnLabel::levels(["Adj Close", SYM]),
            ColumnLabel::levels(["Volume", SYM]),
        ]);
        let df = Normalizer::default().normalize(&raw, SYM).unwrap();
        assert_eq!(names(&df), expected_names());

        let bars = frame::bars_from_frame(&df).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].instrument, SYM);
        assert_eq!(bars[1].adjusted_close, Some(104.5));
        assert_eq!(bars[1].volume, 1200);
    }

    #[test]
    fn other_instrument_suffix_is_not_stripped() {
        let raw = table_with([
            ColumnLabel::flat("Date"),
            ColumnLabel::flat("Open BBCA.JK"),
            ColumnLabel::flat("High BBCA.JK"),
            ColumnLabel::flat("Low BBCA.JK"),
            ColumnLabel::flat("Close BBCA.JK"),
            ColumnLabel::flat("Adj Close BBCA.JK"),
            ColumnLabel::flat("Volume BBCA.JK"),
        ]);
        let err = Normalizer::default().normalize(&raw, SYM).unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn(ref c) if c == "open"));
    }

    #[test]
    fn short_symbol_does_not_eat_field_names() {
        assert_eq!(strip_symbol("Adj Close A", "A"), "Adj Close");
        assert_eq!(strip_symbol("Open", "O"), "Open");
        assert_eq!(strip_symbol("Close", ""), "Close");
    }

    #[test]
    fn missing_volume_is_schema_error() {
        let raw = RawTable::new()
            .with_column(ColumnLabel::flat("Date"), date_column("Date"))
            .with_column(ColumnLabel::flat("Open"), Column::new("o".into(), vec![1.0, 2.0]))
            .with_column(ColumnLabel::flat("High"), Column::new("h".into(), vec![1.0, 2.0]))
            .with_column(ColumnLabel::flat("Low"), Column::new("l".into(), vec![1.0, 2.0]))
            .with_column(ColumnLabel::flat("Close"), Column::new("c".into(), vec![1.0, 2.0]));
        let err = Normalizer::default().normalize(&raw, SYM).unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn(ref c) if c == "volume"));
    }

    #[test]
    fn adjusted_close_is_optional() {
        let raw = RawTable::new()
            .with_column(ColumnLabel::flat("Date"), date_column("Date"))
            .with_column(ColumnLabel::flat("OPEN"), Column::new("o".into(), vec![1.0, 2.0]))
            .with_column(ColumnLabel::flat("high"), Column::new("h".into(), vec![1.0, 2.0]))
            .with_column(ColumnLabel::flat("Low"), Column::new("l".into(), vec![1.0, 2.0]))
            .with_column(ColumnLabel::flat("Close"), Column::new("c".into(), vec![1.0, 2.0]))
            .with_column(ColumnLabel::flat("Volume"), Column::new("v".into(), vec![5i64, 6]))
            .with_column(ColumnLabel::flat("Dividends"), Column::new("d".into(), vec![0.0, 0.0]));
        let df = Normalizer::default().normalize(&raw, SYM).unwrap();
        assert_eq!(
            names(&df),
            vec!["date", "open", "high", "low", "close", "volume", "instrument"]
        );
    }

    #[test]
    fn duplicate_mapping_is_rejected() {
        let raw = RawTable::new()
            .with_column(ColumnLabel::flat("Date"), date_column("Date"))
            .with_column(ColumnLabel::flat("Close"), Column::new("c".into(), vec![1.0, 2.0]))
            .with_column(ColumnLabel::flat(format!("Close {SYM}")), Column::new("c2".into(), vec![1.0, 2.0]));
        let err = Normalizer::default().normalize(&raw, SYM).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateColumn { .. }));
    }

    #[test]
    fn null_prices_become_nan() {
        let raw = RawTable::new()
            .with_column(ColumnLabel::flat("Date"), date_column("Date"))
            .with_column(ColumnLabel::flat("Open"), Column::new("o".into(), vec![None, Some(2.0)]))
            .with_column(ColumnLabel::flat("High"), Column::new("h".into(), vec![1.0, 2.0]))
            .with_column(ColumnLabel::flat("Low"), Column::new("l".into(), vec![1.0, 2.0]))
            .with_column(ColumnLabel::flat("Close"), Column::new("c".into(), vec![1.0, 2.0]))
            .with_column(ColumnLabel::flat("Volume"), Column::new("v".into(), vec![None, Some(6i64)]));

        let bars = Normalizer::new(OhlcPolicy::Reject).normalize_bars(&raw, SYM).unwrap();
        assert!(bars[0].open.is_nan());
        assert_eq!(bars[0].volume, 0);
        assert_eq!(bars[1].open, 2.0);
    }

    #[test]
    fn canonical_input_is_unchanged() {
        let bars = vec![
            Bar {
                instrument: SYM.into(),
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                open: 100.0,
                high: 105.0,
                low: 99.0,
                close: 104.0,
                volume: 1000,
                adjusted_close: Some(103.0),
            },
            Bar {
                instrument: SYM.into(),
                date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                open: 104.0,
                high: 106.0,
                low: 101.0,
                close: 105.5,
                volume: 1200,
                adjusted_close: None,
            },
        ];
        let canonical = bars_to_frame(&bars).unwrap();
        let again = Normalizer::default()
            .normalize(&RawTable::from_frame(&canonical), SYM)
            .unwrap();
        assert!(again.equals_missing(&canonical));
    }

    #[test]
    fn reject_policy_fails_on_inverted_bars() {
        let raw = RawTable::new()
            .with_column(ColumnLabel::flat("Date"), date_column("Date"))
            .with_column(ColumnLabel::flat("Open"), Column::new("o".into(), vec![10.0, 10.0]))
            .with_column(ColumnLabel::flat("High"), Column::new("h".into(), vec![9.0, 11.0]))
            .with_column(ColumnLabel::flat("Low"), Column::new("l".into(), vec![12.0, 9.0]))
            .with_column(ColumnLabel::flat("Close"), Column::new("c".into(), vec![10.0, 10.0]))
            .with_column(ColumnLabel::flat("Volume"), Column::new("v".into(), vec![1u64, 1]));

        let err = Normalizer::new(OhlcPolicy::Reject).normalize(&raw, SYM).unwrap_err();
        assert!(matches!(err, SchemaError::InconsistentBars { count: 1 }));

        let passed = Normalizer::new(OhlcPolicy::PassThrough).normalize(&raw, SYM).unwrap();
        assert_eq!(passed.height(), 2);
    }
}
