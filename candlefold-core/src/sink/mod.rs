//! Bar sinks: where resampled records end up.

pub mod memory;
pub mod parquet;

pub use memory::MemorySink;
pub use parquet::{ParquetStore, PartitionMeta, PartitionStatus};

use crate::domain::{ResampledBar, Timeframe};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("store rejected write to {destination}: {reason}")]
    Rejected { destination: String, reason: String },

    #[error("record for {found} handed to the {expected} destination")]
    TimeframeMismatch { expected: Timeframe, found: Timeframe },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("metadata error: {0}")]
    Metadata(String),
}

/// How a write treats records already in the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Replace records with the same (instrument, timeframe, date).
    #[default]
    Upsert,
    /// Keep everything; re-runs duplicate records.
    Append,
}

/// Destination for resampled records, one collection per timeframe.
pub trait BarSink: Send + Sync {
    /// Persist `records` to the `timeframe` destination and return how many
    /// were written. An empty slice writes nothing and returns 0.
    fn write(&self, timeframe: Timeframe, records: Vec<ResampledBar>) -> Result<usize, SinkError>;
}

/// Reject records that belong to another timeframe.
pub(crate) fn check_timeframe(timeframe: Timeframe, records: &[ResampledBar]) -> Result<(), SinkError> {
    match records.iter().find(|r| r.timeframe != timeframe) {
        Some(r) => Err(SinkError::TimeframeMismatch {
            expected: timeframe,
            found: r.timeframe,
        }),
        None => Ok(()),
    }
}

/// Combine stored and incoming records for one destination.
///
/// Upsert keeps the incoming record for any key present in both and returns
/// the result ordered by (instrument, date). Append concatenates.
pub(crate) fn merge_records(
    existing: Vec<ResampledBar>,
    incoming: Vec<ResampledBar>,
    mode: WriteMode,
) -> Vec<ResampledBar> {
    match mode {
        WriteMode::Append => {
            let mut all = existing;
            all.extend(incoming);
            all
        }
        WriteMode::Upsert => {
            let mut keyed: BTreeMap<(String, Timeframe, NaiveDate), ResampledBar> = BTreeMap::new();
            for record in existing.into_iter().chain(incoming) {
                keyed.insert((record.instrument.clone(), record.timeframe, record.date), record);
            }
            keyed.into_values().collect()
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::{DateTime, Utc};

    pub fn record(instrument: &str, timeframe: Timeframe, day: u32, close: f64) -> ResampledBar {
        ResampledBar {
            instrument: instrument.into(),
            timeframe,
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 100,
            adjusted_close: Some(close),
            period_label: None,
            ingested_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }
}
