//! Per-instrument pipeline stages, errors and outcomes.

use candlefold_core::data::{FetchError, SchemaError};
use candlefold_core::domain::Timeframe;
use candlefold_core::sink::SinkError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Where an instrument is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetching,
    Normalizing,
    Resampling,
    Writing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetching => "fetching",
            Stage::Normalizing => "normalizing",
            Stage::Resampling => "resampling",
            Stage::Writing => "writing",
        })
    }
}

/// Any error that can stop one instrument.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Fetch(_) => Stage::Fetching,
            StageError::Schema(_) => Stage::Normalizing,
            StageError::Sink(_) => Stage::Writing,
        }
    }
}

/// Terminal result for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstrumentOutcome {
    /// At least one record was written.
    Succeeded { records: usize },
    /// The pipeline ran but nothing was written.
    NoRecords,
    /// The provider returned an empty table.
    Skipped,
    Failed { stage: Stage, error: String },
    /// The run was cancelled before this instrument finished.
    Cancelled,
}

impl InstrumentOutcome {
    pub fn failed(error: &StageError) -> Self {
        InstrumentOutcome::Failed {
            stage: error.stage(),
            error: error.to_string(),
        }
    }
}

/// A failure noted during the run. `timeframe` is set for write failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub instrument: String,
    pub stage: Stage,
    pub timeframe: Option<Timeframe>,
    pub message: String,
}

/// Everything the orchestrator learns from one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentReport {
    pub instrument: String,
    pub outcome: InstrumentOutcome,
    /// Records written per timeframe; timeframes whose write failed are absent.
    pub written: BTreeMap<Timeframe, usize>,
    pub failures: Vec<FailureRecord>,
}

impl InstrumentReport {
    pub fn new(instrument: impl Into<String>, outcome: InstrumentOutcome) -> Self {
        Self {
            instrument: instrument.into(),
            outcome,
            written: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    /// Report for an instrument that stopped on `error`.
    pub fn from_error(instrument: impl Into<String>, error: &StageError) -> Self {
        let instrument = instrument.into();
        let failure = FailureRecord {
            instrument: instrument.clone(),
            stage: error.stage(),
            timeframe: None,
            message: error.to_string(),
        };
        Self {
            outcome: InstrumentOutcome::failed(error),
            instrument,
            written: BTreeMap::new(),
            failures: vec![failure],
        }
    }

    pub fn total_written(&self) -> usize {
        self.written.values().sum()
    }
}
