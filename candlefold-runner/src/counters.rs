//! Run-wide counters and the final summary.

use crate::outcome::{FailureRecord, InstrumentOutcome, InstrumentReport};
use candlefold_core::domain::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Aggregates instrument reports. Owned by one orchestrator run and only
/// mutated on the orchestrating thread.
#[derive(Debug, Clone)]
pub struct RunCounters {
    records: BTreeMap<Timeframe, u64>,
    successful: usize,
    failed: usize,
    skipped: usize,
    no_records: usize,
    cancelled: usize,
    processed: usize,
    failures: Vec<FailureRecord>,
}

impl Default for RunCounters {
    fn default() -> Self {
        Self {
            records: Timeframe::ALL.iter().map(|tf| (*tf, 0)).collect(),
            successful: 0,
            failed: 0,
            skipped: 0,
            no_records: 0,
            cancelled: 0,
            processed: 0,
            failures: Vec::new(),
        }
    }
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one instrument's report in.
    ///
    /// An instrument counts as successful iff it wrote at least one record,
    /// whatever its outcome says about individual timeframes.
    pub fn record(&mut self, report: &InstrumentReport) {
        self.processed += 1;
        for (tf, count) in &report.written {
            *self.records.entry(*tf).or_insert(0) += *count as u64;
        }
        if report.total_written() > 0 {
            self.successful += 1;
        }
        match report.outcome {
            InstrumentOutcome::Succeeded { .. } => {}
            InstrumentOutcome::NoRecords => self.no_records += 1,
            InstrumentOutcome::Skipped => self.skipped += 1,
            InstrumentOutcome::Failed { .. } => self.failed += 1,
            InstrumentOutcome::Cancelled => self.cancelled += 1,
        }
        self.failures.extend(report.failures.iter().cloned());
    }

    pub fn successful(&self) -> usize {
        self.successful
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn records(&self, timeframe: Timeframe) -> u64 {
        self.records.get(&timeframe).copied().unwrap_or(0)
    }

    pub fn summary(&self, total: usize, started_at: DateTime<Utc>, elapsed_secs: f64) -> RunSummary {
        RunSummary {
            total,
            successful: self.successful,
            failed: self.failed,
            skipped: self.skipped,
            no_records: self.no_records,
            cancelled: self.cancelled,
            records: self.records.clone(),
            started_at,
            elapsed_secs,
            failures: self.failures.clone(),
        }
    }
}

/// Final report of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Instruments requested.
    pub total: usize,
    /// Instruments with at least one record written.
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub no_records: usize,
    pub cancelled: usize,
    /// Records written per timeframe; every timeframe is present.
    pub records: BTreeMap<Timeframe, u64>,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub failures: Vec<FailureRecord>,
}

impl RunSummary {
    pub fn total_records(&self) -> u64 {
        self.records.values().sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Instruments processed: {}/{}", self.successful, self.total)?;
        for (tf, count) in &self.records {
            writeln!(f, "  {:<8} {count} records", tf.as_str())?;
        }
        write!(
            f,
            "Failed: {}  Skipped: {}  No records: {}  Cancelled: {}  ({:.1}s)",
            self.failed, self.skipped, self.no_records, self.cancelled, self.elapsed_secs
        )?;
        for failure in &self.failures {
            write!(f, "\n  ! {} [{}", failure.instrument, failure.stage)?;
            if let Some(tf) = failure.timeframe {
                write!(f, " {tf}")?;
            }
            write!(f, "] {}", failure.message)?;
        }
        Ok(())
    }
}
