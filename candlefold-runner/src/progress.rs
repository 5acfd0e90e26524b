//! Progress reporting hooks for a pipeline run.

use crate::counters::RunSummary;
use crate::outcome::{InstrumentOutcome, InstrumentReport};
use tracing::{info, warn};

/// Callbacks invoked on the orchestrating thread as the run advances.
///
/// Reports are delivered in instrument-list order whatever order the workers
/// finish in.
pub trait PipelineProgress: Send + Sync {
    /// The first report of a batch is about to be delivered. `batch` is
    /// 1-based. Not called for a batch whose first instrument was cancelled.
    fn on_batch_start(&self, batch: usize, batch_count: usize, instruments: &[String]);

    /// One instrument reached a terminal outcome. `done` counts instruments
    /// finished so far, this one included.
    fn on_instrument_complete(&self, report: &InstrumentReport, done: usize, total: usize);

    fn on_run_complete(&self, summary: &RunSummary);
}

/// Reports progress through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl PipelineProgress for LogProgress {
    fn on_batch_start(&self, batch: usize, batch_count: usize, instruments: &[String]) {
        info!(
            batch,
            batch_count,
            instruments = %instruments.join(", "),
            "processing batch"
        );
    }

    fn on_instrument_complete(&self, report: &InstrumentReport, done: usize, total: usize) {
        let instrument = report.instrument.as_str();
        match &report.outcome {
            InstrumentOutcome::Succeeded { records } => {
                info!(instrument, records, done, total, "instrument complete");
                for (tf, count) in report.written.iter().filter(|(_, c)| **c > 0) {
                    info!(instrument, timeframe = %tf, records = count, "records written");
                }
            }
            InstrumentOutcome::NoRecords => {
                warn!(instrument, done, total, "no records written");
            }
            InstrumentOutcome::Skipped => {
                info!(instrument, done, total, "skipped: provider returned no data");
            }
            InstrumentOutcome::Failed { stage, error } => {
                warn!(instrument, stage = %stage, error = %error, done, total, "instrument failed");
            }
            InstrumentOutcome::Cancelled => {
                info!(instrument, done, total, "cancelled");
            }
        }
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        info!(
            successful = summary.successful,
            total = summary.total,
            failed = summary.failed,
            skipped = summary.skipped,
            records = summary.total_records(),
            elapsed_secs = summary.elapsed_secs,
            "run complete"
        );
    }
}
