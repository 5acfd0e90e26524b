//! Batch orchestrator: drives every instrument through
//! fetch → normalize → resample → write and folds the results into counters.
//!
//! Per instrument: `Fetching → Normalizing → Resampling → Writing → Done`,
//! with any stage able to end in `Failed`. Failures are contained to their
//! instrument; the run always completes and always produces a summary.
//!
//! Batches only group progress reporting. With `workers > 1` the whole
//! instrument list runs through one parallel iterator on a rayon pool, so a
//! worker stuck in one instrument's retry delays never holds back the others.
//! Reports come back over a channel and are folded into [`RunCounters`] on the
//! calling thread in instrument order.

use crate::config::{ConfigError, PipelineConfig};
use crate::counters::{RunCounters, RunSummary};
use crate::outcome::{FailureRecord, InstrumentOutcome, InstrumentReport, Stage, StageError};
use crate::progress::{LogProgress, PipelineProgress};
use candlefold_core::cancel::CancelFlag;
use candlefold_core::data::{
    DataProvider, FetchError, FetchOutcome, FetchWindow, Normalizer, RetryingFetcher, Sleeper,
    ThreadSleeper,
};
use candlefold_core::domain::Timeframe;
use candlefold_core::resample::resample;
use candlefold_core::sink::BarSink;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

/// One ingestion run over a provider and a sink.
pub struct Pipeline<'a> {
    provider: &'a dyn DataProvider,
    sink: &'a dyn BarSink,
    config: PipelineConfig,
    sleeper: &'a dyn Sleeper,
    progress: &'a dyn PipelineProgress,
    cancel: CancelFlag,
    window: Option<FetchWindow>,
}

impl<'a> Pipeline<'a> {
    pub fn new(provider: &'a dyn DataProvider, sink: &'a dyn BarSink, config: PipelineConfig) -> Self {
        Self {
            provider,
            sink,
            config,
            sleeper: &ThreadSleeper,
            progress: &LogProgress,
            cancel: CancelFlag::new(),
            window: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn PipelineProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fixed fetch window instead of the trailing window ending today.
    pub fn with_window(mut self, window: FetchWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process every instrument and return the run summary.
    ///
    /// Only configuration or pool setup problems are errors; per-instrument
    /// failures end up in the summary.
    pub fn run(&self, instruments: &[String]) -> Result<RunSummary, PipelineError> {
        self.config.validate()?;

        // One timestamp per run: every record written by this run carries the
        // run start as `ingested_at`, so a run's output can be selected as a unit.
        let started_at = Utc::now();
        let clock = Instant::now();
        let window = self
            .window
            .unwrap_or_else(|| self.config.fetch_window(started_at.date_naive()));
        let timeframes = self.config.timeframes();
        let normalizer = Normalizer::new(self.config.ohlc_policy);

        let pool = if self.config.workers > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(self.config.workers)
                    .build()
                    .map_err(|e| PipelineError::ThreadPool(e.to_string()))?,
            )
        } else {
            None
        };

        let total = instruments.len();
        let batch_size = self.config.batch_size;
        let batch_count = total.div_ceil(batch_size);
        info!(
            instruments = total,
            batches = batch_count,
            workers = self.config.workers,
            provider = self.provider.name(),
            start = %window.start,
            end = %window.end,
            "starting ingestion run"
        );

        let process = |instrument: &String| {
            self.process_instrument(instrument, window, &timeframes, &normalizer, started_at)
        };

        let mut counters = RunCounters::new();
        let mut deliver = |index: usize, report: InstrumentReport| {
            if index % batch_size == 0 && report.outcome != InstrumentOutcome::Cancelled {
                let end = (index + batch_size).min(total);
                self.progress
                    .on_batch_start(index / batch_size + 1, batch_count, &instruments[index..end]);
            }
            counters.record(&report);
            self.progress.on_instrument_complete(&report, index + 1, total);
            if (index + 1) % batch_size == 0 || index + 1 == total {
                debug!(
                    batch = index / batch_size + 1,
                    successful = counters.successful(),
                    processed = counters.processed(),
                    "batch complete"
                );
            }
        };

        match &pool {
            None => {
                for (index, instrument) in instruments.iter().enumerate() {
                    deliver(index, process(instrument));
                }
            }
            Some(pool) => {
                let (tx, rx) = mpsc::channel::<(usize, InstrumentReport)>();
                thread::scope(|scope| {
                    let process = &process;
                    scope.spawn(move || {
                        pool.install(|| {
                            instruments.par_iter().enumerate().for_each_with(
                                tx,
                                |tx, (index, instrument)| {
                                    // The receiver only goes away if the caller panicked.
                                    let _ = tx.send((index, process(instrument)));
                                },
                            );
                        });
                    });

                    // Reports arrive in completion order; hand them on in list order.
                    let mut pending = BTreeMap::new();
                    let mut next = 0;
                    for (index, report) in rx {
                        pending.insert(index, report);
                        while let Some(report) = pending.remove(&next) {
                            deliver(next, report);
                            next += 1;
                        }
                    }
                });
            }
        }

        let summary = counters.summary(total, started_at, clock.elapsed().as_secs_f64());
        self.progress.on_run_complete(&summary);
        Ok(summary)
    }

    fn process_instrument(
        &self,
        instrument: &str,
        window: FetchWindow,
        timeframes: &[Timeframe],
        normalizer: &Normalizer,
        ingested_at: DateTime<Utc>,
    ) -> InstrumentReport {
        if self.cancel.is_cancelled() {
            return InstrumentReport::new(instrument, InstrumentOutcome::Cancelled);
        }

        debug!(instrument, stage = %Stage::Fetching, "stage");
        let fetcher = RetryingFetcher::new(self.provider, self.config.retry_policy())
            .with_sleeper(self.sleeper)
            .with_cancel(&self.cancel);
        let table = match fetcher.fetch(instrument, window) {
            Ok(FetchOutcome::Table(table)) => table,
            Ok(FetchOutcome::Empty) => {
                return InstrumentReport::new(instrument, InstrumentOutcome::Skipped);
            }
            Err(FetchError::Cancelled) => {
                return InstrumentReport::new(instrument, InstrumentOutcome::Cancelled);
            }
            Err(e) => return self.fail(instrument, e.into()),
        };

        debug!(instrument, stage = %Stage::Normalizing, rows = table.height(), "stage");
        let bars = match normalizer.normalize_bars(&table, instrument) {
            Ok(bars) => bars,
            Err(e) => return self.fail(instrument, e.into()),
        };

        let mut written = BTreeMap::new();
        let mut failures = Vec::new();
        for &timeframe in timeframes {
            debug!(instrument, stage = %Stage::Resampling, timeframe = %timeframe, "stage");
            let records = resample(&bars, timeframe, ingested_at);

            debug!(instrument, stage = %Stage::Writing, timeframe = %timeframe, records = records.len(), "stage");
            match self.sink.write(timeframe, records) {
                Ok(count) => {
                    written.insert(timeframe, count);
                }
                Err(e) => {
                    warn!(
                        instrument,
                        stage = %Stage::Writing,
                        timeframe = %timeframe,
                        error = %e,
                        "write failed, continuing with remaining timeframes"
                    );
                    failures.push(FailureRecord {
                        instrument: instrument.to_string(),
                        stage: Stage::Writing,
                        timeframe: Some(timeframe),
                        message: StageError::from(e).to_string(),
                    });
                }
            }
        }

        let total: usize = written.values().sum();
        let outcome = if total > 0 {
            InstrumentOutcome::Succeeded { records: total }
        } else if let Some(first) = failures.first() {
            InstrumentOutcome::Failed {
                stage: Stage::Writing,
                error: first.message.clone(),
            }
        } else {
            InstrumentOutcome::NoRecords
        };

        InstrumentReport {
            instrument: instrument.to_string(),
            outcome,
            written,
            failures,
        }
    }

    fn fail(&self, instrument: &str, error: StageError) -> InstrumentReport {
        warn!(instrument, stage = %error.stage(), error = %error, "instrument failed");
        InstrumentReport::from_error(instrument, &error)
    }
}
