//! In-memory bar sink for tests and dry runs.

use super::{check_timeframe, merge_records, BarSink, SinkError, WriteMode};
use crate::domain::{ResampledBar, Timeframe};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Collections {
    by_timeframe: BTreeMap<Timeframe, Vec<ResampledBar>>,
    failing: BTreeSet<Timeframe>,
}

/// Keeps every destination in a map. Timeframes marked with
/// [`MemorySink::fail_on`] reject writes.
#[derive(Debug, Default)]
pub struct MemorySink {
    mode: WriteMode,
    inner: Mutex<Collections>,
}

impl MemorySink {
    pub fn new(mode: WriteMode) -> Self {
        Self {
            mode,
            inner: Mutex::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every later write to `timeframe` fail.
    pub fn fail_on(&self, timeframe: Timeframe) {
        self.lock().failing.insert(timeframe);
    }

    /// Snapshot of one destination.
    pub fn records(&self, timeframe: Timeframe) -> Vec<ResampledBar> {
        self.lock()
            .by_timeframe
            .get(&timeframe)
            .cloned()
            .unwrap_or_default()
    }

    /// Stored record count per destination.
    pub fn counts(&self) -> BTreeMap<Timeframe, usize> {
        self.lock()
            .by_timeframe
            .iter()
            .map(|(tf, records)| (*tf, records.len()))
            .collect()
    }
}

impl BarSink for MemorySink {
    fn write(&self, timeframe: Timeframe, records: Vec<ResampledBar>) -> Result<usize, SinkError> {
        check_timeframe(timeframe, &records)?;
        let mut inner = self.lock();
        if inner.failing.contains(&timeframe) {
            return Err(SinkError::Rejected {
                destination: timeframe.destination(),
                reason: "injected failure".into(),
            });
        }
        if records.is_empty() {
            return Ok(0);
        }

        let written = records.len();
        let existing = inner.by_timeframe.remove(&timeframe).unwrap_or_default();
        inner
            .by_timeframe
            .insert(timeframe, merge_records(existing, records, self.mode));
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::test_support::record;

    #[test]
    fn empty_write_returns_zero() {
        let sink = MemorySink::default();
        assert_eq!(sink.write(Timeframe::Daily, Vec::new()).unwrap(), 0);
        assert!(sink.counts().is_empty());
    }

    #[test]
    fn upsert_rerun_does_not_duplicate() {
        let sink = MemorySink::new(WriteMode::Upsert);
        let batch = vec![
            record("X", Timeframe::Daily, 2, 1.0),
            record("X", Timeframe::Daily, 3, 2.0),
        ];
        assert_eq!(sink.write(Timeframe::Daily, batch.clone()).unwrap(), 2);
        assert_eq!(sink.write(Timeframe::Daily, batch).unwrap(), 2);
        assert_eq!(sink.records(Timeframe::Daily).len(), 2);
    }

    #[test]
    fn append_rerun_duplicates() {
        let sink = MemorySink::new(WriteMode::Append);
        let batch = vec![record("X", Timeframe::Daily, 2, 1.0)];
        sink.write(Timeframe::Daily, batch.clone()).unwrap();
        sink.write(Timeframe::Daily, batch).unwrap();
        assert_eq!(sink.records(Timeframe::Daily).len(), 2);
    }

    #[test]
    fn injected_failure_only_hits_its_timeframe() {
        let sink = MemorySink::default();
        sink.fail_on(Timeframe::Weekly);
        let err = sink
            .write(Timeframe::Weekly, vec![record("X", Timeframe::Weekly, 1, 1.0)])
            .unwrap_err();
        assert!(matches!(err, SinkError::Rejected { .. }));
        assert_eq!(
            sink.write(Timeframe::Daily, vec![record("X", Timeframe::Daily, 1, 1.0)])
                .unwrap(),
            1
        );
    }
}
