//! Bounded retry around a single provider fetch.
//!
//! A fetch is attempted up to `max_attempts` times with a fixed delay between
//! failed attempts. An empty table is a terminal outcome and is never retried;
//! neither are errors the provider marks as non-retryable.

use super::provider::{DataProvider, FetchError, FetchWindow, RawTable};
use crate::cancel::CancelFlag;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retry policy for one instrument fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Attempt counter for one fetch; lives only as long as the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub max_attempts: u32,
}

impl RetryState {
    fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
        }
    }

    fn has_next(&self) -> bool {
        self.attempt < self.max_attempts
    }

    fn is_last(&self) -> bool {
        self.attempt + 1 >= self.max_attempts
    }
}

/// Blocking delay between attempts. Swapped out in tests.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread. Each instrument's fetch runs on its own thread
/// when the pipeline is parallel, so one delay never stalls another instrument.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Result of a fetch that did not fail.
#[derive(Debug)]
pub enum FetchOutcome {
    Table(RawTable),
    /// The provider answered with zero rows; the instrument is skipped.
    Empty,
}

/// Wraps a provider with the retry policy.
pub struct RetryingFetcher<'a> {
    provider: &'a dyn DataProvider,
    policy: RetryPolicy,
    sleeper: &'a dyn Sleeper,
    cancel: Option<&'a CancelFlag>,
}

impl<'a> RetryingFetcher<'a> {
    pub fn new(provider: &'a dyn DataProvider, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            sleeper: &ThreadSleeper,
            cancel: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelFlag::is_cancelled)
    }

    /// Fetch `instrument` over `window`, retrying transient failures.
    pub fn fetch(&self, instrument: &str, window: FetchWindow) -> Result<FetchOutcome, FetchError> {
        let mut state = RetryState::new(self.policy.max_attempts);
        let mut last_error = None;

        while state.has_next() {
            if self.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            debug!(
                instrument,
                provider = self.provider.name(),
                attempt = state.attempt + 1,
                "fetching daily bars"
            );

            match self.provider.fetch_daily(instrument, window) {
                Ok(table) if table.is_empty() => {
                    info!(instrument, "provider returned no rows, skipping");
                    return Ok(FetchOutcome::Empty);
                }
                Ok(table) => return Ok(FetchOutcome::Table(table)),
                Err(e) if !e.is_retryable() => {
                    warn!(instrument, error = %e, "fetch failed, not retrying");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        instrument,
                        attempt = state.attempt + 1,
                        max_attempts = state.max_attempts,
                        error = %e,
                        "fetch attempt failed"
                    );
                    last_error = Some(e);
                    if !state.is_last() {
                        self.sleeper.sleep(self.policy.delay);
                    }
                }
            }
            state.attempt += 1;
        }

        Err(FetchError::Exhausted {
            instrument: instrument.to_string(),
            attempts: state.attempt,
            last: Box::new(
                last_error.unwrap_or_else(|| FetchError::Other("no fetch attempts allowed".into())),
            ),
        })
    }
}
