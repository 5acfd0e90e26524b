//! Serializable pipeline configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is a valid
//! configuration. CLI flags override individual fields after loading.

use candlefold_core::data::{FetchWindow, OhlcPolicy, RetryPolicy};
use candlefold_core::domain::Timeframe;
use candlefold_core::sink::WriteMode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Retry settings for each instrument fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            delay_secs: policy.delay.as_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_secs(self.delay_secs),
        }
    }
}

/// Where and how resampled bars are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub write_mode: WriteMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            write_mode: WriteMode::default(),
        }
    }
}

/// Configuration for one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Instruments per batch. Batches only group progress reporting.
    pub batch_size: usize,
    /// Length of the trailing fetch window in years.
    pub window_years: u32,
    pub timeframes: Vec<Timeframe>,
    /// Instruments processed concurrently within a batch.
    pub workers: usize,
    /// Appended to symbols that lack it, e.g. `.JK`.
    pub exchange_suffix: Option<String>,
    /// CSV or TOML instrument list.
    pub instruments_file: Option<PathBuf>,
    pub ohlc_policy: OhlcPolicy,
    pub retry: RetryConfig,
    pub store: StoreConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            window_years: 5,
            timeframes: Timeframe::ALL.to_vec(),
            workers: 1,
            exchange_suffix: None,
            instruments_file: None,
            ohlc_policy: OhlcPolicy::default(),
            retry: RetryConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.window_years == 0 {
            return Err(ConfigError::Invalid("window_years must be at least 1".into()));
        }
        if self.timeframes.is_empty() {
            return Err(ConfigError::Invalid("timeframes must not be empty".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    /// Trailing fetch window ending on `today`.
    pub fn fetch_window(&self, today: NaiveDate) -> FetchWindow {
        FetchWindow::trailing_years(self.window_years, today)
    }

    /// Requested timeframes in reporting order, without duplicates.
    pub fn timeframes(&self) -> Vec<Timeframe> {
        let mut tfs = self.timeframes.clone();
        tfs.sort();
        tfs.dedup();
        tfs
    }
}
