//! Candlefold Runner: batch orchestration, run counters, configuration, progress.
//!
//! This crate builds on `candlefold-core` to provide:
//! - TOML pipeline configuration with validation
//! - The batch orchestrator with per-instrument failure containment
//! - Run counters and the serializable run summary
//! - Progress hooks with a tracing-backed default

pub mod config;
pub mod counters;
pub mod orchestrator;
pub mod outcome;
pub mod progress;

pub use config::{ConfigError, PipelineConfig, RetryConfig, StoreConfig};
pub use counters::{RunCounters, RunSummary};
pub use orchestrator::{Pipeline, PipelineError};
pub use outcome::{FailureRecord, InstrumentOutcome, InstrumentReport, Stage, StageError};
pub use progress::{LogProgress, PipelineProgress};
