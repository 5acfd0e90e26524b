//! Candlefold Core: domain types, data providers, normalization, resampling, bar stores.
//!
//! This crate contains everything one instrument passes through:
//! - Domain types (daily bars, resampled bars, timeframes)
//! - Provider trait with Yahoo and synthetic sources, circuit breaker, retrying fetch
//! - Normalizer from raw provider tables to the canonical bar schema
//! - Calendar and multi-year resampling
//! - Sink trait with Parquet and in-memory stores, plus the store schema contract

pub mod cancel;
pub mod data;
pub mod domain;
pub mod resample;
pub mod schema;
pub mod sink;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything the runner shares across worker threads
    /// is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::ResampledBar>();
        require_sync::<domain::ResampledBar>();
        require_send::<data::RawTable>();
        require_sync::<data::RawTable>();
        require_send::<data::Normalizer>();
        require_sync::<data::Normalizer>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::YahooProvider>();
        require_sync::<data::YahooProvider>();
        require_send::<data::SyntheticProvider>();
        require_sync::<data::SyntheticProvider>();
        require_send::<sink::ParquetStore>();
        require_sync::<sink::ParquetStore>();
        require_send::<sink::MemorySink>();
        require_sync::<sink::MemorySink>();
        require_send::<cancel::CancelFlag>();
        require_sync::<cancel::CancelFlag>();
    }

    /// The sink and provider traits are usable as shared trait objects.
    #[test]
    fn traits_are_object_safe() {
        fn _sink(_: &dyn sink::BarSink) {}
        fn _provider(_: &dyn data::DataProvider) {}
        fn _sleeper(_: &dyn data::Sleeper) {}
    }
}
