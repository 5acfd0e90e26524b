//! Data layer: providers, retrying fetch, normalization, instrument lists.

pub mod circuit_breaker;
pub mod frame;
pub mod normalize;
pub mod provider;
pub mod retry;
pub mod synthetic;
pub mod universe;
pub mod yahoo;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use frame::{bars_from_frame, bars_to_frame};
pub use normalize::{Normalizer, OhlcPolicy, SchemaError};
pub use provider::{ColumnLabel, DataProvider, FetchError, FetchWindow, RawTable};
pub use retry::{FetchOutcome, RetryPolicy, RetryState, RetryingFetcher, Sleeper, ThreadSleeper};
pub use synthetic::SyntheticProvider;
pub use universe::{load_instruments, InstrumentError, InstrumentList, FALLBACK_SYMBOLS};
pub use yahoo::YahooProvider;
