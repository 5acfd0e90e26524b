//! Domain types for candlefold

pub mod bar;
pub mod timeframe;

pub use bar::{Bar, ResampledBar};
pub use timeframe::{Timeframe, TimeframeParseError};

/// Symbol type alias
pub type Symbol = String;
