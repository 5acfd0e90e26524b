//! Instrument list loading.
//!
//! The list comes from a CSV file with a `Ticker` column or a TOML file with
//! a top-level `symbols` array. Symbols are trimmed, blanks and duplicates are
//! dropped (first occurrence wins) and the exchange suffix is appended.

use crate::domain::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Built-in list used when no instrument file is available.
pub const FALLBACK_SYMBOLS: [&str; 5] = ["BBRI", "BBCA", "TLKM", "ASII", "BMRI"];

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("failed to read instrument list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid instrument CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("instrument CSV has no 'Ticker' column")]
    MissingTickerColumn,

    #[error("invalid instrument TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Ordered, de-duplicated list of instrument symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentList {
    pub symbols: Vec<Symbol>,
}

impl InstrumentList {
    /// Build from raw symbols, applying `suffix` (e.g. `.JK`) where missing.
    pub fn from_symbols<I, S>(raw: I, suffix: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut symbols = Vec::new();
        for s in raw {
            let trimmed = s.as_ref().trim();
            if trimmed.is_empty() {
                continue;
            }
            let symbol = with_suffix(trimmed, suffix);
            if seen.insert(symbol.clone()) {
                symbols.push(symbol);
            }
        }
        Self { symbols }
    }

    /// The built-in fallback list.
    pub fn fallback(suffix: Option<&str>) -> Self {
        Self::from_symbols(FALLBACK_SYMBOLS, suffix)
    }

    /// Parse a CSV document; the `Ticker` header is matched case-insensitively.
    pub fn from_csv(content: &str, suffix: Option<&str>) -> Result<Self, InstrumentError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(content.as_bytes());

        let column = reader
            .headers()?
            .iter()
            .position(|h| h.eq_ignore_ascii_case("ticker"))
            .ok_or(InstrumentError::MissingTickerColumn)?;

        let mut raw = Vec::new();
        for record in reader.records() {
            let record = record?;
            if let Some(value) = record.get(column) {
                raw.push(value.to_string());
            }
        }
        Ok(Self::from_symbols(raw, suffix))
    }

    /// Parse a TOML document of the form `symbols = ["BBRI", ...]`.
    pub fn from_toml(content: &str, suffix: Option<&str>) -> Result<Self, InstrumentError> {
        let parsed: InstrumentList = toml::from_str(content)?;
        Ok(Self::from_symbols(parsed.symbols, suffix))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(String::as_str)
    }
}

fn with_suffix(symbol: &str, suffix: Option<&str>) -> Symbol {
    match suffix.map(str::trim).filter(|s| !s.is_empty()) {
        Some(suffix) if !symbol.to_ascii_uppercase().ends_with(&suffix.to_ascii_uppercase()) => {
            format!("{symbol}{suffix}")
        }
        _ => symbol.to_string(),
    }
}

/// Load an instrument list from `path`, choosing the parser by extension
/// (`.toml` → TOML, anything else → CSV).
pub fn load_instruments(path: &Path, suffix: Option<&str>) -> Result<InstrumentList, InstrumentError> {
    let content = std::fs::read_to_string(path).map_err(|source| InstrumentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    if is_toml {
        InstrumentList::from_toml(&content, suffix)
    } else {
        InstrumentList::from_csv(&content, suffix)
    }
}
