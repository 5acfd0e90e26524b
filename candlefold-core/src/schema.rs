//! Store schema contract: the record layout every bar store writes.
//!
//! - Columns: instrument, timeframe, date, open, high, low, close, volume,
//!   adjusted_close, period_label, ingested_at
//! - Sort order: ascending by date within each instrument partition
//! - Partitioning: `{timeframe}_prices/instrument={SYMBOL}/`
//! - `ingested_at` is microseconds since the Unix epoch, UTC
//! - `adjusted_close` and `period_label` are nullable; every other column is not

use polars::prelude::DataType;
use serde::{Deserialize, Serialize};

/// Data types used by the store schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaType {
    Date,
    Float64,
    UInt64,
    Int64,
    String,
}

impl SchemaType {
    /// Map a polars dtype onto the contract, if it is one we use.
    pub fn from_dtype(dtype: &DataType) -> Option<Self> {
        match dtype {
            DataType::Date => Some(SchemaType::Date),
            DataType::Float64 => Some(SchemaType::Float64),
            DataType::UInt64 => Some(SchemaType::UInt64),
            DataType::Int64 => Some(SchemaType::Int64),
            DataType::String => Some(SchemaType::String),
            _ => None,
        }
    }
}

/// A single field in the store schema.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaField {
    pub name: &'static str,
    pub dtype: SchemaType,
    pub nullable: bool,
}

const fn field(name: &'static str, dtype: SchemaType, nullable: bool) -> SchemaField {
    SchemaField {
        name,
        dtype,
        nullable,
    }
}

pub const STORE_SCHEMA: &[SchemaField] = &[
    field("instrument", SchemaType::String, false),
    field("timeframe", SchemaType::String, false),
    field("date", SchemaType::Date, false),
    field("open", SchemaType::Float64, false),
    field("high", SchemaType::Float64, false),
    field("low", SchemaType::Float64, false),
    field("close", SchemaType::Float64, false),
    field("volume", SchemaType::UInt64, false),
    field("adjusted_close", SchemaType::Float64, true),
    field("period_label", SchemaType::String, true),
    field("ingested_at", SchemaType::Int64, false),
];

/// Result of schema validation.
#[derive(Debug, Clone)]
pub struct SchemaValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Validate (column name, dtype) pairs against [`STORE_SCHEMA`].
///
/// Unknown dtypes are passed as `None`.
pub fn validate_schema(columns: &[(&str, Option<SchemaType>)]) -> SchemaValidation {
    let mut errors = Vec::new();

    for expected in STORE_SCHEMA {
        match columns.iter().find(|(name, _)| *name == expected.name) {
            Some((_, Some(dtype))) if *dtype == expected.dtype => {}
            Some((_, dtype)) => errors.push(format!(
                "column '{}': expected {:?}, got {:?}",
                expected.name, expected.dtype, dtype
            )),
            None => errors.push(format!("missing required column '{}'", expected.name)),
        }
    }

    for (name, _) in columns {
        if !STORE_SCHEMA.iter().any(|f| f.name == *name) {
            errors.push(format!("unexpected column '{name}' (not in schema)"));
        }
    }

    SchemaValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}

/// Validate a polars frame against [`STORE_SCHEMA`], including nulls in
/// columns that are not nullable.
pub fn validate_frame(df: &polars::prelude::DataFrame) -> SchemaValidation {
    let columns: Vec<(&str, Option<SchemaType>)> = df
        .get_columns()
        .iter()
        .map(|c| (c.name().as_str(), SchemaType::from_dtype(c.dtype())))
        .collect();
    let mut validation = validate_schema(&columns);

    for field in STORE_SCHEMA.iter().filter(|f| !f.nullable) {
        let Ok(column) = df.column(field.name) else {
            continue;
        };
        let nulls = column.null_count();
        if nulls > 0 {
            validation
                .errors
                .push(format!("column '{}': {nulls} null(s) in non-nullable column", field.name));
        }
    }

    validation.is_valid = validation.errors.is_empty();
    validation
}
