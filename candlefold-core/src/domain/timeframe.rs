//! Aggregation granularities.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Granularity of a bar sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "daily")]
    Daily,
    #[serde(rename = "weekly")]
    Weekly,
    #[serde(rename = "monthly")]
    Monthly,
    #[serde(rename = "yearly")]
    Yearly,
    #[serde(rename = "3year")]
    ThreeYear,
    #[serde(rename = "5year")]
    FiveYear,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown timeframe '{0}' (expected daily, weekly, monthly, yearly, 3year or 5year)")]
pub struct TimeframeParseError(pub String);

impl Timeframe {
    /// Every timeframe, in reporting order.
    pub const ALL: [Timeframe; 6] = [
        Timeframe::Daily,
        Timeframe::Weekly,
        Timeframe::Monthly,
        Timeframe::Yearly,
        Timeframe::ThreeYear,
        Timeframe::FiveYear,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Daily => "daily",
            Timeframe::Weekly => "weekly",
            Timeframe::Monthly => "monthly",
            Timeframe::Yearly => "yearly",
            Timeframe::ThreeYear => "3year",
            Timeframe::FiveYear => "5year",
        }
    }

    /// Store collection name for this timeframe, e.g. `weekly_prices`.
    pub fn destination(self) -> String {
        format!("{}_prices", self.as_str())
    }

    /// Number of calendar years per bucket for multi-year timeframes.
    pub fn group_size(self) -> Option<i32> {
        match self {
            Timeframe::ThreeYear => Some(3),
            Timeframe::FiveYear => Some(5),
            _ => None,
        }
    }

    pub fn is_multi_year(self) -> bool {
        self.group_size().is_some()
    }

    /// Truncate a date to the start of its calendar bucket.
    ///
    /// Weeks start on Monday (ISO). Multi-year timeframes truncate to the
    /// calendar year; the year grouping happens in a second pass.
    pub fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            Timeframe::Daily => date,
            Timeframe::Weekly => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            Timeframe::Monthly => date.with_day(1).unwrap_or(date),
            Timeframe::Yearly | Timeframe::ThreeYear | Timeframe::FiveYear => {
                date.with_ordinal(1).unwrap_or(date)
            }
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str() == lowered)
            .ok_or_else(|| TimeframeParseError(s.to_string()))
    }
}
