//! Multi-year buckets built on top of the yearly sequence.
//!
//! Years are grouped relative to the earliest year present, so the first
//! group always starts at that year and a trailing group may be short.

use super::{calendar_buckets, Bucket};
use crate::domain::{Bar, ResampledBar, Timeframe};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::collections::BTreeMap;

/// Group index of `year`: `floor((year - min_year) / group_size)`.
pub fn group_id(year: i32, min_year: i32, group_size: i32) -> i32 {
    (year - min_year).div_euclid(group_size)
}

/// `"{start_year}-{end_year}"`.
pub fn period_label(start_year: i32, end_year: i32) -> String {
    format!("{start_year}-{end_year}")
}

struct Group {
    start_year: i32,
    end_year: i32,
    /// Latest yearly bar date in the group.
    date: NaiveDate,
    bucket: Bucket,
}

pub(crate) fn resample_multi_year(
    bars: &[Bar],
    timeframe: Timeframe,
    group_size: i32,
    ingested_at: DateTime<Utc>,
) -> Vec<ResampledBar> {
    let yearly = calendar_buckets(bars, Timeframe::Yearly);
    let Some(min_year) = yearly.keys().next().map(|d| d.year()) else {
        return Vec::new();
    };

    let mut groups: BTreeMap<i32, Group> = BTreeMap::new();
    for (year_start, bucket) in yearly {
        let year = year_start.year();
        groups
            .entry(group_id(year, min_year, group_size))
            .and_modify(|g| {
                g.start_year = g.start_year.min(year);
                g.end_year = g.end_year.max(year);
                g.date = g.date.max(year_start);
                g.bucket.merge(&bucket);
            })
            .or_insert_with(|| Group {
                start_year: year,
                end_year: year,
                date: year_start,
                bucket: bucket.clone(),
            });
    }

    groups
        .into_values()
        .map(|g| {
            let label = period_label(g.start_year, g.end_year);
            g.bucket.into_resampled(timeframe, g.date, Some(label), ingested_at)
        })
        .collect()
}
