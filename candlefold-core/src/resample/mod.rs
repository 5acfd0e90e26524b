//! Timeframe resampling of daily bars.
//!
//! Calendar timeframes bucket by truncated date; multi-year timeframes
//! re-bucket the yearly sequence (see [`multi_year`]). Both use the same OHLCV
//! fold: first open, max high, min low, last close and adjusted close, summed
//! volume.

pub mod multi_year;

use crate::domain::{Bar, ResampledBar, Timeframe};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;

/// Running OHLCV aggregate for one bucket. Bars must be absorbed in date order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Bucket {
    pub instrument: String,
    /// Latest constituent date.
    pub last_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub adjusted_close: Option<f64>,
}

impl Bucket {
    fn from_bar(bar: &Bar) -> Self {
        Self {
            instrument: bar.instrument.clone(),
            last_date: bar.date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            adjusted_close: bar.adjusted_close,
        }
    }

    fn absorb(&mut self, bar: &Bar) {
        self.merge(&Bucket::from_bar(bar));
    }

    /// Fold a later bucket into this one.
    pub(crate) fn merge(&mut self, later: &Bucket) {
        // f64::max/min skip NaN, so one void bar doesn't poison the extremes.
        self.high = self.high.max(later.high);
        self.low = self.low.min(later.low);
        self.close = later.close;
        self.adjusted_close = later.adjusted_close;
        self.volume = self.volume.saturating_add(later.volume);
        self.last_date = self.last_date.max(later.last_date);
    }

    fn into_resampled(
        self,
        timeframe: Timeframe,
        date: NaiveDate,
        period_label: Option<String>,
        ingested_at: DateTime<Utc>,
    ) -> ResampledBar {
        ResampledBar {
            instrument: self.instrument,
            timeframe,
            date,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            adjusted_close: self.adjusted_close,
            period_label,
            ingested_at,
        }
    }
}

/// Sort by date without reordering same-day bars.
fn sorted_by_date(bars: &[Bar]) -> Vec<&Bar> {
    let mut sorted: Vec<&Bar> = bars.iter().collect();
    sorted.sort_by_key(|b| b.date);
    sorted
}

/// Bucket bars by `timeframe.bucket_start`, keyed and ordered by bucket start.
pub(crate) fn calendar_buckets(bars: &[Bar], timeframe: Timeframe) -> BTreeMap<NaiveDate, Bucket> {
    let mut buckets: BTreeMap<NaiveDate, Bucket> = BTreeMap::new();
    for bar in sorted_by_date(bars) {
        buckets
            .entry(timeframe.bucket_start(bar.date))
            .and_modify(|bucket| bucket.absorb(bar))
            .or_insert_with(|| Bucket::from_bar(bar));
    }
    buckets
}

/// Resample one instrument's daily bars into `timeframe`.
///
/// Input order does not matter. Empty input gives empty output; buckets with
/// no bars are never emitted.
pub fn resample(bars: &[Bar], timeframe: Timeframe, ingested_at: DateTime<Utc>) -> Vec<ResampledBar> {
    if let Some(group_size) = timeframe.group_size() {
        return multi_year::resample_multi_year(bars, timeframe, group_size, ingested_at);
    }

    calendar_buckets(bars, timeframe)
        .into_iter()
        .map(|(start, bucket)| bucket.into_resampled(timeframe, start, None, ingested_at))
        .collect()
}

/// Resample into every requested timeframe. Each requested timeframe gets an
/// entry, even when empty.
pub fn resample_all(
    bars: &[Bar],
    timeframes: &[Timeframe],
    ingested_at: DateTime<Utc>,
) -> BTreeMap<Timeframe, Vec<ResampledBar>> {
    timeframes
        .iter()
        .map(|&tf| (tf, resample(bars, tf, ingested_at)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn bar(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Bar {
        Bar {
            instrument: "X".into(),
            date,
            open,
            high,
            low,
            close,
            volume,
            adjusted_close: Some(close * 0.99),
        }
    }

    /// Ten trading days, Mon 2024-01-08 .. Fri 2024-01-19.
    fn two_weeks() -> Vec<Bar> {
        let mut bars = Vec::new();
        for week in 0..2u32 {
            for weekday in 0..5u32 {
                let i = f64::from(week * 5 + weekday);
                bars.push(bar(
                    d(2024, 1, 8 + week * 7 + weekday),
                    100.0 + i,
                    105.0 + i,
                    95.0 + i,
                    101.0 + i,
                    1_000,
                ));
            }
        }
        bars
    }

    #[test]
    fn monthly_bucket_fold() {
        let bars = vec![
            bar(d(2024, 3, 1), 10.0, 12.0, 9.0, 11.0, 100),
            bar(d(2024, 3, 4), 11.0, 15.0, 10.0, 14.0, 200),
            bar(d(2024, 3, 5), 14.0, 14.5, 8.0, 9.5, 300),
        ];
        let out = resample(&bars, Timeframe::Monthly, ts());
        assert_eq!(out.len(), 1);
        let m = &out[0];
        assert_eq!(m.date, d(2024, 3, 1));
        assert_eq!(m.open, 10.0);
        assert_eq!(m.close, 9.5);
        assert_eq!(m.high, 15.0);
        assert_eq!(m.low, 8.0);
        assert_eq!(m.volume, 600);
        assert_eq!(m.adjusted_close, Some(9.5 * 0.99));
        assert_eq!(m.period_label, None);
        assert_eq!(m.ingested_at, ts());
    }

    #[test]
    fn unsorted_input_is_sorted_first() {
        let mut bars = vec![
            bar(d(2024, 3, 5), 14.0, 14.5, 8.0, 9.5, 300),
            bar(d(2024, 3, 1), 10.0, 12.0, 9.0, 11.0, 100),
        ];
        let forward = resample(&bars, Timeframe::Monthly, ts());
        bars.reverse();
        let backward = resample(&bars, Timeframe::Monthly, ts());
        assert_eq!(forward, backward);
        assert_eq!(forward[0].open, 10.0);
        assert_eq!(forward[0].close, 9.5);
    }

    #[test]
    fn empty_input_gives_empty_output_everywhere() {
        let all = resample_all(&[], &Timeframe::ALL, ts());
        assert_eq!(all.len(), 6);
        assert!(all.values().all(Vec::is_empty));
    }

    #[test]
    fn single_bar_single_bucket_everywhere() {
        let only = bar(d(2023, 6, 14), 7.0, 7.0, 7.0, 7.0, 42);
        for (tf, out) in resample_all(&[only], &Timeframe::ALL, ts()) {
            assert_eq!(out.len(), 1, "{tf}");
            let b = &out[0];
            assert_eq!((b.open, b.high, b.low, b.close, b.volume), (7.0, 7.0, 7.0, 7.0, 42));
            assert_eq!(b.timeframe, tf);
        }
    }

    #[test]
    fn ten_days_over_two_weeks() {
        let all = resample_all(&two_weeks(), &Timeframe::ALL, ts());

        assert_eq!(all[&Timeframe::Daily].len(), 10);

        let weekly = &all[&Timeframe::Weekly];
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[0].date, d(2024, 1, 8));
        assert_eq!(weekly[1].date, d(2024, 1, 15));
        assert_eq!(weekly[0].volume, 5_000);
        assert_eq!(weekly[1].open, 105.0);

        assert_eq!(all[&Timeframe::Monthly].len(), 1);
        assert_eq!(all[&Timeframe::Yearly].len(), 1);
        assert_eq!(all[&Timeframe::Yearly][0].date, d(2024, 1, 1));

        for tf in [Timeframe::ThreeYear, Timeframe::FiveYear] {
            let out = &all[&tf];
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].period_label.as_deref(), Some("2024-2024"));
            assert_eq!(out[0].volume, 10_000);
        }
    }

    #[test]
    fn daily_is_identity_for_unique_dates() {
        let bars = two_weeks();
        let daily = resample(&bars, Timeframe::Daily, ts());
        assert_eq!(daily.len(), bars.len());
        for (r, b) in daily.iter().zip(&bars) {
            assert_eq!(r.date, b.date);
            assert_eq!((r.open, r.high, r.low, r.close), (b.open, b.high, b.low, b.close));
        }
    }

    #[test]
    fn nan_price_does_not_poison_extremes() {
        let mut bars = vec![
            bar(d(2024, 5, 1), 10.0, 12.0, 9.0, 11.0, 1),
            bar(d(2024, 5, 2), 11.0, 13.0, 10.0, 12.0, 1),
        ];
        bars[1].high = f64::NAN;
        bars[1].low = f64::NAN;
        let m = &resample(&bars, Timeframe::Monthly, ts())[0];
        assert_eq!(m.high, 12.0);
        assert_eq!(m.low, 9.0);
    }
}
