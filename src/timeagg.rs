//! Time aggregation and statistics (C2).
//!
//! Pure, deterministic reduction of a time series to per-bucket
//! aggregates, restricted to the overlap of the ground-truth and
//! statistic evaluation windows.

use crate::config::Aggregator;
use crate::SimDate;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodUnit {
    Day,
    Week,
    Month,
}

/// `(count, unit)`. Only `count == 1` is supported (validated at config
/// load).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub count: u32,
    pub unit: PeriodUnit,
}

/// Which day of week an epidemiological week starts on. Fixed at init and
/// must match ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekStart {
    Sunday,
    Monday,
}

impl Default for WeekStart {
    fn default() -> Self {
        WeekStart::Sunday
    }
}

/// Constant day-of-CE shift so that `div_euclid(7)` buckets align with
/// weeks starting on the configured weekday. 0001-01-01 (CE day 1) is a
/// Monday, so Monday-start weeks need no shift; Sunday-start weeks shift
/// by one day. The shift is a fixed constant (not a per-date weekday
/// lookup), which guarantees every 7-day run lands in one bucket.
fn week_shift(week_start: WeekStart) -> i64 {
    match week_start {
        WeekStart::Monday => 0,
        WeekStart::Sunday => 1,
    }
}

/// Assigns a date to a bucket ordinal under the configured period.
fn bucket_of(date: SimDate, period: &Period, week_start: WeekStart) -> i64 {
    match period.unit {
        PeriodUnit::Day => date.num_days_from_ce() as i64,
        PeriodUnit::Week => {
            (date.num_days_from_ce() as i64 + week_shift(week_start)).div_euclid(7)
        }
        PeriodUnit::Month => (date.year() as i64) * 12 + (date.month() as i64 - 1),
    }
}

/// The last calendar date belonging to `bucket`, used as the emitted
/// `bucket_end_date`.
fn bucket_end(bucket: i64, period: &Period, week_start: WeekStart, sample: SimDate) -> SimDate {
    match period.unit {
        PeriodUnit::Day => {
            chrono::NaiveDate::from_num_days_from_ce_opt(bucket as i32).unwrap_or(sample)
        }
        PeriodUnit::Week => {
            let last_day_index = (bucket + 1) * 7 - 1 - week_shift(week_start);
            chrono::NaiveDate::from_num_days_from_ce_opt(last_day_index as i32).unwrap_or(sample)
        }
        PeriodUnit::Month => {
            let year = (bucket.div_euclid(12)) as i32;
            let month = (bucket.rem_euclid(12) + 1) as u32;
            let first_of_next = if month == 12 {
                chrono::NaiveDate::from_ymd_opt(year + 1, 1, 1)
            } else {
                chrono::NaiveDate::from_ymd_opt(year, month + 1, 1)
            };
            first_of_next
                .map(|d| d - chrono::Duration::days(1))
                .unwrap_or(sample)
        }
    }
}

/// Restricts `series` to `[gt_start, gt_end] ∩ [stat_start, stat_end]`,
/// buckets by `period`, keeps only buckets fully covered by the data
/// (contiguous and containing the bucket's first and last calendar day),
/// and applies `aggregator` within each valid bucket.
///
/// Pure: identical inputs yield identical outputs (no RNG, no I/O).
pub fn aggregate(
    series: &[(SimDate, f64)],
    period: &Period,
    aggregator: Aggregator,
    window: (SimDate, SimDate),
    statistic_window: Option<(SimDate, SimDate)>,
    week_start: WeekStart,
) -> Vec<(SimDate, f64)> {
    let (gt_start, gt_end) = window;
    let (lo, hi) = match statistic_window {
        Some((s, e)) => (gt_start.max(s), gt_end.min(e)),
        None => (gt_start, gt_end),
    };
    if lo > hi {
        return Vec::new();
    }

    let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    let mut present_days: BTreeMap<i64, Vec<SimDate>> = BTreeMap::new();
    for &(date, value) in series {
        if date < lo || date > hi {
            continue;
        }
        let bucket = bucket_of(date, period, week_start);
        buckets.entry(bucket).or_default().push(value);
        present_days.entry(bucket).or_default().push(date);
    }

    let mut out = Vec::with_capacity(buckets.len());
    for (bucket, values) in buckets {
        let days = &present_days[&bucket];
        if !bucket_fully_covered(bucket, period, week_start, days, lo, hi) {
            continue;
        }
        let aggregated = match aggregator {
            Aggregator::Sum => values.iter().sum(),
            Aggregator::Mean => values.iter().sum::<f64>() / values.len() as f64,
        };
        let end_date = bucket_end(bucket, period, week_start, days[0]);
        out.push((end_date, aggregated));
    }
    out.sort_by_key(|(d, _)| *d);
    out
}

/// A bucket is valid iff every calendar day it spans either lies outside
/// the evaluation window (truncation at a boundary is allowed) or is
/// present in the data — i.e. no internal gaps, and the first/last day of
/// the bucket that falls inside the window was observed.
fn bucket_fully_covered(
    bucket: i64,
    period: &Period,
    week_start: WeekStart,
    observed_days: &[SimDate],
    lo: SimDate,
    hi: SimDate,
) -> bool {
    let (bucket_start, bucket_end) = bucket_bounds(bucket, period, week_start);
    let span_start = bucket_start.max(lo);
    let span_end = bucket_end.min(hi);
    if span_start > span_end {
        return false;
    }
    let expected = (span_end - span_start).num_days() + 1;
    observed_days.len() as i64 == expected
}

fn bucket_bounds(bucket: i64, period: &Period, week_start: WeekStart) -> (SimDate, SimDate) {
    match period.unit {
        PeriodUnit::Day => {
            let d = chrono::NaiveDate::from_num_days_from_ce_opt(bucket as i32).unwrap();
            (d, d)
        }
        PeriodUnit::Week => {
            let first_day_index = bucket * 7 - week_shift(week_start);
            let first = chrono::NaiveDate::from_num_days_from_ce_opt(first_day_index as i32).unwrap();
            let last = bucket_end(bucket, period, week_start, first);
            (first, last)
        }
        PeriodUnit::Month => {
            let year = (bucket.div_euclid(12)) as i32;
            let month = (bucket.rem_euclid(12) + 1) as u32;
            let first = chrono::NaiveDate::from_ymd_opt(year, month, 1).unwrap();
            let last = bucket_end(bucket, period, week_start, first);
            (first, last)
        }
    }
}
