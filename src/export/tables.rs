//! Flat CSV row types.
//!
//! One struct per output table; field order is column order.

use crate::batch::RunOutput;
use crate::evaluation::{DailyIc, DailyQuantiles};
use crate::pipeline::PartitionFailure;
use crate::quality::QualityReport;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct QualityRow<'a> {
    pub symbol: &'a str,
    pub date: NaiveDate,
    pub n_ticks: usize,
    pub n_buckets: usize,
    pub expected_buckets: usize,
    pub minute_coverage: f64,
    pub crossed_book_rate: f64,
    pub zero_spread_rate: f64,
    pub duplicate_timestamp_rate: f64,
    pub bad_price_count: usize,
    pub spread_median: f64,
    pub relative_spread_median: f64,
    pub maybe_truncated_rate: f64,
    pub first_tick: Option<NaiveDateTime>,
    pub last_tick: Option<NaiveDateTime>,
    pub ofi_mean: f64,
    pub ofi_std: f64,
    pub ofi_min: f64,
    pub ofi_q25: f64,
    pub ofi_median: f64,
    pub ofi_q75: f64,
    pub ofi_max: f64,
    pub flags: String,
    pub excluded: bool,
}

impl<'a> From<&'a QualityReport> for QualityRow<'a> {
    fn from(r: &'a QualityReport) -> Self {
        Self {
            symbol: &r.symbol,
            date: r.date,
            n_ticks: r.n_ticks,
            n_buckets: r.n_buckets,
            expected_buckets: r.expected_buckets,
            minute_coverage: r.minute_coverage,
            crossed_book_rate: r.crossed_book_rate,
            zero_spread_rate: r.zero_spread_rate,
            duplicate_timestamp_rate: r.duplicate_timestamp_rate,
            bad_price_count: r.bad_price_count,
            spread_median: r.spread_median,
            relative_spread_median: r.relative_spread_median,
            maybe_truncated_rate: r.maybe_truncated_rate,
            first_tick: r.first_tick,
            last_tick: r.last_tick,
            ofi_mean: r.ofi_mean,
            ofi_std: r.ofi_std,
            ofi_min: r.ofi_min,
            ofi_q25: r.ofi_q25,
            ofi_median: r.ofi_median,
            ofi_q75: r.ofi_q75,
            ofi_max: r.ofi_max,
            flags: r.flags_label(),
            excluded: r.is_excluded(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DailyIcRow<'a> {
    pub symbol: &'a str,
    pub date: NaiveDate,
    pub n_observations: usize,
    pub ic: f64,
    pub ic_p_value: f64,
    pub rank_ic: f64,
    pub rank_ic_p_value: f64,
    /// Empty when the day is valid.
    pub degenerate: &'static str,
}

impl<'a> From<&'a DailyIc> for DailyIcRow<'a> {
    fn from(d: &'a DailyIc) -> Self {
        Self {
            symbol: &d.symbol,
            date: d.date,
            n_observations: d.n_observations,
            ic: d.ic,
            ic_p_value: d.ic_p_value,
            rank_ic: d.rank_ic,
            rank_ic_p_value: d.rank_ic_p_value,
            degenerate: d.degenerate.map(|r| r.as_str()).unwrap_or(""),
        }
    }
}

/// Long format: one row per (symbol, date, group).
#[derive(Debug, Serialize)]
pub struct QuantileRow<'a> {
    pub symbol: &'a str,
    pub date: NaiveDate,
    pub n_groups: usize,
    pub group: usize,
    pub count: usize,
    pub mean_return: f64,
    pub long_short: f64,
}

pub fn quantile_rows(day: &DailyQuantiles) -> impl Iterator<Item = QuantileRow<'_>> {
    day.groups.iter().map(move |g| QuantileRow {
        symbol: &day.symbol,
        date: day.date,
        n_groups: day.n_groups(),
        group: g.group,
        count: g.count,
        mean_return: g.mean_return,
        long_short: day.long_short,
    })
}

#[derive(Debug, Serialize)]
pub struct FailureRow<'a> {
    pub symbol: &'a str,
    pub date: NaiveDate,
    pub reason: &'static str,
    pub detail: String,
}

impl<'a> From<&'a PartitionFailure> for FailureRow<'a> {
    fn from(f: &'a PartitionFailure) -> Self {
        Self {
            symbol: &f.key.symbol,
            date: f.key.date,
            reason: f.reason.kind(),
            detail: f.reason.detail(),
        }
    }
}

/// Row keys matching `panel.npy` row for row.
#[derive(Debug, Serialize)]
pub struct PanelKeyRow<'a> {
    pub symbol: &'a str,
    pub date: NaiveDate,
    pub bucket_start: NaiveDateTime,
}

pub fn panel_key_rows(output: &RunOutput) -> impl Iterator<Item = PanelKeyRow<'_>> {
    output.panel.iter_rows().map(|(key, row)| PanelKeyRow {
        symbol: &key.symbol,
        date: key.date,
        bucket_start: row.bucket_start,
    })
}
