//! Partition Quality Gate
//!
//! Computes per-partition data-quality metrics and decides whether a
//! partition is usable. The gate never mutates tick data.
//!
//! With session windows configured, every metric is computed over the
//! in-session ticks only, the same set the aggregator turns into buckets.
//!
//! # Policy
//!
//! | Flag | Condition | Effect |
//! |------|-----------|--------|
//! | `InsufficientCoverage` | `minute_coverage < min_coverage` | partition excluded |
//! | `BookIntegrityWarning` | crossed or zero-spread rate `> integrity_epsilon` | logged only |
//! | `OfiOutlier` | `ofi_mean` or `ofi_std` beyond `outlier_sigma` std of the other partitions | informational |
//!
//! Only coverage excludes: volatile days with a messy book are still
//! evaluated.
//!
//! # Usage
//!
//! ```ignore
//! use ofi_signal::quality::{QualityConfig, QualityGate};
//!
//! let gate = QualityGate::for_aggregation(QualityConfig::default(), &aggregation);
//! let report = gate.assess(&key, &ticks, &ofi_records);
//! if report.is_excluded() {
//!     log::warn!("{key}: coverage {:.2}", report.minute_coverage);
//! }
//! ```

use crate::evaluation::{quantile::linear_quantile, stats};
use crate::features::{order_flow::ofi_moments, AggregationConfig, OfiRecord, SessionWindow};
use crate::schema::{PartitionKey, TickSnapshot};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Expected buckets when neither the config nor session windows say otherwise.
pub const DEFAULT_EXPECTED_BUCKETS: usize = 240;

/// Quality thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Buckets in a full trading day. When unset, derived from the session
    /// windows, or 240 one-minute buckets without sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_buckets: Option<usize>,

    /// Coverage below this excludes the partition.
    #[serde(default = "default_min_coverage")]
    pub min_coverage: f64,

    /// Crossed or zero-spread rate above this raises a warning.
    #[serde(default)]
    pub integrity_epsilon: f64,

    /// Cross-partition standard deviations for the OFI outlier flag.
    #[serde(default = "default_outlier_sigma")]
    pub outlier_sigma: f64,
}

fn default_min_coverage() -> f64 {
    0.9
}

fn default_outlier_sigma() -> f64 {
    5.0
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            expected_buckets: None,
            min_coverage: 0.9,
            integrity_epsilon: 0.0,
            outlier_sigma: 5.0,
        }
    }
}

impl QualityConfig {
    pub fn with_expected_buckets(mut self, n: usize) -> Self {
        self.expected_buckets = Some(n);
        self
    }

    /// Explicit `expected_buckets`, else the whole buckets covered by the
    /// session windows, else [`DEFAULT_EXPECTED_BUCKETS`].
    pub fn resolve_expected_buckets(&self, aggregation: &AggregationConfig) -> usize {
        if let Some(n) = self.expected_buckets {
            return n;
        }
        if aggregation.sessions.is_empty() {
            return DEFAULT_EXPECTED_BUCKETS;
        }
        aggregation
            .sessions
            .iter()
            .map(|w| w.bucket_count(aggregation.bucket_width_secs))
            .sum::<usize>()
            .max(1)
    }

    pub fn with_min_coverage(mut self, coverage: f64) -> Self {
        self.min_coverage = coverage;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.expected_buckets == Some(0) {
            return Err("expected_buckets must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_coverage) {
            return Err(format!(
                "min_coverage must be in [0, 1], got {}",
                self.min_coverage
            ));
        }
        if !(self.integrity_epsilon >= 0.0) {
            return Err("integrity_epsilon must be >= 0".to_string());
        }
        if !(self.outlier_sigma > 0.0) {
            return Err("outlier_sigma must be > 0".to_string());
        }
        Ok(())
    }
}

/// Quality flag attached to a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    InsufficientCoverage,
    BookIntegrityWarning,
    OfiOutlier,
}

impl QualityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::InsufficientCoverage => "insufficient_coverage",
            QualityFlag::BookIntegrityWarning => "book_integrity_warning",
            QualityFlag::OfiOutlier => "ofi_outlier",
        }
    }

    /// Only coverage excludes a partition.
    pub fn is_exclusion(&self) -> bool {
        matches!(self, QualityFlag::InsufficientCoverage)
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality metrics of one (symbol, date) partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub symbol: String,
    pub date: NaiveDate,
    pub n_ticks: usize,
    /// Distinct buckets with at least one in-session tick.
    pub n_buckets: usize,
    pub expected_buckets: usize,
    pub minute_coverage: f64,
    /// Fraction of ticks with `bid1 > ask1`.
    pub crossed_book_rate: f64,
    /// Fraction of ticks with `bid1 == ask1`.
    pub zero_spread_rate: f64,
    /// Fraction of ticks sharing the previous tick's timestamp.
    pub duplicate_timestamp_rate: f64,
    /// Ticks with any configured-level price missing or non-positive.
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
    pub flags: Vec<QualityFlag>,
}

impl QualityReport {
    pub fn key(&self) -> PartitionKey {
        PartitionKey::new(self.symbol.clone(), self.date)
    }

    pub fn has_flag(&self, flag: QualityFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_excluded(&self) -> bool {
        self.flags.iter().any(|f| f.is_exclusion())
    }

    /// Flags joined with `|`, empty when clean.
    pub fn flags_label(&self) -> String {
        self.flags
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join("|")
    }

    fn add_flag(&mut self, flag: QualityFlag) {
        if !self.has_flag(flag) {
            self.flags.push(flag);
        }
    }
}

/// Per-partition quality assessment.
#[derive(Debug, Clone)]
pub struct QualityGate {
    config: QualityConfig,
    levels: usize,
    sessions: Vec<SessionWindow>,
    expected_buckets: usize,
}

impl QualityGate {
    /// Gate over `levels` levels with no session filter.
    pub fn new(config: QualityConfig, levels: usize) -> Self {
        let expected_buckets = config.expected_buckets.unwrap_or(DEFAULT_EXPECTED_BUCKETS);
        Self {
            config,
            levels,
            sessions: Vec::new(),
            expected_buckets,
        }
    }

    /// Gate sharing the aggregator's levels and session windows.
    pub fn for_aggregation(config: QualityConfig, aggregation: &AggregationConfig) -> Self {
        let expected_buckets = config.resolve_expected_buckets(aggregation);
        Self {
            config,
            levels: aggregation.levels,
            sessions: aggregation.sessions.clone(),
            expected_buckets,
        }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn expected_buckets(&self) -> usize {
        self.expected_buckets
    }

    fn in_session(&self, ts: NaiveDateTime) -> bool {
        let time = ts.time();
        self.sessions.is_empty() || self.sessions.iter().any(|w| w.contains(time))
    }

    /// Assess one partition given its ticks and the OFI records built from them.
    ///
    /// Ticks outside the session windows are ignored.
    pub fn assess(&self, key: &PartitionKey, ticks: &[TickSnapshot], ofi: &[OfiRecord]) -> QualityReport {
        let ticks: Vec<&TickSnapshot> = ticks.iter().filter(|t| self.in_session(t.timestamp)).collect();
        let n_ticks = ticks.len();
        let rate = |count: usize| {
            if n_ticks == 0 {
                0.0
            } else {
                count as f64 / n_ticks as f64
            }
        };

        let mut crossed = 0usize;
        let mut zero_spread = 0usize;
        let mut spreads = Vec::with_capacity(n_ticks);
        let mut relative_spreads = Vec::with_capacity(n_ticks);
        for (bid, ask) in ticks.iter().filter_map(|t| t.top_of_book()) {
            if bid > ask {
                crossed += 1;
            } else if bid == ask {
                zero_spread += 1;
            }
            let spread = ask - bid;
            spreads.push(spread);
            relative_spreads.push(spread / ((ask + bid) / 2.0));
        }

        let duplicates = ticks
            .windows(2)
            .filter(|w| w[0].timestamp == w[1].timestamp)
            .count();

        let bad_price_count = ticks
            .iter()
            .filter(|t| {
                (1..=self.levels).any(|i| match t.level(i) {
                    Some(level) => !level.has_valid_prices(),
                    None => true,
                })
            })
            .count();

        let truncated = ticks
            .iter()
            .filter(|t| t.trade.maybe_truncated == Some(true))
            .count();

        let (ofi_mean, ofi_std) = ofi_moments(ofi);
        let mut ofi_sorted: Vec<f64> = ofi.iter().map(|r| r.ofi_value as f64).collect();
        ofi_sorted.sort_by(f64::total_cmp);
        let n_buckets = ofi.len();
        let expected_buckets = self.expected_buckets.max(1);

        let mut report = QualityReport {
            symbol: key.symbol.clone(),
            date: key.date,
            n_ticks,
            n_buckets,
            expected_buckets,
            minute_coverage: n_buckets as f64 / expected_buckets as f64,
            crossed_book_rate: rate(crossed),
            zero_spread_rate: rate(zero_spread),
            duplicate_timestamp_rate: rate(duplicates),
            bad_price_count,
            spread_median: median(spreads),
            relative_spread_median: median(relative_spreads),
            maybe_truncated_rate: rate(truncated),
            first_tick: ticks.first().map(|t| t.timestamp),
            last_tick: ticks.last().map(|t| t.timestamp),
            ofi_mean,
            ofi_std,
            ofi_min: ofi_sorted.first().copied().unwrap_or(f64::NAN),
            ofi_q25: linear_quantile(&ofi_sorted, 0.25),
            ofi_median: linear_quantile(&ofi_sorted, 0.5),
            ofi_q75: linear_quantile(&ofi_sorted, 0.75),
            ofi_max: ofi_sorted.last().copied().unwrap_or(f64::NAN),
            flags: Vec::new(),
        };

        if report.minute_coverage < self.config.min_coverage {
            report.add_flag(QualityFlag::InsufficientCoverage);
        }
        if report.crossed_book_rate > self.config.integrity_epsilon
            || report.zero_spread_rate > self.config.integrity_epsilon
        {
            report.add_flag(QualityFlag::BookIntegrityWarning);
            log::warn!(
                "{key}: book integrity warning (crossed {:.4}, zero spread {:.4})",
                report.crossed_book_rate,
                report.zero_spread_rate
            );
        }

        report
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    values.retain(|v| v.is_finite());
    values.sort_by(f64::total_cmp);
    linear_quantile(&values, 0.5)
}

/// Leave-one-out mean and sample std over the finite values of a column.
///
/// Sums are kept relative to the full mean so removing one value does not
/// cancel large magnitudes.
struct LeaveOneOut {
    n: usize,
    shift: f64,
    sum: f64,
    sum_sq: f64,
}

impl LeaveOneOut {
    fn new(values: impl Iterator<Item = f64>) -> Self {
        let finite: Vec<f64> = values.filter(|v| v.is_finite()).collect();
        let shift = if finite.is_empty() { 0.0 } else { stats::mean(&finite) };
        let (sum, sum_sq) = finite
            .iter()
            .map(|v| v - shift)
            .fold((0.0, 0.0), |(s, q), d| (s + d, q + d * d));
        Self {
            n: finite.len(),
            shift,
            sum,
            sum_sq,
        }
    }

    /// Whether `value` lies more than `sigma` std of the other values from their mean.
    fn beyond(&self, value: f64, sigma: f64) -> bool {
        // Needs two other values for a sample std.
        if !value.is_finite() || self.n < 3 {
            return false;
        }
        let rest = (self.n - 1) as f64;
        let d = value - self.shift;
        let centre = (self.sum - d) / rest;
        let var = (self.sum_sq - d * d - rest * centre * centre) / (rest - 1.0);
        let spread = var.max(0.0).sqrt();
        // Numerically constant column.
        if spread <= 1e-9 * (1.0 + self.shift.abs()) {
            return false;
        }
        (d - centre).abs() > sigma * spread
    }
}

/// Flag partitions whose `ofi_mean` or `ofi_std` lies more than `sigma`
/// standard deviations from the mean of all other partitions.
///
/// Each partition is compared against statistics that exclude it, so a
/// single outlier can be flagged even among a handful of partitions.
/// Runs once after every partition has been assessed. Returns the number of
/// reports newly flagged.
pub fn flag_ofi_outliers(reports: &mut [QualityReport], sigma: f64) -> usize {
    let means = LeaveOneOut::new(reports.iter().map(|r| r.ofi_mean));
    let stds = LeaveOneOut::new(reports.iter().map(|r| r.ofi_std));

    let mut flagged = 0;
    for report in reports.iter_mut() {
        if means.beyond(report.ofi_mean, sigma) || stds.beyond(report.ofi_std, sigma) {
            if !report.has_flag(QualityFlag::OfiOutlier) {
                flagged += 1;
            }
            report.add_flag(QualityFlag::OfiOutlier);
            log::info!(
                "{} {}: OFI outlier (mean {:.1}, std {:.1})",
                report.symbol,
                report.date,
                report.ofi_mean,
                report.ofi_std
            );
        }
    }
    flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::OfiAggregator;
    use crate::schema::BookLevel;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn ticks_every_minute(minutes: impl Iterator<Item = u32>) -> Vec<TickSnapshot> {
        minutes
            .map(|m| {
                let ts = date().and_hms_opt(9, 0, 0).unwrap() + chrono::Duration::minutes(m as i64);
                TickSnapshot::new(ts, vec![BookLevel::new(10.01, 100 + m as u64, 10.0, 200)])
            })
            .collect()
    }

    fn assess(ticks: &[TickSnapshot]) -> QualityReport {
        let ofi = OfiAggregator::new(1, 60).aggregate(ticks).unwrap();
        QualityGate::new(QualityConfig::default(), 1).assess(&PartitionKey::new("A", date()), ticks, &ofi)
    }

    #[test]
    fn test_full_session_coverage() {
        let report = assess(&ticks_every_minute(0..240));
        assert_eq!(report.n_buckets, 240);
        assert_eq!(report.minute_coverage, 1.0);
        assert!(report.flags.is_empty());
        assert!(!report.is_excluded());
    }

    #[test]
    fn test_half_coverage_is_excluded() {
        let report = assess(&ticks_every_minute((0..240).step_by(2)));
        assert_eq!(report.minute_coverage, 0.5);
        assert!(report.has_flag(QualityFlag::InsufficientCoverage));
        assert!(report.is_excluded());
    }

    #[test]
    fn test_book_integrity_is_soft() {
        let mut ticks = ticks_every_minute(0..240);
        ticks[5].levels[0] = BookLevel::new(10.0, 100, 10.0, 100);
        ticks[6].levels[0] = BookLevel::new(9.99, 100, 10.0, 100);
        let report = assess(&ticks);
        assert!((report.zero_spread_rate - 1.0 / 240.0).abs() < 1e-12);
        assert!((report.crossed_book_rate - 1.0 / 240.0).abs() < 1e-12);
        assert!(report.has_flag(QualityFlag::BookIntegrityWarning));
        assert!(!report.is_excluded());
    }

    #[test]
    fn test_extra_metrics() {
        let mut ticks = ticks_every_minute(0..10);
        ticks[3].timestamp = ticks[2].timestamp;
        ticks[4].levels[0].bid_price = None;
        ticks[7].trade.maybe_truncated = Some(true);
        let report = assess(&ticks);
        assert_eq!(report.n_ticks, 10);
        assert!((report.duplicate_timestamp_rate - 0.1).abs() < 1e-12);
        assert_eq!(report.bad_price_count, 1);
        assert!((report.maybe_truncated_rate - 0.1).abs() < 1e-12);
        assert!((report.spread_median - 0.01).abs() < 1e-9);
        assert_eq!(report.first_tick, Some(ticks[0].timestamp));
        assert_eq!(report.last_tick, Some(ticks[9].timestamp));
    }

    #[test]
    fn test_empty_partition() {
        let report = assess(&[]);
        assert_eq!(report.n_ticks, 0);
        assert_eq!(report.minute_coverage, 0.0);
        assert!(report.is_excluded());
        assert!(report.ofi_mean.is_nan());
    }

    #[test]
    fn test_flag_ofi_outliers() {
        let base = assess(&ticks_every_minute(0..240));
        let mut reports: Vec<QualityReport> = (0..30)
            .map(|i| {
                let mut r = base.clone();
                r.ofi_mean = 1.0 + (i % 3) as f64 * 0.1;
                r.ofi_std = 10.0 + (i % 2) as f64;
                r
            })
            .collect();
        reports[17].ofi_mean = 1_000.0;

        let flagged = flag_ofi_outliers(&mut reports, 5.0);
        assert_eq!(flagged, 1);
        assert!(reports[17].has_flag(QualityFlag::OfiOutlier));
        assert!(!reports[17].is_excluded());
        assert!(!reports[0].has_flag(QualityFlag::OfiOutlier));
    }

    #[test]
    fn test_outlier_among_few_partitions() {
        let base = assess(&ticks_every_minute(0..240));
        let mut reports: Vec<QualityReport> = (0..8)
            .map(|i| {
                let mut r = base.clone();
                r.ofi_mean = 1.0 + (i % 3) as f64 * 0.1;
                r
            })
            .collect();
        reports[3].ofi_mean = 50.0;

        assert_eq!(flag_ofi_outliers(&mut reports, 5.0), 1);
        assert!(reports[3].has_flag(QualityFlag::OfiOutlier));
        // Identical ofi_std everywhere never flags.
        assert!(reports
            .iter()
            .enumerate()
            .all(|(i, r)| i == 3 || !r.has_flag(QualityFlag::OfiOutlier)));
    }

    #[test]
    fn test_ofi_distribution_columns() {
        let ts = |m: i64| date().and_hms_opt(9, 30, 0).unwrap() + chrono::Duration::minutes(m);
        let ofi: Vec<OfiRecord> = [-40i64, 10, 0, 30, 20]
            .iter()
            .enumerate()
            .map(|(i, &v)| OfiRecord {
                bucket_start: ts(i as i64),
                ofi_value: v,
                close_mid: 10.0,
                n_ticks: 1,
                session: 0,
            })
            .collect();
        let report = QualityGate::new(QualityConfig::default(), 1).assess(&PartitionKey::new("A", date()), &[], &ofi);
        assert_eq!(report.ofi_min, -40.0);
        assert_eq!(report.ofi_q25, 0.0);
        assert_eq!(report.ofi_median, 10.0);
        assert_eq!(report.ofi_q75, 20.0);
        assert_eq!(report.ofi_max, 30.0);

        let empty = assess(&[]);
        assert!(empty.ofi_min.is_nan() && empty.ofi_median.is_nan() && empty.ofi_max.is_nan());
    }

    #[test]
    fn test_metrics_use_in_session_ticks_only() {
        let aggregation = AggregationConfig::default()
            .with_levels(1)
            .with_sessions(SessionWindow::cn_equity());
        let at = |h: u32, m: u32| date().and_hms_opt(h, m, 0).unwrap();

        // Crossed indicative book during the opening call auction.
        let mut ticks = vec![TickSnapshot::new(at(9, 20), vec![BookLevel::new(10.0, 100, 10.05, 100)])];
        for (start, len) in [(at(9, 30), 120), (at(13, 0), 120)] {
            for m in 0..len {
                let ts = start + chrono::Duration::minutes(m);
                ticks.push(TickSnapshot::new(ts, vec![BookLevel::new(10.01, 100, 10.0, 200)]));
            }
        }

        let ofi = OfiAggregator::from_config(&aggregation).aggregate(&ticks).unwrap();
        let gate = QualityGate::for_aggregation(QualityConfig::default(), &aggregation);
        let report = gate.assess(&PartitionKey::new("A", date()), &ticks, &ofi);

        assert_eq!(report.n_ticks, 240);
        assert_eq!(report.n_buckets, 240);
        assert_eq!(report.expected_buckets, 240);
        assert_eq!(report.minute_coverage, 1.0);
        assert_eq!(report.crossed_book_rate, 0.0);
        assert_eq!(report.first_tick, Some(at(9, 30)));
        assert!(!report.has_flag(QualityFlag::BookIntegrityWarning));
    }

    #[test]
    fn test_expected_buckets_follow_sessions() {
        let t = |h, m| chrono::NaiveTime::from_hms_opt(h, m, 0).unwrap();
        let morning_only = AggregationConfig::default().with_sessions(vec![SessionWindow::new(t(9, 30), t(11, 30))]);
        assert_eq!(QualityConfig::default().resolve_expected_buckets(&morning_only), 120);
        assert_eq!(
            QualityConfig::default().resolve_expected_buckets(&morning_only.clone().with_bucket_width_secs(300)),
            24
        );
        assert_eq!(
            QualityConfig::default().resolve_expected_buckets(&AggregationConfig::default()),
            DEFAULT_EXPECTED_BUCKETS
        );
        assert_eq!(
            QualityConfig::default()
                .with_expected_buckets(200)
                .resolve_expected_buckets(&morning_only),
            200
        );
        assert_eq!(
            QualityGate::for_aggregation(QualityConfig::default(), &morning_only).expected_buckets(),
            120
        );
    }

    #[test]
    fn test_config_validate() {
        assert!(QualityConfig::default().validate().is_ok());
        assert!(QualityConfig::default().with_min_coverage(1.5).validate().is_err());
        assert!(QualityConfig::default().with_expected_buckets(0).validate().is_err());
    }
}
