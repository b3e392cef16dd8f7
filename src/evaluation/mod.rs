//! Signal Evaluation
//!
//! Measures how well bucket OFI predicts the next bucket's return over an
//! [`EvaluationPanel`].
//!
//! # Outputs
//!
//! ```text
//! EvaluationPanel
//!   ├── per (symbol, date) ──► DailyIc { ic, rank_ic, p-values }      ──► MetricSummary (t-test over days)
//!   ├── per symbol (pooled) ──► SymbolIc
//!   └── per (symbol, date) ──► DailyQuantiles { group means, long-short } ──► QuantileReport
//! ```
//!
//! A day with fewer than `min_observations` rows, or a constant OFI or return
//! series, has NaN correlations and a [`DegenerateReason`]; it is kept in the
//! daily table but excluded from every aggregate.
//!
//! # Example
//!
//! ```ignore
//! use ofi_signal::evaluation::{EvaluationConfig, SignalEvaluator};
//!
//! let report = SignalEvaluator::new(EvaluationConfig::default()).evaluate(&panel);
//! println!("rank IC mean {:.4} (t = {:.2})", report.rank_ic.mean, report.rank_ic.t_stat);
//! ```

pub mod quantile;
pub mod stats;

use crate::panel::{EvaluationPanel, PartitionPanel};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Configuration
// ============================================================================

/// Evaluator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Minimum joined rows for a per-day correlation to be defined.
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,

    /// Number of equal-frequency OFI groups (Q).
    #[serde(default = "default_quantiles")]
    pub quantiles: usize,
}

fn default_min_observations() -> usize {
    10
}

fn default_quantiles() -> usize {
    5
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            min_observations: 10,
            quantiles: 5,
        }
    }
}

impl EvaluationConfig {
    pub fn with_min_observations(mut self, n: usize) -> Self {
        self.min_observations = n;
        self
    }

    pub fn with_quantiles(mut self, q: usize) -> Self {
        self.quantiles = q;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min_observations < 3 {
            return Err(format!(
                "min_observations must be >= 3, got {}",
                self.min_observations
            ));
        }
        if self.quantiles < 2 {
            return Err(format!("quantiles must be >= 2, got {}", self.quantiles));
        }
        Ok(())
    }
}

// ============================================================================
// Result types
// ============================================================================

/// Why a correlation is undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegenerateReason {
    TooFewObservations,
    ZeroVariance,
}

impl DegenerateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegenerateReason::TooFewObservations => "too_few_observations",
            DegenerateReason::ZeroVariance => "zero_variance",
        }
    }
}

/// IC and rank IC of one (symbol, date).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyIc {
    pub symbol: String,
    pub date: NaiveDate,
    pub n_observations: usize,
    pub ic: f64,
    pub ic_p_value: f64,
    pub rank_ic: f64,
    pub rank_ic_p_value: f64,
    pub degenerate: Option<DegenerateReason>,
}

impl DailyIc {
    pub fn is_valid(&self) -> bool {
        self.degenerate.is_none()
    }
}

/// Cross-day summary of one metric with a one-sample t-test against zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    pub n_days: usize,
    pub mean: f64,
    pub std: f64,
    /// `mean / std`.
    pub ir: f64,
    pub t_stat: f64,
    pub p_value: f64,
    /// Fraction of days with a strictly positive value.
    pub positive_rate: f64,
}

impl MetricSummary {
    /// Summarise the finite entries of `values`.
    pub fn from_values(values: &[f64]) -> Self {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        let test = stats::one_sample_t_test(&finite);
        let positive_rate = if finite.is_empty() {
            f64::NAN
        } else {
            finite.iter().filter(|v| **v > 0.0).count() as f64 / finite.len() as f64
        };
        let ir = if test.std > 0.0 {
            test.mean / test.std
        } else {
            f64::NAN
        };

        Self {
            n_days: finite.len(),
            mean: test.mean,
            std: test.std,
            ir,
            t_stat: test.t_stat,
            p_value: test.p_value,
            positive_rate,
        }
    }
}

/// Pooled correlation over all observations of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolIc {
    pub symbol: String,
    pub n_observations: usize,
    pub ic: f64,
    pub ic_p_value: f64,
    pub rank_ic: f64,
    pub rank_ic_p_value: f64,
}

/// One OFI group of one day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GroupStat {
    /// 1 = lowest OFI.
    pub group: usize,
    pub count: usize,
    pub mean_return: f64,
}

/// Quantile groups of one (symbol, date).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyQuantiles {
    pub symbol: String,
    pub date: NaiveDate,
    pub groups: Vec<GroupStat>,
    /// Top group mean minus bottom group mean; NaN with fewer than 2 groups.
    pub long_short: f64,
}

impl DailyQuantiles {
    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }
}

/// One group across all days.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GroupSummary {
    pub group: usize,
    /// Days on which the group exists.
    pub n_days: usize,
    pub total_count: usize,
    /// Mean of the per-day group means.
    pub mean_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuantileReport {
    pub quantiles: usize,
    pub daily: Vec<DailyQuantiles>,
    pub groups: Vec<GroupSummary>,
    pub long_short: MetricSummary,
}

/// Full evaluator output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub n_observations: usize,
    pub n_partitions: usize,
    pub daily: Vec<DailyIc>,
    pub ic: MetricSummary,
    pub rank_ic: MetricSummary,
    pub by_symbol: Vec<SymbolIc>,
    pub quantiles: QuantileReport,
}

impl EvaluationReport {
    /// Days with a defined IC.
    pub fn valid_days(&self) -> usize {
        self.daily.iter().filter(|d| d.is_valid()).count()
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Pure computation over an [`EvaluationPanel`]; never mutates it.
#[derive(Debug, Clone, Default)]
pub struct SignalEvaluator {
    config: EvaluationConfig,
}

struct Correlations {
    ic: f64,
    ic_p_value: f64,
    rank_ic: f64,
    rank_ic_p_value: f64,
    degenerate: Option<DegenerateReason>,
}

impl SignalEvaluator {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn evaluate(&self, panel: &EvaluationPanel) -> EvaluationReport {
        let partitions = panel.partitions();

        let daily: Vec<DailyIc> = partitions.par_iter().map(|p| self.daily_ic(p)).collect();
        let daily_quantiles: Vec<DailyQuantiles> = partitions
            .par_iter()
            .filter_map(|p| self.daily_quantiles(p))
            .collect();

        let valid = daily.iter().filter(|d| d.is_valid());
        let ic_values: Vec<f64> = valid.clone().map(|d| d.ic).collect();
        let rank_values: Vec<f64> = valid.map(|d| d.rank_ic).collect();

        for d in daily.iter().filter(|d| !d.is_valid()) {
            log::debug!(
                "{} {}: IC undefined ({}, n={})",
                d.symbol,
                d.date,
                d.degenerate.map(|r| r.as_str()).unwrap_or(""),
                d.n_observations
            );
        }

        EvaluationReport {
            n_observations: panel.len(),
            n_partitions: partitions.len(),
            ic: MetricSummary::from_values(&ic_values),
            rank_ic: MetricSummary::from_values(&rank_values),
            by_symbol: self.symbol_ic(panel),
            quantiles: self.summarise_quantiles(daily_quantiles),
            daily,
        }
    }

    /// IC and rank IC of one partition.
    pub fn daily_ic(&self, partition: &PartitionPanel) -> DailyIc {
        let (x, y) = partition.columns();
        let c = self.correlations(&x, &y);
        DailyIc {
            symbol: partition.key.symbol.clone(),
            date: partition.key.date,
            n_observations: x.len(),
            ic: c.ic,
            ic_p_value: c.ic_p_value,
            rank_ic: c.rank_ic,
            rank_ic_p_value: c.rank_ic_p_value,
            degenerate: c.degenerate,
        }
    }

    fn correlations(&self, x: &[f64], y: &[f64]) -> Correlations {
        let n = x.len();
        let undefined = |reason| Correlations {
            ic: f64::NAN,
            ic_p_value: f64::NAN,
            rank_ic: f64::NAN,
            rank_ic_p_value: f64::NAN,
            degenerate: Some(reason),
        };

        if n < self.config.min_observations {
            return undefined(DegenerateReason::TooFewObservations);
        }
        match (stats::pearson(x, y), stats::spearman(x, y)) {
            (Some(ic), Some(rank_ic)) => Correlations {
                ic,
                ic_p_value: stats::correlation_p_value(ic, n),
                rank_ic,
                rank_ic_p_value: stats::correlation_p_value(rank_ic, n),
                degenerate: None,
            },
            _ => undefined(DegenerateReason::ZeroVariance),
        }
    }

    /// Pooled correlation per symbol across all its dates.
    pub fn symbol_ic(&self, panel: &EvaluationPanel) -> Vec<SymbolIc> {
        let mut pooled: BTreeMap<&str, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        for (key, row) in panel.iter_rows() {
            let entry = pooled.entry(key.symbol.as_str()).or_default();
            entry.0.push(row.ofi_value as f64);
            entry.1.push(row.forward_return);
        }

        pooled
            .into_par_iter()
            .map(|(symbol, (x, y))| {
                let c = self.correlations(&x, &y);
                SymbolIc {
                    symbol: symbol.to_string(),
                    n_observations: x.len(),
                    ic: c.ic,
                    ic_p_value: c.ic_p_value,
                    rank_ic: c.rank_ic,
                    rank_ic_p_value: c.rank_ic_p_value,
                }
            })
            .collect()
    }

    /// Quantile groups of one partition; `None` when the day has fewer than
    /// `2 * Q` rows or its OFI values are all equal.
    pub fn daily_quantiles(&self, partition: &PartitionPanel) -> Option<DailyQuantiles> {
        let q = self.config.quantiles;
        if partition.len() < 2 * q {
            return None;
        }
        let (x, y) = partition.columns();
        let assignment = quantile::qcut(&x, q)?;
        let k = assignment.iter().copied().max().unwrap_or(0);

        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (&g, &r) in assignment.iter().zip(&y) {
            if g > 0 {
                sums[g - 1] += r;
                counts[g - 1] += 1;
            }
        }

        let groups: Vec<GroupStat> = (0..k)
            .filter(|&i| counts[i] > 0)
            .map(|i| GroupStat {
                group: i + 1,
                count: counts[i],
                mean_return: sums[i] / counts[i] as f64,
            })
            .collect();

        let long_short = match (groups.first(), groups.last()) {
            (Some(lo), Some(hi)) if groups.len() >= 2 => hi.mean_return - lo.mean_return,
            _ => f64::NAN,
        };

        Some(DailyQuantiles {
            symbol: partition.key.symbol.clone(),
            date: partition.key.date,
            groups,
            long_short,
        })
    }

    fn summarise_quantiles(&self, daily: Vec<DailyQuantiles>) -> QuantileReport {
        let mut by_group: BTreeMap<usize, (Vec<f64>, usize)> = BTreeMap::new();
        for day in &daily {
            for g in &day.groups {
                let entry = by_group.entry(g.group).or_default();
                entry.0.push(g.mean_return);
                entry.1 += g.count;
            }
        }

        let groups = by_group
            .into_iter()
            .map(|(group, (means, total_count))| GroupSummary {
                group,
                n_days: means.len(),
                total_count,
                mean_return: stats::mean(&means),
            })
            .collect();

        let spreads: Vec<f64> = daily.iter().map(|d| d.long_short).collect();
        let short_days = daily.iter().filter(|d| d.n_groups() < self.config.quantiles).count();
        if short_days > 0 {
            log::info!(
                "{short_days} of {} days formed fewer than {} quantile groups (duplicate edges)",
                daily.len(),
                self.config.quantiles
            );
        }

        QuantileReport {
            quantiles: self.config.quantiles,
            long_short: MetricSummary::from_values(&spreads),
            groups,
            daily,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::PanelRow;
    use crate::schema::PartitionKey;

    fn partition(symbol: &str, day: u32, pairs: &[(i64, f64)]) -> PartitionPanel {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(day as i64);
        let rows = pairs
            .iter()
            .enumerate()
            .map(|(i, &(ofi, ret))| PanelRow {
                bucket_start: date.and_hms_opt(9, 30, 0).unwrap() + chrono::Duration::minutes(i as i64),
                ofi_value: ofi,
                forward_return: ret,
            })
            .collect();
        PartitionPanel {
            key: PartitionKey::new(symbol, date),
            rows,
        }
    }

    #[test]
    fn test_config_validate() {
        assert!(EvaluationConfig::default().validate().is_ok());
        assert!(EvaluationConfig::default().with_quantiles(1).validate().is_err());
        assert!(EvaluationConfig::default()
            .with_min_observations(2)
            .validate()
            .is_err());
    }

    #[test]
    fn test_daily_ic_perfect_monotonic() {
        let pairs: Vec<(i64, f64)> = (0..20).map(|i| (i - 10, ((i - 10) as f64).powi(3) * 1e-5)).collect();
        let d = SignalEvaluator::default().daily_ic(&partition("A", 0, &pairs));
        assert!(d.is_valid());
        assert!((d.rank_ic - 1.0).abs() < 1e-12);
        assert!(d.ic > 0.9 && d.ic < 1.0);
        assert_eq!(d.rank_ic_p_value, 0.0);
    }

    #[test]
    fn test_degenerate_days() {
        let few: Vec<(i64, f64)> = (0..5).map(|i| (i, i as f64)).collect();
        let d = SignalEvaluator::default().daily_ic(&partition("A", 0, &few));
        assert_eq!(d.degenerate, Some(DegenerateReason::TooFewObservations));
        assert!(d.ic.is_nan());

        let flat: Vec<(i64, f64)> = (0..20).map(|i| (i, 0.0)).collect();
        let d = SignalEvaluator::default().daily_ic(&partition("A", 0, &flat));
        assert_eq!(d.degenerate, Some(DegenerateReason::ZeroVariance));
        assert!(d.rank_ic.is_nan());
    }

    #[test]
    fn test_degenerate_days_excluded_from_summary() {
        let good: Vec<(i64, f64)> = (0..20).map(|i| (i, i as f64 * 1e-4)).collect();
        let flat: Vec<(i64, f64)> = (0..20).map(|i| (i, 0.0)).collect();
        let panel = EvaluationPanel::from_partitions(vec![
            partition("A", 0, &good),
            partition("A", 1, &flat),
            partition("A", 2, &good),
        ]);
        let report = SignalEvaluator::default().evaluate(&panel);
        assert_eq!(report.daily.len(), 3);
        assert_eq!(report.valid_days(), 2);
        assert_eq!(report.ic.n_days, 2);
        assert!((report.ic.mean - 1.0).abs() < 1e-12);
        assert_eq!(report.ic.positive_rate, 1.0);
    }

    #[test]
    fn test_quantiles_twenty_per_group() {
        let pairs: Vec<(i64, f64)> = (0..100).map(|i| ((i * 37) % 100, ((i * 37) % 100) as f64 * 1e-4)).collect();
        let day = SignalEvaluator::default()
            .daily_quantiles(&partition("A", 0, &pairs))
            .unwrap();
        assert_eq!(day.n_groups(), 5);
        assert!(day.groups.iter().all(|g| g.count == 20));
        assert!(day
            .groups
            .windows(2)
            .all(|w| w[1].mean_return > w[0].mean_return));
        assert!(day.long_short > 0.0);
    }

    #[test]
    fn test_quantiles_skip_short_day() {
        let pairs: Vec<(i64, f64)> = (0..9).map(|i| (i, i as f64)).collect();
        assert!(SignalEvaluator::default()
            .daily_quantiles(&partition("A", 0, &pairs))
            .is_none());
    }

    #[test]
    fn test_symbol_ic_pools_days() {
        let a: Vec<(i64, f64)> = (0..6).map(|i| (i, i as f64)).collect();
        let b: Vec<(i64, f64)> = (6..12).map(|i| (i, i as f64)).collect();
        let panel = EvaluationPanel::from_partitions(vec![partition("A", 0, &a), partition("A", 1, &b)]);
        let by_symbol = SignalEvaluator::default().symbol_ic(&panel);
        assert_eq!(by_symbol.len(), 1);
        assert_eq!(by_symbol[0].n_observations, 12);
        assert!((by_symbol[0].ic - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_metric_summary_ignores_nan() {
        let s = MetricSummary::from_values(&[0.1, f64::NAN, 0.3, -0.1]);
        assert_eq!(s.n_days, 3);
        assert!((s.mean - 0.1).abs() < 1e-12);
        assert!((s.positive_rate - 2.0 / 3.0).abs() < 1e-12);
    }
}
