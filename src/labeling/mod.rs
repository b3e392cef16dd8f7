//! Forward-Return Labels
//!
//! Builds the prediction target for each time bucket: the mid-price return
//! from the bucket's close to the close `horizon` buckets later.
//!
//! # Definition
//!
//! ```text
//! simple: r[b] = close_mid[b + h] / close_mid[b] - 1
//! log:    r[b] = ln(close_mid[b + h] / close_mid[b])
//! ```
//!
//! `b + h` indexes the buckets present in the partition (empty buckets are
//! not in the series). The last `h` buckets of each session get no label:
//! a return never spans a session break.
//! Labels are built from the aggregator's own `close_mid` series, so they are
//! aligned with a prefix of the OFI records by construction.
//!
//! # Example
//!
//! ```
//! use ofi_signal::labeling::{LabelConfig, ReturnKind};
//!
//! let config = LabelConfig::default();
//! assert_eq!(config.horizon, 1);
//! assert_eq!(config.return_kind, ReturnKind::Simple);
//! ```

mod forward_return;

pub use forward_return::LabelBuilder;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Return definition used for labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    #[default]
    Simple,
    Log,
}

impl ReturnKind {
    #[inline]
    pub fn compute(&self, from: f64, to: f64) -> f64 {
        match self {
            ReturnKind::Simple => to / from - 1.0,
            ReturnKind::Log => (to / from).ln(),
        }
    }
}

/// Label configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelConfig {
    /// Buckets ahead for the forward return.
    #[serde(default = "default_horizon")]
    pub horizon: usize,

    #[serde(default)]
    pub return_kind: ReturnKind,
}

fn default_horizon() -> usize {
    1
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            horizon: 1,
            return_kind: ReturnKind::Simple,
        }
    }
}

impl LabelConfig {
    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_return_kind(mut self, kind: ReturnKind) -> Self {
        self.return_kind = kind;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.horizon == 0 {
            return Err("horizon must be > 0".to_string());
        }
        Ok(())
    }
}

/// Forward return for one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub bucket_start: NaiveDateTime,
    pub forward_return: f64,
}

/// Summary of a label series, used for logging and sanity checks.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelStats {
    pub total: usize,
    pub up_count: usize,
    pub down_count: usize,
    pub flat_count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl LabelStats {
    pub fn from_labels(labels: &[LabelRecord]) -> Self {
        let values: Vec<f64> = labels.iter().map(|l| l.forward_return).collect();
        Self {
            total: values.len(),
            up_count: values.iter().filter(|v| **v > 0.0).count(),
            down_count: values.iter().filter(|v| **v < 0.0).count(),
            flat_count: values.iter().filter(|v| **v == 0.0).count(),
            mean: crate::evaluation::stats::mean(&values),
            std: crate::evaluation::stats::sample_std(&values),
            min: values.iter().copied().fold(f64::NAN, f64::min),
            max: values.iter().copied().fold(f64::NAN, f64::max),
        }
    }
}
