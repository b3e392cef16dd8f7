//! Joined OFI/label tables.
//!
//! A [`PartitionPanel`] holds the `(bucket, ofi_value, forward_return)` rows
//! of one (symbol, date) partition. The [`EvaluationPanel`] is the
//! cross-sectional concatenation of every successful partition of a run,
//! ordered by key, and is the only input of the signal evaluator.

use crate::features::OfiRecord;
use crate::labeling::LabelRecord;
use crate::schema::PartitionKey;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One joined observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PanelRow {
    pub bucket_start: NaiveDateTime,
    pub ofi_value: i64,
    pub forward_return: f64,
}

/// Joined rows of one partition, in bucket order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionPanel {
    pub key: PartitionKey,
    pub rows: Vec<PanelRow>,
}

impl PartitionPanel {
    /// Inner join on bucket start. Both inputs must be in bucket order.
    ///
    /// OFI records without a label (the last `horizon` buckets, or buckets
    /// whose label was dropped) produce no row.
    pub fn join(key: PartitionKey, ofi: &[OfiRecord], labels: &[LabelRecord]) -> Self {
        let mut rows = Vec::with_capacity(labels.len());
        let mut ofi_iter = ofi.iter().peekable();

        for label in labels {
            while let Some(rec) = ofi_iter.peek() {
                if rec.bucket_start < label.bucket_start {
                    ofi_iter.next();
                } else {
                    break;
                }
            }
            if let Some(rec) = ofi_iter.peek() {
                if rec.bucket_start == label.bucket_start {
                    rows.push(PanelRow {
                        bucket_start: rec.bucket_start,
                        ofi_value: rec.ofi_value,
                        forward_return: label.forward_return,
                    });
                }
            }
        }

        Self { key, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `ofi_value` as f64 and `forward_return`, as two parallel columns.
    pub fn columns(&self) -> (Vec<f64>, Vec<f64>) {
        self.rows
            .iter()
            .map(|r| (r.ofi_value as f64, r.forward_return))
            .unzip()
    }
}

/// Cross-sectional panel over all successful partitions of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationPanel {
    partitions: Vec<PartitionPanel>,
}

impl EvaluationPanel {
    /// Build a panel; partitions are sorted by key so the panel does not
    /// depend on completion order.
    pub fn from_partitions(mut partitions: Vec<PartitionPanel>) -> Self {
        partitions.sort_by(|a, b| a.key.cmp(&b.key));
        Self { partitions }
    }

    /// Total number of joined rows.
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn partitions(&self) -> &[PartitionPanel] {
        &self.partitions
    }

    /// All rows with their partition key, in key then bucket order.
    pub fn iter_rows(&self) -> impl Iterator<Item = (&PartitionKey, &PanelRow)> + '_ {
        self.partitions
            .iter()
            .flat_map(|p| p.rows.iter().map(move |r| (&p.key, r)))
    }

    /// True if any row belongs to `key`.
    pub fn contains(&self, key: &PartitionKey) -> bool {
        self.partitions
            .iter()
            .any(|p| &p.key == key && !p.rows.is_empty())
    }

    /// Distinct symbols, sorted.
    pub fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self.partitions.iter().map(|p| p.key.symbol.as_str()).collect();
        symbols.dedup();
        symbols
    }
}
