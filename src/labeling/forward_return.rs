//! Forward-return label builder.

use super::{LabelConfig, LabelRecord, ReturnKind};
use crate::error::{PipelineError, Result};
use crate::features::OfiRecord;

/// Builds [`LabelRecord`]s from an OFI record series.
#[derive(Debug, Clone, Default)]
pub struct LabelBuilder {
    config: LabelConfig,
}

impl LabelBuilder {
    pub fn new(config: LabelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LabelConfig {
        &self.config
    }

    /// Forward returns for every bucket except the last `horizon` of each
    /// session.
    ///
    /// A pair whose buckets lie in different sessions is dropped, as is a
    /// label whose value is not finite (a NaN or non-positive close on either
    /// end). The remaining keys stay in bucket order and each one matches an
    /// OFI record.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InsufficientBuckets`] when the series is too short to
    /// form a single label.
    pub fn build(&self, records: &[OfiRecord]) -> Result<Vec<LabelRecord>> {
        let horizon = self.config.horizon.max(1);
        let required = horizon + 1;
        if records.len() < required {
            return Err(PipelineError::InsufficientBuckets {
                buckets: records.len(),
                required,
            });
        }

        let kind: ReturnKind = self.config.return_kind;
        let labels = records
            .iter()
            .zip(records.iter().skip(horizon))
            .filter(|(now, ahead)| now.session == ahead.session)
            .filter_map(|(now, ahead)| {
                let r = kind.compute(now.close_mid, ahead.close_mid);
                r.is_finite().then(|| LabelRecord {
                    bucket_start: now.bucket_start,
                    forward_return: r,
                })
            })
            .collect();

        Ok(labels)
    }
}
