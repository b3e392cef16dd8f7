//! Per-partition pipeline.
//!
//! Runs one (symbol, date) partition through every stage and turns the
//! result into a [`PartitionOutcome`]. Nothing here touches another
//! partition, so the batch orchestrator can run any number of these
//! concurrently.
//!
//! # Stages
//!
//! ```text
//! TickReader::read ──► OfiAggregator ──► QualityGate::assess ──┬─► excluded ──► Skipped(report)
//!                                                               │
//!                                                               └─► LabelBuilder::build ──► join ──► Succeeded
//!
//! any error ──► Failed { reason, report if the gate already ran }
//! ```
//!
//! The gate runs after aggregation because its report carries the OFI
//! moments. Labels are built from the aggregator's own `close_mid` series.

use crate::config::PipelineConfig;
use crate::error::{FailureReason, Result};
use crate::features::{AggregationConfig, OfiAggregator, OfiRecord};
use crate::labeling::{LabelBuilder, LabelRecord, LabelStats};
use crate::panel::PartitionPanel;
use crate::quality::{QualityGate, QualityReport};
use crate::reader::TickReader;
use crate::schema::PartitionKey;
use std::time::{Duration, Instant};

/// Everything computed for a usable partition.
#[derive(Debug, Clone)]
pub struct PartitionResult {
    pub key: PartitionKey,
    pub quality: QualityReport,
    pub ofi: Vec<OfiRecord>,
    pub labels: Vec<LabelRecord>,
    pub panel: PartitionPanel,
    pub elapsed: Duration,
}

/// A partition that could not be processed.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionFailure {
    pub key: PartitionKey,
    pub reason: FailureReason,
    /// Present when the failure happened after the quality gate.
    pub quality: Option<QualityReport>,
}

/// Outcome of one partition.
#[derive(Debug, Clone)]
pub enum PartitionOutcome {
    Succeeded(Box<PartitionResult>),
    /// Excluded by the quality gate.
    Skipped(Box<QualityReport>),
    Failed(PartitionFailure),
}

impl PartitionOutcome {
    pub fn key(&self) -> PartitionKey {
        match self {
            PartitionOutcome::Succeeded(r) => r.key.clone(),
            PartitionOutcome::Skipped(q) => q.key(),
            PartitionOutcome::Failed(f) => f.key.clone(),
        }
    }

    pub fn quality(&self) -> Option<&QualityReport> {
        match self {
            PartitionOutcome::Succeeded(r) => Some(&r.quality),
            PartitionOutcome::Skipped(q) => Some(q),
            PartitionOutcome::Failed(f) => f.quality.as_ref(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PartitionOutcome::Succeeded(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, PartitionOutcome::Skipped(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PartitionOutcome::Failed(_))
    }
}

/// Reader, aggregator settings, gate and label builder for one run.
///
/// Holds no per-partition state; `process` may be called from many threads.
#[derive(Debug, Clone)]
pub struct PartitionPipeline {
    reader: TickReader,
    aggregation: AggregationConfig,
    gate: QualityGate,
    labels: LabelBuilder,
}

impl PartitionPipeline {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            reader: TickReader::new(&config.data.tick_root, config.aggregation.levels),
            aggregation: config.aggregation.clone(),
            gate: QualityGate::for_aggregation(config.quality.clone(), &config.aggregation),
            labels: LabelBuilder::new(config.labels.clone()),
        }
    }

    pub fn reader(&self) -> &TickReader {
        &self.reader
    }

    /// Process one partition. Never panics on bad data; every error becomes
    /// a [`PartitionOutcome::Failed`].
    pub fn process(&self, key: &PartitionKey) -> PartitionOutcome {
        let start = Instant::now();

        let (ofi, quality) = match self.aggregate(key) {
            Ok(pair) => pair,
            Err(e) => return self.fail(key, &e, None),
        };

        if quality.is_excluded() {
            log::warn!(
                "{key}: skipped, coverage {:.3} ({} of {} buckets)",
                quality.minute_coverage,
                quality.n_buckets,
                quality.expected_buckets
            );
            return PartitionOutcome::Skipped(Box::new(quality));
        }

        let labels = match self.labels.build(&ofi) {
            Ok(labels) => labels,
            Err(e) => return self.fail(key, &e, Some(quality)),
        };

        let panel = PartitionPanel::join(key.clone(), &ofi, &labels);
        let label_stats = LabelStats::from_labels(&labels);
        log::debug!(
            "{key}: {} ticks, {} buckets, {} joined rows (labels up {} / down {} / flat {})",
            quality.n_ticks,
            ofi.len(),
            panel.len(),
            label_stats.up_count,
            label_stats.down_count,
            label_stats.flat_count
        );

        PartitionOutcome::Succeeded(Box::new(PartitionResult {
            key: key.clone(),
            quality,
            ofi,
            labels,
            panel,
            elapsed: start.elapsed(),
        }))
    }

    fn aggregate(&self, key: &PartitionKey) -> Result<(Vec<OfiRecord>, QualityReport)> {
        let ticks = self.reader.read(key)?;
        let mut aggregator = OfiAggregator::from_config(&self.aggregation);
        aggregator.push_all(&ticks)?;
        if aggregator.ticks_outside_session() > 0 {
            log::debug!(
                "{key}: {} of {} ticks outside session windows",
                aggregator.ticks_outside_session(),
                ticks.len()
            );
        }
        let ofi = aggregator.finish();
        let quality = self.gate.assess(key, &ticks, &ofi);
        Ok((ofi, quality))
    }

    fn fail(
        &self,
        key: &PartitionKey,
        err: &crate::error::PipelineError,
        quality: Option<QualityReport>,
    ) -> PartitionOutcome {
        let reason = FailureReason::from(err);
        log::warn!("{key}: failed: {err}");
        PartitionOutcome::Failed(PartitionFailure {
            key: key.clone(),
            reason,
            quality,
        })
    }
}

/// Process one partition with a fresh [`PartitionPipeline`].
///
/// A pure function of the configuration, the key and the files on disk.
pub fn process_partition(config: &PipelineConfig, key: &PartitionKey) -> PartitionOutcome {
    PartitionPipeline::from_config(config).process(key)
}
