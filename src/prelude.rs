//! Prelude module for convenient imports.
//!
//! ```ignore
//! use ofi_signal::prelude::*;
//!
//! let output = BatchOrchestrator::new(config, universe)
//!     .with_progress_callback(Box::new(ConsoleProgress::new()))
//!     .run()?;
//! ```
//!
//! # What's Included
//!
//! ## Configuration
//! - [`PipelineConfig`], [`DataConfig`], [`DateRangeConfig`], [`Universe`]
//! - Stage configs: [`AggregationConfig`], [`LabelConfig`], [`QualityConfig`],
//!   [`EvaluationConfig`], [`BatchConfig`]
//!
//! ## Orchestration
//! - [`BatchOrchestrator`] with [`CancellationToken`], [`ProgressCallback`],
//!   [`ConsoleProgress`]
//! - [`RunOutput`], [`RunCounts`]
//! - [`OutputWriter`]
//!
//! ## Stages
//! - [`TickReader`], [`OfiAggregator`], [`QualityGate`], [`LabelBuilder`],
//!   [`SignalEvaluator`]

pub use crate::batch::{
    BatchConfig, BatchOrchestrator, CancellationToken, ConsoleProgress, ProgressCallback,
    ProgressInfo, RunCounts, RunOutput,
};
pub use crate::config::{DataConfig, DateRangeConfig, PipelineConfig, Universe};
pub use crate::error::{FailureReason, PipelineError, Result};
pub use crate::evaluation::{
    DailyIc, EvaluationConfig, EvaluationReport, MetricSummary, SignalEvaluator,
};
pub use crate::export::OutputWriter;
pub use crate::features::{AggregationConfig, OfiAggregator, OfiMethod, OfiRecord, SessionWindow};
pub use crate::labeling::{LabelBuilder, LabelConfig, LabelRecord, ReturnKind};
pub use crate::panel::{EvaluationPanel, PanelRow, PartitionPanel};
pub use crate::pipeline::{process_partition, PartitionOutcome};
pub use crate::quality::{QualityConfig, QualityFlag, QualityGate, QualityReport};
pub use crate::reader::TickReader;
pub use crate::schema::{BookLevel, PartitionKey, TickSnapshot};
