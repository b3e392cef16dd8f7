//! OFI Signal
//!
//! Tick-to-bucket order-flow-imbalance (OFI) aggregation and signal
//! evaluation over a (symbol × date) grid of order-book snapshots.
//!
//! # Overview
//!
//! For every partition (one symbol on one trading day) the pipeline reads the
//! tick snapshots, sums the multi-level OFI increment into fixed-width time
//! buckets, checks data quality, builds forward mid-price returns on the same
//! buckets and joins the two. The joined rows of all partitions form the
//! evaluation panel, on which per-day IC / rank IC, t-tests and quantile
//! return spreads are computed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          OFI Signal                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  schema/      - Tick snapshot types and column naming           │
//! │  reader       - Partition lookup and CSV tick loading           │
//! │  features/    - Per-tick OFI increment and bucket aggregation   │
//! │  quality      - Coverage / book integrity gate, OFI outliers    │
//! │  labeling/    - Forward-return labels                           │
//! │  panel        - OFI/label join and cross-sectional panel        │
//! │  evaluation/  - IC, rank IC, t-tests, quantile groups           │
//! │  pipeline     - One partition through every stage               │
//! │  batch        - Parallel run over the grid                      │
//! │  export/      - CSV / JSON / NumPy outputs                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use ofi_signal::prelude::*;
//!
//! let config = PipelineConfig::load_toml("configs/ofi.toml")?;
//! let universe = Universe::load("configs/universe.json")?;
//!
//! let output = BatchOrchestrator::new(config.clone(), universe).run()?;
//! OutputWriter::new(&config.data.output_dir).write_all(&output, &config, false)?;
//!
//! println!(
//!     "{} succeeded, {} skipped, {} failed; rank IC {:.4}",
//!     output.counts.succeeded,
//!     output.counts.skipped,
//!     output.counts.failed,
//!     output.evaluation.rank_ic.mean
//! );
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod export;
pub mod features;
pub mod labeling;
pub mod panel;
pub mod pipeline;
pub mod prelude;
pub mod quality;
pub mod reader;
pub mod schema;

// Re-exports - Errors
pub use error::{FailureReason, PipelineError, Result};

// Re-exports - Schema
pub use schema::{BookLevel, PartitionKey, TickSnapshot, TradeFields};

// Re-exports - Config
pub use config::{DataConfig, DateRangeConfig, PipelineConfig, Universe};

// Re-exports - Stages
pub use evaluation::{EvaluationConfig, EvaluationReport, MetricSummary, SignalEvaluator};
pub use features::{AggregationConfig, OfiAggregator, OfiMethod, OfiRecord, SessionWindow};
pub use labeling::{LabelBuilder, LabelConfig, LabelRecord, ReturnKind};
pub use panel::{EvaluationPanel, PanelRow, PartitionPanel};
pub use quality::{QualityConfig, QualityFlag, QualityGate, QualityReport};
pub use reader::TickReader;

// Re-exports - Orchestration
pub use batch::{BatchConfig, BatchOrchestrator, CancellationToken, RunCounts, RunOutput};
pub use export::OutputWriter;
pub use pipeline::{process_partition, PartitionOutcome, PartitionPipeline};
