//! Parallel batch orchestration over the (symbol × date) grid.
//!
//! Each partition runs through its own [`PartitionPipeline::process`] call on
//! a Rayon worker. Partitions share only read-only configuration, so there
//! is no lock on the hot path; run counters are atomics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    BatchOrchestrator                            │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                 Rayon Thread Pool (local)                  │ │
//! │  │                                                            │ │
//! │  │  (A, d1)          (A, d2)          (Z, dN)                 │ │
//! │  │  read → OFI →     read → OFI →     read → OFI →            │ │
//! │  │  gate → labels    gate → labels    gate → labels           │ │
//! │  │      │                │                │                   │ │
//! │  │      ▼                ▼                ▼                   │ │
//! │  │  Outcome          Outcome          Outcome                 │ │
//! │  └──────────────────────┬─────────────────────────────────────┘ │
//! │                         ▼                                       │
//! │   ordered by key ──► OFI outlier pass ──► EvaluationPanel       │
//! │                                              │                  │
//! │                                              ▼                  │
//! │                                     SignalEvaluator ──► RunOutput
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Failure Policy
//!
//! - Partition-local errors (missing file, bad schema, too few buckets) are
//!   recorded as [`PartitionFailure`]s and the run continues.
//! - Quality-excluded partitions are counted as skipped and keep their
//!   quality report.
//! - Only configuration errors (invalid config, empty universe or date
//!   range, thread pool) fail [`BatchOrchestrator::run`], and they do so
//!   before any partition starts.
//! - A failed partition is never retried within a run.
//!
//! # Cancellation
//!
//! ```ignore
//! use ofi_signal::batch::{BatchOrchestrator, CancellationToken};
//!
//! let token = CancellationToken::new();
//! let orchestrator = BatchOrchestrator::new(config, universe)
//!     .with_cancellation_token(token.clone());
//!
//! let handle = std::thread::spawn(move || orchestrator.run());
//! token.cancel(); // in-flight partitions finish, no new ones start
//! let output = handle.join().unwrap()?;
//! assert!(output.was_cancelled);
//! ```

use crate::config::{PipelineConfig, Universe};
use crate::error::{FailureReason, PipelineError, Result};
use crate::evaluation::{EvaluationReport, SignalEvaluator};
use crate::panel::EvaluationPanel;
use crate::pipeline::{PartitionFailure, PartitionOutcome, PartitionPipeline};
use crate::quality::{flag_ofi_outliers, QualityReport};
use crate::reader::TickReader;
use crate::schema::PartitionKey;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for batch processing.
///
/// # Example
///
/// ```
/// use ofi_signal::batch::BatchConfig;
///
/// let config = BatchConfig::new().with_threads(8);
/// assert_eq!(config.num_threads, Some(8));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Worker threads; `None` uses Rayon's default (one per core).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<usize>,

    /// Stack size per worker thread in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,

    /// Build the grid from the partitions found on disk (within the date
    /// range) instead of the full universe × calendar grid. With the
    /// calendar grid, absent partitions are reported as `PartitionNotFound`.
    #[serde(default)]
    pub discover_partitions: bool,
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn with_discovery(mut self, discover: bool) -> Self {
        self.discover_partitions = discover;
        self
    }

    /// Configured threads or Rayon's default.
    pub fn effective_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(rayon::current_num_threads)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.num_threads == Some(0) {
            return Err("num_threads must be > 0".to_string());
        }
        if self.stack_size == Some(0) {
            return Err("stack_size must be > 0".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Cancellation Support
// ============================================================================

/// Token for cancelling a run from any thread.
///
/// Workers check it before starting a partition: partitions already running
/// finish normally, the rest are counted as cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Only call this when no run is active.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// Results
// ============================================================================

/// Run-level partition counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub succeeded: usize,
    /// Excluded by the quality gate.
    pub skipped: usize,
    pub failed: usize,
    /// Never started because the run was cancelled.
    pub cancelled: usize,
}

impl RunCounts {
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed + self.cancelled
    }
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Grid that was processed, ordered by key.
    pub partitions: Vec<PartitionKey>,

    /// One report per partition that reached the quality gate, ordered by key.
    pub quality_reports: Vec<QualityReport>,

    /// Failed partitions, ordered by key.
    pub failures: Vec<PartitionFailure>,

    /// Quality-excluded partitions, ordered by key.
    pub skipped: Vec<PartitionKey>,

    pub panel: EvaluationPanel,
    pub evaluation: EvaluationReport,
    pub counts: RunCounts,

    /// Wall-clock time of the run.
    pub elapsed: Duration,
    pub threads_used: usize,
    pub was_cancelled: bool,
}

impl RunOutput {
    /// Failures of one kind, e.g. `"PartitionNotFound"`.
    pub fn failures_of(&self, kind: &str) -> impl Iterator<Item = &PartitionFailure> + '_ {
        let kind = kind.to_string();
        self.failures.iter().filter(move |f| f.reason.kind() == kind)
    }

    pub fn all_successful(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty() && !self.was_cancelled
    }
}

// ============================================================================
// Progress Reporting
// ============================================================================

/// Progress information for callbacks.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Partition about to be processed.
    pub current: PartitionKey,

    /// Index in the grid (0-based).
    pub current_index: usize,

    pub total: usize,

    /// Partitions finished so far, by outcome.
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,

    pub elapsed: Duration,
}

impl ProgressInfo {
    pub fn done(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }

    /// Completion percentage (0.0 to 100.0).
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.done() as f64 / self.total as f64 * 100.0
        }
    }

    /// Remaining time extrapolated from the average so far.
    pub fn estimated_remaining(&self) -> Option<Duration> {
        let done = self.done();
        if done == 0 {
            return None;
        }
        let remaining = self.total.saturating_sub(done);
        let avg = self.elapsed.as_secs_f64() / done as f64;
        Some(Duration::from_secs_f64(avg * remaining as f64))
    }
}

/// Receives progress updates during a run.
pub trait ProgressCallback: Send + Sync {
    /// Called before a partition starts.
    fn on_progress(&self, info: &ProgressInfo);

    /// Called once the run output is assembled.
    fn on_complete(&self, output: &RunOutput);
}

/// Console progress reporter.
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    pub verbose: bool,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }
}

impl ProgressCallback for ConsoleProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        if self.verbose {
            let eta = info
                .estimated_remaining()
                .map(|d| format!(", ~{}s left", d.as_secs()))
                .unwrap_or_default();
            println!(
                "[{:4}/{:4}] {} ({:.1}% complete{eta})",
                info.done() + 1,
                info.total,
                info.current,
                info.percent_complete()
            );
        } else {
            print!("\r[{:4}/{:4}] {:.1}%", info.done(), info.total, info.percent_complete());
            use std::io::Write;
            std::io::stdout().flush().ok();
        }
    }

    fn on_complete(&self, output: &RunOutput) {
        let c = &output.counts;
        println!();
        println!("═══════════════════════════════════════════════════════════════");
        println!("OFI Batch Complete");
        println!("═══════════════════════════════════════════════════════════════");
        println!("  Partitions:      {}", output.partitions.len());
        println!("  Succeeded:       {}", c.succeeded);
        println!("  Skipped (QC):    {}", c.skipped);
        println!("  Failed:          {}", c.failed);
        if output.was_cancelled {
            println!("  Cancelled:       {}", c.cancelled);
        }
        println!("  Panel rows:      {}", output.panel.len());
        println!(
            "  IC mean:         {:.4} (t = {:.2}, p = {:.4})",
            output.evaluation.ic.mean, output.evaluation.ic.t_stat, output.evaluation.ic.p_value
        );
        println!(
            "  RankIC mean:     {:.4} (t = {:.2}, p = {:.4})",
            output.evaluation.rank_ic.mean,
            output.evaluation.rank_ic.t_stat,
            output.evaluation.rank_ic.p_value
        );
        println!("  Total time:      {:?}", output.elapsed);
        println!("═══════════════════════════════════════════════════════════════");
    }
}

// ============================================================================
// Batch Orchestrator
// ============================================================================

/// Runs the partition pipeline over a universe and date range.
///
/// Re-running with the same configuration and unchanged files gives the
/// same panel, reports and statistics: nothing is cached between runs.
pub struct BatchOrchestrator {
    config: Arc<PipelineConfig>,
    universe: Arc<Universe>,
    progress_callback: Option<Arc<dyn ProgressCallback>>,
    cancellation_token: CancellationToken,
}

impl BatchOrchestrator {
    pub fn new(config: PipelineConfig, universe: Universe) -> Self {
        Self {
            config: Arc::new(config),
            universe: Arc::new(universe),
            progress_callback: None,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_progress_callback(mut self, callback: Box<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(Arc::from(callback));
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    /// The (symbol × date) grid of this run, ordered by key.
    pub fn partition_grid(&self) -> Result<Vec<PartitionKey>> {
        if self.universe.is_empty() {
            return Err(PipelineError::config("universe is empty"));
        }
        let dates = self.config.trading_dates()?;

        let mut keys = Vec::new();
        if self.config.batch.discover_partitions {
            let reader = TickReader::new(&self.config.data.tick_root, self.config.aggregation.levels);
            let wanted: BTreeSet<_> = dates.into_iter().collect();
            for symbol in self.universe.iter() {
                // An unreadable symbol directory only removes that symbol.
                match reader.discover_dates(symbol) {
                    Ok(found) => keys.extend(
                        found
                            .into_iter()
                            .filter(|d| wanted.contains(d))
                            .map(|d| PartitionKey::new(symbol, d)),
                    ),
                    Err(e) => log::warn!("{symbol}: partition discovery failed: {e}"),
                }
            }
        } else {
            for symbol in self.universe.iter() {
                keys.extend(dates.iter().map(|&d| PartitionKey::new(symbol, d)));
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// Validate the configuration and run the full grid.
    pub fn run(&self) -> Result<RunOutput> {
        self.config.validate().map_err(PipelineError::Config)?;
        let keys = self.partition_grid()?;
        self.run_partitions(&keys)
    }

    /// Run an explicit list of partitions. Duplicates are processed once.
    pub fn run_partitions(&self, keys: &[PartitionKey]) -> Result<RunOutput> {
        let start = Instant::now();

        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();
        let total = keys.len();

        let threads_used = self.config.batch.effective_threads();
        log::info!(
            "OFI batch: {} partitions ({} symbols) on {} threads",
            total,
            self.universe.len(),
            threads_used
        );

        let succeeded = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let cancelled = AtomicUsize::new(0);

        enum ProcessResult {
            Done(PartitionOutcome),
            Cancelled,
        }

        // Local pool: build_global() can only be called once per process.
        let mut pool_builder = rayon::ThreadPoolBuilder::new().num_threads(threads_used);
        if let Some(stack_size) = self.config.batch.stack_size {
            pool_builder = pool_builder.stack_size(stack_size);
        }
        let pool = pool_builder
            .build()
            .map_err(|e| PipelineError::ThreadPool(e.to_string()))?;

        let pipeline = PartitionPipeline::from_config(&self.config);

        let results: Vec<ProcessResult> = pool.install(|| {
            keys.par_iter()
                .enumerate()
                .map(|(index, key)| {
                    if self.cancellation_token.is_cancelled() {
                        cancelled.fetch_add(1, Ordering::Relaxed);
                        return ProcessResult::Cancelled;
                    }

                    if let Some(ref callback) = self.progress_callback {
                        callback.on_progress(&ProgressInfo {
                            current: key.clone(),
                            current_index: index,
                            total,
                            succeeded: succeeded.load(Ordering::Relaxed),
                            skipped: skipped.load(Ordering::Relaxed),
                            failed: failed.load(Ordering::Relaxed),
                            elapsed: start.elapsed(),
                        });
                    }

                    let outcome = pipeline.process(key);
                    let counter = match &outcome {
                        PartitionOutcome::Succeeded(_) => &succeeded,
                        PartitionOutcome::Skipped(_) => &skipped,
                        PartitionOutcome::Failed(_) => &failed,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                    ProcessResult::Done(outcome)
                })
                .collect()
        });

        // `collect` keeps input order, so everything below is in key order.
        let mut quality_reports = Vec::new();
        let mut failures = Vec::new();
        let mut skipped_keys = Vec::new();
        let mut panels = Vec::new();

        for result in results {
            let outcome = match result {
                ProcessResult::Done(outcome) => outcome,
                ProcessResult::Cancelled => continue,
            };
            match outcome {
                PartitionOutcome::Succeeded(r) => {
                    let r = *r;
                    quality_reports.push(r.quality);
                    panels.push(r.panel);
                }
                PartitionOutcome::Skipped(q) => {
                    skipped_keys.push(q.key());
                    quality_reports.push(*q);
                }
                PartitionOutcome::Failed(f) => {
                    if let Some(ref q) = f.quality {
                        quality_reports.push(q.clone());
                    }
                    failures.push(f);
                }
            }
        }

        let outliers = flag_ofi_outliers(&mut quality_reports, self.config.quality.outlier_sigma);
        for failure in failures.iter_mut() {
            if let Some(q) = failure.quality.as_mut() {
                if let Some(flagged) = quality_reports.iter().find(|r| r.symbol == q.symbol && r.date == q.date) {
                    q.flags = flagged.flags.clone();
                }
            }
        }

        let panel = EvaluationPanel::from_partitions(panels);
        let evaluation = SignalEvaluator::new(self.config.evaluation.clone()).evaluate(&panel);

        let counts = RunCounts {
            succeeded: succeeded.into_inner(),
            skipped: skipped.into_inner(),
            failed: failed.into_inner(),
            cancelled: cancelled.into_inner(),
        };
        let was_cancelled = self.cancellation_token.is_cancelled();

        log::info!(
            "OFI batch done in {:.2?}: {} succeeded, {} skipped, {} failed{}; {} OFI outliers; {} panel rows",
            start.elapsed(),
            counts.succeeded,
            counts.skipped,
            counts.failed,
            if was_cancelled {
                format!(", {} cancelled", counts.cancelled)
            } else {
                String::new()
            },
            outliers,
            panel.len()
        );
        for failure in &failures {
            if failure.reason != FailureReason::PartitionNotFound {
                log::debug!("{}: {}", failure.key, failure.reason);
            }
        }

        let output = RunOutput {
            partitions: keys,
            quality_reports,
            failures,
            skipped: skipped_keys,
            panel,
            evaluation,
            counts,
            elapsed: start.elapsed(),
            threads_used,
            was_cancelled,
        };

        if let Some(ref callback) = self.progress_callback {
            callback.on_complete(&output);
        }

        Ok(output)
    }
}

// ============================================================================
// Tests
// ============================================================================
