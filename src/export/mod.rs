//! Run Output Export
//!
//! Writes the tables and summaries downstream reporting consumes.
//!
//! # Files
//!
//! | File | Format | Content |
//! |------|--------|---------|
//! | `quality_report.csv` | CSV | one row per partition that reached the gate |
//! | `daily_ic.csv` | CSV | IC / rank IC per (symbol, date) |
//! | `quantile_returns.csv` | CSV | per-day group means, long format |
//! | `failures.csv` | CSV | failed partitions with reason |
//! | `summary.json` | JSON | cross-sectional statistics and the run config |
//! | `run_metadata.json` | JSON | timestamp, timings, counts |
//! | `panel.npy` | NumPy | optional `[N, 2]` float64: `ofi_value`, `forward_return` |
//! | `panel_keys.csv` | CSV | optional row keys of `panel.npy` |
//!
//! `summary.json` depends only on inputs and configuration, so two runs over
//! unchanged data produce byte-identical files. Wall-clock data lives in
//! `run_metadata.json`. Undefined statistics are written as `NaN` in CSV and
//! `null` in JSON.
//!
//! # Example
//!
//! ```ignore
//! use ofi_signal::export::OutputWriter;
//!
//! let output = orchestrator.run()?;
//! let written = OutputWriter::new(&config.data.output_dir).write_all(&output, &config, true)?;
//! ```

pub mod tables;

use crate::batch::{RunCounts, RunOutput};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::evaluation::{GroupSummary, MetricSummary, SymbolIc};
use ndarray::Array2;
use ndarray_npy::WriteNpyExt;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tables::{panel_key_rows, quantile_rows, DailyIcRow, FailureRow, QualityRow};

pub const QUALITY_REPORT_FILE: &str = "quality_report.csv";
pub const DAILY_IC_FILE: &str = "daily_ic.csv";
pub const QUANTILE_RETURNS_FILE: &str = "quantile_returns.csv";
pub const FAILURES_FILE: &str = "failures.csv";
pub const SUMMARY_FILE: &str = "summary.json";
pub const METADATA_FILE: &str = "run_metadata.json";
pub const PANEL_FILE: &str = "panel.npy";
pub const PANEL_KEYS_FILE: &str = "panel_keys.csv";

/// Deterministic cross-sectional summary.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub counts: RunCounts,
    pub n_partitions: usize,
    pub n_panel_rows: usize,
    pub n_valid_days: usize,
    pub ic: MetricSummary,
    pub rank_ic: MetricSummary,
    pub quantiles: QuantileSummary<'a>,
    pub by_symbol: &'a [SymbolIc],
    pub config: &'a PipelineConfig,
}

#[derive(Debug, Serialize)]
pub struct QuantileSummary<'a> {
    pub quantiles: usize,
    pub n_days: usize,
    pub groups: &'a [GroupSummary],
    pub long_short: MetricSummary,
}

impl<'a> RunSummary<'a> {
    pub fn new(output: &'a RunOutput, config: &'a PipelineConfig) -> Self {
        let eval = &output.evaluation;
        Self {
            counts: output.counts,
            n_partitions: output.partitions.len(),
            n_panel_rows: output.panel.len(),
            n_valid_days: eval.valid_days(),
            ic: eval.ic,
            rank_ic: eval.rank_ic,
            quantiles: QuantileSummary {
                quantiles: eval.quantiles.quantiles,
                n_days: eval.quantiles.daily.len(),
                groups: &eval.quantiles.groups,
                long_short: eval.quantiles.long_short,
            },
            by_symbol: &eval.by_symbol,
            config,
        }
    }
}

/// Non-deterministic run facts.
#[derive(Debug, Serialize)]
pub struct RunMetadata {
    pub export_timestamp: String,
    pub crate_version: &'static str,
    pub elapsed_secs: f64,
    pub threads_used: usize,
    pub was_cancelled: bool,
    pub counts: RunCounts,
    pub files: Vec<String>,
}

/// Writes a [`RunOutput`] into one directory.
pub struct OutputWriter {
    output_dir: PathBuf,
}

impl OutputWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write every table, the summary and (optionally) the panel arrays.
    /// Returns the paths written, `run_metadata.json` last.
    pub fn write_all(
        &self,
        output: &RunOutput,
        config: &PipelineConfig,
        write_panel: bool,
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.output_dir)?;

        let mut written = vec![
            self.write_quality_report(output)?,
            self.write_daily_ic(output)?,
            self.write_quantile_returns(output)?,
            self.write_failures(output)?,
            self.write_summary(output, config)?,
        ];
        if write_panel {
            written.extend(self.write_panel(output)?);
        }
        written.push(self.write_metadata(output, &written)?);

        log::info!(
            "wrote {} files to {}",
            written.len(),
            self.output_dir.display()
        );
        Ok(written)
    }

    pub fn write_quality_report(&self, output: &RunOutput) -> Result<PathBuf> {
        self.write_csv(
            QUALITY_REPORT_FILE,
            output.quality_reports.iter().map(QualityRow::from),
        )
    }

    pub fn write_daily_ic(&self, output: &RunOutput) -> Result<PathBuf> {
        self.write_csv(
            DAILY_IC_FILE,
            output.evaluation.daily.iter().map(DailyIcRow::from),
        )
    }

    pub fn write_quantile_returns(&self, output: &RunOutput) -> Result<PathBuf> {
        self.write_csv(
            QUANTILE_RETURNS_FILE,
            output.evaluation.quantiles.daily.iter().flat_map(quantile_rows),
        )
    }

    pub fn write_failures(&self, output: &RunOutput) -> Result<PathBuf> {
        self.write_csv(FAILURES_FILE, output.failures.iter().map(FailureRow::from))
    }

    pub fn write_summary(&self, output: &RunOutput, config: &PipelineConfig) -> Result<PathBuf> {
        let path = self.output_dir.join(SUMMARY_FILE);
        let file = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(file, &RunSummary::new(output, config))?;
        Ok(path)
    }

    /// `panel.npy` (`[N, 2]` float64) and `panel_keys.csv`.
    pub fn write_panel(&self, output: &RunOutput) -> Result<Vec<PathBuf>> {
        let rows: Vec<(f64, f64)> = output
            .panel
            .iter_rows()
            .map(|(_, r)| (r.ofi_value as f64, r.forward_return))
            .collect();
        let array = Array2::from_shape_fn((rows.len(), 2), |(i, j)| {
            if j == 0 {
                rows[i].0
            } else {
                rows[i].1
            }
        });

        let npy_path = self.output_dir.join(PANEL_FILE);
        let file = BufWriter::new(File::create(&npy_path)?);
        array.write_npy(file)?;

        let keys_path = self.write_csv(PANEL_KEYS_FILE, panel_key_rows(output))?;
        log::debug!("panel: {} rows -> {}", rows.len(), npy_path.display());
        Ok(vec![npy_path, keys_path])
    }

    fn write_metadata(&self, output: &RunOutput, files: &[PathBuf]) -> Result<PathBuf> {
        let metadata = RunMetadata {
            export_timestamp: chrono::Utc::now().to_rfc3339(),
            crate_version: env!("CARGO_PKG_VERSION"),
            elapsed_secs: output.elapsed.as_secs_f64(),
            threads_used: output.threads_used,
            was_cancelled: output.was_cancelled,
            counts: output.counts,
            files: files
                .iter()
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
                .collect(),
        };
        let path = self.output_dir.join(METADATA_FILE);
        let file = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(file, &metadata)?;
        Ok(path)
    }

    /// Header is written even when there are no rows.
    fn write_csv<T, I>(&self, name: &str, rows: I) -> Result<PathBuf>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let path = self.output_dir.join(name);
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(true)
            .from_path(&path)?;
        let mut any = false;
        for row in rows {
            wtr.serialize(row)?;
            any = true;
        }
        if !any {
            wtr.write_record(header_for(name))?;
        }
        wtr.flush()?;
        Ok(path)
    }
}

/// Column names for empty tables (serde headers only appear with a row).
fn header_for(name: &str) -> &'static [&'static str] {
    match name {
        QUALITY_REPORT_FILE => &[
            "symbol",
            "date",
            "n_ticks",
            "n_buckets",
            "expected_buckets",
            "minute_coverage",
            "crossed_book_rate",
            "zero_spread_rate",
            "duplicate_timestamp_rate",
            "bad_price_count",
            "spread_median",
            "relative_spread_median",
            "maybe_truncated_rate",
            "first_tick",
            "last_tick",
            "ofi_mean",
            "ofi_std",
            "ofi_min",
            "ofi_q25",
            "ofi_median",
            "ofi_q75",
            "ofi_max",
            "flags",
            "excluded",
        ],
        DAILY_IC_FILE => &[
            "symbol",
            "date",
            "n_observations",
            "ic",
            "ic_p_value",
            "rank_ic",
            "rank_ic_p_value",
            "degenerate",
        ],
        QUANTILE_RETURNS_FILE => &[
            "symbol",
            "date",
            "n_groups",
            "group",
            "count",
            "mean_return",
            "long_short",
        ],
        FAILURES_FILE => &["symbol", "date", "reason", "detail"],
        PANEL_KEYS_FILE => &["symbol", "date", "bucket_start"],
        _ => &[],
    }
}
