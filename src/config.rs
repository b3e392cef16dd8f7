//! Run configuration.
//!
//! One [`PipelineConfig`] carries every parameter of a run, and a
//! [`Universe`] carries the symbols. Both are loaded once and shared
//! read-only by all workers.
//!
//! # Layout
//!
//! ```toml
//! [data]
//! tick_root = "data/ticks"
//! output_dir = "outputs/ofi"
//!
//! [dates]
//! start_date = "2024-01-02"
//! end_date = "2024-03-29"
//! exclude_dates = ["2024-02-12"]
//!
//! [aggregation]
//! levels = 5
//! bucket_width_secs = 60
//! ofi_method = "volume_delta"
//!
//! [labels]
//! horizon = 1
//!
//! [quality]
//! expected_buckets = 240
//! min_coverage = 0.9
//!
//! [evaluation]
//! quantiles = 5
//!
//! [batch]
//! num_threads = 8
//! ```
//!
//! # Example
//!
//! ```ignore
//! use ofi_signal::config::{PipelineConfig, Universe};
//!
//! let config = PipelineConfig::load_toml("configs/ofi.toml")?;
//! let universe = Universe::load("configs/universe.json")?;
//! ```

use crate::batch::BatchConfig;
use crate::error::{PipelineError, Result};
use crate::evaluation::EvaluationConfig;
use crate::features::AggregationConfig;
use crate::labeling::LabelConfig;
use crate::quality::QualityConfig;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Data paths
// ============================================================================

/// Input and output locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root of the `<symbol>/<date>` tick partitions.
    pub tick_root: PathBuf,

    /// Directory receiving the run's output tables.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Also write the joined panel as `panel.npy` + `panel_keys.csv`.
    #[serde(default)]
    pub write_panel: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            tick_root: PathBuf::from("data/ticks"),
            output_dir: default_output_dir(),
            write_panel: false,
        }
    }
}

impl DataConfig {
    pub fn new<P1: AsRef<Path>, P2: AsRef<Path>>(tick_root: P1, output_dir: P2) -> Self {
        Self {
            tick_root: tick_root.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            write_panel: false,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.tick_root.as_os_str().is_empty() {
            return Err("tick_root cannot be empty".to_string());
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err("output_dir cannot be empty".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Date range
// ============================================================================

/// Trading dates of a run.
///
/// Either an explicit list or an inclusive `start_date..=end_date` range
/// (weekends skipped unless `include_weekends`), minus `exclude_dates`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRangeConfig {
    /// Start date (inclusive), format: YYYY-MM-DD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,

    /// End date (inclusive), format: YYYY-MM-DD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,

    /// Explicit dates; overrides start/end when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_dates: Option<Vec<String>>,

    /// Dates to drop (exchange holidays).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_dates: Vec<String>,

    #[serde(default)]
    pub include_weekends: bool,
}

impl DateRangeConfig {
    pub fn from_dates(dates: Vec<String>) -> Self {
        Self {
            explicit_dates: Some(dates),
            ..Self::default()
        }
    }

    pub fn from_range(start: &str, end: &str) -> Self {
        Self {
            start_date: Some(start.to_string()),
            end_date: Some(end.to_string()),
            ..Self::default()
        }
    }

    pub fn with_exclusions(mut self, dates: Vec<String>) -> Self {
        self.exclude_dates = dates;
        self
    }

    /// Dates to process, ascending and de-duplicated.
    pub fn get_dates(&self) -> std::result::Result<Vec<NaiveDate>, String> {
        let excluded = self
            .exclude_dates
            .iter()
            .map(|d| parse_date(d, "exclude_dates"))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut dates = if let Some(ref explicit) = self.explicit_dates {
            explicit
                .iter()
                .map(|d| parse_date(d, "explicit_dates"))
                .collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            let start = self
                .start_date
                .as_deref()
                .ok_or("Either explicit_dates or start_date must be provided")?;
            let end = self
                .end_date
                .as_deref()
                .ok_or("Either explicit_dates or end_date must be provided")?;
            let start_date = parse_date(start, "start_date")?;
            let end_date = parse_date(end, "end_date")?;
            if start_date > end_date {
                return Err(format!(
                    "start_date ({start}) must not be after end_date ({end})"
                ));
            }

            start_date
                .iter_days()
                .take_while(|d| *d <= end_date)
                .filter(|d| self.include_weekends || !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
                .collect()
        };

        dates.retain(|d| !excluded.contains(d));
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    /// True when `date` is one of [`get_dates`](Self::get_dates).
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.get_dates().map(|d| d.contains(&date)).unwrap_or(false)
    }

    /// Valid and non-empty.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let dates = self.get_dates()?;
        if dates.is_empty() {
            return Err("date range contains no trading dates".to_string());
        }
        Ok(())
    }
}

fn parse_date(raw: &str, field: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|e| format!("Invalid {field} '{raw}': {e}"))
}

// ============================================================================
// Pipeline configuration
// ============================================================================

/// Every parameter of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub data: DataConfig,

    pub dates: DateRangeConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub labels: LabelConfig,

    #[serde(default)]
    pub quality: QualityConfig,

    #[serde(default)]
    pub evaluation: EvaluationConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

impl PipelineConfig {
    pub fn new(data: DataConfig, dates: DateRangeConfig) -> Self {
        Self {
            data,
            dates,
            ..Self::default()
        }
    }

    pub fn with_aggregation(mut self, aggregation: AggregationConfig) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_labels(mut self, labels: LabelConfig) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_quality(mut self, quality: QualityConfig) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_evaluation(mut self, evaluation: EvaluationConfig) -> Self {
        self.evaluation = evaluation;
        self
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Validate every section, prefixing the failing section's name.
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.data.validate().map_err(|e| format!("data: {e}"))?;
        self.dates.validate().map_err(|e| format!("dates: {e}"))?;
        self.aggregation
            .validate()
            .map_err(|e| format!("aggregation: {e}"))?;
        self.labels.validate().map_err(|e| format!("labels: {e}"))?;
        self.quality.validate().map_err(|e| format!("quality: {e}"))?;
        self.evaluation
            .validate()
            .map_err(|e| format!("evaluation: {e}"))?;
        self.batch.validate().map_err(|e| format!("batch: {e}"))?;
        Ok(())
    }

    /// Dates of the run; a configuration error when invalid or empty.
    pub fn trading_dates(&self) -> Result<Vec<NaiveDate>> {
        let dates = self.dates.get_dates().map_err(PipelineError::Config)?;
        if dates.is_empty() {
            return Err(PipelineError::config("date range contains no trading dates"));
        }
        Ok(dates)
    }

    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&contents)?;
        config.validate().map_err(PipelineError::Config)?;
        Ok(config)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        fs::write(path, json_string)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&contents)?;
        config.validate().map_err(PipelineError::Config)?;
        Ok(config)
    }

    /// Load by extension: `.json` as JSON, anything else as TOML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::load_json(path),
            _ => Self::load_toml(path),
        }
    }
}

// ============================================================================
// Universe
// ============================================================================

/// Ordered, de-duplicated list of symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Universe {
    symbols: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UniverseDocument {
    List(Vec<String>),
    Universe { universe: Vec<String> },
    Symbols { symbols: Vec<String> },
}

impl UniverseDocument {
    fn into_symbols(self) -> Vec<String> {
        match self {
            UniverseDocument::List(s)
            | UniverseDocument::Universe { universe: s }
            | UniverseDocument::Symbols { symbols: s } => s,
        }
    }
}

impl Universe {
    /// Trim entries, drop blanks, sort and de-duplicate.
    pub fn from_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut symbols: Vec<String> = symbols
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        symbols.sort();
        symbols.dedup();
        Self { symbols }
    }

    /// JSON array, or an object with a `universe` (or `symbols`) key.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let doc: UniverseDocument = serde_json::from_str(text)
            .map_err(|e| PipelineError::config(format!("universe: {e}")))?;
        Self::non_empty(doc.into_symbols())
    }

    /// TOML table with a `universe` (or `symbols`) array.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let doc: UniverseDocument = toml::from_str(text)
            .map_err(|e| PipelineError::config(format!("universe: {e}")))?;
        Self::non_empty(doc.into_symbols())
    }

    /// Load by extension (`.json`, otherwise TOML). A missing or unreadable
    /// file is a configuration error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!("cannot read universe {}: {e}", path.display()))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_toml_str(&text),
        }
    }

    fn non_empty(raw: Vec<String>) -> Result<Self> {
        let universe = Self::from_symbols(raw);
        if universe.is_empty() {
            return Err(PipelineError::config("universe is empty"));
        }
        Ok(universe)
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(String::as_str)
    }
}
