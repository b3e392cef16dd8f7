//! Error types for the OFI pipeline.
//!
//! Errors fall into two classes:
//!
//! - **Partition-local** (`PartitionNotFound`, `Schema`, `InsufficientBuckets`,
//!   `UnorderedTicks`, and I/O while reading a partition). These are caught by
//!   the batch orchestrator and turned into a [`FailureReason`] on that
//!   partition. They never abort a run.
//! - **Run-level** (`Config`, `ThreadPool`). These stop the run before any
//!   partition is launched.
//!
//! Undefined per-day correlations are not errors; see
//! [`crate::evaluation::DegenerateReason`].

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("partition not found: {symbol} {date} under {}", root.display())]
    PartitionNotFound {
        symbol: String,
        date: NaiveDate,
        root: PathBuf,
    },

    #[error("schema error in {}: {message}", path.display())]
    Schema { path: PathBuf, message: String },

    #[error("insufficient buckets: {buckets} present, at least {required} needed to form a label")]
    InsufficientBuckets { buckets: usize, required: usize },

    #[error("ticks out of order: {current} follows {previous}")]
    UnorderedTicks {
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("NumPy write error: {0}")]
    Npy(#[from] ndarray_npy::WriteNpyError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn schema(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PipelineError::Schema {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Config(message.into())
    }

    /// True for errors that must stop the whole run rather than one partition.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, PipelineError::Config(_) | PipelineError::ThreadPool(_))
    }
}

/// Why a single partition failed, as recorded in the run output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    PartitionNotFound,
    SchemaError(String),
    InsufficientBuckets(usize),
    Io(String),
}

impl FailureReason {
    /// Short machine-readable tag, used as the `reason` column in outputs.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::PartitionNotFound => "PartitionNotFound",
            FailureReason::SchemaError(_) => "SchemaError",
            FailureReason::InsufficientBuckets(_) => "InsufficientBuckets",
            FailureReason::Io(_) => "Io",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            FailureReason::PartitionNotFound => String::new(),
            FailureReason::SchemaError(msg) | FailureReason::Io(msg) => msg.clone(),
            FailureReason::InsufficientBuckets(n) => format!("{n} buckets"),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::PartitionNotFound => write!(f, "PartitionNotFound"),
            other => write!(f, "{}: {}", other.kind(), other.detail()),
        }
    }
}

impl From<&PipelineError> for FailureReason {
    fn from(err: &PipelineError) -> Self {
        match err {
            PipelineError::PartitionNotFound { .. } => FailureReason::PartitionNotFound,
            PipelineError::Schema { .. }
            | PipelineError::UnorderedTicks { .. }
            | PipelineError::Csv(_) => FailureReason::SchemaError(err.to_string()),
            PipelineError::InsufficientBuckets { buckets, .. } => {
                FailureReason::InsufficientBuckets(*buckets)
            }
            other => FailureReason::Io(other.to_string()),
        }
    }
}
