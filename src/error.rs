//! Error types for popcast
//!
//! Three classes matter to callers: bad input (fatal for the stage),
//! missing prerequisites (recoverable, "not trained"), and training
//! failures (propagated, never retried).

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// popcast error types
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed raw extract or clean table
    #[error("Input format error in {file} (line {line}, column {column}): {detail}")]
    InputFormat {
        /// Offending file or logical source name
        file: String,
        /// 1-based line number, 0 when not line-oriented
        line: usize,
        /// Column name
        column: String,
        /// What went wrong
        detail: String,
    },

    /// A required column is absent from a table
    #[error("Input format error in {file}: missing required column '{column}'")]
    MissingColumn {
        /// Offending file or logical source name
        file: String,
        /// Column name
        column: String,
    },

    /// Forecast or metrics requested before training produced artifacts
    #[error("model not trained: {0}")]
    NotTrained(String),

    /// Unknown model identifier or unsupported hyperparameter
    #[error("Configuration error: {0}")]
    Config(String),

    /// Estimator fit did not converge or produced non-finite values
    #[error("Optimizer failure: {0}")]
    Optimizer(String),

    /// Too few observations for the requested model order
    #[error("Insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData {
        /// Minimum number of observations
        required: usize,
        /// Observations supplied
        actual: usize,
    },

    /// Invalid input (caller error)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage error (Parquet/Arrow/artifact layout)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Build an input-format error for a given file/line/column.
    pub fn input_format(
        file: impl Into<String>,
        line: usize,
        column: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::InputFormat {
            file: file.into(),
            line,
            column: column.into(),
            detail: detail.into(),
        }
    }

    /// True for the recoverable "not trained" condition.
    #[must_use]
    pub const fn is_not_trained(&self) -> bool {
        matches!(self, Self::NotTrained(_))
    }

    /// True for errors caused by malformed input tables.
    #[must_use]
    pub const fn is_input_format(&self) -> bool {
        matches!(
            self,
            Self::InputFormat { .. } | Self::MissingColumn { .. } | Self::Csv(_)
        )
    }
}
