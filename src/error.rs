//! Typed error kinds for the sort engine.
//!
//! Library functions return `Result<T, SortError>` rather than `anyhow::Error` so
//! callers (and tests) can match on the failure kind; the binary still reports
//! failures via `log::error!` plus a non-zero exit.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SortError {
    /// OS-level failure during open/read/write/seek/rename/unlink.
    #[error("io error during {operation}{}: {source}", path.as_ref().map(|p| format!(", path: {}", p.display())).unwrap_or_default())]
    IoError {
        operation: String,
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    /// A record header or payload was cut short by EOF.
    #[error("truncated record while reading {context}")]
    Truncated { context: String },

    /// A record declares a length larger than the configured memory budget allows.
    #[error("record length {declared} exceeds memory budget {budget}")]
    LengthExceedsBudget { declared: usize, budget: usize },

    /// Internal: a run is not sorted, a chunk doesn't end on a record boundary, or
    /// a merge observed a non-monotonic output. Always a bug.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Invalid worker count, memory budget, or temporary directory.
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl SortError {
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> SortError {
        SortError::IoError {
            operation: operation.into(),
            path: None,
            source,
        }
    }

    pub fn io_at(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> SortError {
        SortError::IoError {
            operation: operation.into(),
            path: Some(path.into()),
            source,
        }
    }
}
