// ⚠️ Error taxonomy for the rebate maintenance engine
//
// Per-record problems (validation, constraint violations) are recovered
// locally and counted. Store-level problems are fatal to the current run and
// carry enough context to restart safely.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RebateError>;

#[derive(Debug, Error)]
pub enum RebateError {
    /// A required field is absent on an ingested record
    #[error("validation failed for {record}: {reason}")]
    Validation { record: String, reason: String },

    /// A proposed write would break non-overlap or code uniqueness
    #[error("constraint violation on {record}: {reason}")]
    ConstraintViolation { record: String, reason: String },

    /// A chunked commit failed; earlier chunks stay committed
    #[error(
        "chunk {chunk_index} ({chunk_len} rows) failed after {committed_chunks} committed chunks \
         ({committed_rows} rows): {source}"
    )]
    PartialCommit {
        chunk_index: usize,
        chunk_len: usize,
        committed_chunks: usize,
        committed_rows: usize,
        #[source]
        source: Box<RebateError>,
    },

    /// Conflict deletion removed a different number of rows than requested
    #[error("requested deletion of {requested} rebates but {deleted} were removed")]
    ResolutionMismatch { requested: usize, deleted: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RebateError {
    pub fn validation(record: impl Into<String>, reason: impl Into<String>) -> Self {
        RebateError::Validation {
            record: record.into(),
            reason: reason.into(),
        }
    }

    pub fn constraint(record: impl Into<String>, reason: impl Into<String>) -> Self {
        RebateError::ConstraintViolation {
            record: record.into(),
            reason: reason.into(),
        }
    }

    /// Per-record errors are skipped and counted instead of aborting a run
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RebateError::Validation { .. } | RebateError::ConstraintViolation { .. }
        )
    }
}
