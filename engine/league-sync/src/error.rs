//! Error types for the league sync engine

use thiserror::Error;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// A single operation the applier could not write
#[derive(Debug, Clone, PartialEq)]
pub struct FailedOperation {
    pub id: String,
    pub cause: String,
}

#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing or invalid configuration. Fatal, never retried.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The external source could not be reached after all retry attempts
    #[error("Source unavailable after {attempts} attempt(s): {message}")]
    SourceUnavailable { attempts: u32, message: String },

    /// One fetched item could not be turned into a record
    #[error("Malformed payload at item {index}: {message}")]
    MalformedPayload { index: usize, message: String },

    /// Some operations of a changeset were written, others were not
    #[error("Partial apply failure: {} failed, {} applied ({})", .failed.len(), .applied, failed_ids(.failed))]
    PartialApplyFailure { failed: Vec<FailedOperation>, applied: usize },

    /// The store rejected a read or a write
    #[error("Store error: {0}")]
    Store(String),
}

fn failed_ids(failed: &[FailedOperation]) -> String {
    failed.iter().map(|f| f.id.as_str()).collect::<Vec<_>>().join(", ")
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::SourceUnavailable { attempts: 1, message: message.into() }
    }

    pub fn malformed(index: usize, message: impl Into<String>) -> Self {
        Self::MalformedPayload { index, message: message.into() }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Whether the failure only affects one item and the run may continue
    pub fn is_per_record(&self) -> bool {
        matches!(self, Self::MalformedPayload { .. })
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}
