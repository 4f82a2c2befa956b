//! Error types for checkpoint operations

use crate::checkpoint::StepIndex;
use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while reading or writing checkpoints
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint exists at the requested position
    #[error("Checkpoint not found: thread '{thread_id}' step {step}")]
    NotFound { thread_id: String, step: StepIndex },

    /// Fork target already has history
    #[error("Thread '{0}' already has checkpoints")]
    ThreadExists(String),

    /// Another writer extended the thread after the caller read it
    #[error("Conflicting append to thread '{thread_id}': expected latest step {expected:?}, found {actual:?}")]
    Conflict {
        thread_id: String,
        expected: Option<StepIndex>,
        actual: Option<StepIndex>,
    },

    /// Backing storage failed or is unavailable
    #[error("Storage error: {0}")]
    Storage(String),

    /// Stored snapshot could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite driver error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failure while preparing the SQLite schema
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored record violates an invariant (bad timestamp, negative step, ...)
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),
}

impl CheckpointError {
    pub fn not_found(thread_id: impl Into<String>, step: StepIndex) -> Self {
        Self::NotFound {
            thread_id: thread_id.into(),
            step,
        }
    }

    pub fn conflict(
        thread_id: impl Into<String>,
        expected: Option<StepIndex>,
        actual: Option<StepIndex>,
    ) -> Self {
        Self::Conflict {
            thread_id: thread_id.into(),
            expected,
            actual,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// True for lookups that simply missed, as opposed to backend failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
