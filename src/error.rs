//! Error types for the fsbatch engine.
//!
//! All operations return `Result<T>` which aliases `Result<T, EngineError>`.
//! Per-item failures during batch execution are *not* errors at this level;
//! they are captured in [`ItemResult`](crate::batch::ItemResult) so that one
//! locked file never aborts the remaining 99.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Request-level errors from the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Target path is on the protected deny-list. Policy denial, never
    /// overridden.
    #[error("Path is protected: {path} ({reason})")]
    ProtectedPath { path: PathBuf, reason: String },

    /// Malformed or oversized request.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Rollback target unknown, already rolled back, or expired.
    #[error("Operation '{0}' not found or expired")]
    OperationNotFound(Uuid),

    /// Confirmation was already confirmed, denied, or expired.
    #[error("Confirmation for operation '{0}' was already resolved")]
    AlreadyResolved(Uuid),

    /// Confirmation does not match the most recent pending request for
    /// this actor. Ambiguous or stale confirmations are rejected rather
    /// than guessed.
    #[error("Confirmation for operation '{0}' is stale: {1}")]
    StaleConfirmation(Uuid, String),

    /// Pending confirmation outlived its window and was discarded.
    #[error("Confirmation for operation '{0}' expired")]
    ConfirmationExpired(Uuid),

    /// Affirmative token did not match the required phrase.
    #[error("Confirmation token mismatch for operation '{0}'")]
    TokenMismatch(Uuid),

    /// Snapshot or audit persistence failed.
    #[error("Persistence error: {0}")]
    Persist(#[from] serde_json::Error),

    /// File system operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Unexpected error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Per-item failure classification.
///
/// Every failure mode a single batch item (or a single reversal attempt)
/// can hit. Closed set: matching on this is exhaustive, so adding a new
/// failure mode forces every reporting site to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpErrorKind {
    /// Source or destination is on the protected deny-list.
    ProtectedPath,
    /// Item descriptor is malformed (missing destination, empty path).
    Validation,
    /// Source path does not exist.
    NotFound,
    /// OS-level permission denial.
    Permission,
    /// Destination already occupied.
    AlreadyExists,
    /// Filesystem call did not complete in time.
    Timeout,
    /// Rollback precondition changed: the path was modified outside this
    /// system after we created it.
    PathModified,
    /// Batch was cancelled before this item started.
    Cancelled,
    /// Anything else the OS reported.
    Io,
}

impl OpErrorKind {
    /// Classifies an I/O error into the per-item taxonomy.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::PermissionDenied => Self::Permission,
            ErrorKind::AlreadyExists => Self::AlreadyExists,
            ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io,
        }
    }
}

impl std::fmt::Display for OpErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ProtectedPath => "PROTECTED_PATH",
            Self::Validation => "VALIDATION",
            Self::NotFound => "NOT_FOUND",
            Self::Permission => "PERMISSION",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Timeout => "TIMEOUT",
            Self::PathModified => "PATH_MODIFIED",
            Self::Cancelled => "CANCELLED",
            Self::Io => "IO",
        };
        f.write_str(s)
    }
}
