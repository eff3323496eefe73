use std::path::PathBuf;
use telemon_common::types::{MetricError, MetricKind};

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use telemon_common::types::MetricKind;
/// use telemon_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     kind: MetricKind::Gauge,
///     id: "Alloc".to_string(),
/// };
/// assert!(err.to_string().contains("Alloc"));
/// assert!(err.is_not_found());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No series with this id exists for the kind. Both backends report
    /// absence this way; the HTTP layer maps it to 404.
    #[error("Storage: {kind} '{id}' not found")]
    NotFound { kind: MetricKind, id: String },

    /// The metric failed validation before reaching the backend.
    #[error("Storage: invalid metric: {0}")]
    InvalidMetric(#[from] MetricError),

    /// Adding the delta would overflow the accumulated counter.
    #[error("Storage: counter '{id}' overflow")]
    CounterOverflow { id: String },

    /// An underlying database error.
    #[error("Storage: database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Connection-class database errors persisted through every retry.
    #[error("Storage: database unavailable after {attempts} attempts: {source}")]
    Unavailable {
        attempts: usize,
        source: sea_orm::DbErr,
    },

    /// Reading or writing a snapshot file failed.
    #[error("Storage: snapshot I/O on {path}: {source}")]
    SnapshotIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The snapshot file is not a valid list of metric records.
    #[error("Storage: malformed snapshot: {0}")]
    SnapshotFormat(#[from] serde_json::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
