//! Ingestion error types.

use ferry_storage::StorageError;
use thiserror::Error;

/// Errors produced while ingesting an asset.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The request was rejected before any work was done.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("object not found: {0}")]
    NotFound(String),

    /// The server-side copy finished with a non-success status.
    #[error("copy of temporary file failed: {0}")]
    Store(String),

    /// The asset command was rejected by the host.
    #[error("asset command rejected: {0}")]
    Aggregate(String),

    #[error("upload cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[source] StorageError),
}

impl From<StorageError> for IngestError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => IngestError::NotFound(key),
            StorageError::AlreadyExists(key) => IngestError::AlreadyExists(key),
            StorageError::UnsupportedSource(source) => {
                IngestError::Validation(format!("asset URL is not supported: {source}"))
            }
            other => IngestError::Storage(other),
        }
    }
}

impl From<ferry_core::Error> for IngestError {
    fn from(err: ferry_core::Error) -> Self {
        match err {
            ferry_core::Error::InvalidSource(msg)
            | ferry_core::Error::InvalidId(msg)
            | ferry_core::Error::Config(msg) => IngestError::Validation(msg),
        }
    }
}

/// Result type for ingestion operations.
pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_conflicts_keep_their_meaning() {
        let err: IngestError = StorageError::AlreadyExists("scratch/1".to_string()).into();
        assert!(matches!(err, IngestError::AlreadyExists(k) if k == "scratch/1"));

        let err: IngestError = StorageError::NotFound("mem://a".to_string()).into();
        assert!(matches!(err, IngestError::NotFound(_)));

        let err: IngestError = StorageError::Io(std::io::Error::other("disk")).into();
        assert!(matches!(err, IngestError::Storage(_)));
    }

    #[test]
    fn test_source_errors_become_validation_messages() {
        let err: IngestError = ferry_core::SourceUri::parse("").unwrap_err().into();
        match err {
            IngestError::Validation(msg) => assert_eq!(msg, "asset URL missing"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
