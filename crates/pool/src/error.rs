//! Pool error types.

use std::sync::Arc;
use thiserror::Error;

/// Error produced by a resource factory or eviction callback.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Pool operation errors.
///
/// Cloneable so that one factory failure can be handed to every caller
/// that waited on the same construction.
#[derive(Clone, Debug, Error)]
pub enum PoolError {
    #[error("resource creation failed: {0}")]
    Create(Arc<dyn std::error::Error + Send + Sync>),

    #[error("resource creation task aborted: {0}")]
    Aborted(String),

    #[error("pool is shut down")]
    Closed,
}

impl PoolError {
    pub(crate) fn create(err: BoxError) -> Self {
        PoolError::Create(Arc::from(err))
    }
}

/// Result type for pool operations.
pub type PoolResult<T> = std::result::Result<T, PoolError>;
