//! Relay error types.

use ferry_pool::PoolError;
use std::fmt;
use thiserror::Error;

/// A validation failure tied to one action field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn describe(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid topic action: {}", describe(.0))]
    Validation(Vec<FieldError>),

    #[error("failed to format event: {0}")]
    Format(String),

    #[error("failed to connect to {hostname}: {message}")]
    Connect { hostname: String, message: String },

    #[error("credential unavailable: {0}")]
    Credential(String),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to send message: {0}")]
    Send(String),

    #[error("failed to close client: {0}")]
    Close(String),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Result type for relay operations.
pub type RelayResult<T> = std::result::Result<T, RelayError>;
