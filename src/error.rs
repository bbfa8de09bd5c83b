//! Error types for binding components to the store.

use thiserror::Error;

/// Main error type for connector operations.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("No store handle found: pass one as the `store` prop, through the context, or initialize a default store")]
    NoStore,

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Invalid query for `{key}`: {reason}")]
    InvalidQuery { key: String, reason: String },

    #[error("Invalid lifecycle transition: {0}")]
    InvalidLifecycle(String),

    #[error("Write rejected: {0}")]
    Write(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ConnectError {
    pub(crate) fn invalid_query(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConnectError::InvalidQuery {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ConnectError {
    fn from(e: serde_json::Error) -> Self {
        ConnectError::Serialization(e.to_string())
    }
}

/// Result type for connector operations.
pub type Result<T> = std::result::Result<T, ConnectError>;
