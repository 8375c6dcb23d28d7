//! Error types for chat operations

use thiserror::Error;

/// Errors that can occur in chat operations
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChatError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn remote(reason: impl Into<String>) -> Self {
        Self::RemoteUnavailable(reason.into())
    }

    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
