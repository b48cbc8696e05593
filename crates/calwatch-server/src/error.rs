//! Server error types.

use std::io;
use thiserror::Error;

use calwatch_core::OffsetError;
use calwatch_providers::ProviderError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A subscription request was rejected before any provider call.
    #[error("invalid request: {0}")]
    Validation(#[from] OffsetError),

    /// A required request field was missing or empty.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The calendar provider failed (channel rejected, fetch failed, ...).
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// IO error (state file, listener).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The persisted state could not be encoded or decoded.
    #[error("state store error: {message}")]
    State { message: String },
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a state store error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by the caller's input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidRequest { .. })
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        Self::state(err.to_string())
    }
}
