//! Remote API error taxonomy

use std::time::Duration;

use thiserror::Error;

/// Failure talking to the remote API
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Credential rejected (401/403/419); the entry is retried after re-authentication
    #[error("Authentication required (HTTP {status})")]
    Auth { status: u16 },

    /// Optimistic-concurrency mismatch (409/412)
    #[error("version conflict: {message}")]
    Conflict { status: u16, message: String },

    /// Any other non-2xx business error
    #[error("{message}")]
    Rejected {
        status: u16,
        message: String,
        body: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;
