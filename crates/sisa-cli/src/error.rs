use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] sisa_core::Error),
    #[error(transparent)]
    Sync(#[from] sisa_core::SyncError),
    #[error(transparent)]
    Remote(#[from] sisa_core::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid field assignment '{0}', expected NAME=VALUE")]
    InvalidAssignment(String),
    #[error("Queue entry not found: {0}")]
    EntryNotFound(i64),
    #[error("Refusing to discard queued work without --yes")]
    ClearNotConfirmed,
    #[error(
        "Remote API is not configured. Run `sisa config set --api-url <URL>` or set SISA_API_URL."
    )]
    RemoteNotConfigured,
    #[error("Sync halted: the server rejected the credential. Update the API token and retry.")]
    AuthRequired,
}
