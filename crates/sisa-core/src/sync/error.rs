//! Reconciliation errors

use thiserror::Error;

use crate::models::QueueStatus;
use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] crate::Error),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Queue entry {0} not found")]
    EntryNotFound(i64),

    #[error("Queue entry {id} is {status}; only failed entries can be resolved")]
    NotFailed { id: i64, status: QueueStatus },
}

pub type SyncResult<T> = Result<T, SyncError>;
