//! Async services over the shared store handle.

mod error_log;
mod mirror;
mod queue;
mod sync_service;

pub use error_log::ErrorLog;
pub use mirror::MirrorStore;
pub use queue::SyncQueue;
pub use sync_service::{SyncService, TableStatus};
