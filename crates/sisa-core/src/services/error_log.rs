//! Best-effort diagnostic sink shared by every component.

use crate::db::{ErrorLogRepository, SqliteErrorLogRepository, Store};
use crate::models::ErrorLogEntry;
use crate::util::{rfc3339_now, source_chain};

/// Append-only diagnostic log.
///
/// Writing never fails: a store failure is reported through `tracing` and
/// otherwise swallowed, so this is safe to call from any failure path.
#[derive(Clone)]
pub struct ErrorLog {
    store: Store,
}

impl ErrorLog {
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record a plain message.
    pub async fn log_message(&self, message: impl AsRef<str>) {
        self.append(message.as_ref(), "").await;
    }

    /// Record an error with its source chain as the stack.
    pub async fn log_error(&self, error: &(dyn std::error::Error + 'static)) {
        self.append(&error.to_string(), &source_chain(error)).await;
    }

    /// Record a message with an explicit diagnostic body.
    pub async fn log_with_detail(&self, message: impl AsRef<str>, detail: impl AsRef<str>) {
        self.append(message.as_ref(), detail.as_ref()).await;
    }

    async fn append(&self, message: &str, stack: &str) {
        tracing::warn!("{message}");

        let timestamp = rfc3339_now();
        let result = self
            .store
            .with_connection(|conn| {
                SqliteErrorLogRepository::new(conn).append(message, stack, &timestamp)
            })
            .await;

        if let Err(error) = result {
            tracing::error!("Failed to write error log entry: {error}");
        }
    }

    /// Most recent entries first. Empty when the store is unavailable.
    pub async fn list(&self, limit: usize) -> Vec<ErrorLogEntry> {
        self.store
            .with_connection(|conn| SqliteErrorLogRepository::new(conn).list(limit))
            .await
            .unwrap_or_else(|error| {
                tracing::error!("Failed to read error log: {error}");
                Vec::new()
            })
    }

    pub async fn count(&self) -> usize {
        self.store
            .with_connection(|conn| SqliteErrorLogRepository::new(conn).count())
            .await
            .unwrap_or_else(|error| {
                tracing::error!("Failed to count error log: {error}");
                0
            })
    }

    /// Delete every entry; returns how many were removed.
    pub async fn clear(&self) -> usize {
        self.store
            .with_connection(|conn| SqliteErrorLogRepository::new(conn).clear())
            .await
            .unwrap_or_else(|error| {
                tracing::error!("Failed to clear error log: {error}");
                0
            })
    }
}
