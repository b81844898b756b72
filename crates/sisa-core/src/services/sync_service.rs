//! Shared sync service used by front-ends.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::queue::new_entry;
use super::{ErrorLog, MirrorStore, SyncQueue};
use crate::db::{MirrorRepository, QueueRepository, SqliteMirrorRepository, SqliteQueueRepository, Store};
use crate::models::{EntityKind, MirrorRow, Mutation, QueueCounts};
use crate::remote::RemoteApi;
use crate::sync::{Reconciler, TableSyncState};
use crate::{Error, Result};

/// Per-table summary for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStatus {
    pub table: &'static str,
    pub rows: usize,
    pub queue: QueueCounts,
    pub last_pulled_at: Option<i64>,
    pub state: TableSyncState,
}

/// Offline-first facade: local writes land in the mirror and the queue in one
/// transaction, and the reconciler delivers them later.
pub struct SyncService<R> {
    store: Store,
    reconciler: Reconciler<R>,
}

impl<R: RemoteApi> SyncService<R> {
    /// Open the service over the store at `db_path`.
    ///
    /// A file that is not a database is moved aside and a fresh store created.
    /// Entries a previous process left mid-delivery are re-armed.
    pub async fn open_path(db_path: impl Into<PathBuf>, remote: R) -> Result<Self> {
        let db_path = db_path.into();
        let store = match Store::open(&db_path).await {
            Ok(store) => store,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local store at {} is unreadable: {error}. Moving it aside and starting fresh.",
                    db_path.display()
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Store::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        let service = Self::from_store(store, remote);
        service.reconciler.queue().recover_interrupted().await?;
        Ok(service)
    }

    /// Open an in-memory service (primarily for tests).
    pub fn open_in_memory(remote: R) -> Result<Self> {
        Ok(Self::from_store(Store::open_in_memory()?, remote))
    }

    pub fn from_store(store: Store, remote: R) -> Self {
        Self {
            reconciler: Reconciler::new(store.clone(), remote),
            store,
        }
    }

    /// Adjust the reconciler (timeouts, kinds) before use.
    #[must_use]
    pub fn map_reconciler(mut self, f: impl FnOnce(Reconciler<R>) -> Reconciler<R>) -> Self {
        self.reconciler = f(self.reconciler);
        self
    }

    pub const fn reconciler(&self) -> &Reconciler<R> {
        &self.reconciler
    }

    pub const fn mirror(&self) -> &MirrorStore {
        self.reconciler.mirror()
    }

    pub const fn queue(&self) -> &SyncQueue {
        self.reconciler.queue()
    }

    pub const fn errors(&self) -> &ErrorLog {
        self.reconciler.errors()
    }

    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base_name = db_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("sisa.db");
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local store from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };

        // WAL and shared-memory sidecars belong to the old file
        for suffix in ["-wal", "-shm", "-journal"] {
            let sidecar = parent.join(format!("{base_name}{suffix}"));
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
                tracing::warn!("Removed stale store file {}", sidecar.display());
            }
        }

        Ok(())
    }

    async fn logged<T>(&self, action: &str, kind: &EntityKind, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            if !matches!(error, Error::InvalidInput(_) | Error::NotFound(_)) {
                self.errors()
                    .log_message(format!("Failed to {action} {kind} record: {error}"))
                    .await;
            }
        }
        result
    }

    /// Create a row locally under a temporary id and queue its insert.
    pub async fn create_record(
        &self,
        kind: &'static EntityKind,
        row: MirrorRow,
    ) -> Result<MirrorRow> {
        let result = self
            .mirror()
            .with_table(kind, |tx| {
                let mirror = SqliteMirrorRepository::new(tx);
                let temp_id = mirror.next_temp_id(kind)?;
                let mutation = Mutation::Insert {
                    kind,
                    local_temp_id: temp_id,
                    row: MirrorRow {
                        id: None,
                        fields: row.fields.clone(),
                        version: None,
                    },
                };
                mutation.validate()?;

                let local = MirrorRow {
                    id: Some(temp_id),
                    ..row
                };
                mirror.insert(kind, &local)?;
                SqliteQueueRepository::new(tx).enqueue(new_entry(&mutation, None))?;
                mirror
                    .get(kind, temp_id)?
                    .ok_or_else(|| Error::NotFound(format!("{kind} row {temp_id}")))
            })
            .await;
        self.logged("create", kind, result).await
    }

    /// Patch a row locally and queue the update; returns the queue id.
    ///
    /// Versioned kinds expect the server to still hold the mirrored version.
    pub async fn update_record(
        &self,
        kind: &'static EntityKind,
        id: i64,
        patch: MirrorRow,
    ) -> Result<i64> {
        let result = self
            .mirror()
            .with_table(kind, |tx| {
                let mirror = SqliteMirrorRepository::new(tx);
                let current = mirror
                    .get(kind, id)?
                    .ok_or_else(|| Error::NotFound(format!("{kind} row {id}")))?;

                let mutation = Mutation::Update {
                    kind,
                    record_id: id,
                    if_match_version: kind.versioned.then(|| current.version.unwrap_or(1)),
                    patch,
                };
                mutation.validate()?;

                if let Mutation::Update { patch, .. } = &mutation {
                    mirror.update(kind, id, patch, None)?;
                }
                SqliteQueueRepository::new(tx).enqueue(new_entry(&mutation, None))
            })
            .await;
        self.logged("update", kind, result).await
    }

    /// Remove a row locally and queue its deletion; returns the queue id.
    pub async fn delete_record(&self, kind: &'static EntityKind, id: i64) -> Result<i64> {
        let result = self
            .mirror()
            .with_table(kind, |tx| {
                SqliteMirrorRepository::new(tx).delete(kind, id)?;
                let mutation = Mutation::Delete {
                    kind,
                    record_id: id,
                };
                SqliteQueueRepository::new(tx).enqueue(new_entry(&mutation, None))
            })
            .await;
        self.logged("delete", kind, result).await
    }

    /// Mirror size, queue depth and pull state for each configured kind.
    pub async fn status(&self) -> Vec<TableStatus> {
        let mut statuses = Vec::with_capacity(self.reconciler.kinds().len());
        for kind in self.reconciler.kinds() {
            statuses.push(TableStatus {
                table: kind.table,
                rows: self.mirror().count(kind).await,
                queue: self.queue().counts(Some(kind.table)).await,
                last_pulled_at: self.reconciler.last_pulled_at(kind).await,
                state: self.reconciler.state(kind),
            });
        }
        statuses
    }
}
