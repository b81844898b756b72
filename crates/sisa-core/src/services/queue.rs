//! Durable write-ahead queue of local mutations.

use serde_json::Value;

use super::ErrorLog;
use crate::db::{NewQueueEntry, QueueRepository, SqliteQueueRepository, Store};
use crate::models::{Mutation, QueueCounts, QueueStatus, SyncQueueEntry};
use crate::Result;

/// Async facade over the `sync_queue` table.
///
/// Same degrade policy as the mirror: listings fall back to empty on store
/// failure, state changes return the error, and every failure is logged.
#[derive(Clone)]
pub struct SyncQueue {
    store: Store,
    errors: ErrorLog,
}

impl SyncQueue {
    pub const fn new(store: Store, errors: ErrorLog) -> Self {
        Self { store, errors }
    }

    async fn run<T>(
        &self,
        action: &str,
        f: impl FnOnce(&SqliteQueueRepository<'_>) -> Result<T>,
    ) -> Result<T> {
        let result = self
            .store
            .with_connection(|conn| f(&SqliteQueueRepository::new(conn)))
            .await;

        if let Err(error) = &result {
            self.errors
                .log_message(format!("Sync queue failed to {action}: {error}"))
                .await;
        }
        result
    }

    async fn read<T: Default>(
        &self,
        action: &str,
        f: impl FnOnce(&SqliteQueueRepository<'_>) -> Result<T>,
    ) -> T {
        self.run(action, f).await.unwrap_or_default()
    }

    /// Durably record a mutation. The payload is opaque to this layer.
    pub async fn enqueue(&self, entry: NewQueueEntry<'_>) -> Result<i64> {
        let table = entry.table_name.to_string();
        let op = entry.op;
        let id = self.run("enqueue", |repo| repo.enqueue(entry)).await?;
        tracing::debug!("Queued {op} on {table} as entry {id}");
        Ok(id)
    }

    /// Validate a typed mutation and queue it.
    pub async fn enqueue_mutation(
        &self,
        mutation: &Mutation,
        timestamp: Option<i64>,
    ) -> Result<i64> {
        mutation.validate()?;
        self.enqueue(new_entry(mutation, timestamp)).await
    }

    /// Every entry, oldest first.
    pub async fn list_all(&self) -> Vec<SyncQueueEntry> {
        self.read("list entries", |repo| repo.list_all())
            .await
    }

    pub async fn list_for_table(&self, table: &str) -> Vec<SyncQueueEntry> {
        self.read("list entries", |repo| repo.list_for_table(table))
            .await
    }

    pub async fn get(&self, id: i64) -> Option<SyncQueueEntry> {
        self.read("read entry", |repo| repo.get(id)).await
    }

    pub async fn set_status(
        &self,
        id: i64,
        status: QueueStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        self.run("update entry status", |repo| {
            repo.set_status(id, status, error)
        })
        .await
    }

    pub async fn remove(&self, id: i64) -> Result<bool> {
        self.run("remove entry", |repo| repo.remove(id)).await
    }

    /// Administrative reset. Never part of a drain.
    pub async fn clear(&self) -> Result<usize> {
        let removed = self.run("clear", |repo| repo.clear()).await?;
        tracing::info!("Cleared {removed} sync queue entries");
        Ok(removed)
    }

    pub async fn retry(&self, id: i64) -> Result<bool> {
        self.run("retry entry", |repo| repo.retry(id)).await
    }

    pub async fn retry_failed(&self, table: Option<&str>) -> Result<usize> {
        self.run("retry failed entries", |repo| repo.retry_failed(table))
            .await
    }

    /// Reset entries a killed process left in `syncing`.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let recovered = self
            .run("recover interrupted entries", |repo| repo.recover_interrupted())
            .await?;
        if recovered > 0 {
            tracing::info!("Recovered {recovered} interrupted sync queue entries");
        }
        Ok(recovered)
    }

    pub async fn set_payload(&self, id: i64, payload: &Value) -> Result<bool> {
        self.run("update entry payload", |repo| repo.set_payload(id, payload))
            .await
    }

    /// Tag an entry with the drain's batch id unless it was sent in an earlier batch.
    pub async fn assign_batch_id(&self, id: i64, batch_id: &str) -> Result<Option<String>> {
        self.run("assign batch id", |repo| repo.assign_batch_id(id, batch_id))
            .await
    }

    pub async fn counts(&self, table: Option<&str>) -> QueueCounts {
        self.read("count entries", |repo| repo.counts(table)).await
    }

    /// Tables with queued entries, in order of their oldest entry.
    pub async fn tables(&self) -> Vec<String> {
        self.read("list tables", |repo| repo.tables())
            .await
    }
}

/// Queue row for a typed mutation.
pub(crate) fn new_entry(mutation: &Mutation, timestamp: Option<i64>) -> NewQueueEntry<'static> {
    NewQueueEntry {
        table_name: mutation.kind().table,
        op: mutation.op(),
        payload: mutation.payload(),
        record_id: mutation.record_id(),
        local_temp_id: mutation.local_temp_id(),
        timestamp,
    }
}
