//! Local mirror of server-owned entity collections.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::{Connection, Transaction};

use super::ErrorLog;
use crate::db::{MirrorRepository, ReplaceOutcome, SqliteMirrorRepository, Store};
use crate::models::{EntityKind, MirrorRow};
use crate::Result;

/// Async facade over the mirror tables.
///
/// Tables are created lazily on first access per kind. Reads degrade to empty
/// results on store failure; writes return the error. Every failure is also
/// recorded in the [`ErrorLog`].
#[derive(Clone)]
pub struct MirrorStore {
    store: Store,
    errors: ErrorLog,
    ready: Arc<Mutex<HashSet<&'static str>>>,
}

impl MirrorStore {
    pub fn new(store: Store, errors: ErrorLog) -> Self {
        Self {
            store,
            errors,
            ready: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn ensure_table(&self, conn: &Connection, kind: &'static EntityKind) -> Result<()> {
        let mut ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        if !ready.contains(kind.table) {
            SqliteMirrorRepository::new(conn).create_table(kind)?;
            ready.insert(kind.table);
        }
        Ok(())
    }

    /// Run `f` in one transaction after making sure the table for `kind` exists.
    ///
    /// The transaction commits only when `f` succeeds.
    pub(crate) async fn with_table<T>(
        &self,
        kind: &'static EntityKind,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        self.store
            .with_connection(|conn| {
                self.ensure_table(conn, kind)?;
                let tx = conn.transaction()?;
                let value = f(&tx)?;
                tx.commit()?;
                Ok(value)
            })
            .await
    }

    async fn write<T>(
        &self,
        kind: &'static EntityKind,
        action: &str,
        f: impl FnOnce(&SqliteMirrorRepository<'_>) -> Result<T>,
    ) -> Result<T> {
        let result = self
            .store
            .with_connection(|conn| {
                self.ensure_table(conn, kind)?;
                f(&SqliteMirrorRepository::new(conn))
            })
            .await;

        if let Err(error) = &result {
            self.errors
                .log_message(format!("Failed to {action} {kind}: {error}"))
                .await;
        }
        result
    }

    async fn read<T: Default>(
        &self,
        kind: &'static EntityKind,
        f: impl FnOnce(&SqliteMirrorRepository<'_>) -> Result<T>,
    ) -> T {
        self.write(kind, "read", f).await.unwrap_or_default()
    }

    /// Create the table for `kind` and add any missing columns.
    pub async fn create_table(&self, kind: &'static EntityKind) -> Result<()> {
        self.write(kind, "create table for", |_| Ok(())).await
    }

    /// Insert a row; a supplied id is preserved.
    pub async fn insert(&self, kind: &'static EntityKind, row: &MirrorRow) -> Result<i64> {
        self.write(kind, "insert into", |repo| repo.insert(kind, row))
            .await
    }

    pub async fn upsert(&self, kind: &'static EntityKind, row: &MirrorRow) -> Result<i64> {
        self.write(kind, "upsert into", |repo| repo.upsert(kind, row))
            .await
    }

    /// Patch fields in place; `version: None` keeps the stored version.
    pub async fn update(
        &self,
        kind: &'static EntityKind,
        id: i64,
        patch: &MirrorRow,
        version: Option<i64>,
    ) -> Result<usize> {
        self.write(kind, "update", |repo| repo.update(kind, id, patch, version))
            .await
    }

    pub async fn delete(&self, kind: &'static EntityKind, id: i64) -> Result<usize> {
        self.write(kind, "delete from", |repo| repo.delete(kind, id))
            .await
    }

    /// Replace the table with a server snapshot.
    ///
    /// An empty snapshot is suspicious: it is logged and the table kept.
    pub async fn replace_all(
        &self,
        kind: &'static EntityKind,
        rows: &[MirrorRow],
    ) -> Result<ReplaceOutcome> {
        let outcome = self
            .write(kind, "replace", |repo| repo.replace_all(kind, rows))
            .await?;

        match outcome {
            ReplaceOutcome::KeptExisting => {
                self.errors
                    .log_message(format!("Server returned empty {kind} list"))
                    .await;
            }
            ReplaceOutcome::Replaced(count) => {
                tracing::debug!("Replaced {kind} mirror with {count} rows");
            }
        }
        Ok(outcome)
    }

    pub async fn get(&self, kind: &'static EntityKind, id: i64) -> Option<MirrorRow> {
        self.read(kind, |repo| repo.get(kind, id)).await
    }

    pub async fn get_all(&self, kind: &'static EntityKind) -> Vec<MirrorRow> {
        self.read(kind, |repo| repo.get_all(kind)).await
    }

    pub async fn count(&self, kind: &'static EntityKind) -> usize {
        self.read(kind, |repo| repo.count(kind)).await
    }

    /// Next free negative id for a row the server has not seen yet.
    pub async fn next_temp_id(&self, kind: &'static EntityKind) -> Result<i64> {
        self.write(kind, "allocate temp id in", |repo| repo.next_temp_id(kind))
            .await
    }
}
