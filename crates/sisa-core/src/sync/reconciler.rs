//! Pull and drain against the remote API

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use rusqlite::Connection;
use serde_json::Value;

use super::{
    CatchUp, DrainReport, PullReport, PullStatus, SyncError, SyncReport, SyncResult, TableLocks,
    TableSyncState,
};
use crate::config::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::db::{
    generate_batch_id, MetaRepository, MirrorRepository, QueueRepository, ReplaceOutcome,
    SqliteMetaRepository, SqliteMirrorRepository, SqliteQueueRepository, Store,
};
use crate::models::{
    EntityKind, MirrorRow, QueueOp, QueueStatus, SyncQueueEntry, ALL_KINDS, PAYLOAD_IF_MATCH_KEY,
};
use crate::remote::{
    ChangeOp, History, HistoryChange, RemoteApi, RemoteError, RemoteResult, WriteAck,
    WriteRequest,
};
use crate::services::{ErrorLog, MirrorStore, SyncQueue};
use crate::util::unix_millis_now;

/// Confirmed remote effect of one queue entry
enum Delivery {
    Created(WriteAck),
    Updated(WriteAck),
    Deleted(WriteAck),
}

impl Delivery {
    const fn ack(&self) -> &WriteAck {
        match self {
            Self::Created(ack) | Self::Updated(ack) | Self::Deleted(ack) => ack,
        }
    }
}

/// Per-drain delivery tags shared by every table
struct DrainRun<'a> {
    halted: &'a AtomicBool,
    batch_id: String,
    since_history_id: Option<i64>,
}

/// Keeps the mirror consistent with the server.
///
/// Pulls, drains and conflict resolution of one table are serialized; distinct
/// tables proceed concurrently. Every remote call runs under a deadline, and
/// queue or mirror state changes only after a definitive response.
pub struct Reconciler<R> {
    remote: R,
    store: Store,
    mirror: MirrorStore,
    queue: SyncQueue,
    errors: ErrorLog,
    kinds: Vec<&'static EntityKind>,
    locks: TableLocks,
    states: Mutex<HashMap<&'static str, TableSyncState>>,
    /// Newest history attached to write acks, applied once the drain ends
    pending_history: Mutex<Option<History>>,
    request_timeout: Duration,
}

impl<R: RemoteApi> Reconciler<R> {
    pub fn new(store: Store, remote: R) -> Self {
        let errors = ErrorLog::new(store.clone());
        Self {
            remote,
            mirror: MirrorStore::new(store.clone(), errors.clone()),
            queue: SyncQueue::new(store.clone(), errors.clone()),
            errors,
            store,
            kinds: ALL_KINDS.to_vec(),
            locks: TableLocks::new(),
            states: Mutex::new(HashMap::new()),
            pending_history: Mutex::new(None),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Deadline applied to every remote call.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Restrict `pull_all` and `sync` to these kinds.
    #[must_use]
    pub fn with_kinds(mut self, kinds: &[&'static EntityKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    pub const fn mirror(&self) -> &MirrorStore {
        &self.mirror
    }

    pub const fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub const fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn kinds(&self) -> &[&'static EntityKind] {
        &self.kinds
    }

    pub fn state(&self, kind: &EntityKind) -> TableSyncState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind.table)
            .copied()
            .unwrap_or_default()
    }

    fn set_state(&self, kind: &'static EntityKind, state: TableSyncState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.table, state);
    }

    /// Unix ms of the last pull that replaced the table
    pub async fn last_pulled_at(&self, kind: &EntityKind) -> Option<i64> {
        self.store
            .with_connection(|conn| SqliteMetaRepository::new(conn).last_pulled_at(kind.table))
            .await
            .unwrap_or_else(|error| {
                tracing::error!("Failed to read last pull time of {kind}: {error}");
                None
            })
    }

    /// Newest server history id already reflected in the mirror
    pub async fn history_cursor(&self) -> Option<i64> {
        self.store
            .with_connection(|conn| SqliteMetaRepository::new(conn).history_cursor())
            .await
            .unwrap_or_else(|error| {
                tracing::error!("Failed to read history cursor: {error}");
                None
            })
    }

    async fn advance_history_cursor(&self, history_id: i64) -> SyncResult<()> {
        let moved = self
            .store
            .with_connection(|conn| {
                SqliteMetaRepository::new(conn).advance_history_cursor(history_id)
            })
            .await?;
        if moved {
            tracing::debug!("History cursor now at {history_id}");
        }
        Ok(())
    }

    async fn call<T>(&self, request: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        tokio::time::timeout(self.request_timeout, request)
            .await
            .unwrap_or(Err(RemoteError::Timeout(self.request_timeout)))
    }

    /// Replace the mirror for `kind` with the server's collection.
    ///
    /// Failures and empty lists leave the mirror untouched.
    pub async fn pull(&self, kind: &'static EntityKind) -> SyncResult<ReplaceOutcome> {
        self.pull_with_cursor(kind).await.map(|(outcome, _)| outcome)
    }

    /// Pull, also returning the history cursor the server listed the table at.
    async fn pull_with_cursor(
        &self,
        kind: &'static EntityKind,
    ) -> SyncResult<(ReplaceOutcome, Option<i64>)> {
        let _guard = self.locks.acquire(kind.table).await;
        self.pull_locked(kind).await
    }

    async fn pull_locked(
        &self,
        kind: &'static EntityKind,
    ) -> SyncResult<(ReplaceOutcome, Option<i64>)> {
        self.set_state(kind, TableSyncState::Pulling);
        let result = self.fetch_and_replace(kind).await;
        self.set_state(
            kind,
            if result.is_ok() {
                TableSyncState::Synced
            } else {
                TableSyncState::PullFailed
            },
        );
        result
    }

    async fn fetch_and_replace(
        &self,
        kind: &'static EntityKind,
    ) -> SyncResult<(ReplaceOutcome, Option<i64>)> {
        let page = match self.call(self.remote.list(kind)).await {
            Ok(page) => page,
            Err(error) => {
                if matches!(error, RemoteError::Auth { .. }) {
                    self.remote.invalidate_credentials().await;
                }
                self.errors
                    .log_message(format!("Failed to pull {kind}: {error}"))
                    .await;
                return Err(error.into());
            }
        };

        let cursor = page.history.and_then(|history| history.max_history_id);
        let mut rows = Vec::with_capacity(page.items.len());
        for item in &page.items {
            match MirrorRow::from_server(kind, item) {
                Ok(row) => rows.push(row),
                Err(error) => {
                    self.errors
                        .log_message(format!("Skipping malformed {kind} row: {error}"))
                        .await;
                }
            }
        }

        let outcome = self.mirror.replace_all(kind, &rows).await?;
        if let ReplaceOutcome::Replaced(count) = outcome {
            let now = unix_millis_now();
            self.store
                .with_connection(|conn| {
                    SqliteMetaRepository::new(conn).set_last_pulled_at(kind.table, now)
                })
                .await?;
            tracing::info!("Pulled {count} {kind} rows");
        }
        Ok((outcome, cursor))
    }

    /// Pull every configured kind concurrently.
    ///
    /// When every table pulls cleanly the history cursor moves to the oldest
    /// point the tables were listed at.
    pub async fn pull_all(&self) -> Vec<PullReport> {
        let kinds = self.kinds.clone();
        let (reports, cursor) = self.pull_kinds(&kinds).await;
        if let Some(cursor) = cursor {
            if let Err(error) = self.advance_history_cursor(cursor).await {
                self.errors
                    .log_message(format!("Failed to store history cursor: {error}"))
                    .await;
            }
        }
        reports
    }

    async fn pull_kinds(&self, kinds: &[&'static EntityKind]) -> (Vec<PullReport>, Option<i64>) {
        let results = join_all(kinds.iter().map(|kind| self.pull_with_cursor(*kind))).await;

        let mut cursor = (!kinds.is_empty()).then_some(i64::MAX);
        let mut reports = Vec::with_capacity(kinds.len());
        for (kind, result) in kinds.iter().zip(results) {
            let status = match result {
                Ok((outcome, listed_at)) => {
                    cursor = cursor.zip(listed_at).map(|(oldest, at)| oldest.min(at));
                    outcome.into()
                }
                Err(error) => {
                    cursor = None;
                    PullStatus::Failed {
                        error: error.to_string(),
                    }
                }
            };
            reports.push(PullReport {
                table: kind.table,
                status,
            });
        }
        (reports, cursor)
    }

    /// Deliver queued mutations, each table in FIFO order, tables concurrently.
    ///
    /// Entries first sent in this drain share one batch id. History the server
    /// attaches to acknowledgements is applied once every table has finished.
    pub async fn drain(&self) -> DrainReport {
        let halted = AtomicBool::new(false);
        let run = self.drain_run(&halted).await;
        let tables = self.queue.tables().await;
        let results = join_all(tables.iter().map(|table| self.drain_named(table, &run))).await;
        self.flush_history().await;

        let mut report = DrainReport::default();
        for (table, result) in tables.iter().zip(results) {
            match result {
                Ok(table_report) => report.merge(table_report),
                Err(error) => {
                    self.errors
                        .log_message(format!("Drain of {table} aborted: {error}"))
                        .await;
                    report.block(table);
                }
            }
        }
        report.auth_required |= halted.load(Ordering::SeqCst);
        report
    }

    /// Deliver the queued mutations of a single table.
    pub async fn drain_table(&self, kind: &'static EntityKind) -> SyncResult<DrainReport> {
        let halted = AtomicBool::new(false);
        let run = self.drain_run(&halted).await;
        let result = self.drain_named(kind.table, &run).await;
        self.flush_history().await;
        result
    }

    async fn drain_run<'a>(&self, halted: &'a AtomicBool) -> DrainRun<'a> {
        DrainRun {
            halted,
            batch_id: generate_batch_id(),
            since_history_id: self.history_cursor().await,
        }
    }

    async fn drain_named(&self, table: &str, run: &DrainRun<'_>) -> SyncResult<DrainReport> {
        let _guard = self.locks.acquire(table).await;
        let halted = run.halted;
        let mut report = DrainReport::default();

        let ids: Vec<i64> = self
            .queue
            .list_for_table(table)
            .await
            .iter()
            .map(|entry| entry.id)
            .collect();

        for id in ids {
            if halted.load(Ordering::SeqCst) {
                report.auth_required = true;
                break;
            }
            // Re-read: an earlier insert may have bound this entry to a server id
            let Some(entry) = self.queue.get(id).await else {
                continue;
            };

            match entry.status {
                QueueStatus::Done => {
                    self.queue.remove(entry.id).await?;
                    continue;
                }
                QueueStatus::Failed => {
                    // Later entries may depend on this one
                    report.block(table);
                    break;
                }
                QueueStatus::Pending | QueueStatus::Syncing => {}
            }

            let kind = match EntityKind::lookup(table) {
                Ok(kind) => kind,
                Err(error) => {
                    self.fail(&entry, &error.to_string()).await?;
                    report.failed += 1;
                    report.block(table);
                    break;
                }
            };

            if entry.op != QueueOp::Insert && entry.record_id.is_none() {
                let message = format!(
                    "{kind} row {} has no server id yet",
                    entry.local_temp_id.unwrap_or_default()
                );
                self.fail(&entry, &message).await?;
                report.failed += 1;
                report.block(table);
                break;
            }

            let batch_id = self
                .queue
                .assign_batch_id(entry.id, &run.batch_id)
                .await?
                .unwrap_or_else(|| run.batch_id.clone());
            self.queue
                .set_status(entry.id, QueueStatus::Syncing, None)
                .await?;

            match self
                .deliver(kind, &entry, &batch_id, run.since_history_id)
                .await
            {
                Ok(delivery) => {
                    self.apply(kind, &entry, &delivery).await?;
                    if run.since_history_id.is_some() {
                        self.remember_history(delivery.ack().history.as_ref());
                    }
                    report.applied += 1;
                }
                Err(RemoteError::Auth { status }) => {
                    self.queue
                        .set_status(entry.id, QueueStatus::Pending, None)
                        .await?;
                    if !halted.swap(true, Ordering::SeqCst) {
                        self.remote.invalidate_credentials().await;
                        self.errors
                            .log_message(format!(
                                "Authentication rejected (HTTP {status}) while syncing {table}; drain halted"
                            ))
                            .await;
                    }
                    report.auth_required = true;
                    break;
                }
                Err(error) => {
                    let message = match &error {
                        RemoteError::Rejected { message, body, .. } => {
                            self.errors
                                .log_with_detail(
                                    format!(
                                        "Server rejected {} on {table} (entry {}): {message}",
                                        entry.op, entry.id
                                    ),
                                    body,
                                )
                                .await;
                            message.clone()
                        }
                        other => {
                            self.errors
                                .log_message(format!(
                                    "Failed to sync {} on {table} (entry {}): {other}",
                                    entry.op, entry.id
                                ))
                                .await;
                            other.to_string()
                        }
                    };
                    self.queue
                        .set_status(entry.id, QueueStatus::Failed, Some(&message))
                        .await?;
                    report.failed += 1;
                    report.block(table);
                    break;
                }
            }
        }

        Ok(report)
    }

    async fn fail(&self, entry: &SyncQueueEntry, message: &str) -> SyncResult<()> {
        self.errors
            .log_message(format!(
                "Cannot sync {} on {} (entry {}): {message}",
                entry.op, entry.table_name, entry.id
            ))
            .await;
        self.queue
            .set_status(entry.id, QueueStatus::Failed, Some(message))
            .await?;
        Ok(())
    }

    async fn deliver(
        &self,
        kind: &'static EntityKind,
        entry: &SyncQueueEntry,
        batch_id: &str,
        since_history_id: Option<i64>,
    ) -> RemoteResult<Delivery> {
        let body = entry.body();
        let request = WriteRequest {
            request_id: &entry.request_id,
            nonce: &entry.nonce,
            body: &body,
            if_match_version: entry.if_match_version(),
            batch_id: Some(batch_id),
            since_history_id,
        };
        let record_id = entry.record_id.unwrap_or_default();

        match entry.op {
            QueueOp::Insert => self
                .call(self.remote.create(kind, request))
                .await
                .map(Delivery::Created),
            QueueOp::Update => self
                .call(self.remote.update(kind, record_id, request))
                .await
                .map(Delivery::Updated),
            QueueOp::Delete => self
                .call(self.remote.delete(kind, record_id, request))
                .await
                .map(Delivery::Deleted),
        }
    }

    /// Reconcile the mirror with a confirmed write and drop the entry, atomically.
    async fn apply(
        &self,
        kind: &'static EntityKind,
        entry: &SyncQueueEntry,
        delivery: &Delivery,
    ) -> SyncResult<()> {
        if let (Delivery::Created(WriteAck { id: None, .. }), Some(temp_id)) =
            (delivery, entry.local_temp_id)
        {
            tracing::warn!("Server did not return an id for {kind} row {temp_id}");
        }

        self.mirror
            .with_table(kind, |tx| {
                let mirror = SqliteMirrorRepository::new(tx);
                let queue = SqliteQueueRepository::new(tx);

                match delivery {
                    Delivery::Created(ack) => {
                        if let (Some(server_id), Some(temp_id)) = (ack.id, entry.local_temp_id) {
                            // A row deleted locally in the meantime stays deleted
                            if let Some(mut row) = mirror.get(kind, temp_id)? {
                                mirror.delete(kind, temp_id)?;
                                row.id = Some(server_id);
                                row.version = ack.version.or(row.version);
                                mirror.upsert(kind, &row)?;
                            }
                            queue.rebind_record(kind.table, temp_id, server_id)?;
                        }
                    }
                    Delivery::Updated(ack) => {
                        if let Some(id) = entry.record_id {
                            mirror.update(kind, id, &MirrorRow::new(), ack.version)?;
                        }
                    }
                    Delivery::Deleted(_) => {
                        if let Some(id) = entry.record_id {
                            mirror.delete(kind, id)?;
                        }
                    }
                }

                queue.remove(entry.id)?;
                Ok(())
            })
            .await?;

        tracing::debug!("Synced {} on {kind} (entry {})", entry.op, entry.id);
        Ok(())
    }

    fn remember_history(&self, history: Option<&History>) {
        let Some(history) = history else {
            return;
        };
        let mut pending = self
            .pending_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *pending = Some(match pending.take() {
            Some(current) => current.newest(history.clone()),
            None => history.clone(),
        });
    }

    async fn flush_history(&self) {
        let pending = self
            .pending_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(history) = pending {
            if let Err(error) = self.apply_history(&history).await {
                self.errors
                    .log_message(format!("Failed to apply server history: {error}"))
                    .await;
            }
        }
    }

    /// Apply server history deltas to the mirror and advance the cursor.
    ///
    /// Rows still targeted by a queued entry keep their local state; entities
    /// outside the configured kinds are ignored.
    pub async fn apply_history(&self, history: &History) -> SyncResult<usize> {
        let mut applied = 0;
        for kind in self.kinds.iter().copied() {
            let changes: Vec<&HistoryChange> = history
                .changes
                .iter()
                .filter(|change| change.entity.eq_ignore_ascii_case(kind.table))
                .collect();
            if changes.is_empty() {
                continue;
            }

            let _guard = self.locks.acquire(kind.table).await;
            applied += self
                .mirror
                .with_table(kind, |tx| apply_changes(tx, kind, &changes))
                .await?;
        }

        let ignored = history
            .changes
            .iter()
            .filter(|change| {
                !self
                    .kinds
                    .iter()
                    .any(|kind| change.entity.eq_ignore_ascii_case(kind.table))
            })
            .count();
        if ignored > 0 {
            tracing::debug!("Ignored {ignored} history changes for unmirrored entities");
        }

        if let Some(history_id) = history.max_history_id {
            self.advance_history_cursor(history_id).await?;
        }
        if applied > 0 {
            tracing::info!("Applied {applied} server history changes");
        }
        Ok(applied)
    }

    /// Bring the mirror up to date from the history cursor.
    ///
    /// Without a stored cursor, or when the history request fails for any
    /// reason other than authentication, every table is pulled instead.
    pub async fn catch_up(&self) -> SyncResult<CatchUp> {
        let Some(since) = self.history_cursor().await else {
            tracing::info!("No history cursor yet; pulling every table");
            return Ok(CatchUp::FullPull {
                pulls: self.pull_all().await,
            });
        };

        let batch_id = generate_batch_id();
        let history = match self.call(self.remote.history(since, &batch_id)).await {
            Ok(history) => history,
            Err(error @ RemoteError::Auth { .. }) => {
                self.remote.invalidate_credentials().await;
                self.errors
                    .log_message(format!("Failed to fetch server history: {error}"))
                    .await;
                return Err(error.into());
            }
            Err(error) => {
                self.errors
                    .log_message(format!(
                        "Incremental sync failed, pulling every table: {error}"
                    ))
                    .await;
                return Ok(CatchUp::FullPull {
                    pulls: self.pull_all().await,
                });
            }
        };

        let applied = self.apply_history(&history).await?;
        Ok(CatchUp::Incremental {
            applied,
            cursor: self.history_cursor().await,
        })
    }

    /// Drain, then pull every configured table whose queue is now empty.
    pub async fn sync(&self) -> SyncReport {
        let drain = self.drain().await;
        if drain.auth_required {
            return SyncReport {
                drain,
                pulls: Vec::new(),
            };
        }

        let mut idle = Vec::new();
        for kind in &self.kinds {
            if self.queue.counts(Some(kind.table)).await.total() == 0 {
                idle.push(*kind);
            }
        }
        let (pulls, _) = self.pull_kinds(&idle).await;

        SyncReport { drain, pulls }
    }

    /// Re-arm a failed entry after refreshing its table from the server.
    ///
    /// Updates of versioned kinds take the freshly pulled version as their
    /// expected version.
    pub async fn resolve_conflict(&self, entry_id: i64) -> SyncResult<SyncQueueEntry> {
        let entry = self
            .queue
            .get(entry_id)
            .await
            .ok_or(SyncError::EntryNotFound(entry_id))?;
        if entry.status != QueueStatus::Failed {
            return Err(SyncError::NotFailed {
                id: entry.id,
                status: entry.status,
            });
        }
        let kind = EntityKind::lookup(&entry.table_name)?;

        let _guard = self.locks.acquire(kind.table).await;
        self.pull_locked(kind).await?;

        if let (QueueOp::Update, true, Some(id)) = (entry.op, kind.versioned, entry.record_id) {
            let current = self.mirror.get(kind, id).await.and_then(|row| row.version);
            let mut payload = entry.payload.clone();
            if let (Some(version), Some(object)) = (current, payload.as_object_mut()) {
                object.insert(PAYLOAD_IF_MATCH_KEY.to_string(), Value::from(version));
                self.queue.set_payload(entry.id, &payload).await?;
            }
        }
        self.queue.retry(entry.id).await?;
        tracing::info!("Re-armed {} on {kind} (entry {entry_id})", entry.op);

        self.queue
            .get(entry_id)
            .await
            .ok_or(SyncError::EntryNotFound(entry_id))
    }
}

fn apply_changes(
    conn: &Connection,
    kind: &'static EntityKind,
    changes: &[&HistoryChange],
) -> crate::Result<usize> {
    let mirror = SqliteMirrorRepository::new(conn);
    let queued: HashSet<i64> = SqliteQueueRepository::new(conn)
        .list_for_table(kind.table)?
        .iter()
        .filter_map(|entry| entry.record_id)
        .collect();

    let mut applied = 0;
    for change in changes {
        if queued.contains(&change.remote_id) {
            tracing::debug!(
                "Kept local {kind} row {} over its server {}",
                change.remote_id,
                change.op.as_str()
            );
            continue;
        }

        match change.op {
            ChangeOp::Delete => {
                mirror.delete(kind, change.remote_id)?;
            }
            ChangeOp::Create | ChangeOp::Update => {
                let row = match MirrorRow::from_server(kind, &change.server_row()) {
                    Ok(row) => row,
                    Err(error) => {
                        tracing::warn!("Skipping {kind} history change: {error}");
                        continue;
                    }
                };
                if change.op == ChangeOp::Create || mirror.get(kind, change.remote_id)?.is_none() {
                    mirror.upsert(kind, &row)?;
                } else {
                    let patch = MirrorRow {
                        id: None,
                        fields: row.fields,
                        version: None,
                    };
                    mirror.update(kind, change.remote_id, &patch, change.version)?;
                }
            }
        }
        applied += 1;
    }
    Ok(applied)
}
