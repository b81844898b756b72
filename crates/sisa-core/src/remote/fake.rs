//! In-memory remote used by protocol tests

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{json, Value};

use super::{
    ChangeOp, History, HistoryChange, ListPage, RemoteApi, RemoteError, RemoteResult, WriteAck,
    WriteRequest,
};
use crate::models::EntityKind;

/// Failure key for `history` calls
pub const HISTORY_KEY: &str = "history";

#[derive(Default)]
struct State {
    tables: HashMap<String, BTreeMap<i64, Value>>,
    next_id: i64,
    acks: HashMap<String, WriteAck>,
    failures: HashMap<String, VecDeque<RemoteError>>,
    delay: Option<Duration>,
    writes: usize,
    invalidated: bool,
    history: Vec<(i64, HistoryChange)>,
    batches: Vec<Option<String>>,
}

impl State {
    fn record(&mut self, table: &str, op: ChangeOp, remote_id: i64) {
        let row = self
            .tables
            .get(table)
            .and_then(|rows| rows.get(&remote_id))
            .cloned();
        let version = row.as_ref().and_then(|row| row["version"].as_i64());
        let mut data = row
            .and_then(|row| row.as_object().cloned())
            .unwrap_or_default();
        data.remove("id");
        data.remove("version");

        let history_id = self.history.last().map_or(1, |(id, _)| id + 1);
        self.history.push((
            history_id,
            HistoryChange {
                entity: table.to_string(),
                op,
                remote_id,
                data,
                version,
            },
        ));
    }

    fn since(&self, since: i64) -> History {
        History {
            max_history_id: Some(self.history.last().map_or(0, |(id, _)| *id)),
            changes: self
                .history
                .iter()
                .filter(|(id, _)| *id > since)
                .map(|(_, change)| change.clone())
                .collect(),
        }
    }

    fn ack(&mut self, request: &WriteRequest<'_>, mut body: Value) -> WriteAck {
        self.batches.push(request.batch_id.map(str::to_string));
        if let Some(since) = request.since_history_id {
            let history = self.since(since);
            body["history"] = json!({
                "max_history_id": history.max_history_id,
                "changes": history.changes.iter().map(change_json).collect::<Vec<_>>(),
            });
        }
        let ack = WriteAck::from_body(body);
        self.acks.insert(request.request_id.to_string(), ack.clone());
        ack
    }
}

fn change_json(change: &HistoryChange) -> Value {
    json!({
        "entity": change.entity,
        "op": change.op.as_str(),
        "remote_id": change.remote_id,
        "data": change.data,
        "version": change.version,
    })
}

/// Server that deduplicates writes by request id and enforces versions.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<State>,
}

impl FakeRemote {
    pub fn new() -> Self {
        let remote = Self::default();
        remote.lock().next_id = 100;
        remote
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Put rows on the server.
    pub fn seed(&self, table: &str, rows: &[Value]) {
        let mut state = self.lock();
        let stored = state.tables.entry(table.to_string()).or_default();
        for row in rows {
            stored.insert(row["id"].as_i64().unwrap(), row.clone());
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Make the next call touching `table` fail with `error`.
    pub fn fail_next(&self, table: &str, error: RemoteError) {
        self.lock()
            .failures
            .entry(table.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Writes that reached the server, including replays
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn invalidated(&self) -> bool {
        self.lock().invalidated
    }

    /// Batch ids carried by writes, in arrival order
    pub fn batches(&self) -> Vec<Option<String>> {
        self.lock().batches.clone()
    }

    /// Apply a change made by another client and record it in the history.
    pub fn change_elsewhere(&self, table: &str, op: ChangeOp, id: i64, data: &Value) {
        let mut state = self.lock();
        let rows = state.tables.entry(table.to_string()).or_default();
        match op {
            ChangeOp::Create | ChangeOp::Update => {
                let row = rows.entry(id).or_insert_with(|| json!({"id": id}));
                if let (Some(row), Some(data)) = (row.as_object_mut(), data.as_object()) {
                    for (key, value) in data {
                        row.insert(key.clone(), value.clone());
                    }
                }
            }
            ChangeOp::Delete => {
                rows.remove(&id);
            }
        }
        state.record(table, op, id);
    }

    async fn begin(&self, table: &str) -> RemoteResult<()> {
        let delay = self.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self
            .lock()
            .failures
            .get_mut(table)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl RemoteApi for FakeRemote {
    async fn list(&self, kind: &EntityKind) -> RemoteResult<ListPage> {
        self.begin(kind.table).await?;
        let max_history_id = self.lock().since(i64::MAX).max_history_id;
        Ok(ListPage {
            items: self.rows(kind.table),
            history: Some(History {
                max_history_id,
                changes: Vec::new(),
            }),
        })
    }

    async fn create(&self, kind: &EntityKind, request: WriteRequest<'_>) -> RemoteResult<WriteAck> {
        self.begin(kind.table).await?;
        let mut state = self.lock();
        state.writes += 1;
        if let Some(ack) = state.acks.get(request.request_id) {
            return Ok(ack.clone());
        }

        let id = state.next_id;
        state.next_id += 1;
        let mut row = request.body.clone();
        row.insert("id".to_string(), json!(id));
        if kind.versioned {
            row.insert("version".to_string(), json!(1));
        }
        state
            .tables
            .entry(kind.table.to_string())
            .or_default()
            .insert(id, Value::Object(row));
        state.record(kind.table, ChangeOp::Create, id);

        Ok(state.ack(&request, json!({"id": id, "version": 1})))
    }

    async fn update(
        &self,
        kind: &EntityKind,
        id: i64,
        request: WriteRequest<'_>,
    ) -> RemoteResult<WriteAck> {
        self.begin(kind.table).await?;
        let mut state = self.lock();
        state.writes += 1;
        if let Some(ack) = state.acks.get(request.request_id) {
            return Ok(ack.clone());
        }

        let row = state
            .tables
            .get_mut(kind.table)
            .and_then(|rows| rows.get_mut(&id))
            .ok_or_else(|| RemoteError::Rejected {
                status: 404,
                message: "not found (404)".to_string(),
                body: String::new(),
            })?;

        let current = row["version"].as_i64().unwrap_or(1);
        if kind.versioned && request.if_match_version != Some(current) {
            return Err(RemoteError::Conflict {
                status: 409,
                message: format!("expected version {current} (409)"),
            });
        }

        let object = row.as_object_mut().unwrap();
        for (key, value) in request.body {
            object.insert(key.clone(), value.clone());
        }
        if kind.versioned {
            object.insert("version".to_string(), json!(current + 1));
        }
        state.record(kind.table, ChangeOp::Update, id);

        Ok(state.ack(&request, json!({"id": id, "version": current + 1})))
    }

    async fn delete(
        &self,
        kind: &EntityKind,
        id: i64,
        request: WriteRequest<'_>,
    ) -> RemoteResult<WriteAck> {
        self.begin(kind.table).await?;
        let mut state = self.lock();
        state.writes += 1;
        if let Some(ack) = state.acks.get(request.request_id) {
            return Ok(ack.clone());
        }
        let removed = state
            .tables
            .get_mut(kind.table)
            .and_then(|rows| rows.remove(&id));
        if removed.is_some() {
            state.record(kind.table, ChangeOp::Delete, id);
        }
        Ok(state.ack(&request, json!({"ok": true})))
    }

    async fn history(&self, since_history_id: i64, batch_id: &str) -> RemoteResult<History> {
        self.begin(HISTORY_KEY).await?;
        let mut state = self.lock();
        state.batches.push(Some(batch_id.to_string()));
        Ok(state.since(since_history_id))
    }

    async fn invalidate_credentials(&self) {
        self.lock().invalidated = true;
    }
}
