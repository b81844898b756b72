//! Sync queue repository

use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{QueueCounts, QueueOp, QueueStatus, SyncQueueEntry, PAYLOAD_TIMESTAMP_KEY};

/// Length of the secondary randomness tag stored with every entry
pub const NONCE_LEN: usize = 10;

const SELECT_ENTRY: &str = "SELECT id, table_name, op, record_id, local_temp_id, payload_json,
        request_id, nonce, status, last_error, timestamp, created_at, batch_id
     FROM sync_queue";

/// Ops an entry may be re-armed with
const KNOWN_OPS: &str = "('insert', 'create', 'update', 'delete')";

/// A mutation about to be queued
#[derive(Debug, Clone)]
pub struct NewQueueEntry<'a> {
    pub table_name: &'a str,
    pub op: QueueOp,
    pub payload: Value,
    pub record_id: Option<i64>,
    pub local_temp_id: Option<i64>,
    /// Explicit logical timestamp; falls back to the payload's, then to now
    pub timestamp: Option<i64>,
}

/// Trait for sync queue storage operations
pub trait QueueRepository {
    /// Durably record a mutation with a fresh idempotency key; returns the queue id
    fn enqueue(&self, entry: NewQueueEntry<'_>) -> Result<i64>;

    /// All entries in FIFO order
    fn list_all(&self) -> Result<Vec<SyncQueueEntry>>;

    /// Entries for one table in FIFO order
    fn list_for_table(&self, table_name: &str) -> Result<Vec<SyncQueueEntry>>;

    /// Get an entry by id
    fn get(&self, id: i64) -> Result<Option<SyncQueueEntry>>;

    /// Transition an entry. `Failed` stores `error`; `Done` and `Pending` clear it.
    fn set_status(&self, id: i64, status: QueueStatus, error: Option<&str>) -> Result<bool>;

    /// Permanently delete an entry
    fn remove(&self, id: i64) -> Result<bool>;

    /// Delete every entry
    fn clear(&self) -> Result<usize>;

    /// Move a failed entry back to pending
    fn retry(&self, id: i64) -> Result<bool>;

    /// Move every failed entry (optionally of one table) back to pending
    fn retry_failed(&self, table_name: Option<&str>) -> Result<usize>;

    /// Reset entries left `syncing` by an interrupted process
    fn recover_interrupted(&self) -> Result<usize>;

    /// Attach a confirmed server id to later entries that target a local temp row
    fn rebind_record(&self, table_name: &str, local_temp_id: i64, record_id: i64) -> Result<usize>;

    /// Replace an entry's payload
    fn set_payload(&self, id: i64, payload: &Value) -> Result<bool>;

    /// Tag an entry with `batch_id` unless it already carries one; returns the
    /// batch the entry belongs to
    fn assign_batch_id(&self, id: i64, batch_id: &str) -> Result<Option<String>>;

    /// Entry counts per status, optionally for one table
    fn counts(&self, table_name: Option<&str>) -> Result<QueueCounts>;

    /// Distinct table names with queued entries, in order of their oldest entry
    fn tables(&self) -> Result<Vec<String>>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an entry from a database row
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncQueueEntry> {
        let op: String = row.get(2)?;
        let payload_json: String = row.get(5)?;
        let status: String = row.get(8)?;

        let mut entry = SyncQueueEntry {
            id: row.get(0)?,
            table_name: row.get(1)?,
            op: QueueOp::Update,
            record_id: row.get(3)?,
            local_temp_id: row.get(4)?,
            payload: serde_json::from_str(&payload_json).unwrap_or(Value::String(payload_json)),
            request_id: row.get(6)?,
            nonce: row.get(7)?,
            status: status.parse().unwrap_or(QueueStatus::Failed),
            last_error: row.get(9)?,
            timestamp: row.get(10)?,
            created_at: row.get(11)?,
            batch_id: row.get(12)?,
        };

        // An entry with an unreadable op is never delivered
        match op.parse() {
            Ok(op) => entry.op = op,
            Err(error) => {
                entry.status = QueueStatus::Failed;
                entry.last_error = Some(error.to_string());
            }
        }
        Ok(entry)
    }

    fn query_entries(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<SyncQueueEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let entries = stmt
            .query_map(params, Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

/// Generate a fresh idempotency key
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a delivery batch id: `<unix ms>-<random tag>`
pub fn generate_batch_id() -> String {
    format!(
        "{}-{}",
        crate::util::unix_millis_now(),
        generate_nonce(NONCE_LEN)
    )
}

/// Generate an alphanumeric nonce of `len` characters
pub fn generate_nonce(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Resolve the logical timestamp and embed it in the payload.
///
/// Non-object payloads are kept verbatim under `data`.
pub fn stamp_payload(payload: Value, explicit: Option<i64>, now_ms: i64) -> (Value, i64) {
    let mut object = match payload {
        Value::Object(object) => object,
        Value::Null => Map::new(),
        other => {
            let mut wrapped = Map::new();
            wrapped.insert("data".to_string(), other);
            wrapped
        }
    };

    let timestamp = explicit
        .or_else(|| {
            object
                .get(PAYLOAD_TIMESTAMP_KEY)
                .and_then(crate::models::entity::json_i64)
        })
        .unwrap_or(now_ms);
    object.insert(PAYLOAD_TIMESTAMP_KEY.to_string(), Value::from(timestamp));

    (Value::Object(object), timestamp)
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn enqueue(&self, entry: NewQueueEntry<'_>) -> Result<i64> {
        let now = crate::util::unix_millis_now();
        let (payload, timestamp) = stamp_payload(entry.payload, entry.timestamp, now);
        let payload_json = serde_json::to_string(&payload)?;

        self.conn.execute(
            "INSERT INTO sync_queue
                (table_name, op, record_id, local_temp_id, payload_json, request_id, nonce,
                 status, timestamp, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.table_name,
                entry.op.as_str(),
                entry.record_id,
                entry.local_temp_id,
                payload_json,
                generate_request_id(),
                generate_nonce(NONCE_LEN),
                QueueStatus::Pending.as_str(),
                timestamp,
                now
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn list_all(&self) -> Result<Vec<SyncQueueEntry>> {
        self.query_entries(&format!("{SELECT_ENTRY} ORDER BY id ASC"), [])
    }

    fn list_for_table(&self, table_name: &str) -> Result<Vec<SyncQueueEntry>> {
        self.query_entries(
            &format!("{SELECT_ENTRY} WHERE table_name = ? ORDER BY id ASC"),
            params![table_name],
        )
    }

    fn get(&self, id: i64) -> Result<Option<SyncQueueEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("{SELECT_ENTRY} WHERE id = ?"),
                params![id],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn set_status(&self, id: i64, status: QueueStatus, error: Option<&str>) -> Result<bool> {
        let rows = match status {
            QueueStatus::Failed => self.conn.execute(
                "UPDATE sync_queue SET status = ?, last_error = ? WHERE id = ?",
                params![status.as_str(), error.unwrap_or("unknown error"), id],
            )?,
            QueueStatus::Done | QueueStatus::Pending => self.conn.execute(
                "UPDATE sync_queue SET status = ?, last_error = NULL WHERE id = ?",
                params![status.as_str(), id],
            )?,
            QueueStatus::Syncing => self.conn.execute(
                "UPDATE sync_queue SET status = ? WHERE id = ?",
                params![status.as_str(), id],
            )?,
        };
        Ok(rows > 0)
    }

    fn remove(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }

    fn clear(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM sync_queue", [])?)
    }

    fn retry(&self, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            &format!(
                "UPDATE sync_queue SET status = 'pending', last_error = NULL
                 WHERE id = ? AND status = 'failed' AND lower(op) IN {KNOWN_OPS}"
            ),
            params![id],
        )?;
        Ok(rows > 0)
    }

    fn retry_failed(&self, table_name: Option<&str>) -> Result<usize> {
        let rows = self.conn.execute(
            &format!(
                "UPDATE sync_queue SET status = 'pending', last_error = NULL
                 WHERE status = 'failed' AND (?1 IS NULL OR table_name = ?1)
                   AND lower(op) IN {KNOWN_OPS}"
            ),
            params![table_name],
        )?;
        Ok(rows)
    }

    fn recover_interrupted(&self) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET status = 'pending' WHERE status = 'syncing'",
            [],
        )?;
        Ok(rows)
    }

    fn rebind_record(&self, table_name: &str, local_temp_id: i64, record_id: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET record_id = ?
             WHERE table_name = ? AND record_id IS NULL AND op != 'insert'
               AND local_temp_id = ?",
            params![record_id, table_name, local_temp_id],
        )?;
        Ok(rows)
    }

    fn set_payload(&self, id: i64, payload: &Value) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET payload_json = ? WHERE id = ?",
            params![serde_json::to_string(payload)?, id],
        )?;
        Ok(rows > 0)
    }

    fn assign_batch_id(&self, id: i64, batch_id: &str) -> Result<Option<String>> {
        self.conn.execute(
            "UPDATE sync_queue SET batch_id = ? WHERE id = ? AND batch_id IS NULL",
            params![batch_id, id],
        )?;
        let batch = self
            .conn
            .query_row(
                "SELECT batch_id FROM sync_queue WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(batch)
    }

    fn counts(&self, table_name: Option<&str>) -> Result<QueueCounts> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM sync_queue
             WHERE (?1 IS NULL OR table_name = ?1)
             GROUP BY status",
        )?;
        let rows = stmt
            .query_map(params![table_name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            let count =
                usize::try_from(count).map_err(|error| Error::Database(error.to_string()))?;
            counts.add(status.parse()?, count);
        }
        Ok(counts)
    }

    fn tables(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name FROM sync_queue GROUP BY table_name ORDER BY MIN(id) ASC",
        )?;
        let tables = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tables)
    }
}
