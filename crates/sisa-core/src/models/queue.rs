//! Sync queue entry model and typed mutations

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::entity::{EntityKind, MirrorRow};
use crate::error::{Error, Result};

/// Payload key holding the resolved logical timestamp
pub const PAYLOAD_TIMESTAMP_KEY: &str = "timestamp";
/// Payload key holding the version an update expects to overwrite
pub const PAYLOAD_IF_MATCH_KEY: &str = "if_match_version";

/// Kind of mutation recorded in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOp {
    Insert,
    Update,
    Delete,
}

impl QueueOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for QueueOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            // "create" is what older clients wrote
            "insert" | "create" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown queue op '{other}'"))),
        }
    }
}

/// Delivery state of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Syncing,
    Done,
    Failed,
}

impl QueueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "done" => Ok(Self::Done),
            // "error" is what older clients wrote
            "failed" | "error" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown queue status '{other}'"))),
        }
    }
}

/// A durable record of one locally-initiated mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Local autoincrement id, defines FIFO order
    pub id: i64,
    pub table_name: String,
    pub op: QueueOp,
    /// Server id, `None` for records not yet created remotely
    pub record_id: Option<i64>,
    /// Local row id correlated with this entry before the server assigns one
    pub local_temp_id: Option<i64>,
    /// Mutation body with the embedded `timestamp`
    pub payload: Value,
    /// Idempotency key, generated once at enqueue time
    pub request_id: String,
    pub nonce: String,
    pub status: QueueStatus,
    pub last_error: Option<String>,
    /// Logical ordering value (unix ms)
    pub timestamp: i64,
    /// Wall-clock enqueue time (unix ms)
    pub created_at: i64,
    /// Drain batch of the first delivery attempt, kept across retries
    pub batch_id: Option<String>,
}

impl SyncQueueEntry {
    /// Payload fields that belong on the wire (no bookkeeping keys)
    pub fn body(&self) -> Map<String, Value> {
        let mut body = self.payload.as_object().cloned().unwrap_or_default();
        body.remove(PAYLOAD_TIMESTAMP_KEY);
        body.remove(PAYLOAD_IF_MATCH_KEY);
        body
    }

    /// Version the update expects the server row to still have
    pub fn if_match_version(&self) -> Option<i64> {
        self.payload
            .get(PAYLOAD_IF_MATCH_KEY)
            .and_then(super::entity::json_i64)
    }

    /// Server id when known, otherwise the local temp id
    pub const fn target_id(&self) -> Option<i64> {
        match self.record_id {
            Some(id) => Some(id),
            None => self.local_temp_id,
        }
    }
}

/// A strongly-typed local mutation, validated against its kind before it is queued.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert {
        kind: &'static EntityKind,
        local_temp_id: i64,
        row: MirrorRow,
    },
    Update {
        kind: &'static EntityKind,
        record_id: i64,
        patch: MirrorRow,
        if_match_version: Option<i64>,
    },
    Delete {
        kind: &'static EntityKind,
        record_id: i64,
    },
}

impl Mutation {
    pub const fn kind(&self) -> &'static EntityKind {
        match self {
            Self::Insert { kind, .. } | Self::Update { kind, .. } | Self::Delete { kind, .. } => {
                kind
            }
        }
    }

    pub const fn op(&self) -> QueueOp {
        match self {
            Self::Insert { .. } => QueueOp::Insert,
            Self::Update { .. } => QueueOp::Update,
            Self::Delete { .. } => QueueOp::Delete,
        }
    }

    /// Fail fast on fields the server could never accept.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Insert { kind, row, .. } => kind.validate_new_row(&row.fields),
            Self::Update {
                kind,
                patch,
                if_match_version,
                ..
            } => {
                kind.validate_fields(&patch.fields)?;
                if patch.fields.is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "update of '{kind}' has no fields"
                    )));
                }
                if kind.versioned && if_match_version.is_none() {
                    return Err(Error::InvalidInput(format!(
                        "update of versioned '{kind}' must carry if_match_version"
                    )));
                }
                Ok(())
            }
            Self::Delete { .. } => Ok(()),
        }
    }

    /// Queue payload for this mutation
    pub fn payload(&self) -> Value {
        match self {
            Self::Insert { row, .. } => Value::Object(row.fields.clone()),
            Self::Update {
                patch,
                if_match_version,
                ..
            } => {
                let mut body = patch.fields.clone();
                if let Some(version) = if_match_version {
                    body.insert(PAYLOAD_IF_MATCH_KEY.to_string(), Value::from(*version));
                }
                Value::Object(body)
            }
            Self::Delete { .. } => Value::Object(Map::new()),
        }
    }

    /// Server id of the target row; `None` while it only exists locally
    pub const fn record_id(&self) -> Option<i64> {
        match self {
            Self::Insert { .. } => None,
            Self::Update { record_id, .. } | Self::Delete { record_id, .. } => {
                if *record_id > 0 {
                    Some(*record_id)
                } else {
                    None
                }
            }
        }
    }

    /// Temporary id of the target row when the server has not assigned one yet
    pub const fn local_temp_id(&self) -> Option<i64> {
        match self {
            Self::Insert { local_temp_id, .. } => Some(*local_temp_id),
            Self::Update { record_id, .. } | Self::Delete { record_id, .. } => {
                if *record_id < 0 {
                    Some(*record_id)
                } else {
                    None
                }
            }
        }
    }
}

/// Queue depth per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub syncing: usize,
    pub done: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub const fn total(&self) -> usize {
        self.pending + self.syncing + self.done + self.failed
    }

    pub(crate) fn add(&mut self, status: QueueStatus, count: usize) {
        match status {
            QueueStatus::Pending => self.pending += count,
            QueueStatus::Syncing => self.syncing += count,
            QueueStatus::Done => self.done += count,
            QueueStatus::Failed => self.failed += count,
        }
    }
}
