//! Server change history: a cursor plus the changes recorded after it

use serde_json::{Map, Value};

use crate::models::entity::json_i64;

/// Kind of change recorded in the server history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

impl ChangeOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "create" | "insert" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One server-side change, made by this client or another one
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryChange {
    /// Table name of the changed entity
    pub entity: String,
    pub op: ChangeOp,
    pub remote_id: i64,
    pub data: Map<String, Value>,
    pub version: Option<i64>,
}

impl HistoryChange {
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let entity = object.get("entity")?.as_str()?.to_string();
        let op = ChangeOp::parse(object.get("op")?.as_str()?)?;
        let remote_id = object
            .get("remote_id")
            .or_else(|| object.get("id"))
            .and_then(json_i64)?;

        Some(Self {
            entity,
            op,
            remote_id,
            data: object
                .get("data")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            version: object.get("version").and_then(json_i64),
        })
    }

    /// The changed row shaped like a list item: data plus `id` and `version`
    pub fn server_row(&self) -> Value {
        let mut row = self.data.clone();
        row.insert("id".to_string(), Value::from(self.remote_id));
        if let Some(version) = self.version {
            row.insert("version".to_string(), Value::from(version));
        }
        Value::Object(row)
    }
}

/// The `history` block a response may carry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    /// Id of the newest change the server knows about
    pub max_history_id: Option<i64>,
    /// Changes after the cursor the request sent, oldest first
    pub changes: Vec<HistoryChange>,
}

impl History {
    /// Read `{"history": {"max_history_id": .., "changes": [..]}}` from a body.
    ///
    /// Malformed changes are skipped.
    pub fn from_body(body: &Value) -> Option<Self> {
        let history = body.get("history")?.as_object()?;
        let changes = history
            .get("changes")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let change = HistoryChange::from_value(item);
                        if change.is_none() {
                            tracing::debug!("Skipping malformed history change: {item}");
                        }
                        change
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            max_history_id: history.get("max_history_id").and_then(json_i64),
            changes,
        })
    }

    /// Keep whichever history reaches further; later ones cover earlier ones
    /// when both were requested from the same cursor.
    pub fn newest(self, other: Self) -> Self {
        if other.max_history_id > self.max_history_id {
            other
        } else {
            self
        }
    }
}
