//! Remote REST API collaborator.
//!
//! One list/create/update/delete endpoint set per entity kind. The
//! reconciliation protocol talks to it only through [`RemoteApi`].

mod error;
#[cfg(test)]
pub(crate) mod fake;
mod history;
mod http;

use serde_json::{Map, Value};

pub use error::{RemoteError, RemoteResult};
pub use history::{ChangeOp, History, HistoryChange};
pub use http::HttpRemote;

use crate::models::entity::json_i64;
use crate::models::EntityKind;

/// Body and idempotency tags of one queued write
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    /// Idempotency key; a repeated key must return the original result
    pub request_id: &'a str,
    pub nonce: &'a str,
    pub body: &'a Map<String, Value>,
    /// Version an update expects the server row to still have
    pub if_match_version: Option<i64>,
    /// Drain batch the entry was first sent in
    pub batch_id: Option<&'a str>,
    /// History cursor; the server attaches changes recorded after it
    pub since_history_id: Option<i64>,
}

/// Server acknowledgement of a write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteAck {
    pub id: Option<i64>,
    pub version: Option<i64>,
    pub history: Option<History>,
    pub body: Value,
}

impl WriteAck {
    /// Read the id (`remote_id` or `id`) and `version`, at the top level or
    /// one object deep (e.g. `{"client": {...}}`).
    pub fn from_body(body: Value) -> Self {
        let (id, version) = match &body {
            Value::Object(object) => {
                let id = ack_field(object, &["remote_id", "id"]);
                let version = ack_field(object, &["version"]);
                (id, version)
            }
            _ => (None, None),
        };
        Self {
            id,
            version,
            history: History::from_body(&body),
            body,
        }
    }
}

/// One full collection plus the history cursor it is consistent with
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub items: Vec<Value>,
    pub history: Option<History>,
}

impl ListPage {
    pub fn parse(kind: &EntityKind, body: Value) -> RemoteResult<Self> {
        let history = History::from_body(&body);
        Ok(Self {
            items: parse_list(kind, body)?,
            history,
        })
    }
}

fn ack_field(object: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    let direct = keys
        .iter()
        .find_map(|key| object.get(*key).and_then(json_i64));
    direct.or_else(|| {
        object
            .iter()
            .filter(|(key, _)| key.as_str() != "history")
            .filter_map(|(_, value)| value.as_object())
            .find_map(|nested| keys.iter().find_map(|key| nested.get(*key).and_then(json_i64)))
    })
}

/// Extract the item list from a list response.
///
/// Accepts `{"<list_key>": [...]}`, `{"data": [...]}` or a bare array.
pub fn parse_list(kind: &EntityKind, body: Value) -> RemoteResult<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut object) => {
            for key in [kind.list_key, "data"] {
                if let Some(Value::Array(items)) = object.remove(key) {
                    return Ok(items);
                }
            }
            Err(RemoteError::InvalidResponse(format!(
                "{kind} list response has no '{}' or 'data' array",
                kind.list_key
            )))
        }
        other => Err(RemoteError::InvalidResponse(format!(
            "{kind} list response is not an array or object: {other}"
        ))),
    }
}

/// Per-entity remote operations
#[allow(async_fn_in_trait)]
pub trait RemoteApi {
    /// Full canonical collection for `kind`
    async fn list(&self, kind: &EntityKind) -> RemoteResult<ListPage>;

    async fn create(&self, kind: &EntityKind, request: WriteRequest<'_>) -> RemoteResult<WriteAck>;

    async fn update(
        &self,
        kind: &EntityKind,
        id: i64,
        request: WriteRequest<'_>,
    ) -> RemoteResult<WriteAck>;

    /// Delete; a row the server no longer has counts as deleted
    async fn delete(
        &self,
        kind: &EntityKind,
        id: i64,
        request: WriteRequest<'_>,
    ) -> RemoteResult<WriteAck>;

    /// Changes of every entity recorded after `since_history_id`
    async fn history(&self, since_history_id: i64, batch_id: &str) -> RemoteResult<History>;

    /// Drop the stored credential after an auth failure
    async fn invalidate_credentials(&self);
}
