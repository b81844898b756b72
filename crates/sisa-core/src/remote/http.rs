//! reqwest implementation of the remote API

use std::sync::RwLock;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{History, ListPage, RemoteApi, RemoteError, RemoteResult, WriteAck, WriteRequest};
use crate::config::ClientConfig;
use crate::models::{EntityKind, PAYLOAD_IF_MATCH_KEY};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
const NONCE_HEADER: &str = "X-Request-Nonce";
const BATCH_HEADER: &str = "X-Batch-Id";
const SINCE_HISTORY_HEADER: &str = "X-Since-History-Id";

/// HTTP client for the per-entity REST endpoints.
pub struct HttpRemote {
    base_url: String,
    token: RwLock<Option<String>>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> RemoteResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url.into())?,
            token: RwLock::new(normalize_text_option(token)),
            client: reqwest::Client::builder().build()?,
        })
    }

    /// Build from the client configuration; the API URL is required.
    pub fn from_config(config: &ClientConfig) -> RemoteResult<Self> {
        let base_url = config.api_url.clone().ok_or_else(|| {
            RemoteError::InvalidConfiguration("api_url is not configured".to_string())
        })?;
        Self::new(base_url, config.api_token.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether a bearer token is currently held
    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }

    fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|token| token.clone())
    }

    fn collection_url(&self, kind: &EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.table)
    }

    fn record_url(&self, kind: &EntityKind, id: i64) -> String {
        format!("{}/{}/{id}", self.base_url, kind.table)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        match self.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn write(&self, method: Method, url: &str, request: WriteRequest<'_>) -> RequestBuilder {
        let mut builder = self
            .request(method, url)
            .header(IDEMPOTENCY_KEY_HEADER, request.request_id)
            .header(NONCE_HEADER, request.nonce);
        if let Some(batch_id) = request.batch_id {
            builder = builder.header(BATCH_HEADER, batch_id);
        }
        if let Some(since) = request.since_history_id {
            builder = builder.header(SINCE_HISTORY_HEADER, since.to_string());
        }
        builder
    }
}

impl RemoteApi for HttpRemote {
    async fn list(&self, kind: &EntityKind) -> RemoteResult<ListPage> {
        let response = self
            .request(Method::GET, &self.collection_url(kind))
            .send()
            .await?;
        let body = read_json(response).await?;
        ListPage::parse(kind, body)
    }

    async fn create(&self, kind: &EntityKind, request: WriteRequest<'_>) -> RemoteResult<WriteAck> {
        let response = self
            .write(Method::POST, &self.collection_url(kind), request)
            .json(request.body)
            .send()
            .await?;
        Ok(WriteAck::from_body(read_json(response).await?))
    }

    async fn update(
        &self,
        kind: &EntityKind,
        id: i64,
        request: WriteRequest<'_>,
    ) -> RemoteResult<WriteAck> {
        let mut body = request.body.clone();
        if let (true, Some(version)) = (kind.versioned, request.if_match_version) {
            body.insert(PAYLOAD_IF_MATCH_KEY.to_string(), Value::from(version));
        }

        let response = self
            .write(Method::PUT, &self.record_url(kind, id), request)
            .json(&body)
            .send()
            .await?;
        Ok(WriteAck::from_body(read_json(response).await?))
    }

    async fn delete(
        &self,
        kind: &EntityKind,
        id: i64,
        request: WriteRequest<'_>,
    ) -> RemoteResult<WriteAck> {
        let response = self
            .write(Method::DELETE, &self.record_url(kind, id), request)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("{kind} {id} was already deleted on the server");
            return Ok(WriteAck::default());
        }
        Ok(WriteAck::from_body(read_json(response).await?))
    }

    async fn history(&self, since_history_id: i64, batch_id: &str) -> RemoteResult<History> {
        let response = self
            .request(Method::POST, &format!("{}/sync/batch", self.base_url))
            .header(IDEMPOTENCY_KEY_HEADER, batch_id)
            .json(&json!({
                "batch_id": batch_id,
                "since_history_id": since_history_id,
                "ops": [],
            }))
            .send()
            .await?;
        let body = read_json(response).await?;
        History::from_body(&body).ok_or_else(|| {
            RemoteError::InvalidResponse(format!(
                "sync batch response has no history: {}",
                compact_text(&body.to_string())
            ))
        })
    }

    async fn invalidate_credentials(&self) {
        if let Ok(mut token) = self.token.write() {
            if token.take().is_some() {
                tracing::warn!("Discarded rejected API token; re-authentication required");
            }
        }
    }
}

async fn read_json(response: reqwest::Response) -> RemoteResult<Value> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(status_error(status, &body));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|error| {
        RemoteError::InvalidResponse(format!("{error}: {}", compact_text(&body)))
    })
}

fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let code = status.as_u16();
    match code {
        401 | 403 | 419 => RemoteError::Auth { status: code },
        409 | 412 => RemoteError::Conflict {
            status: code,
            message: parse_api_error(status, body),
        },
        _ => RemoteError::Rejected {
            status: code,
            message: parse_api_error(status, body),
            body: body.to_string(),
        },
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let url = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("API URL must not be empty".to_string())
    })?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "API URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entity::{CLIENTS, JOBS, STATUSES, TARIFFS};
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(String, String, String)>>>;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn header(headers: &HeaderMap, name: &str) -> String {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    async fn list_clients(headers: HeaderMap) -> (StatusCode, Json<Value>) {
        if header(&headers, "authorization") != "Bearer secret" {
            return (StatusCode::UNAUTHORIZED, Json(json!({"message": "no"})));
        }
        (
            StatusCode::OK,
            Json(json!({"clients": [{"id": 1, "business_name": "Acme", "version": 2}]})),
        )
    }

    async fn create_client(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        seen.lock().unwrap().push((
            header(&headers, "idempotency-key"),
            header(&headers, "x-request-nonce"),
            body["business_name"].as_str().unwrap_or_default().to_string(),
        ));
        Json(json!({"client": {"id": 41, "version": 1}}))
    }

    async fn update_client(Path(id): Path<i64>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        if body["if_match_version"] != json!(3) {
            return (
                StatusCode::CONFLICT,
                Json(json!({"message": "stale version"})),
            );
        }
        (StatusCode::OK, Json(json!({"id": id, "version": 4})))
    }

    async fn missing() -> StatusCode {
        StatusCode::NOT_FOUND
    }

    async fn delete_tariff(headers: HeaderMap, Path(id): Path<i64>) -> Json<Value> {
        let since: i64 = header(&headers, "x-since-history-id").parse().unwrap_or(-1);
        Json(json!({
            "ok": true,
            "history": {
                "max_history_id": since + 1,
                "changes": [{"entity": "tariffs", "op": "delete", "remote_id": id}],
                "batch": header(&headers, "x-batch-id"),
            }
        }))
    }

    async fn sync_batch(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        if header(&headers, "idempotency-key") != body["batch_id"].as_str().unwrap_or_default()
            || body["ops"] != json!([])
        {
            return (StatusCode::BAD_REQUEST, Json(json!({"message": "bad batch"})));
        }
        let since = body["since_history_id"].as_i64().unwrap_or_default();
        (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "history": {
                    "max_history_id": since + 2,
                    "changes": [
                        {"entity": "clients", "op": "update", "remote_id": 1, "data": {"phone": "555"}, "version": 3},
                        {"entity": "clients", "op": "delete", "remote_id": 2}
                    ]
                }
            })),
        )
    }

    async fn invalid_job() -> (StatusCode, String) {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error":"description is required"}"#.to_string(),
        )
    }

    async fn expired() -> StatusCode {
        StatusCode::from_u16(419).unwrap()
    }

    async fn server() -> (String, Seen) {
        let seen = Seen::default();
        let app = Router::new()
            .route("/clients", get(list_clients).post(create_client))
            .route("/clients/{id}", put(update_client).delete(missing))
            .route("/jobs", get(invalid_job).post(invalid_job))
            .route("/statuses", get(expired))
            .route("/tariffs", get(|| async { Json(json!([{"id": 5}])) }))
            .route("/tariffs/{id}", axum::routing::delete(delete_tariff))
            .route("/sync/batch", post(sync_batch))
            .with_state(seen.clone());
        (spawn(app).await, seen)
    }

    fn write_request<'a>(body: &'a Map<String, Value>, version: Option<i64>) -> WriteRequest<'a> {
        WriteRequest {
            request_id: "req-1",
            nonce: "abcdefghij",
            body,
            if_match_version: version,
            batch_id: None,
            since_history_id: None,
        }
    }

    #[test]
    fn new_rejects_invalid_urls() {
        assert!(HttpRemote::new("", None).is_err());
        assert!(HttpRemote::new("api.example.com", None).is_err());
        let remote = HttpRemote::new(" https://api.example.com/ ", None).unwrap();
        assert_eq!(remote.base_url(), "https://api.example.com");
    }

    #[test]
    fn debug_redacts_token() {
        let remote =
            HttpRemote::new("https://api.example.com", Some("secret".to_string())).unwrap();
        let debug = format!("{remote:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_sends_bearer_token_and_parses_keyed_list() {
        let (url, _) = server().await;
        let remote = HttpRemote::new(url, Some("secret".to_string())).unwrap();

        let page = remote.list(&CLIENTS).await.unwrap();
        assert_eq!(
            page.items,
            vec![json!({"id": 1, "business_name": "Acme", "version": 2})]
        );

        let bare = remote.list(&TARIFFS).await.unwrap();
        assert_eq!(bare.items, vec![json!({"id": 5})]);
        assert_eq!(bare.history, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_sends_idempotency_headers() {
        let (url, seen) = server().await;
        let remote = HttpRemote::new(url, Some("secret".to_string())).unwrap();
        let mut body = Map::new();
        body.insert("business_name".to_string(), json!("Acme"));

        let ack = remote
            .create(&CLIENTS, write_request(&body, None))
            .await
            .unwrap();

        assert_eq!((ack.id, ack.version), (Some(41), Some(1)));
        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![(
                "req-1".to_string(),
                "abcdefghij".to_string(),
                "Acme".to_string()
            )]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_maps_version_mismatch_to_conflict() {
        let (url, _) = server().await;
        let remote = HttpRemote::new(url, None).unwrap();
        let body = Map::new();

        let ack = remote
            .update(&CLIENTS, 9, write_request(&body, Some(3)))
            .await
            .unwrap();
        assert_eq!((ack.id, ack.version), (Some(9), Some(4)));

        let error = remote
            .update(&CLIENTS, 9, write_request(&body, Some(2)))
            .await
            .unwrap_err();
        assert_eq!(
            error,
            RemoteError::Conflict {
                status: 409,
                message: "stale version (409)".to_string()
            }
        );
        assert_eq!(error.to_string(), "version conflict: stale version (409)");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_treats_not_found_as_done() {
        let (url, _) = server().await;
        let remote = HttpRemote::new(url, None).unwrap();
        let body = Map::new();

        remote
            .delete(&CLIENTS, 9, write_request(&body, None))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_sends_batch_and_cursor_headers() {
        let (url, _) = server().await;
        let remote = HttpRemote::new(url, None).unwrap();
        let body = Map::new();
        let request = WriteRequest {
            batch_id: Some("1700-abc"),
            since_history_id: Some(6),
            ..write_request(&body, None)
        };

        let ack = remote.delete(&TARIFFS, 3, request).await.unwrap();

        let history = ack.history.unwrap();
        assert_eq!(history.max_history_id, Some(7));
        assert_eq!(history.changes[0].remote_id, 3);
        assert_eq!(ack.body["history"]["batch"], json!("1700-abc"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn history_posts_empty_batch_from_cursor() {
        let (url, _) = server().await;
        let remote = HttpRemote::new(url, None).unwrap();

        let history = remote.history(10, "1700-abc").await.unwrap();

        assert_eq!(history.max_history_id, Some(12));
        assert_eq!(history.changes.len(), 2);
        assert_eq!(history.changes[0].data["phone"], json!("555"));
        assert_eq!(history.changes[1].op, crate::remote::ChangeOp::Delete);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auth_statuses_map_to_auth_error() {
        let (url, _) = server().await;
        let remote = HttpRemote::new(url, Some("wrong".to_string())).unwrap();

        assert_eq!(
            remote.list(&CLIENTS).await.unwrap_err(),
            RemoteError::Auth { status: 401 }
        );
        assert_eq!(
            remote.list(&STATUSES).await.unwrap_err(),
            RemoteError::Auth { status: 419 }
        );

        assert!(remote.has_token());
        remote.invalidate_credentials().await;
        assert!(!remote.has_token());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn business_errors_keep_message_and_body() {
        let (url, _) = server().await;
        let remote = HttpRemote::new(url, None).unwrap();

        let error = remote.list(&JOBS).await.unwrap_err();
        assert_eq!(
            error,
            RemoteError::Rejected {
                status: 422,
                message: "description is required (422)".to_string(),
                body: r#"{"error":"description is required"}"#.to_string(),
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_server_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let remote = HttpRemote::new(format!("http://{addr}"), None).unwrap();
        let error = remote.list(&CLIENTS).await.unwrap_err();
        assert!(matches!(error, RemoteError::Network(_)));
    }
}
