use std::path::Path;

use chrono::Utc;
use serde_json::Value;
use sisa_core::models::{ErrorLogEntry, QueueCounts};
use sisa_core::remote::{History, ListPage, RemoteResult, WriteAck, WriteRequest};
use sisa_core::{
    CatchUp, ClientConfig, DrainReport, EntityKind, HttpRemote, MirrorRow, PullReport, PullStatus,
    RemoteApi, RemoteError, SyncQueueEntry, SyncService, TableStatus,
};

use crate::error::CliError;

/// Remote used by the CLI; store-only commands work without an API URL.
#[derive(Debug)]
pub enum CliRemote {
    Http(HttpRemote),
    Offline,
}

impl CliRemote {
    pub fn from_config(config: &ClientConfig) -> Result<Self, CliError> {
        if config.has_remote() {
            Ok(Self::Http(HttpRemote::from_config(config)?))
        } else {
            Ok(Self::Offline)
        }
    }

    pub const fn is_configured(&self) -> bool {
        matches!(self, Self::Http(_))
    }

    fn http(&self) -> RemoteResult<&HttpRemote> {
        match self {
            Self::Http(remote) => Ok(remote),
            Self::Offline => Err(RemoteError::InvalidConfiguration(
                "api_url is not configured".to_string(),
            )),
        }
    }
}

impl RemoteApi for CliRemote {
    async fn list(&self, kind: &EntityKind) -> RemoteResult<ListPage> {
        self.http()?.list(kind).await
    }

    async fn create(&self, kind: &EntityKind, request: WriteRequest<'_>) -> RemoteResult<WriteAck> {
        self.http()?.create(kind, request).await
    }

    async fn update(
        &self,
        kind: &EntityKind,
        id: i64,
        request: WriteRequest<'_>,
    ) -> RemoteResult<WriteAck> {
        self.http()?.update(kind, id, request).await
    }

    async fn delete(
        &self,
        kind: &EntityKind,
        id: i64,
        request: WriteRequest<'_>,
    ) -> RemoteResult<WriteAck> {
        self.http()?.delete(kind, id, request).await
    }

    async fn history(&self, since_history_id: i64, batch_id: &str) -> RemoteResult<History> {
        self.http()?.history(since_history_id, batch_id).await
    }

    async fn invalidate_credentials(&self) {
        if let Self::Http(remote) = self {
            remote.invalidate_credentials().await;
        }
    }
}

pub type CliService = SyncService<CliRemote>;

pub async fn open_service(config: &ClientConfig, db_path: &Path) -> Result<CliService, CliError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let remote = CliRemote::from_config(config)?;
    let timeout = config.request_timeout();
    let service = SyncService::open_path(db_path.to_path_buf(), remote)
        .await?
        .map_reconciler(|reconciler| reconciler.with_request_timeout(timeout));
    Ok(service)
}

pub fn require_remote(service: &CliService) -> Result<(), CliError> {
    if service.reconciler().remote().is_configured() {
        Ok(())
    } else {
        Err(CliError::RemoteNotConfigured)
    }
}

pub fn lookup_kind(table: &str) -> Result<&'static EntityKind, CliError> {
    Ok(EntityKind::lookup(table)?)
}

/// Build a row from `name=value` pairs; values that parse as JSON keep their type.
pub fn parse_assignments(assignments: &[String]) -> Result<MirrorRow, CliError> {
    let mut row = MirrorRow::new();
    for assignment in assignments {
        let Some((name, raw)) = assignment.split_once('=') else {
            return Err(CliError::InvalidAssignment(assignment.clone()));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(CliError::InvalidAssignment(assignment.clone()));
        }
        row = row.field(name, parse_value(raw));
    }
    Ok(row)
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw.trim()).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

pub fn format_queue_lines(entries: &[SyncQueueEntry], now_ms: i64) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let target = entry
                .target_id()
                .map_or_else(|| "-".to_string(), |id| id.to_string());
            let mut line = format!(
                "#{:<5} {:<10} {:<6} {:>8}  {:<7}  {}",
                entry.id,
                entry.table_name,
                entry.op.as_str(),
                target,
                entry.status.as_str(),
                format_relative_time(entry.created_at, now_ms)
            );
            if let Some(error) = &entry.last_error {
                line.push_str("  ");
                line.push_str(error);
            }
            line
        })
        .collect()
}

pub fn format_error_lines(entries: &[ErrorLogEntry], with_stack: bool) -> Vec<String> {
    let mut lines = Vec::with_capacity(entries.len());
    for entry in entries {
        lines.push(format!("{}  {}", entry.timestamp, entry.error_message));
        if with_stack && !entry.error_stack.is_empty() {
            lines.extend(entry.error_stack.lines().map(|cause| format!("    {cause}")));
        }
    }
    lines
}

pub fn format_status_lines(statuses: &[TableStatus], now_ms: i64) -> Vec<String> {
    statuses
        .iter()
        .map(|status| {
            let pulled = status.last_pulled_at.map_or_else(
                || "never".to_string(),
                |at| format_relative_time(at, now_ms),
            );
            format!(
                "{:<10} {:>6} rows  {}  pulled {}  [{}]",
                status.table,
                status.rows,
                format_counts(&status.queue),
                pulled,
                status.state
            )
        })
        .collect()
}

pub fn format_counts(counts: &QueueCounts) -> String {
    format!(
        "queue {} pending / {} syncing / {} failed",
        counts.pending, counts.syncing, counts.failed
    )
}

pub fn format_pull_lines(reports: &[PullReport]) -> Vec<String> {
    reports
        .iter()
        .map(|report| match &report.status {
            PullStatus::Replaced { rows } => format!("{:<10} replaced ({rows} rows)", report.table),
            PullStatus::KeptExisting => {
                format!("{:<10} empty response, kept local rows", report.table)
            }
            PullStatus::Failed { error } => format!("{:<10} failed: {error}", report.table),
        })
        .collect()
}

pub fn format_catch_up_lines(catch_up: &CatchUp) -> Vec<String> {
    match catch_up {
        CatchUp::Incremental { applied, cursor } => {
            let cursor = cursor.map_or_else(|| "none".to_string(), |cursor| cursor.to_string());
            vec![format!("Applied {applied} server changes; history cursor at {cursor}")]
        }
        CatchUp::FullPull { pulls } => {
            let mut lines = vec!["No usable history cursor; pulled every table".to_string()];
            lines.extend(format_pull_lines(pulls));
            lines
        }
    }
}

pub fn format_drain_summary(report: &DrainReport) -> String {
    let mut summary = format!("{} applied, {} failed", report.applied, report.failed);
    if !report.blocked_tables.is_empty() {
        summary.push_str(&format!("; blocked: {}", report.blocked_tables.join(", ")));
    }
    if report.auth_required {
        summary.push_str("; halted: authentication required");
    }
    summary
}

pub fn print_json(value: &impl serde::Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
