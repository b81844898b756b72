//! Database migrations for the core sync tables.
//!
//! Mirror tables are not migrated here: they are created lazily per entity kind
//! by the mirror repository, which also applies additive column migrations.

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Get the current schema version
pub fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get::<_, i32>(0),
        )
        .optional()?
        .unwrap_or(0);

    Ok(version)
}

fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: sync queue, error log, sync metadata
fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS sync_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT NOT NULL,
                op TEXT NOT NULL,
                record_id INTEGER,
                local_temp_id INTEGER,
                payload_json TEXT NOT NULL,
                request_id TEXT NOT NULL,
                nonce TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                last_error TEXT,
                timestamp INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS error_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                error_message TEXT NOT NULL,
                error_stack TEXT NOT NULL DEFAULT '',
                timestamp TEXT NOT NULL
            )",
            // Local only, never pulled or pushed
            "CREATE TABLE IF NOT EXISTS sync_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        ],
    )
}

/// Migration to version 2: idempotency key uniqueness and per-table drain order
fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_sync_queue_request_id ON sync_queue(request_id)",
            "CREATE INDEX IF NOT EXISTS idx_sync_queue_table ON sync_queue(table_name, id)",
            "CREATE INDEX IF NOT EXISTS idx_error_logs_id ON error_logs(id DESC)",
        ],
    )
}

/// Migration to version 3: delivery batch of each queue entry
fn migrate_v3(conn: &Connection) -> Result<()> {
    apply(
        conn,
        3,
        &["ALTER TABLE sync_queue ADD COLUMN batch_id TEXT"],
    )
}
