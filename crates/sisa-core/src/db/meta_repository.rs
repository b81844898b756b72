//! Sync bookkeeping stored as key/value pairs

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

const LAST_PULLED_PREFIX: &str = "last_pulled_at:";
const HISTORY_CURSOR_KEY: &str = "max_history_id";

/// Trait for sync metadata storage operations
pub trait MetaRepository {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Unix ms of the last successful pull of `table`
    fn last_pulled_at(&self, table: &str) -> Result<Option<i64>> {
        Ok(self
            .get(&format!("{LAST_PULLED_PREFIX}{table}"))?
            .and_then(|value| value.parse().ok()))
    }

    fn set_last_pulled_at(&self, table: &str, at_ms: i64) -> Result<()> {
        self.set(&format!("{LAST_PULLED_PREFIX}{table}"), &at_ms.to_string())
    }

    /// Newest server history id already reflected in the mirror
    fn history_cursor(&self) -> Result<Option<i64>> {
        Ok(self
            .get(HISTORY_CURSOR_KEY)?
            .and_then(|value| value.parse().ok()))
    }

    /// Move the cursor forward; returns whether it moved
    fn advance_history_cursor(&self, history_id: i64) -> Result<bool> {
        if self.history_cursor()?.is_some_and(|current| current >= history_id) {
            return Ok(false);
        }
        self.set(HISTORY_CURSOR_KEY, &history_id.to_string())?;
        Ok(true)
    }
}

/// `SQLite` implementation of `MetaRepository`
pub struct SqliteMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMetaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MetaRepository for SqliteMetaRepository<'_> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }
}
