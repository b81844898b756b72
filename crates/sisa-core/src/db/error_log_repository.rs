//! Error log repository

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::ErrorLogEntry;

/// Trait for diagnostic log storage operations
pub trait ErrorLogRepository {
    /// Append a record; returns its id
    fn append(&self, message: &str, stack: &str, timestamp: &str) -> Result<i64>;

    /// Most recent records first, up to `limit`
    fn list(&self, limit: usize) -> Result<Vec<ErrorLogEntry>>;

    /// Delete every record
    fn clear(&self) -> Result<usize>;

    fn count(&self) -> Result<usize>;
}

/// `SQLite` implementation of `ErrorLogRepository`
pub struct SqliteErrorLogRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteErrorLogRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl ErrorLogRepository for SqliteErrorLogRepository<'_> {
    fn append(&self, message: &str, stack: &str, timestamp: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO error_logs (error_message, error_stack, timestamp) VALUES (?, ?, ?)",
            params![message, stack, timestamp],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list(&self, limit: usize) -> Result<Vec<ErrorLogEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "SELECT id, error_message, error_stack, timestamp
             FROM error_logs ORDER BY id DESC LIMIT ?",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(ErrorLogEntry {
                    id: row.get(0)?,
                    error_message: row.get(1)?,
                    error_stack: row.get(2)?,
                    timestamp: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn clear(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM error_logs", [])?)
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM error_logs", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_append_and_list_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteErrorLogRepository::new(db.connection());

        repo.append("first", "", "2024-01-01T00:00:00Z").unwrap();
        repo.append("second", "at drain", "2024-01-01T00:00:01Z")
            .unwrap();

        let entries = repo.list(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].error_message, "second");
        assert_eq!(entries[0].error_stack, "at drain");
        assert_eq!(entries[1].error_message, "first");

        assert_eq!(repo.list(1).unwrap().len(), 1);
    }

    #[test]
    fn test_clear() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteErrorLogRepository::new(db.connection());
        repo.append("x", "", "t").unwrap();

        assert_eq!(repo.count().unwrap(), 1);
        repo.clear().unwrap();
        assert_eq!(repo.count().unwrap(), 0);
    }
}
