//! Mirror table repository: one generic implementation for every entity kind

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{EntityKind, MirrorRow};

/// `sync_meta` key prefix holding the lowest temp id handed out per table
const TEMP_ID_FLOOR_PREFIX: &str = "temp_id_floor:";

/// Result of a full-replace refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// Table now holds exactly this many rows from the server
    Replaced(usize),
    /// Input was empty; existing rows were left in place
    KeptExisting,
}

/// Trait for mirror storage operations
pub trait MirrorRepository {
    /// Create the table if missing and add any columns it lacks
    fn create_table(&self, kind: &EntityKind) -> Result<()>;

    /// Insert a row, preserving `row.id` when supplied; returns the row id
    fn insert(&self, kind: &EntityKind, row: &MirrorRow) -> Result<i64>;

    /// Insert or overwrite the row with the same id
    fn upsert(&self, kind: &EntityKind, row: &MirrorRow) -> Result<i64>;

    /// Update fields in place. `version: None` leaves the stored version unchanged.
    fn update(
        &self,
        kind: &EntityKind,
        id: i64,
        patch: &MirrorRow,
        version: Option<i64>,
    ) -> Result<usize>;

    /// Get a row by id
    fn get(&self, kind: &EntityKind, id: i64) -> Result<Option<MirrorRow>>;

    /// All rows ordered by id
    fn get_all(&self, kind: &EntityKind) -> Result<Vec<MirrorRow>>;

    /// Delete a row; returns the number of rows removed
    fn delete(&self, kind: &EntityKind, id: i64) -> Result<usize>;

    /// Clear and bulk-insert in one transaction. Empty input is a no-op.
    fn replace_all(&self, kind: &EntityKind, rows: &[MirrorRow]) -> Result<ReplaceOutcome>;

    /// Number of rows
    fn count(&self, kind: &EntityKind) -> Result<usize>;

    /// Allocate a negative id for a row not yet known to the server.
    ///
    /// Never hands out the same id twice for a table, even after the row was
    /// deleted locally, so queued entries keep pointing at the right row.
    fn next_temp_id(&self, kind: &EntityKind) -> Result<i64>;
}

/// `SQLite` implementation of `MirrorRepository`
pub struct SqliteMirrorRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMirrorRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn existing_columns(&self, kind: &EntityKind) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", kind.table))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    fn select_sql(kind: &EntityKind) -> String {
        let mut columns = vec!["id"];
        columns.extend(kind.columns.iter().map(|column| column.name));
        if kind.versioned {
            columns.push("version");
        }
        format!("SELECT {} FROM {}", columns.join(", "), kind.table)
    }

    fn parse_row(kind: &EntityKind, row: &rusqlite::Row<'_>) -> rusqlite::Result<MirrorRow> {
        let mut parsed = MirrorRow::with_id(row.get(0)?);
        for (index, column) in kind.columns.iter().enumerate() {
            let value = column.from_sql(row.get_ref(index + 1)?);
            if !value.is_null() {
                parsed.fields.insert(column.name.to_string(), value);
            }
        }
        if kind.versioned {
            parsed.version = row.get(kind.columns.len() + 1)?;
        }
        Ok(parsed)
    }

    fn write_row(&self, kind: &EntityKind, row: &MirrorRow, verb: &str) -> Result<i64> {
        kind.validate_fields(&row.fields)?;

        let mut names = Vec::new();
        let mut values = Vec::new();

        if let Some(id) = row.id {
            names.push("id");
            values.push(SqlValue::Integer(id));
        }
        for column in kind.columns {
            if let Some(value) = row.fields.get(column.name) {
                names.push(column.name);
                values.push(column.to_sql(value)?);
            }
        }
        if kind.versioned {
            names.push("version");
            values.push(SqlValue::Integer(row.version.unwrap_or(1)));
        }

        let sql = if names.is_empty() {
            format!("{verb} INTO {} DEFAULT VALUES", kind.table)
        } else {
            format!(
                "{verb} INTO {} ({}) VALUES ({})",
                kind.table,
                names.join(", "),
                vec!["?"; names.len()].join(", ")
            )
        };
        self.conn.execute(&sql, params_from_iter(values))?;

        Ok(row.id.unwrap_or_else(|| self.conn.last_insert_rowid()))
    }
}

impl MirrorRepository for SqliteMirrorRepository<'_> {
    fn create_table(&self, kind: &EntityKind) -> Result<()> {
        let mut definitions = vec!["id INTEGER PRIMARY KEY NOT NULL".to_string()];
        definitions.extend(
            kind.columns
                .iter()
                .map(|column| format!("{} {}", column.name, column.ty.sql_type())),
        );
        if kind.versioned {
            definitions.push("version INTEGER NOT NULL DEFAULT 1".to_string());
        }

        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            kind.table,
            definitions.join(", ")
        ))?;

        // Additive migration for tables created by older builds
        let existing = self.existing_columns(kind)?;
        for column in kind.columns {
            if !existing.iter().any(|name| name == column.name) {
                self.conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    kind.table,
                    column.name,
                    column.ty.sql_type()
                ))?;
                tracing::info!("Added column {}.{}", kind.table, column.name);
            }
        }
        if kind.versioned && !existing.iter().any(|name| name == "version") {
            self.conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN version INTEGER NOT NULL DEFAULT 1",
                kind.table
            ))?;
            tracing::info!("Added column {}.version", kind.table);
        }

        Ok(())
    }

    fn insert(&self, kind: &EntityKind, row: &MirrorRow) -> Result<i64> {
        self.write_row(kind, row, "INSERT")
    }

    fn upsert(&self, kind: &EntityKind, row: &MirrorRow) -> Result<i64> {
        if row.id.is_none() {
            return Err(Error::InvalidInput(format!(
                "upsert into '{kind}' requires an id"
            )));
        }
        self.write_row(kind, row, "INSERT OR REPLACE")
    }

    fn update(
        &self,
        kind: &EntityKind,
        id: i64,
        patch: &MirrorRow,
        version: Option<i64>,
    ) -> Result<usize> {
        kind.validate_fields(&patch.fields)?;

        let mut assignments = Vec::new();
        let mut values = Vec::new();
        for column in kind.columns {
            if let Some(value) = patch.fields.get(column.name) {
                assignments.push(format!("{} = ?", column.name));
                values.push(column.to_sql(value)?);
            }
        }
        if let (true, Some(version)) = (kind.versioned, version) {
            assignments.push("version = ?".to_string());
            values.push(SqlValue::Integer(version));
        }

        if assignments.is_empty() {
            return Ok(0);
        }

        values.push(SqlValue::Integer(id));
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?",
            kind.table,
            assignments.join(", ")
        );
        Ok(self.conn.execute(&sql, params_from_iter(values))?)
    }

    fn get(&self, kind: &EntityKind, id: i64) -> Result<Option<MirrorRow>> {
        let sql = format!("{} WHERE id = ?", Self::select_sql(kind));
        let row = self
            .conn
            .query_row(&sql, params![id], |row| Self::parse_row(kind, row))
            .optional()?;
        Ok(row)
    }

    fn get_all(&self, kind: &EntityKind) -> Result<Vec<MirrorRow>> {
        let sql = format!("{} ORDER BY id ASC", Self::select_sql(kind));
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Self::parse_row(kind, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn delete(&self, kind: &EntityKind, id: i64) -> Result<usize> {
        let sql = format!("DELETE FROM {} WHERE id = ?", kind.table);
        Ok(self.conn.execute(&sql, params![id])?)
    }

    fn replace_all(&self, kind: &EntityKind, rows: &[MirrorRow]) -> Result<ReplaceOutcome> {
        if rows.is_empty() {
            return Ok(ReplaceOutcome::KeptExisting);
        }

        // Dropping the transaction without commit rolls back
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(&format!("DELETE FROM {}", kind.table), [])?;
        for row in rows {
            self.insert(kind, row)?;
        }
        tx.commit()?;

        Ok(ReplaceOutcome::Replaced(rows.len()))
    }

    fn count(&self, kind: &EntityKind) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.table),
            [],
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|error| Error::Database(error.to_string()))
    }

    fn next_temp_id(&self, kind: &EntityKind) -> Result<i64> {
        let floor_key = format!("{TEMP_ID_FLOOR_PREFIX}{}", kind.table);
        let id: i64 = self.conn.query_row(
            &format!(
                "SELECT MIN(
                    (SELECT COALESCE(MIN(id), 0) FROM {}),
                    (SELECT COALESCE(MIN(local_temp_id), 0) FROM sync_queue WHERE table_name = ?1),
                    (SELECT COALESCE(MIN(record_id), 0) FROM sync_queue WHERE table_name = ?1),
                    (SELECT COALESCE(MIN(CAST(value AS INTEGER)), 0) FROM sync_meta WHERE key = ?2),
                    0
                 ) - 1",
                kind.table
            ),
            params![kind.table, floor_key],
            |row| row.get(0),
        )?;
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
            params![floor_key, id.to_string()],
        )?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::entity::{CLIENTS, JOBS, STATUSES};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteMirrorRepository::new(db.connection());
        repo.create_table(&CLIENTS).unwrap();
        repo.create_table(&STATUSES).unwrap();
        repo.create_table(&JOBS).unwrap();
        db
    }

    #[test]
    fn test_create_table_idempotent() {
        let db = setup();
        let repo = SqliteMirrorRepository::new(db.connection());
        repo.create_table(&CLIENTS).unwrap();
        repo.create_table(&CLIENTS).unwrap();
        assert_eq!(repo.count(&CLIENTS).unwrap(), 0);
    }

    #[test]
    fn test_create_table_adds_missing_version_column() {
        let db = Database::open_in_memory().unwrap();
        db.connection()
            .execute_batch(
                "CREATE TABLE statuses (id INTEGER PRIMARY KEY NOT NULL, label TEXT);
                 INSERT INTO statuses (id, label) VALUES (1, 'Open');",
            )
            .unwrap();

        let repo = SqliteMirrorRepository::new(db.connection());
        repo.create_table(&STATUSES).unwrap();

        let row = repo.get(&STATUSES, 1).unwrap().unwrap();
        assert_eq!(row.get("label"), Some(&json!("Open")));
        assert_eq!(row.version, Some(1));
    }

    #[test]
    fn test_insert_roundtrip() {
        let db = setup();
        let repo = SqliteMirrorRepository::new(db.connection());

        let row = MirrorRow::new()
            .field("business_name", "Acme")
            .field("phone", "555");
        let id = repo.insert(&CLIENTS, &row).unwrap();

        let all = repo.get_all(&CLIENTS).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, Some(id));
        assert_eq!(all[0].fields, row.fields);
        assert_eq!(all[0].version, Some(1));
    }

    #[test]
    fn test_insert_preserves_supplied_id() {
        let db = setup();
        let repo = SqliteMirrorRepository::new(db.connection());

        let id = repo
            .insert(&CLIENTS, &MirrorRow::with_id(42).field("business_name", "Acme"))
            .unwrap();
        assert_eq!(id, 42);
        assert!(repo.get(&CLIENTS, 42).unwrap().is_some());
    }

    #[test]
    fn test_update_without_version_keeps_version() {
        let db = setup();
        let repo = SqliteMirrorRepository::new(db.connection());
        repo.insert(&STATUSES, &MirrorRow::with_id(1).field("label", "Open").version(2))
            .unwrap();

        let changed = repo
            .update(&STATUSES, 1, &MirrorRow::new().field("label", "Opened"), None)
            .unwrap();
        assert_eq!(changed, 1);

        let row = repo.get(&STATUSES, 1).unwrap().unwrap();
        assert_eq!(row.get("label"), Some(&json!("Opened")));
        assert_eq!(row.version, Some(2));

        repo.update(&STATUSES, 1, &MirrorRow::new(), Some(3)).unwrap();
        assert_eq!(repo.get(&STATUSES, 1).unwrap().unwrap().version, Some(3));
    }

    #[test]
    fn test_replace_all_empty_keeps_rows() {
        let db = setup();
        let repo = SqliteMirrorRepository::new(db.connection());
        repo.insert(&CLIENTS, &MirrorRow::with_id(1).field("business_name", "Old"))
            .unwrap();

        let outcome = repo.replace_all(&CLIENTS, &[]).unwrap();
        assert_eq!(outcome, ReplaceOutcome::KeptExisting);
        assert_eq!(repo.count(&CLIENTS).unwrap(), 1);
    }

    #[test]
    fn test_replace_all_is_exact() {
        let db = setup();
        let repo = SqliteMirrorRepository::new(db.connection());
        repo.insert(&CLIENTS, &MirrorRow::with_id(1).field("business_name", "Old"))
            .unwrap();

        let rows = vec![
            MirrorRow::with_id(5).field("business_name", "A").version(3),
            MirrorRow::with_id(6).field("business_name", "B").version(1),
        ];
        let outcome = repo.replace_all(&CLIENTS, &rows).unwrap();
        assert_eq!(outcome, ReplaceOutcome::Replaced(2));
        assert_eq!(repo.get_all(&CLIENTS).unwrap(), rows);
    }

    #[test]
    fn test_replace_all_rolls_back_on_failure() {
        let db = setup();
        let repo = SqliteMirrorRepository::new(db.connection());
        repo.insert(&CLIENTS, &MirrorRow::with_id(1).field("business_name", "Old"))
            .unwrap();

        // Duplicate ids violate the primary key halfway through
        let rows = vec![
            MirrorRow::with_id(2).field("business_name", "A"),
            MirrorRow::with_id(2).field("business_name", "B"),
        ];
        assert!(repo.replace_all(&CLIENTS, &rows).is_err());

        let remaining = repo.get_all(&CLIENTS).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, Some(1));
    }

    #[test]
    fn test_next_temp_id_is_negative_and_decreasing() {
        let db = setup();
        let repo = SqliteMirrorRepository::new(db.connection());
        assert_eq!(repo.next_temp_id(&CLIENTS).unwrap(), -1);

        repo.insert(&CLIENTS, &MirrorRow::with_id(-1).field("business_name", "Tmp"))
            .unwrap();
        repo.insert(&CLIENTS, &MirrorRow::with_id(10).field("business_name", "Srv"))
            .unwrap();
        assert_eq!(repo.next_temp_id(&CLIENTS).unwrap(), -2);
        assert_eq!(repo.next_temp_id(&STATUSES).unwrap(), -1);
    }

    #[test]
    fn test_next_temp_id_is_not_reused_after_delete() {
        let db = setup();
        let repo = SqliteMirrorRepository::new(db.connection());

        let first = repo.next_temp_id(&CLIENTS).unwrap();
        repo.insert(&CLIENTS, &MirrorRow::with_id(first).field("business_name", "A"))
            .unwrap();
        repo.delete(&CLIENTS, first).unwrap();

        let second = repo.next_temp_id(&CLIENTS).unwrap();
        assert_eq!((first, second), (-1, -2));
    }

    #[test]
    fn test_next_temp_id_skips_ids_still_queued() {
        let db = setup();
        db.connection()
            .execute(
                "INSERT INTO sync_queue
                    (table_name, op, local_temp_id, payload_json, request_id, nonce, timestamp, created_at)
                 VALUES ('clients', 'insert', -5, '{}', 'k1', 'abcdefghij', 1, 1)",
                [],
            )
            .unwrap();

        let repo = SqliteMirrorRepository::new(db.connection());
        assert_eq!(repo.next_temp_id(&CLIENTS).unwrap(), -6);
    }

    #[test]
    fn test_json_columns_are_restored() {
        let db = setup();
        let repo = SqliteMirrorRepository::new(db.connection());
        repo.insert(
            &JOBS,
            &MirrorRow::with_id(1)
                .field("description", "Fix roof")
                .field("participants", json!([3, 4])),
        )
        .unwrap();

        let row = repo.get(&JOBS, 1).unwrap().unwrap();
        assert_eq!(row.get("participants"), Some(&json!([3, 4])));
        assert_eq!(row.version, None);
    }

    #[test]
    fn test_delete() {
        let db = setup();
        let repo = SqliteMirrorRepository::new(db.connection());
        repo.insert(&CLIENTS, &MirrorRow::with_id(1).field("business_name", "Gone"))
            .unwrap();

        assert_eq!(repo.delete(&CLIENTS, 1).unwrap(), 1);
        assert_eq!(repo.delete(&CLIENTS, 1).unwrap(), 0);
        assert!(repo.get(&CLIENTS, 1).unwrap().is_none());
    }
}
