//! Database connection management

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Mutex;

use super::migrations;
use crate::error::{Error, Result};

/// Database wrapper for the on-device `SQLite` file
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;

        let database = Self {
            conn,
            path: Some(path),
        };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let database = Self { conn, path: None };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for a single-writer mobile workload
    fn configure(&self) -> Result<()> {
        // In-memory databases report "memory" instead of switching to WAL
        self.conn.pragma_update(None, "journal_mode", "WAL").ok();
        self.conn.pragma_update(None, "synchronous", "NORMAL").ok();
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn)
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Get a mutable reference to the underlying connection (for transactions)
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Filesystem path, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Process-wide handle to the single embedded store connection.
///
/// Cloning is cheap; every component receives a clone instead of reaching for a
/// global. Each call to [`Store::with_connection`] holds the lock only for the
/// synchronous closure, so no transaction ever spans an await point.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Option<Database>>>,
}

impl Store {
    /// Wrap an already opened database.
    pub fn from_database(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(db))),
        }
    }

    /// Open the store at the given filesystem path.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let shown = path.display().to_string();
        let db = tokio::task::spawn_blocking(move || Database::open(path))
            .await
            .map_err(|error| Error::Database(error.to_string()))??;
        tracing::info!("Opened local store at {shown}");
        Ok(Self::from_database(db))
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    /// Close the underlying connection. Later calls fail with [`Error::Closed`].
    pub async fn close(&self) -> Result<()> {
        let db = self.inner.lock().await.take();
        if let Some(db) = db {
            db.conn
                .close()
                .map_err(|(_, error)| Error::Sqlite(error))?;
            tracing::debug!("Closed local store");
        }
        Ok(())
    }

    /// Returns whether the connection is still open.
    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// Run a synchronous closure against the connection.
    ///
    /// On a multi-threaded runtime the closure runs under `block_in_place`, so
    /// disk I/O never stalls other tasks scheduled on the same worker.
    pub async fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.inner.lock().await;
        let db = guard.as_mut().ok_or(Error::Closed)?;
        run_blocking(|| f(db.connection_mut()))
    }
}

/// `block_in_place` panics on a current-thread runtime; run inline there.
fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}
