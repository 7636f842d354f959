//! SQLite connection handling for the Helpline store.
//!
//! One connection behind a Mutex. Turn appends read the previous timestamp
//! and insert under the same lock, which keeps per-session ordering intact.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::info;

use helpline_core::error::HelplineError;

use crate::migrations;

/// Shared handle to the Helpline database.
///
/// rusqlite's `Connection` is not `Sync`, so access goes through
/// [`Database::with_conn`] or [`Database::with_tx`].
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database file at `path`, creating parent directories and
    /// applying pending migrations.
    ///
    /// File databases run in WAL mode with a 5 second busy timeout so the
    /// CLI can inspect a store another process is writing to.
    pub fn new(path: &Path) -> Result<Self, HelplineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(|e| {
            HelplineError::Storage(format!("Cannot open {}: {}", path.display(), e))
        })?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(pragma_err)?;

        let db = Self::migrated(conn)?;
        info!(path = %path.display(), "Database ready");
        Ok(db)
    }

    /// Fresh in-memory database, used by tests and benches.
    pub fn in_memory() -> Result<Self, HelplineError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| HelplineError::Storage(format!("Cannot open in-memory database: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(pragma_err)?;
        Self::migrated(conn)
    }

    fn migrated(conn: Connection) -> Result<Self, HelplineError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, HelplineError> {
        self.conn
            .lock()
            .map_err(|_| HelplineError::Storage("database mutex poisoned".to_string()))
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, HelplineError>
    where
        F: FnOnce(&Connection) -> Result<T, HelplineError>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside a transaction. It commits when `f` returns `Ok` and
    /// rolls back otherwise.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, HelplineError>
    where
        F: FnOnce(&Connection) -> Result<T, HelplineError>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| HelplineError::Storage(format!("Cannot begin transaction: {}", e)))?;
        let value = f(&*tx)?;
        tx.commit()
            .map_err(|e| HelplineError::Storage(format!("Cannot commit transaction: {}", e)))?;
        Ok(value)
    }
}

fn pragma_err(e: rusqlite::Error) -> HelplineError {
    HelplineError::Storage(format!("Cannot configure connection: {}", e))
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
