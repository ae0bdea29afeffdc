//! SQLite connection handle shared by every repository.
//!
//! One connection per store, serialized behind a mutex. `Connection` is
//! `Send`, so `Mutex<Connection>` makes the handle `Send + Sync` without
//! any unsafe claims.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use lore_core::error::LoreError;

use crate::migrations;

/// SQLite store handle. Writes are short (one statement or one explicit
/// transaction), so the mutex is never held across long-running work.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database file, set pragmas, and run every
    /// structural migration.
    pub fn new(path: &Path) -> Result<Self, LoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| LoreError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -65536;",
        )
        .map_err(|e| LoreError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.with_conn(migrations::run_migrations)?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, LoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LoreError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| LoreError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.with_conn(migrations::run_migrations)?;

        Ok(db)
    }

    /// Run a closure against the connection. The mutex is held for the
    /// duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, LoreError>
    where
        F: FnOnce(&Connection) -> Result<T, LoreError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| LoreError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
