use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::StorageError;

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 2;

/// Local SQLite database shared by the record caches and the pending-change log.
///
/// Cloning is cheap; all clones use the same connection. The lock is only
/// held for the duration of a single statement batch.
#[derive(Clone)]
pub struct LocalDb {
    conn: Arc<Mutex<Connection>>,
}

impl LocalDb {
    /// Open the database at the given path and bring the schema up to date
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create db directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        apply_migrations(&conn, SCHEMA_VERSION)
            .with_context(|| format!("Failed to migrate database: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "local database ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        apply_migrations(&conn, SCHEMA_VERSION)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn schema_version(&self) -> Result<i32, StorageError> {
        self.with_conn(|conn| Ok(user_version(conn)?))
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        f(&conn)
    }
}

fn user_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// Upgrade the schema to `target`. Only creates what is missing; existing
/// tables and their rows are never dropped.
pub(crate) fn apply_migrations(conn: &Connection, target: i32) -> Result<(), StorageError> {
    let current = user_version(conn)?;
    if current >= target {
        return Ok(());
    }

    if current < 1 && target >= 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS note_cache (
                scope TEXT NOT NULL,
                key TEXT NOT NULL,
                body TEXT NOT NULL,
                cached_at TEXT NOT NULL,
                PRIMARY KEY (scope, key)
            );
            CREATE TABLE IF NOT EXISTS pending_changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL,
                time_key TEXT,
                payload TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );",
        )?;
    }

    if current < 2 && target >= 2 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dayplan_cache (
                scope TEXT NOT NULL,
                key TEXT NOT NULL,
                body TEXT NOT NULL,
                cached_at TEXT NOT NULL,
                PRIMARY KEY (scope, key)
            );",
        )?;
    }

    conn.pragma_update(None, "user_version", target)?;
    tracing::info!(from = current, to = target, "migrated local database schema");
    Ok(())
}
