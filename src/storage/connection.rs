//! Database connection management.
//!
//! A single embedded SQLite file (or an in-memory database for tests) backs
//! the store. Migrations run once at `open()` time; in-memory stores skip
//! the file-based migration runner entirely and get the current schema
//! recreated fresh, per spec.

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

use super::migrations::run_migrations;
use crate::error::{Result, StratumError};

/// The embedded relational store. Cheap to clone — the connection is shared
/// behind a mutex, matching the single-writer-at-a-time contract the rest of
/// the system assumes (real concurrency comes from the write-lane coordinator
/// queuing ahead of the store, not from parallel connections).
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl Store {
    /// Open or create a database file, applying all pending migrations.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Self::create_connection(db_path)?;
        if db_path != ":memory:" {
            run_migrations(&conn, db_path)
                .map_err(|e| StratumError::Fatal(e.to_string()))?;
        } else {
            // In-memory stores: no migration lock, no checksum history —
            // just create the current schema directly.
            super::migrations::create_current_schema(&conn)?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_string(),
        })
    }

    /// Open an in-memory store, used by tests and by ephemeral callers.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn create_connection(db_path: &str) -> Result<Connection> {
        let conn = if db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open(db_path)?
        };

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            PRAGMA foreign_keys=ON;
            "#,
        )?;
        Ok(conn)
    }

    /// Scoped acquisition of the connection for a read-only closure.
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Scoped acquisition of a transaction, committed on success and rolled
    /// back (by `Drop`) if `f` returns an error.
    pub fn session<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_creates_tables() {
        let store = Store::open_in_memory().unwrap();
        let count: i64 = store
            .with_connection(|c| {
                Ok(c.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='memories'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
