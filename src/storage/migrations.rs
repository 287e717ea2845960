//! File-based, checksum-verified schema migrations.
//!
//! Each migration lives under `src/storage/migrations/NNNN_description.sql`
//! and is embedded into the binary at compile time (so a single `stratum`
//! binary never depends on a sidecar directory at runtime); migrations are
//! applied in the fixed sorted order below, which mirrors the filesystem
//! discovery order the original implementation used (`NNNN_*.sql`, sorted
//! lexicographically).
//!
//! Checksums are recorded per applied version and re-verified on every boot:
//! a mismatch for a version already recorded is treated as unrecoverable —
//! refusing to boot is the correct behavior, since silently proceeding could
//! apply a different migration body than the one the running schema assumes.

use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::Result;

struct MigrationFile {
    version: &'static str,
    sql: &'static str,
}

/// Migrations in sorted-by-filename order. Keep this sorted when adding new
/// files — the runner does not re-sort.
const MIGRATIONS: &[MigrationFile] = &[
    MigrationFile {
        version: "0001",
        sql: include_str!("migrations/0001_initial_schema.sql"),
    },
    MigrationFile {
        version: "0002",
        sql: include_str!("migrations/0002_cleanup_and_tag_indexes.sql"),
    },
    MigrationFile {
        version: "0003",
        sql: include_str!("migrations/0003_canonical_indexes.sql"),
    },
];

#[derive(Debug)]
pub enum MigrationError {
    ChecksumMismatch {
        version: String,
        recorded: String,
        current: String,
    },
    LockTimeout {
        path: String,
        timeout_secs: f64,
    },
    Sql(rusqlite::Error),
    Io(std::io::Error),
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationError::ChecksumMismatch {
                version,
                recorded,
                current,
            } => write!(
                f,
                "checksum mismatch for migration {version}: recorded={recorded} current={current}"
            ),
            MigrationError::LockTimeout { path, timeout_secs } => write!(
                f,
                "timed out waiting for migration lock {path} ({timeout_secs}s)"
            ),
            MigrationError::Sql(e) => write!(f, "migration sql error: {e}"),
            MigrationError::Io(e) => write!(f, "migration io error: {e}"),
        }
    }
}

impl std::error::Error for MigrationError {}

impl From<rusqlite::Error> for MigrationError {
    fn from(e: rusqlite::Error) -> Self {
        MigrationError::Sql(e)
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(e: std::io::Error) -> Self {
        MigrationError::Io(e)
    }
}

/// SHA-256 over the file bytes after normalizing CRLF -> LF, so a checkout
/// on a different platform doesn't trip the checksum check.
fn normalized_checksum(sql: &str) -> String {
    let normalized = sql.replace("\r\n", "\n").replace('\r', "\n");
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)
}

fn ensure_schema_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL,
            checksum TEXT NOT NULL
        )",
    )
}

fn is_comment_only(statement: &str) -> bool {
    statement
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .all(|l| l.starts_with("--"))
}

/// Split a SQL script on `;`, respecting single/double-quoted strings, and
/// drop empty or pure-comment statements.
fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut buffer = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut prev = '\0';

    for ch in script.chars() {
        match ch {
            '\'' if !in_double && prev != '\\' => in_single = !in_single,
            '"' if !in_single && prev != '\\' => in_double = !in_double,
            _ => {}
        }
        if ch == ';' && !in_single && !in_double {
            let candidate = buffer.trim().to_string();
            if !candidate.is_empty() && !is_comment_only(&candidate) {
                statements.push(candidate);
            }
            buffer.clear();
        } else {
            buffer.push(ch);
        }
        prev = ch;
    }
    let tail = buffer.trim().to_string();
    if !tail.is_empty() && !is_comment_only(&tail) {
        statements.push(tail);
    }
    statements
}

fn is_ignorable_add_column_error(statement: &str, err: &rusqlite::Error) -> bool {
    let upper = statement.trim_start().to_uppercase();
    if !(upper.starts_with("ALTER TABLE") && upper.contains("ADD COLUMN")) {
        return false;
    }
    err.to_string().to_lowercase().contains("duplicate column name")
}

fn execute_script(conn: &Connection, script: &str) -> rusqlite::Result<()> {
    for statement in split_statements(script) {
        if let Err(e) = conn.execute(&statement, []) {
            if is_ignorable_add_column_error(&statement, &e) {
                continue;
            }
            return Err(e);
        }
    }
    Ok(())
}

/// Create the current schema directly (used for in-memory stores, which
/// never persist a migration history across restarts).
pub(super) fn create_current_schema(conn: &Connection) -> Result<()> {
    for m in MIGRATIONS {
        execute_script(conn, m.sql).map_err(MigrationError::from)?;
    }
    Ok(())
}

/// Acquire a cross-process advisory lock on `lock_path`, polling
/// `try_lock_exclusive` until it succeeds or `timeout` elapses.
fn acquire_migration_lock(lock_path: &Path, timeout: Duration) -> Result<std::fs::File> {
    use fs2::FileExt;

    if let Some(parent) = lock_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(MigrationError::from)?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(lock_path)
        .map_err(MigrationError::from)?;

    let start = Instant::now();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(file),
            Err(_) if start.elapsed() < timeout => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => {
                return Err(MigrationError::LockTimeout {
                    path: lock_path.display().to_string(),
                    timeout_secs: timeout.as_secs_f64(),
                }
                .into())
            }
        }
    }
}

fn lock_path_for(db_path: &str) -> std::path::PathBuf {
    if let Ok(explicit) = std::env::var("DB_MIGRATION_LOCK_FILE") {
        if !explicit.trim().is_empty() {
            return std::path::PathBuf::from(explicit);
        }
    }
    std::path::PathBuf::from(format!("{db_path}.migrate.lock"))
}

fn lock_timeout() -> Duration {
    let secs = std::env::var("DB_MIGRATION_LOCK_TIMEOUT_SEC")
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(10.0)
        .max(0.0);
    Duration::from_secs_f64(secs)
}

/// Apply all pending migrations, serialized by a cross-process file lock.
/// Fatal on checksum mismatch or lock timeout — refusing to boot is correct.
pub fn run_migrations(conn: &Connection, db_path: &str) -> Result<()> {
    let lock_path = lock_path_for(db_path);
    let lock_file = acquire_migration_lock(&lock_path, lock_timeout())?;

    let result = apply_pending(conn);

    // fs2 releases the lock on drop, but be explicit for clarity.
    let _ = fs2::FileExt::unlock(&lock_file);
    result
}

fn apply_pending(conn: &Connection) -> Result<()> {
    ensure_schema_migrations_table(conn).map_err(MigrationError::from)?;

    let mut applied: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    {
        let mut stmt = conn
            .prepare("SELECT version, checksum FROM schema_migrations")
            .map_err(MigrationError::from)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(MigrationError::from)?;
        for row in rows {
            let (version, checksum) = row.map_err(MigrationError::from)?;
            applied.insert(version, checksum);
        }
    }

    for m in MIGRATIONS {
        let checksum = normalized_checksum(m.sql);
        if let Some(recorded) = applied.get(m.version) {
            if recorded != &checksum {
                return Err(MigrationError::ChecksumMismatch {
                    version: m.version.to_string(),
                    recorded: recorded.clone(),
                    current: checksum,
                }
                .into());
            }
            continue;
        }

        execute_script(conn, m.sql).map_err(MigrationError::from)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?1, datetime('now'), ?2)",
            rusqlite::params![m.version, checksum],
        )
        .map_err(MigrationError::from)?;
        tracing::info!(version = m.version, "applied migration");
    }

    Ok(())
}

impl From<MigrationError> for crate::error::StratumError {
    fn from(e: MigrationError) -> Self {
        crate::error::StratumError::Fatal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_statements_respects_quotes() {
        let script = "INSERT INTO t VALUES ('a;b'); -- comment\nSELECT 1;";
        let stmts = split_statements(script);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("'a;b'"));
    }

    #[test]
    fn comment_only_statement_is_dropped() {
        let script = "-- just a comment\n;\nSELECT 1;";
        let stmts = split_statements(script);
        assert_eq!(stmts, vec!["SELECT 1".to_string()]);
    }

    #[test]
    fn checksum_stable_across_crlf() {
        let lf = "CREATE TABLE t (a INT);\n";
        let crlf = "CREATE TABLE t (a INT);\r\n";
        assert_eq!(normalized_checksum(lf), normalized_checksum(crlf));
    }

    #[test]
    fn add_column_duplicate_is_ignored() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a INT)").unwrap();
        execute_script(&conn, "ALTER TABLE t ADD COLUMN a INT;").unwrap();
    }

    #[test]
    fn fresh_store_applies_all_migrations() {
        let conn = Connection::open_in_memory().unwrap();
        create_current_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name='idx_paths_memory_domain_path'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
