//! Table definitions for the SQLite content store.

use rusqlite::Connection;
use tracing::info;

use crate::error::DbResult;

/// Current schema version, kept in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS owners (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS content (
    id TEXT PRIMARY KEY NOT NULL,
    kind TEXT NOT NULL,
    owner_id INTEGER NOT NULL REFERENCES owners(id),
    locator TEXT,
    created_at TEXT NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    name TEXT,
    payload TEXT
);

CREATE INDEX IF NOT EXISTS idx_content_kind ON content(kind);
CREATE INDEX IF NOT EXISTS idx_content_owner ON content(owner_id);
"#;

/// Create tables on a fresh database. Existing databases at the current
/// version are left alone.
pub fn init_schema(conn: &Connection) -> DbResult<()> {
    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current >= SCHEMA_VERSION {
        info!(version = current, "database schema is up to date");
        return Ok(());
    }

    info!(from = current, to = SCHEMA_VERSION, "creating database schema");
    conn.execute_batch(SCHEMA)?;
    conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
    Ok(())
}
