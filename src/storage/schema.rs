//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Ripple-Fetch state database.

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 1;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One resume point per job
CREATE TABLE IF NOT EXISTS cursors (
    job_name TEXT PRIMARY KEY,
    cursor TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Existence markers for idempotent ingest
CREATE TABLE IF NOT EXISTS seen_items (
    job_name TEXT NOT NULL,
    item_id TEXT NOT NULL,
    seen_at TEXT NOT NULL,
    PRIMARY KEY (job_name, item_id)
) WITHOUT ROWID;

-- Failed URL ledger; resolved entries are kept for audit
CREATE TABLE IF NOT EXISTS failed_urls (
    job_name TEXT NOT NULL,
    url TEXT NOT NULL,
    last_error TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    first_failed_at TEXT NOT NULL,
    last_attempt_at TEXT NOT NULL,
    resolved_at TEXT,
    PRIMARY KEY (job_name, url)
);

CREATE INDEX IF NOT EXISTS idx_failed_urls_open ON failed_urls(job_name, resolved_at);

-- Cached robots.txt policies, one per origin (scheme://host[:port])
CREATE TABLE IF NOT EXISTS policy_cache (
    origin TEXT PRIMARY KEY,
    body TEXT NOT NULL,
    source TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    ttl_secs INTEGER NOT NULL
);
"#;

/// Initializes the database schema
///
/// Safe to run against an existing database; every statement is idempotent.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Reads the schema version recorded in the database
pub fn get_schema_version(conn: &rusqlite::Connection) -> Result<u32, rusqlite::Error> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["cursors", "seen_items", "failed_urls", "policy_cache"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }
}
