//! SQLite storage implementation
//!
//! This module provides the SQLite-backed [`StateStore`] and [`PolicyStore`].
//! The connection runs in WAL mode with `synchronous = FULL`, so a committed
//! write survives a crash of the process or the machine.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    FailedUrlEntry, JobSummary, PolicyStore, StateStore, StorageError, StorageResult,
    StoredPolicy,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How long a writer waits for another process holding the database lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const FAILURE_COLUMNS: &str =
    "job_name, url, last_error, retry_count, first_failed_at, last_attempt_at, resolved_at";

/// SQLite storage backend
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates a state database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open or initialize the database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        initialize_schema(&conn)?;
        tracing::debug!("Opened state database at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for tests and dry runs)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // rusqlite connections are not Sync; the mutex only hands the connection
    // to one caller at a time. Atomicity comes from SQLite transactions.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn query_failures(&self, sql: &str, job_name: &str) -> StorageResult<Vec<FailedUrlEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let entries = stmt
            .query_map(params![job_name], failure_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn require_job(job_name: &str) -> StorageResult<()> {
    if job_name.is_empty() {
        return Err(StorageError::InvalidInput(
            "job name cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn failure_from_row(row: &Row<'_>) -> rusqlite::Result<FailedUrlEntry> {
    Ok(FailedUrlEntry {
        job_name: row.get(0)?,
        url: row.get(1)?,
        last_error: row.get(2)?,
        retry_count: row.get(3)?,
        first_failed_at: row.get(4)?,
        last_attempt_at: row.get(5)?,
        resolved_at: row.get(6)?,
    })
}

fn insert_seen(conn: &Connection, job_name: &str, item_ids: &[String]) -> StorageResult<usize> {
    let now = Utc::now();
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO seen_items (job_name, item_id, seen_at) VALUES (?1, ?2, ?3)",
    )?;

    let mut inserted = 0;
    for item_id in item_ids {
        inserted += stmt.execute(params![job_name, item_id, now])?;
    }
    Ok(inserted)
}

fn upsert_cursor(conn: &Connection, job_name: &str, cursor: &str) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO cursors (job_name, cursor, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(job_name) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at",
        params![job_name, cursor, Utc::now()],
    )?;
    Ok(())
}

impl StateStore for SqliteStore {
    // ===== Cursors =====

    fn get_cursor(&self, job_name: &str) -> StorageResult<Option<String>> {
        let cursor = self
            .conn()
            .query_row(
                "SELECT cursor FROM cursors WHERE job_name = ?1",
                params![job_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor)
    }

    fn set_cursor(&self, job_name: &str, cursor: &str) -> StorageResult<()> {
        require_job(job_name)?;
        upsert_cursor(&self.conn(), job_name, cursor)
    }

    // ===== Seen Items =====

    fn has_seen(&self, job_name: &str, item_id: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM seen_items WHERE job_name = ?1 AND item_id = ?2",
                params![job_name, item_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_seen(&self, job_name: &str, item_id: &str) -> StorageResult<bool> {
        require_job(job_name)?;
        let inserted = insert_seen(&self.conn(), job_name, &[item_id.to_string()])?;
        Ok(inserted == 1)
    }

    fn mark_seen_batch(&self, job_name: &str, item_ids: &[String]) -> StorageResult<usize> {
        require_job(job_name)?;
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = insert_seen(&tx, job_name, item_ids)?;
        tx.commit()?;
        Ok(inserted)
    }

    fn commit_batch(
        &self,
        job_name: &str,
        item_ids: &[String],
        cursor: &str,
    ) -> StorageResult<usize> {
        require_job(job_name)?;
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = insert_seen(&tx, job_name, item_ids)?;
        upsert_cursor(&tx, job_name, cursor)?;
        tx.commit()?;

        tracing::debug!(
            "Committed batch for job {}: {} new of {} items, cursor {}",
            job_name,
            inserted,
            item_ids.len(),
            cursor
        );
        Ok(inserted)
    }

    // ===== Failure Ledger =====

    fn record_failures(
        &self,
        job_name: &str,
        url: &str,
        error: &str,
        attempts: u32,
    ) -> StorageResult<u32> {
        require_job(job_name)?;
        let now = Utc::now();
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO failed_urls
             (job_name, url, last_error, retry_count, first_failed_at, last_attempt_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, NULL)
             ON CONFLICT(job_name, url) DO UPDATE SET
                last_error = excluded.last_error,
                retry_count = failed_urls.retry_count + excluded.retry_count,
                last_attempt_at = excluded.last_attempt_at,
                resolved_at = NULL",
            params![job_name, url, error, attempts, now],
        )?;

        let retry_count: u32 = tx.query_row(
            "SELECT retry_count FROM failed_urls WHERE job_name = ?1 AND url = ?2",
            params![job_name, url],
            |row| row.get(0),
        )?;
        tx.commit()?;

        Ok(retry_count)
    }

    fn list_failures(&self, job_name: &str) -> StorageResult<Vec<FailedUrlEntry>> {
        self.query_failures(
            &format!(
                "SELECT {} FROM failed_urls WHERE job_name = ?1 AND resolved_at IS NULL
                 ORDER BY last_attempt_at ASC, url ASC",
                FAILURE_COLUMNS
            ),
            job_name,
        )
    }

    fn failure_history(&self, job_name: &str) -> StorageResult<Vec<FailedUrlEntry>> {
        self.query_failures(
            &format!(
                "SELECT {} FROM failed_urls WHERE job_name = ?1
                 ORDER BY first_failed_at ASC, url ASC",
                FAILURE_COLUMNS
            ),
            job_name,
        )
    }

    fn clear_failure(&self, job_name: &str, url: &str) -> StorageResult<bool> {
        let updated = self.conn().execute(
            "UPDATE failed_urls SET resolved_at = ?3
             WHERE job_name = ?1 AND url = ?2 AND resolved_at IS NULL",
            params![job_name, url, Utc::now()],
        )?;
        Ok(updated > 0)
    }

    // ===== Operator Inspection =====

    fn job_summary(&self, job_name: &str) -> StorageResult<JobSummary> {
        let conn = self.conn();

        let cursor: Option<(String, DateTime<Utc>)> = conn
            .query_row(
                "SELECT cursor, updated_at FROM cursors WHERE job_name = ?1",
                params![job_name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let seen_items: i64 = conn.query_row(
            "SELECT COUNT(*) FROM seen_items WHERE job_name = ?1",
            params![job_name],
            |row| row.get(0),
        )?;

        let (open_failures, resolved_failures): (i64, i64) = conn.query_row(
            "SELECT COUNT(*) - COUNT(resolved_at), COUNT(resolved_at)
             FROM failed_urls WHERE job_name = ?1",
            params![job_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let (cursor, cursor_updated_at) = match cursor {
            Some((cursor, at)) => (Some(cursor), Some(at)),
            None => (None, None),
        };

        Ok(JobSummary {
            job_name: job_name.to_string(),
            cursor,
            cursor_updated_at,
            seen_items: seen_items as u64,
            open_failures: open_failures as u64,
            resolved_failures: resolved_failures as u64,
        })
    }

    fn list_jobs(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT job_name FROM cursors
             UNION SELECT job_name FROM seen_items
             UNION SELECT job_name FROM failed_urls
             ORDER BY job_name",
        )?;
        let jobs = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(jobs)
    }

    fn reset_job(&self, job_name: &str) -> StorageResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM cursors WHERE job_name = ?1", params![job_name])?;
        tx.execute("DELETE FROM seen_items WHERE job_name = ?1", params![job_name])?;
        tx.execute("DELETE FROM failed_urls WHERE job_name = ?1", params![job_name])?;
        tx.commit()?;

        tracing::info!("Reset all persisted state for job {}", job_name);
        Ok(())
    }
}

impl PolicyStore for SqliteStore {
    fn load_policy(&self, origin: &str) -> StorageResult<Option<StoredPolicy>> {
        let policy = self
            .conn()
            .query_row(
                "SELECT origin, body, source, fetched_at, ttl_secs FROM policy_cache WHERE origin = ?1",
                params![origin],
                |row| {
                    Ok(StoredPolicy {
                        origin: row.get(0)?,
                        body: row.get(1)?,
                        source: row.get(2)?,
                        fetched_at: row.get(3)?,
                        ttl_secs: row.get::<_, i64>(4)?.max(0) as u64,
                    })
                },
            )
            .optional()?;
        Ok(policy)
    }

    fn save_policy(&self, policy: &StoredPolicy) -> StorageResult<()> {
        let ttl_secs = i64::try_from(policy.ttl_secs).unwrap_or(i64::MAX);
        self.conn().execute(
            "INSERT OR REPLACE INTO policy_cache (origin, body, source, fetched_at, ttl_secs)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                policy.origin,
                policy.body,
                policy.source,
                policy.fetched_at,
                ttl_secs
            ],
        )?;
        Ok(())
    }

    fn delete_policy(&self, origin: &str) -> StorageResult<()> {
        self.conn()
            .execute("DELETE FROM policy_cache WHERE origin = ?1", params![origin])?;
        Ok(())
    }
}
