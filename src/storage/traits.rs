//! Storage traits and error types
//!
//! This module defines the trait interfaces for the state and policy stores
//! and the records they exchange.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
///
/// A storage error always means the write (or read) did not happen. Callers
/// must not treat a failed `mark_seen` or `set_cursor` as committed.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One entry of the failed-URL ledger
#[derive(Debug, Clone, PartialEq)]
pub struct FailedUrlEntry {
    pub job_name: String,
    pub url: String,
    pub last_error: String,
    /// Total failed attempts recorded for this URL; never decreases
    pub retry_count: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    /// Set once the URL was fetched successfully after failing
    pub resolved_at: Option<DateTime<Utc>>,
}

impl FailedUrlEntry {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Snapshot of a job's persisted state
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub job_name: String,
    pub cursor: Option<String>,
    pub cursor_updated_at: Option<DateTime<Utc>>,
    pub seen_items: u64,
    pub open_failures: u64,
    pub resolved_failures: u64,
}

/// A robots.txt policy as persisted by a [`PolicyStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPolicy {
    /// `scheme://host[:port]` the policy was published on
    pub origin: String,
    pub body: String,
    /// How the policy was obtained (see `policy::PolicySource`)
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

/// Durable per-job cursors, seen items and failure ledger
///
/// Every write is durable when the call returns. Implementations must be safe
/// to share between tasks and threads.
pub trait StateStore: Send + Sync {
    // ===== Cursors =====

    /// Gets the resume point of a job
    fn get_cursor(&self, job_name: &str) -> StorageResult<Option<String>>;

    /// Overwrites the resume point of a job
    fn set_cursor(&self, job_name: &str, cursor: &str) -> StorageResult<()>;

    // ===== Seen Items =====

    /// Checks whether an item was already recorded for a job
    fn has_seen(&self, job_name: &str, item_id: &str) -> StorageResult<bool>;

    /// Records an item as seen
    ///
    /// # Returns
    ///
    /// * `true` - The item was not seen before
    /// * `false` - The item was already recorded (nothing changed)
    fn mark_seen(&self, job_name: &str, item_id: &str) -> StorageResult<bool>;

    /// Records many items in one transaction; returns how many were new
    fn mark_seen_batch(&self, job_name: &str, item_ids: &[String]) -> StorageResult<usize>;

    /// Records a batch of items and the cursor after it atomically
    ///
    /// Either both the items and the cursor are committed or neither is.
    fn commit_batch(&self, job_name: &str, item_ids: &[String], cursor: &str)
        -> StorageResult<usize>;

    // ===== Failure Ledger =====

    /// Records one failed attempt for a URL
    fn record_failure(&self, job_name: &str, url: &str, error: &str) -> StorageResult<u32> {
        self.record_failures(job_name, url, error, 1)
    }

    /// Records `attempts` failed attempts for a URL
    ///
    /// Creates the entry if absent and re-opens it if it was resolved.
    /// Returns the updated retry count.
    fn record_failures(
        &self,
        job_name: &str,
        url: &str,
        error: &str,
        attempts: u32,
    ) -> StorageResult<u32>;

    /// Lists open failures, oldest attempt first
    fn list_failures(&self, job_name: &str) -> StorageResult<Vec<FailedUrlEntry>>;

    /// Lists every failure of a job, including resolved ones
    fn failure_history(&self, job_name: &str) -> StorageResult<Vec<FailedUrlEntry>>;

    /// Marks a failure as resolved after a successful fetch
    ///
    /// Returns whether an open entry existed.
    fn clear_failure(&self, job_name: &str, url: &str) -> StorageResult<bool>;

    // ===== Operator Inspection =====

    /// Summarizes a job's persisted state
    fn job_summary(&self, job_name: &str) -> StorageResult<JobSummary>;

    /// Lists every job with any persisted state
    fn list_jobs(&self) -> StorageResult<Vec<String>>;

    /// Deletes a job's cursor, seen items and failures
    fn reset_job(&self, job_name: &str) -> StorageResult<()>;
}

/// Persistence for the robots.txt policy cache
pub trait PolicyStore: Send + Sync {
    fn load_policy(&self, origin: &str) -> StorageResult<Option<StoredPolicy>>;

    fn save_policy(&self, policy: &StoredPolicy) -> StorageResult<()>;

    /// Forgets a persisted policy so the next lookup fetches it again
    fn delete_policy(&self, origin: &str) -> StorageResult<()>;
}
