//! Storage module for persisting incremental job state
//!
//! This module handles all durable state of the fetch engine:
//! - SQLite database initialization and schema management
//! - Per-job cursors and seen-item sets
//! - The failed-URL ledger
//! - Persisted robots.txt policies

mod schema;
mod sqlite;
mod traits;

pub use schema::{get_schema_version, SCHEMA_VERSION};
pub use sqlite::SqliteStore;
pub use traits::{
    FailedUrlEntry, JobSummary, PolicyStore, StateStore, StorageError, StorageResult,
    StoredPolicy,
};

use sha2::{Digest, Sha256};
use std::path::Path;

/// Separator between fingerprint parts; cannot appear in normal text fields
const FINGERPRINT_SEPARATOR: &[u8] = b"\x1f";

/// Initializes or opens a state database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStore)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_store(path: &Path) -> StorageResult<SqliteStore> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    SqliteStore::new(path)
}

/// Derives a stable item id from the fields that identify an item
///
/// Extraction pipelines use this when the source has no natural id. Parts are
/// joined with a separator so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn item_fingerprint<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(FINGERPRINT_SEPARATOR);
        }
        hasher.update(part.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}
