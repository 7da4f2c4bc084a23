//! Ripple-Fetch: a polite fetch and incremental-state engine
//!
//! This crate fetches remote HTML documents for an extraction pipeline while
//! respecting per-domain rate limits and robots.txt, retrying transient failures
//! with backoff, and persisting job cursors, seen items and failed URLs so that
//! interrupted jobs resume exactly where they stopped.

pub mod client;
pub mod config;
pub mod http;
pub mod policy;
pub mod ratelimit;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Ripple-Fetch operations
///
/// Ordinary HTTP failures never show up here: the fetch client classifies
/// them into a [`client::FetchOutcome`]. These variants are programmer errors,
/// configuration problems, storage failures and caller-requested cancellation.
#[derive(Debug, Error)]
pub enum RippleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fetch of {url} was cancelled")]
    Cancelled { url: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Unsupported URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Result type alias for Ripple-Fetch operations
pub type Result<T> = std::result::Result<T, RippleError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use client::{FetchClient, FetchContext, FetchOutcome, FetchStatus};
pub use config::Config;
pub use policy::{FailMode, PolicyCache, PolicyDecision};
pub use ratelimit::DomainRateLimiter;
pub use storage::{FailedUrlEntry, SqliteStore, StateStore};
pub use url::{extract_domain, parse_target};
