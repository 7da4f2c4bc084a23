//! Cached policy entries
//!
//! An entry is replaced wholesale on refresh; it is never patched in place.

use crate::policy::RobotsPolicy;
use crate::storage::StoredPolicy;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// How a cached policy was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySource {
    /// robots.txt was fetched and parsed
    Fetched,
    /// The site answered 4xx: no policy published, everything allowed
    NotPublished,
    /// The policy could not be retrieved; everything allowed
    FailOpen,
    /// The policy could not be retrieved; everything denied
    FailClosed,
}

impl PolicySource {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Fetched => "fetched",
            Self::NotPublished => "not-published",
            Self::FailOpen => "fail-open",
            Self::FailClosed => "fail-closed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "fetched" => Some(Self::Fetched),
            "not-published" => Some(Self::NotPublished),
            "fail-open" => Some(Self::FailOpen),
            "fail-closed" => Some(Self::FailClosed),
            _ => None,
        }
    }

    /// Whether the entry stands in for a policy that could not be retrieved
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::FailOpen | Self::FailClosed)
    }
}

impl std::fmt::Display for PolicySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// A policy for one origin together with its freshness data
#[derive(Debug, Clone)]
pub struct CachedPolicy {
    pub policy: RobotsPolicy,

    /// Raw robots.txt body; empty for entries not built from a fetched file
    pub body: String,

    pub source: PolicySource,

    /// When the policy was fetched (or the fetch failed)
    pub fetched_at: DateTime<Utc>,

    pub ttl: Duration,
}

impl CachedPolicy {
    /// Creates an entry stamped with the current time
    pub fn new(policy: RobotsPolicy, body: String, source: PolicySource, ttl: Duration) -> Self {
        Self {
            policy,
            body,
            source,
            fetched_at: Utc::now(),
            ttl,
        }
    }

    /// Builds the entry used when a site's policy is unavailable
    pub fn fallback(source: PolicySource, ttl: Duration) -> Self {
        let policy = match source {
            PolicySource::FailClosed => RobotsPolicy::deny_all(),
            _ => RobotsPolicy::allow_all(),
        };
        Self::new(policy, String::new(), source, ttl)
    }

    /// Checks if the entry has outlived its TTL
    pub fn is_stale(&self) -> bool {
        self.age() >= self.ttl
    }

    /// Returns how long ago the entry was fetched
    ///
    /// Timestamps in the future (clock changes) count as age zero.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Returns when the entry stops being valid
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.fetched_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Converts the entry into its persisted form
    pub fn to_stored(&self, origin: &str) -> StoredPolicy {
        StoredPolicy {
            origin: origin.to_string(),
            body: self.body.clone(),
            source: self.source.to_db_string().to_string(),
            fetched_at: self.fetched_at,
            ttl_secs: self.ttl.as_secs(),
        }
    }

    /// Rebuilds an entry from its persisted form
    ///
    /// Returns `None` when the stored source marker is unknown.
    pub fn from_stored(stored: &StoredPolicy) -> Option<Self> {
        let source = PolicySource::from_db_string(&stored.source)?;
        let policy = match source {
            PolicySource::Fetched => RobotsPolicy::parse(&stored.body),
            PolicySource::FailClosed => RobotsPolicy::deny_all(),
            PolicySource::NotPublished | PolicySource::FailOpen => RobotsPolicy::allow_all(),
        };

        Some(Self {
            policy,
            body: stored.body.clone(),
            source,
            fetched_at: stored.fetched_at,
            ttl: Duration::from_secs(stored.ttl_secs),
        })
    }
}
