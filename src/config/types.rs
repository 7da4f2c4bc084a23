use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Ripple-Fetch
///
/// Every section is optional; an empty file yields the polite defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fetch: FetchSettings,
    pub policy: PolicySettings,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentSettings,
    pub storage: StorageSettings,
    /// Per-domain rate overrides
    #[serde(rename = "domain")]
    pub domains: Vec<DomainOverride>,
}

/// Fetch client and rate limiter behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FetchSettings {
    /// Default token refill rate for every domain
    pub requests_per_second: f64,

    /// Token bucket capacity (maximum burst)
    pub burst: u32,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// TCP/TLS connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Retries after the first attempt; total attempts is this plus one
    pub max_retries: u32,

    /// Responses larger than this are aborted
    pub max_response_bytes: u64,

    /// Base delay of the exponential backoff in milliseconds
    pub base_backoff_ms: u64,

    /// Backoff multiplier applied to 429/503 responses without Retry-After
    pub overload_penalty: f64,

    /// Retry-After values above this stop retrying instead of waiting
    pub max_retry_after_secs: u64,

    /// Fraction of requests that get a random pre-request delay
    pub jitter_probability: f64,

    /// Upper bound of the pre-request delay in milliseconds
    pub jitter_max_ms: u64,

    /// Refuse plain-http targets
    pub https_only: bool,

    /// Domain patterns the client may contact; empty means any
    pub allowed_domains: Vec<String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            burst: 1,
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_retries: 2,
            max_response_bytes: 10 * 1024 * 1024,
            base_backoff_ms: 1000,
            overload_penalty: 3.0,
            max_retry_after_secs: 300,
            jitter_probability: 0.3,
            jitter_max_ms: 200,
            https_only: false,
            allowed_domains: Vec::new(),
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }

    /// Total attempts per fetch, including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// What to assume when a site's policy cannot be retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Treat the site as allowing everything
    #[default]
    Open,
    /// Treat the site as disallowing everything
    Closed,
}

/// Robots.txt compliance settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PolicySettings {
    /// Set to false only for controlled testing against your own hosts
    pub enforce: bool,

    pub fail_mode: FailMode,

    /// How long a fetched policy stays valid, in seconds
    pub cache_ttl_secs: u64,

    /// Product token matched against `User-agent` groups
    pub agent: String,

    /// Policy bodies larger than this are treated as unreachable
    pub max_policy_bytes: u64,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            enforce: true,
            fail_mode: FailMode::Open,
            cache_ttl_secs: 24 * 60 * 60,
            agent: "RippleFetch".to_string(),
            max_policy_bytes: 500 * 1024,
        }
    }
}

impl PolicySettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// User agent rotation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct UserAgentSettings {
    /// Custom user agent strings; empty uses the built-in browser pool
    pub pool: Vec<String>,

    /// Fixed seed for header rotation; random per process when absent
    pub seed: Option<u64>,
}

/// Durable state location
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StorageSettings {
    /// Path to the SQLite database file
    pub database_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: "./ripple.db".to_string(),
        }
    }
}

/// Rate override for one domain pattern
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DomainOverride {
    /// Domain pattern (e.g., "example.com" or "*.example.com")
    pub domain: String,

    pub requests_per_second: f64,
}
