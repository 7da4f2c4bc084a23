//! Classified fetch results

use crate::storage::{StateStore, StorageResult};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::time::Duration;
use url::Url;

/// Terminal classification of a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// 2xx with a body within the size limit
    Success,
    /// 4xx other than 429, or an oversized response; not retried
    ClientError,
    /// 5xx or 429 that persisted through every attempt
    ServerError,
    /// Timeouts and connection failures that persisted through every attempt
    TransientNetworkError,
    /// Blocked by robots.txt or the domain allowlist; nothing was sent
    PolicyDenied,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ClientError => "client-error",
            Self::ServerError => "server-error",
            Self::TransientNetworkError => "transient-network-error",
            Self::PolicyDenied => "policy-denied",
        }
    }

    /// Whether this outcome belongs in the failure ledger
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ClientError | Self::ServerError | Self::TransientNetworkError
        )
    }
}

impl std::fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one logical fetch, after all retries
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: FetchStatus,

    /// Status of the last response received, if any
    pub http_status: Option<StatusCode>,

    /// Response body; present only on success
    pub body: Option<Vec<u8>>,

    /// Headers of the last response received
    pub headers: HeaderMap,

    /// Server-requested wait from the last response
    pub retry_after: Option<Duration>,

    /// Requests actually sent (0 for policy denials)
    pub attempts: u32,

    /// URL after redirects
    pub final_url: Option<Url>,

    /// Wall time from call to outcome, including waits
    pub elapsed: Duration,

    /// Description of the failure for non-success outcomes
    pub error: Option<String>,
}

impl FetchOutcome {
    pub(crate) fn new(status: FetchStatus) -> Self {
        Self {
            status,
            http_status: None,
            body: None,
            headers: HeaderMap::new(),
            retry_after: None,
            attempts: 0,
            final_url: None,
            elapsed: Duration::ZERO,
            error: None,
        }
    }

    pub(crate) fn denied(reason: String) -> Self {
        Self {
            error: Some(reason),
            ..Self::new(FetchStatus::PolicyDenied)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> Option<String> {
        self.body
            .as_deref()
            .map(|body| String::from_utf8_lossy(body).into_owned())
    }

    /// Short description for logs and the failure ledger
    pub fn describe(&self) -> String {
        match (&self.error, self.http_status) {
            (Some(error), _) => error.clone(),
            (None, Some(code)) => format!("HTTP {}", code.as_u16()),
            (None, None) => self.status.to_string(),
        }
    }

    /// Applies this outcome to a job's failure ledger
    ///
    /// Failures add their attempt count to the URL's retry counter, a success
    /// resolves an open entry, and policy denials leave the ledger untouched.
    pub fn record(&self, store: &dyn StateStore, job_name: &str, url: &str) -> StorageResult<()> {
        match self.status {
            FetchStatus::Success => {
                if store.clear_failure(job_name, url)? {
                    tracing::info!("Resolved previously failed URL {} for job {}", url, job_name);
                }
            }
            FetchStatus::PolicyDenied => {}
            _ => {
                let attempts = self.attempts.max(1);
                let total = store.record_failures(job_name, url, &self.describe(), attempts)?;
                tracing::debug!(
                    "Recorded failure of {} for job {} ({} attempts total)",
                    url,
                    job_name,
                    total
                );
            }
        }
        Ok(())
    }
}
