//! Polite fetch client
//!
//! This module performs single logical fetches on behalf of an extraction
//! pipeline:
//! - Domain allowlist and robots.txt checks before any request is sent
//! - Redirects followed by hand, each hop vetted like a fresh target
//! - Per-domain rate limiting, with robots.txt crawl-delays applied
//! - Random pre-request jitter and rotating browser-like headers
//! - One cookie-keeping session per domain
//! - Retries with exponential backoff, honoring `Retry-After`
//!
//! HTTP failures are reported as a classified [`FetchOutcome`], never as `Err`.

mod headers;
mod outcome;
mod retry;

pub use headers::{HeaderProfile, HeaderSet, BROWSER_USER_AGENTS};
pub use outcome::{FetchOutcome, FetchStatus};
pub use retry::{AttemptClass, RetryDecision, RetryPolicy};

use crate::config::{validate, Config, FetchSettings};
use crate::http::{build_http_client, parse_retry_after, read_limited, BodyRead};
use crate::policy::PolicyCache;
use crate::ratelimit::DomainRateLimiter;
use crate::url::{is_domain_allowed, parse_target};
use crate::{Result, RippleError};
use chrono::Utc;
use rand::Rng;
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Redirect hops followed before a fetch is abandoned
pub const MAX_REDIRECTS: u32 = 10;

/// Per-call context supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    /// Job the fetch belongs to; used in log lines
    pub job_name: Option<String>,

    /// Cancels the fetch, including any wait it is in
    pub cancel: CancellationToken,
}

impl FetchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_job(job_name: impl Into<String>) -> Self {
        Self {
            job_name: Some(job_name.into()),
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn job(&self) -> &str {
        self.job_name.as_deref().unwrap_or("-")
    }
}

/// Fetch client shared by all tasks of a process
pub struct FetchClient {
    settings: FetchSettings,
    limiter: Arc<DomainRateLimiter>,
    policy: Arc<PolicyCache>,
    retry: RetryPolicy,
    headers: HeaderProfile,
    sessions: Mutex<HashMap<String, Client>>,
    request_counter: AtomicU64,
}

impl FetchClient {
    /// Creates a client with its own rate limiter and policy cache
    ///
    /// An invalid configuration is rejected with [`RippleError::Config`].
    pub fn new(config: &Config) -> Result<Self> {
        validate(config)?;
        let limiter = Arc::new(DomainRateLimiter::from_config(&config.fetch, &config.domains));
        let policy = Arc::new(PolicyCache::new(config.policy.clone(), &config.fetch)?);
        Self::with_parts(config, limiter, policy)
    }

    /// Creates a client around an existing rate limiter and policy cache
    pub fn with_parts(
        config: &Config,
        limiter: Arc<DomainRateLimiter>,
        policy: Arc<PolicyCache>,
    ) -> Result<Self> {
        validate(config)?;
        let seed = config.user_agent.seed.unwrap_or_else(rand::random);
        Ok(Self {
            settings: config.fetch.clone(),
            limiter,
            policy,
            retry: RetryPolicy::from_settings(&config.fetch),
            headers: HeaderProfile::new(&config.user_agent.pool, seed),
            sessions: Mutex::new(HashMap::new()),
            request_counter: AtomicU64::new(0),
        })
    }

    pub fn limiter(&self) -> &Arc<DomainRateLimiter> {
        &self.limiter
    }

    pub fn policy(&self) -> &Arc<PolicyCache> {
        &self.policy
    }

    /// Fetches `url` politely and classifies the result
    ///
    /// Redirects are followed up to [`MAX_REDIRECTS`] hops. Every hop passes
    /// the allowlist, the robots.txt check and the rate limiter of its own
    /// domain, so a redirect into a forbidden area ends as `PolicyDenied`.
    ///
    /// # Returns
    ///
    /// * `Ok(FetchOutcome)` - The terminal outcome, success or failure
    /// * `Err(RippleError)` - The URL is invalid or the fetch was cancelled
    pub async fn fetch(&self, url: &str, ctx: &FetchContext) -> Result<FetchOutcome> {
        let started = Instant::now();
        let (mut url, mut domain) = parse_target(url)?;

        if ctx.cancel.is_cancelled() {
            return Err(cancelled(&url));
        }

        let mut outcome = FetchOutcome::new(FetchStatus::TransientNetworkError);
        let mut hops = 0;

        let class = loop {
            if let Some(reason) = self.admit(&url, &domain, ctx).await? {
                tracing::debug!("[{}] {} {}", ctx.job(), url, reason);
                let mut denied = FetchOutcome::denied(reason);
                denied.attempts = outcome.attempts;
                if hops > 0 {
                    denied.final_url = Some(url);
                }
                return Ok(finish(denied, started));
            }

            let location = match self.fetch_hop(&url, &domain, ctx, &mut outcome).await? {
                AttemptClass::Redirect { location } => location,
                class => break class,
            };

            hops += 1;
            if hops > MAX_REDIRECTS {
                tracing::warn!("[{}] Too many redirects from {}", ctx.job(), url);
                outcome.error = Some(format!("more than {} redirects", MAX_REDIRECTS));
                break AttemptClass::Terminal;
            }
            match parse_target(location.as_str()) {
                Ok((next, next_domain)) => {
                    tracing::debug!("[{}] {} redirects to {}", ctx.job(), url, next);
                    url = next;
                    domain = next_domain;
                }
                Err(e) => {
                    outcome.error = Some(format!("unusable redirect to {}: {}", location, e));
                    break AttemptClass::Terminal;
                }
            }
        };

        outcome.status = final_status(&class, outcome.http_status);
        if outcome.status != FetchStatus::Success && outcome.error.is_none() {
            outcome.error = Some(outcome.describe());
        }

        tracing::debug!(
            "[{}] {} -> {} in {} attempt(s)",
            ctx.job(),
            url,
            outcome.status,
            outcome.attempts
        );
        Ok(finish(outcome, started))
    }

    /// Runs the allowlist and robots.txt checks for one target
    ///
    /// Returns the denial reason, or `None` when the target may be fetched.
    /// A crawl-delay found on the way is applied to the domain's limiter.
    async fn admit(&self, url: &Url, domain: &str, ctx: &FetchContext) -> Result<Option<String>> {
        if !is_domain_allowed(&self.settings.allowed_domains, domain) {
            return Ok(Some(format!("domain {} is not on the allowlist", domain)));
        }

        let decision = cancellable(ctx, url, self.policy.check(url, self.policy.agent())).await?;
        if !decision.allowed {
            let reason = match &decision.rule {
                Some(rule) => format!("disallowed by robots.txt ({})", rule),
                None => "disallowed by robots.txt".to_string(),
            };
            return Ok(Some(reason));
        }
        if let Some(delay) = decision.crawl_delay {
            self.limiter.apply_crawl_delay(domain, delay).await;
        }
        Ok(None)
    }

    /// Requests one URL, retrying until the retry policy stops
    ///
    /// `outcome.attempts` keeps counting across hops; the retry ceiling
    /// applies to each hop on its own.
    async fn fetch_hop(
        &self,
        url: &Url,
        domain: &str,
        ctx: &FetchContext,
        outcome: &mut FetchOutcome,
    ) -> Result<AttemptClass> {
        let session = self.session(domain)?;
        let mut attempt = 0;

        loop {
            attempt += 1;

            cancellable(ctx, url, self.limiter.acquire(domain)).await?;
            if let Some(pause) = self.jitter() {
                cancellable(ctx, url, tokio::time::sleep(pause)).await?;
            }

            let index = self.request_counter.fetch_add(1, Ordering::Relaxed);
            let headers = self.headers.build(index).to_header_map();

            outcome.attempts += 1;
            let class = cancellable(ctx, url, self.attempt(&session, url, headers, outcome)).await?;

            match self.retry.decide(attempt, &class, &mut rand::thread_rng()) {
                RetryDecision::Stop => return Ok(class),
                RetryDecision::GiveUp => {
                    if attempt >= self.retry.max_attempts {
                        tracing::warn!(
                            "[{}] Giving up on {} after {} attempts: {}",
                            ctx.job(),
                            url,
                            attempt,
                            outcome.describe()
                        );
                    } else {
                        tracing::warn!(
                            "[{}] Not retrying {}: Retry-After {:?} exceeds {:?}",
                            ctx.job(),
                            url,
                            outcome.retry_after,
                            self.retry.max_retry_after
                        );
                    }
                    return Ok(class);
                }
                RetryDecision::Retry(wait) => {
                    tracing::debug!(
                        "[{}] Attempt {} for {} failed ({}), retrying in {:?}",
                        ctx.job(),
                        attempt,
                        url,
                        outcome.describe(),
                        wait
                    );
                    cancellable(ctx, url, tokio::time::sleep(wait)).await?;
                }
            }
        }
    }

    /// Sends one request and classifies what came back
    ///
    /// Per-attempt fields of `outcome` are overwritten so they always
    /// describe the latest attempt.
    async fn attempt(
        &self,
        session: &Client,
        url: &Url,
        headers: HeaderMap,
        outcome: &mut FetchOutcome,
    ) -> AttemptClass {
        outcome.http_status = None;
        outcome.headers = HeaderMap::new();
        outcome.retry_after = None;
        outcome.final_url = None;
        outcome.error = None;

        let response = match session.get(url.clone()).headers(headers).send().await {
            Ok(response) => response,
            Err(e) => {
                outcome.error = Some(describe_transport_error(&e));
                return if e.is_builder() {
                    AttemptClass::Terminal
                } else {
                    AttemptClass::Transient
                };
            }
        };

        let status = response.status();
        outcome.http_status = Some(status);
        outcome.final_url = Some(response.url().clone());
        outcome.headers = response.headers().clone();
        outcome.retry_after = parse_retry_after(response.headers(), Utc::now());

        if is_followable_redirect(status) {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| url.join(value).ok());
            return match location {
                Some(location) => AttemptClass::Redirect { location },
                None => {
                    outcome.error = Some(format!("HTTP {} without a usable Location", status.as_u16()));
                    AttemptClass::Terminal
                }
            };
        }

        if status.is_success() {
            let limit = self.settings.max_response_bytes;
            return match read_limited(response, limit).await {
                Ok(BodyRead::Complete(body)) => {
                    outcome.body = Some(body);
                    AttemptClass::Success
                }
                Ok(BodyRead::TooLarge) => {
                    outcome.error = Some(format!("response exceeds {} bytes", limit));
                    AttemptClass::Terminal
                }
                Err(e) => {
                    outcome.error = Some(format!("body read failed: {}", e));
                    AttemptClass::Transient
                }
            };
        }

        outcome.error = Some(format!("HTTP {}", status.as_u16()));
        match status {
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                AttemptClass::Overloaded {
                    retry_after: outcome.retry_after,
                }
            }
            s if s.is_server_error() => AttemptClass::Transient,
            _ => AttemptClass::Terminal,
        }
    }

    /// Picks the pre-request pause, if this request gets one
    fn jitter(&self) -> Option<Duration> {
        let probability = self.settings.jitter_probability;
        let mut rng = rand::thread_rng();
        if probability > 0.0 && rng.gen::<f64>() < probability {
            Some(Duration::from_millis(
                rng.gen_range(0..=self.settings.jitter_max_ms),
            ))
        } else {
            None
        }
    }

    /// Returns the cookie-keeping session for `domain`, creating it once
    fn session(&self, domain: &str) -> Result<Client> {
        let mut sessions = self.lock_sessions();
        if let Some(client) = sessions.get(domain) {
            return Ok(client.clone());
        }

        let client = build_http_client(&self.settings)?;
        sessions.insert(domain.to_string(), client.clone());
        tracing::trace!("Opened HTTP session for {}", domain);
        Ok(client)
    }

    // Never held across an await.
    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, Client>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Runs `fut` unless the caller cancels first
async fn cancellable<F: Future>(ctx: &FetchContext, url: &Url, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(cancelled(url)),
        output = fut => Ok(output),
    }
}

fn cancelled(url: &Url) -> RippleError {
    RippleError::Cancelled {
        url: url.to_string(),
    }
}

fn is_followable_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn finish(mut outcome: FetchOutcome, started: Instant) -> FetchOutcome {
    outcome.elapsed = started.elapsed();
    outcome
}

/// Maps the class of the last attempt to the terminal status
fn final_status(class: &AttemptClass, http_status: Option<StatusCode>) -> FetchStatus {
    match class {
        AttemptClass::Success => FetchStatus::Success,
        AttemptClass::Terminal | AttemptClass::Redirect { .. } => FetchStatus::ClientError,
        AttemptClass::Overloaded { .. } => FetchStatus::ServerError,
        AttemptClass::Transient => match http_status {
            Some(status) if status.is_server_error() => FetchStatus::ServerError,
            _ => FetchStatus::TransientNetworkError,
        },
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    format!("{}: {}", kind, e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_status_mapping() {
        assert_eq!(final_status(&AttemptClass::Success, Some(StatusCode::OK)), FetchStatus::Success);
        assert_eq!(
            final_status(&AttemptClass::Terminal, Some(StatusCode::NOT_FOUND)),
            FetchStatus::ClientError
        );
        assert_eq!(
            final_status(&AttemptClass::Overloaded { retry_after: None }, Some(StatusCode::TOO_MANY_REQUESTS)),
            FetchStatus::ServerError
        );
        assert_eq!(
            final_status(&AttemptClass::Transient, Some(StatusCode::BAD_GATEWAY)),
            FetchStatus::ServerError
        );
        assert_eq!(final_status(&AttemptClass::Transient, None), FetchStatus::TransientNetworkError);
        // Body read failure after a 200
        assert_eq!(
            final_status(&AttemptClass::Transient, Some(StatusCode::OK)),
            FetchStatus::TransientNetworkError
        );
    }

    #[test]
    fn test_context_builders() {
        let token = CancellationToken::new();
        let ctx = FetchContext::for_job("listings").with_cancel(token.clone());
        assert_eq!(ctx.job(), "listings");
        token.cancel();
        assert!(ctx.cancel.is_cancelled());
        assert_eq!(FetchContext::new().job(), "-");
    }

    #[tokio::test]
    async fn test_invalid_urls_are_errors() {
        let client = FetchClient::new(&Config::default()).unwrap();
        let ctx = FetchContext::new();
        assert!(matches!(
            client.fetch("not a url", &ctx).await,
            Err(RippleError::UrlParse(_))
        ));
        assert!(matches!(
            client.fetch("ftp://example.com/file", &ctx).await,
            Err(RippleError::UrlError(_))
        ));
    }

    #[tokio::test]
    async fn test_pre_cancelled_fetch_sends_nothing() {
        let client = FetchClient::new(&Config::default()).unwrap();
        let ctx = FetchContext::new();
        ctx.cancel.cancel();
        assert!(matches!(
            client.fetch("https://example.com/", &ctx).await,
            Err(RippleError::Cancelled { .. })
        ));
    }

    #[test]
    fn test_jitter_disabled() {
        let config = Config {
            fetch: FetchSettings {
                jitter_probability: 0.0,
                ..FetchSettings::default()
            },
            ..Config::default()
        };
        let client = FetchClient::new(&config).unwrap();
        assert!((0..100).all(|_| client.jitter().is_none()));
    }

    #[test]
    fn test_sessions_are_reused_per_domain() {
        let client = FetchClient::new(&Config::default()).unwrap();
        client.session("a.example").unwrap();
        client.session("a.example").unwrap();
        client.session("b.example").unwrap();
        assert_eq!(client.lock_sessions().len(), 2);
    }
}
