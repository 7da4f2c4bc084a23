//! Per-domain rate limiting
//!
//! Every destination host gets its own [`TokenBucket`], created lazily on the
//! first request. Callers targeting the same domain queue on that bucket's
//! async mutex (FIFO), while callers for other domains proceed independently.

mod bucket;

pub use bucket::{clamp_rate, TokenBucket, MIN_REFILL_RATE};

use crate::config::{DomainOverride, FetchSettings};
use crate::url::matches_domain_pattern;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

type BucketMap = HashMap<String, Arc<AsyncMutex<TokenBucket>>>;

/// Token-bucket rate limiter keyed by domain
pub struct DomainRateLimiter {
    buckets: Mutex<BucketMap>,
    default_rate: f64,
    capacity: u32,
    overrides: Vec<DomainOverride>,
}

impl DomainRateLimiter {
    /// Creates a limiter with the given default rate and burst capacity
    ///
    /// A rate that is not finite and positive is clamped (see [`clamp_rate`]).
    pub fn new(default_rate: f64, capacity: u32) -> Self {
        let clamped = clamp_rate(default_rate);
        if clamped != default_rate {
            tracing::warn!("Invalid default rate {}, using {} req/s", default_rate, clamped);
        }
        Self {
            buckets: Mutex::new(HashMap::new()),
            default_rate: clamped,
            capacity,
            overrides: Vec::new(),
        }
    }

    /// Creates a limiter from fetch settings and per-domain overrides
    pub fn from_config(settings: &FetchSettings, overrides: &[DomainOverride]) -> Self {
        Self {
            overrides: overrides.to_vec(),
            ..Self::new(settings.requests_per_second, settings.burst)
        }
    }

    /// Waits until a token is available for `domain`, then consumes it
    ///
    /// The wait is re-checked in a loop so an early wake-up never admits a
    /// request without a full token. Returns how long the caller waited.
    pub async fn acquire(&self, domain: &str) -> Duration {
        let bucket = self.bucket(domain);
        let started = Instant::now();
        let mut bucket = bucket.lock().await;

        loop {
            match bucket.try_take(Instant::now()) {
                Ok(()) => {
                    let waited = started.elapsed();
                    if !waited.is_zero() {
                        tracing::trace!("Rate limiter held {} for {:?}", domain, waited);
                    }
                    return waited;
                }
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Overrides the request rate for a domain
    ///
    /// Non-positive or non-finite rates are ignored.
    pub async fn set_rate(&self, domain: &str, requests_per_second: f64) {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            tracing::warn!(
                "Ignoring invalid rate {} for domain {}",
                requests_per_second,
                domain
            );
            return;
        }

        let bucket = self.bucket(domain);
        let mut bucket = bucket.lock().await;
        bucket.set_rate(requests_per_second, Instant::now());
        tracing::debug!("Rate for {} set to {} req/s", domain, requests_per_second);
    }

    /// Slows a domain down to honor a robots.txt crawl-delay
    ///
    /// The rate only ever decreases here; a crawl-delay shorter than the
    /// configured interval leaves the domain untouched.
    ///
    /// # Returns
    ///
    /// * `true` - The domain's rate was lowered
    /// * `false` - The delay was invalid or already satisfied
    pub async fn apply_crawl_delay(&self, domain: &str, delay_secs: f64) -> bool {
        if !delay_secs.is_finite() || delay_secs <= 0.0 {
            return false;
        }

        let target = 1.0 / delay_secs;
        let bucket = self.bucket(domain);
        let mut bucket = bucket.lock().await;

        if target >= bucket.rate() {
            return false;
        }

        bucket.set_rate(target, Instant::now());
        tracing::info!(
            "Honoring crawl-delay of {}s for {} ({:.3} req/s)",
            delay_secs,
            domain,
            target
        );
        true
    }

    /// Returns the current rate of a domain
    pub async fn rate(&self, domain: &str) -> f64 {
        self.bucket(domain).lock().await.rate()
    }

    /// Number of domains with a bucket
    pub fn tracked_domains(&self) -> usize {
        self.lock_buckets().len()
    }

    /// Returns the rate a new bucket for `domain` starts with
    fn initial_rate(&self, domain: &str) -> f64 {
        self.overrides
            .iter()
            .find(|o| matches_domain_pattern(&o.domain, domain))
            .map(|o| o.requests_per_second)
            .unwrap_or(self.default_rate)
    }

    fn bucket(&self, domain: &str) -> Arc<AsyncMutex<TokenBucket>> {
        let mut buckets = self.lock_buckets();
        if let Some(bucket) = buckets.get(domain) {
            return Arc::clone(bucket);
        }

        let rate = self.initial_rate(domain);
        let bucket = Arc::new(AsyncMutex::new(TokenBucket::new(
            self.capacity,
            rate,
            Instant::now(),
        )));
        buckets.insert(domain.to_string(), Arc::clone(&bucket));
        bucket
    }

    // Never held across an await.
    fn lock_buckets(&self) -> MutexGuard<'_, BucketMap> {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for DomainRateLimiter {
    fn default() -> Self {
        Self::new(1.0, 1)
    }
}
