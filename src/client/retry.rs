//! Retry state machine
//!
//! Each attempt is classified into an [`AttemptClass`]; [`RetryPolicy::decide`]
//! turns the class and the attempt number into the next step. The function is
//! pure apart from the caller-supplied random source used for jitter.

use crate::config::FetchSettings;
use rand::Rng;
use std::time::Duration;
use url::Url;

/// Backoff exponent cap; keeps `2^n` finite for absurd retry counts
const MAX_EXPONENT: u32 = 20;

/// Classification of a single attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptClass {
    /// 2xx with a body within limits
    Success,
    /// 429 or 503, with the server's `Retry-After` if it sent one
    Overloaded { retry_after: Option<Duration> },
    /// Timeouts, connection failures, body read errors, other 5xx
    Transient,
    /// 4xx (except 429) or an oversized body; retrying cannot help
    Terminal,
    /// 3xx pointing at `location`, which the caller vets before following
    Redirect { location: Url },
}

/// What the fetch loop does after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The attempt settled the fetch (success or permanent failure)
    Stop,
    /// Sleep for the given duration, then try again
    Retry(Duration),
    /// Retrying is pointless or no attempts are left
    GiveUp,
}

/// Retry limits and backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Backoff multiplier for overload responses without `Retry-After`
    pub overload_penalty: f64,
    /// Relative jitter applied to computed backoffs (0.3 means ±30%)
    pub jitter: f64,
    /// A `Retry-After` longer than this stops retrying
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&FetchSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &FetchSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts(),
            base_delay: settings.base_backoff(),
            overload_penalty: settings.overload_penalty,
            jitter: 0.3,
            max_retry_after: settings.max_retry_after(),
        }
    }

    /// Decides what happens after attempt number `attempt` (1-based)
    pub fn decide<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        class: &AttemptClass,
        rng: &mut R,
    ) -> RetryDecision {
        match class {
            AttemptClass::Success | AttemptClass::Terminal | AttemptClass::Redirect { .. } => {
                return RetryDecision::Stop
            }
            AttemptClass::Overloaded {
                retry_after: Some(wait),
            } if *wait > self.max_retry_after => return RetryDecision::GiveUp,
            _ => {}
        }

        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let wait = match class {
            AttemptClass::Overloaded {
                retry_after: Some(wait),
            } => *wait,
            AttemptClass::Overloaded { retry_after: None } => {
                scale(self.backoff(attempt, rng), self.overload_penalty)
            }
            _ => self.backoff(attempt, rng),
        };
        RetryDecision::Retry(wait)
    }

    /// Standard backoff after attempt `attempt`: `base × 2^(attempt-1)`, jittered
    pub fn backoff<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        let factor = if self.jitter > 0.0 {
            rng.gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };
        scale(self.base_delay, f64::from(1u32 << exponent) * factor)
    }
}

fn scale(duration: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}
