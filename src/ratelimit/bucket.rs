//! Token bucket state for a single domain

use std::time::Duration;
use tokio::time::Instant;

/// Slowest refill rate a bucket accepts: one token per hour
pub const MIN_REFILL_RATE: f64 = 1.0 / 3600.0;

/// Clamps a refill rate into the range a bucket can wait on
///
/// Zero, negative and NaN rates become [`MIN_REFILL_RATE`]; so does a
/// positive rate below it. Infinity is capped at `f64::MAX`.
pub fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() || rate < MIN_REFILL_RATE {
        MIN_REFILL_RATE
    } else {
        rate.min(f64::MAX)
    }
}

/// Per-domain token bucket
///
/// Tokens accrue continuously at `refill_rate` per second up to `capacity`.
/// Each admitted request consumes exactly one token.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket
    ///
    /// The rate goes through [`clamp_rate`].
    pub fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_rate: clamp_rate(refill_rate),
            last_refill: now,
        }
    }

    /// Adds the tokens accrued since the last refill
    ///
    /// `now` values earlier than the last refill are ignored, so the bucket
    /// never loses tokens to a clock that appears to run backwards.
    pub fn refill(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes a token if one is available
    ///
    /// # Returns
    ///
    /// * `Ok(())` - A token was consumed
    /// * `Err(Duration)` - How long until one token will have accrued
    pub fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }

        let missing = 1.0 - self.tokens;
        Err(Duration::try_from_secs_f64(missing / self.refill_rate).unwrap_or(Duration::MAX))
    }

    /// Changes the refill rate, keeping the tokens accrued so far
    pub fn set_rate(&mut self, refill_rate: f64, now: Instant) {
        self.refill(now);
        self.refill_rate = clamp_rate(refill_rate);
    }

    pub fn rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}
