//! Low-level HTTP helpers shared by the policy cache and the fetch client

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Response};
use std::time::Duration;

use crate::config::FetchSettings;

/// Outcome of reading a response body under a size cap
#[derive(Debug)]
pub enum BodyRead {
    Complete(Vec<u8>),
    /// The declared or streamed size exceeded the cap; the rest was not read
    TooLarge,
}

/// Redirect hops followed when fetching robots.txt
pub const MAX_POLICY_REDIRECTS: usize = 5;

/// Builds an HTTP client for one session
///
/// Redirects are not followed; the fetch client handles `Location` itself so
/// every hop goes through the allowlist, the policy cache and the rate
/// limiter. Cookies persist for the lifetime of the client, which is what
/// makes a per-domain client a per-domain session.
pub fn build_http_client(settings: &FetchSettings) -> Result<Client, reqwest::Error> {
    base_builder(settings)
        .redirect(Policy::none())
        .cookie_store(true)
        .build()
}

/// Builds the client used to fetch robots.txt files
///
/// A robots.txt that redirects (commonly http to https) is followed for up
/// to [`MAX_POLICY_REDIRECTS`] hops.
pub fn build_policy_client(settings: &FetchSettings) -> Result<Client, reqwest::Error> {
    base_builder(settings)
        .redirect(Policy::limited(MAX_POLICY_REDIRECTS))
        .build()
}

fn base_builder(settings: &FetchSettings) -> ClientBuilder {
    Client::builder()
        .timeout(settings.timeout())
        .connect_timeout(settings.connect_timeout())
        .https_only(settings.https_only)
        .gzip(true)
        .brotli(true)
}

/// Reads a response body, giving up once it grows past `limit` bytes
pub async fn read_limited(mut response: Response, limit: u64) -> Result<BodyRead, reqwest::Error> {
    if response.content_length().is_some_and(|len| len > limit) {
        return Ok(BodyRead::TooLarge);
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if (body.len() + chunk.len()) as u64 > limit {
            return Ok(BodyRead::TooLarge);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(BodyRead::Complete(body))
}

/// Parses a `Retry-After` header
///
/// Both forms are accepted: delta-seconds (`120`) and an HTTP date. Dates in
/// the past yield a zero wait.
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
