//! Request header rotation
//!
//! Headers for the n-th request are derived from `(n, seed)` alone, so a run
//! with a fixed seed sends exactly the same headers every time.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};

/// Built-in browser user agents
pub const BROWSER_USER_AGENTS: &[&str] = &[
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    // Chrome on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Firefox
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:133.0) Gecko/20100101 Firefox/133.0",
    // Safari on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    // Edge on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
];

const ACCEPT_VALUES: &[&str] = &[
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8",
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
];

const ACCEPT_LANGUAGE_VALUES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-US,en;q=0.5",
    "en-GB,en;q=0.9,en-US;q=0.8",
    "en-US,en;q=0.9,de;q=0.6",
];

const GOOGLE_REFERER: &str = "https://www.google.com/";

const OTHER_SEARCH_REFERERS: &[&str] = &[
    "https://www.bing.com/",
    "https://duckduckgo.com/",
    "https://search.yahoo.com/",
];

/// Percentage of requests sent without a referer
const NO_REFERER_PERCENT: u32 = 70;

/// Percentage of requests claiming to come from Google
const GOOGLE_REFERER_PERCENT: u32 = 20;

/// Headers for a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSet {
    pub user_agent: String,
    pub accept: &'static str,
    pub accept_language: &'static str,
    pub referer: Option<&'static str>,
}

impl HeaderSet {
    /// Converts the set into request headers
    ///
    /// A configured user agent that is not a valid header value is left out
    /// and reqwest's default applies.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(&self.user_agent) {
            Ok(ua) => {
                headers.insert(USER_AGENT, ua);
            }
            Err(_) => tracing::warn!("Skipping invalid user agent: {:?}", self.user_agent),
        }
        headers.insert(ACCEPT, HeaderValue::from_static(self.accept));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(self.accept_language));
        if let Some(referer) = self.referer {
            headers.insert(REFERER, HeaderValue::from_static(referer));
        }
        headers
    }
}

/// Deterministic header generator
#[derive(Debug, Clone)]
pub struct HeaderProfile {
    pool: Vec<String>,
    seed: u64,
}

impl HeaderProfile {
    /// Creates a profile drawing user agents from `pool`
    ///
    /// An empty pool falls back to [`BROWSER_USER_AGENTS`].
    pub fn new(pool: &[String], seed: u64) -> Self {
        let pool = if pool.is_empty() {
            BROWSER_USER_AGENTS.iter().map(|ua| ua.to_string()).collect()
        } else {
            pool.to_vec()
        };
        Self { pool, seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Builds the headers for request number `request_index`
    pub fn build(&self, request_index: u64) -> HeaderSet {
        let mut rng = StdRng::seed_from_u64(mix(self.seed, request_index));

        let user_agent = self
            .pool
            .choose(&mut rng)
            .cloned()
            .unwrap_or_default();
        let accept = ACCEPT_VALUES.choose(&mut rng).copied().unwrap_or(ACCEPT_VALUES[0]);
        let accept_language = ACCEPT_LANGUAGE_VALUES
            .choose(&mut rng)
            .copied()
            .unwrap_or(ACCEPT_LANGUAGE_VALUES[0]);

        let roll = rng.gen_range(0..100);
        let referer = if roll < NO_REFERER_PERCENT {
            None
        } else if roll < NO_REFERER_PERCENT + GOOGLE_REFERER_PERCENT {
            Some(GOOGLE_REFERER)
        } else {
            OTHER_SEARCH_REFERERS.choose(&mut rng).copied()
        };

        HeaderSet {
            user_agent,
            accept,
            accept_language,
            referer,
        }
    }
}

// splitmix64 finalizer; neighbouring indexes get unrelated seeds
fn mix(seed: u64, index: u64) -> u64 {
    let mut z = seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
