//! Crawling policy (robots.txt) handling
//!
//! This module fetches, parses and caches a site's robots.txt. Entries are
//! keyed by origin (`scheme://host[:port]`), since each origin publishes its
//! own file, and live for the configured TTL. Concurrent first hits on one
//! origin wait on that origin's lock, so the policy is fetched once.

mod cache;
mod parser;

pub use crate::config::FailMode;
pub use cache::{CachedPolicy, PolicySource};
pub use parser::{product_token, AgentGroup, PathRule, RobotsPolicy, RuleKind, Verdict};

use crate::config::{FetchSettings, PolicySettings};
use crate::http::{build_policy_client, read_limited, BodyRead};
use crate::storage::PolicyStore;
use crate::url::{extract_domain, origin_host, policy_origin, policy_path, robots_url};
use reqwest::header::USER_AGENT;
use reqwest::Client;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

type PolicySlot = Arc<AsyncMutex<Option<Arc<CachedPolicy>>>>;

/// Detailed answer to "may this URL be fetched?"
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    pub allowed: bool,

    /// The rule that decided, if any matched
    pub rule: Option<PathRule>,

    /// Agent token of the robots.txt group that was consulted
    pub group: Option<String>,

    /// Crawl-delay in seconds for the requesting agent
    pub crawl_delay: Option<f64>,

    /// How the policy was obtained; `None` when enforcement is disabled
    pub source: Option<PolicySource>,
}

impl PolicyDecision {
    fn unenforced() -> Self {
        Self {
            allowed: true,
            rule: None,
            group: None,
            crawl_delay: None,
            source: None,
        }
    }

    /// Whether the decision came from a stand-in for an unreachable policy
    pub fn is_fallback(&self) -> bool {
        self.source.is_some_and(|s| s.is_fallback())
    }
}

/// Per-origin robots.txt cache
pub struct PolicyCache {
    http: Client,
    settings: PolicySettings,
    entries: Mutex<HashMap<String, PolicySlot>>,
    store: Option<Arc<dyn PolicyStore>>,
}

impl PolicyCache {
    /// Creates a policy cache with its own HTTP client
    pub fn new(settings: PolicySettings, fetch: &FetchSettings) -> crate::Result<Self> {
        let http = build_policy_client(fetch)?;
        Ok(Self::with_client(settings, http))
    }

    /// Creates a policy cache that fetches through `http`
    pub fn with_client(settings: PolicySettings, http: Client) -> Self {
        Self {
            http,
            settings,
            entries: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    /// Persists policies in `store` and reuses fresh ones found there
    pub fn with_store(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The product token used for crawl-delay lookups
    pub fn agent(&self) -> &str {
        &self.settings.agent
    }

    /// Checks if `url` may be fetched by `user_agent`
    pub async fn is_allowed(&self, url: &Url, user_agent: &str) -> bool {
        self.check(url, user_agent).await.allowed
    }

    /// Evaluates `url` against its origin's policy, fetching it if needed
    ///
    /// This never fails: an unreachable policy is replaced by the fallback
    /// entry of the configured fail mode.
    pub async fn check(&self, url: &Url, user_agent: &str) -> PolicyDecision {
        if !self.settings.enforce {
            return PolicyDecision::unenforced();
        }

        if extract_domain(url).is_none() {
            return PolicyDecision {
                allowed: false,
                ..PolicyDecision::unenforced()
            };
        }

        let cached = self.entry(&policy_origin(url), url).await;
        let verdict = cached.policy.evaluate(&policy_path(url), user_agent);

        PolicyDecision {
            allowed: verdict.allowed,
            rule: verdict.rule,
            group: verdict.group,
            crawl_delay: cached.policy.crawl_delay(user_agent),
            source: Some(cached.source),
        }
    }

    /// Returns the crawl-delay of already cached policies
    ///
    /// `target` is either an origin or a bare domain. A domain covers every
    /// cached origin on that host and yields the largest of their delays. The
    /// delay is looked up for the configured policy agent. Nothing is fetched;
    /// an unknown target yields `None`.
    pub async fn crawl_delay(&self, target: &str) -> Option<f64> {
        let mut delay: Option<f64> = None;
        for (_, slot) in self.slots_for(target) {
            let slot = slot.lock().await;
            let found = slot
                .as_ref()
                .and_then(|cached| cached.policy.crawl_delay(&self.settings.agent));
            if let Some(found) = found {
                delay = Some(delay.map_or(found, |d| d.max(found)));
            }
        }
        delay
    }

    /// Drops cached policies, forcing a refresh on next use
    ///
    /// `target` is either an origin or a bare domain; a domain drops every
    /// origin on that host, including its default http and https origins in
    /// the store.
    pub async fn invalidate(&self, target: &str) {
        let removed: Vec<(String, PolicySlot)> = {
            let mut entries = self.lock_entries();
            let origins: Vec<String> = entries
                .keys()
                .filter(|origin| origin_matches(origin, target))
                .cloned()
                .collect();
            origins
                .into_iter()
                .filter_map(|origin| entries.remove(&origin).map(|slot| (origin, slot)))
                .collect()
        };

        let mut origins = BTreeSet::new();
        for (origin, slot) in removed {
            *slot.lock().await = None;
            origins.insert(origin);
        }
        if target.contains("://") {
            origins.insert(target.to_string());
        } else {
            origins.insert(format!("http://{}", target));
            origins.insert(format!("https://{}", target));
        }

        if let Some(store) = &self.store {
            for origin in &origins {
                if let Err(e) = store.delete_policy(origin) {
                    tracing::warn!("Failed to delete persisted policy for {}: {}", origin, e);
                }
            }
        }
        tracing::debug!("Invalidated policy for {}", target);
    }

    /// Returns a fresh entry for `origin`, loading or fetching it as needed
    async fn entry(&self, origin: &str, url: &Url) -> Arc<CachedPolicy> {
        let slot = self.slot(origin);
        let mut slot = slot.lock().await;

        if let Some(cached) = slot.as_ref() {
            if !cached.is_stale() {
                return Arc::clone(cached);
            }
            tracing::debug!("Policy for {} is stale (age {:?})", origin, cached.age());
        } else if let Some(persisted) = self.load_persisted(origin) {
            let persisted = Arc::new(persisted);
            *slot = Some(Arc::clone(&persisted));
            return persisted;
        }

        let fresh = Arc::new(self.fetch_policy(origin, url).await);
        self.persist(origin, &fresh);
        *slot = Some(Arc::clone(&fresh));
        fresh
    }

    /// Fetches and parses robots.txt for the origin of `url`
    async fn fetch_policy(&self, origin: &str, url: &Url) -> CachedPolicy {
        let location = robots_url(url);
        let ttl = self.settings.cache_ttl();
        tracing::debug!("Fetching policy for {} from {}", origin, location);

        let response = match self
            .http
            .get(location)
            .header(USER_AGENT, &self.settings.agent)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return self.fallback(origin, &format!("request failed: {}", e)),
        };

        let status = response.status();
        if status.is_client_error() {
            tracing::info!(
                "No policy published for {} (HTTP {}), allowing all paths",
                origin,
                status.as_u16()
            );
            return CachedPolicy::fallback(PolicySource::NotPublished, ttl);
        }
        if !status.is_success() {
            return self.fallback(origin, &format!("HTTP {}", status.as_u16()));
        }

        let bytes = match read_limited(response, self.settings.max_policy_bytes).await {
            Ok(BodyRead::Complete(bytes)) => bytes,
            Ok(BodyRead::TooLarge) => {
                return self.fallback(
                    origin,
                    &format!("body exceeds {} bytes", self.settings.max_policy_bytes),
                )
            }
            Err(e) => return self.fallback(origin, &format!("body read failed: {}", e)),
        };

        let Ok(body) = String::from_utf8(bytes) else {
            return self.fallback(origin, "body is not valid UTF-8");
        };

        let policy = RobotsPolicy::parse(&body);
        tracing::info!(
            "Refreshed policy for {}: {} groups, crawl-delay {:?}",
            origin,
            policy.groups().len(),
            policy.crawl_delay(&self.settings.agent)
        );
        CachedPolicy::new(policy, body, PolicySource::Fetched, ttl)
    }

    fn fallback(&self, origin: &str, reason: &str) -> CachedPolicy {
        let source = match self.settings.fail_mode {
            FailMode::Open => PolicySource::FailOpen,
            FailMode::Closed => PolicySource::FailClosed,
        };
        tracing::warn!(
            "Policy for {} unavailable ({}), using {} fallback",
            origin,
            reason,
            source
        );
        CachedPolicy::fallback(source, self.settings.cache_ttl())
    }

    fn load_persisted(&self, origin: &str) -> Option<CachedPolicy> {
        let store = self.store.as_ref()?;
        let stored = match store.load_policy(origin) {
            Ok(stored) => stored?,
            Err(e) => {
                tracing::warn!("Failed to load persisted policy for {}: {}", origin, e);
                return None;
            }
        };

        let cached = CachedPolicy::from_stored(&stored)?;
        if cached.is_stale() {
            return None;
        }
        tracing::debug!("Loaded persisted policy for {} ({})", origin, cached.source);
        Some(cached)
    }

    fn persist(&self, origin: &str, cached: &CachedPolicy) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_policy(&cached.to_stored(origin)) {
                tracing::warn!("Failed to persist policy for {}: {}", origin, e);
            }
        }
    }

    fn slot(&self, origin: &str) -> PolicySlot {
        let mut entries = self.lock_entries();
        Arc::clone(entries.entry(origin.to_string()).or_default())
    }

    fn slots_for(&self, target: &str) -> Vec<(String, PolicySlot)> {
        self.lock_entries()
            .iter()
            .filter(|(origin, _)| origin_matches(origin, target))
            .map(|(origin, slot)| (origin.clone(), Arc::clone(slot)))
            .collect()
    }

    // Never held across an await.
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, PolicySlot>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Whether a cache key is `target` itself or an origin on host `target`
fn origin_matches(origin: &str, target: &str) -> bool {
    origin == target || origin_host(origin).is_some_and(|host| host == target)
}
