//! URL handling for the fetch engine
//!
//! Domains are the unit of rate limiting and policy scope, so every URL that
//! enters the engine goes through [`parse_target`] first.

use crate::{RippleError, UrlError};
use url::Url;

/// Extracts the lowercase host of a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use ripple_fetch::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.com:8080/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Parses a fetch target and returns it together with its domain
///
/// Only `http` and `https` URLs with a host are accepted. Anything else is a
/// caller bug and is reported as an error rather than a fetch outcome.
///
/// # Returns
///
/// * `Ok((Url, String))` - The parsed URL and its lowercase domain
/// * `Err(RippleError)` - The URL is malformed, has no host or an unsupported scheme
pub fn parse_target(raw: &str) -> Result<(Url, String), RippleError> {
    let url = Url::parse(raw)?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::InvalidScheme(other.to_string()).into()),
    }

    let domain = extract_domain(&url).ok_or(UrlError::MissingDomain)?;
    Ok((url, domain))
}

/// Builds the robots.txt location for the origin of `url`
///
/// Scheme, host and explicit port are kept; path, query and fragment are not.
pub fn robots_url(url: &Url) -> Url {
    let mut robots = url.clone();
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    robots
}

/// Returns the origin of `url` as `scheme://host[:port]`
///
/// Each origin publishes its own robots.txt, so this is the policy cache key.
/// Default ports are omitted, matching how `Url` serializes them.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use ripple_fetch::url::policy_origin;
///
/// let url = Url::parse("HTTP://Example.com:80/a").unwrap();
/// assert_eq!(policy_origin(&url), "http://example.com");
/// ```
pub fn policy_origin(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Returns the host of an origin produced by [`policy_origin`]
pub fn origin_host(origin: &str) -> Option<String> {
    Url::parse(origin).ok().as_ref().and_then(extract_domain)
}

/// Returns the path and query of a URL, as robots rules see it
pub fn policy_path(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

/// Checks a domain against a pattern
///
/// `"example.com"` matches only itself; `"*.example.com"` matches the bare
/// domain and any subdomain of it.
pub fn matches_domain_pattern(pattern: &str, domain: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            domain == base
                || domain
                    .strip_suffix(base)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }
        None => domain == pattern,
    }
}

/// Checks a domain against an allowlist
///
/// An empty allowlist allows every domain.
pub fn is_domain_allowed(allowlist: &[String], domain: &str) -> bool {
    allowlist.is_empty()
        || allowlist
            .iter()
            .any(|pattern| matches_domain_pattern(pattern, domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain_lowercases() {
        let url = Url::parse("https://Blog.Example.COM/post").unwrap();
        assert_eq!(extract_domain(&url), Some("blog.example.com".to_string()));
    }

    #[test]
    fn test_parse_target_accepts_http_and_https() {
        let (url, domain) = parse_target("http://example.com/a?b=c").unwrap();
        assert_eq!(domain, "example.com");
        assert_eq!(url.path(), "/a");

        let (_, domain) = parse_target("https://sub.example.org/").unwrap();
        assert_eq!(domain, "sub.example.org");
    }

    #[test]
    fn test_parse_target_rejects_garbage() {
        assert!(matches!(
            parse_target("not a url"),
            Err(RippleError::UrlParse(_))
        ));
    }

    #[test]
    fn test_parse_target_rejects_other_schemes() {
        assert!(matches!(
            parse_target("ftp://example.com/file"),
            Err(RippleError::UrlError(UrlError::InvalidScheme(_)))
        ));
        assert!(parse_target("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_robots_url_keeps_port() {
        let url = Url::parse("http://127.0.0.1:8080/deep/page?x=1#frag").unwrap();
        assert_eq!(
            robots_url(&url).as_str(),
            "http://127.0.0.1:8080/robots.txt"
        );
    }

    #[test]
    fn test_policy_origin_separates_ports_and_schemes() {
        let a = Url::parse("http://127.0.0.1:8080/x").unwrap();
        let b = Url::parse("http://127.0.0.1:9090/x").unwrap();
        let c = Url::parse("https://127.0.0.1:8080/x").unwrap();
        assert_eq!(policy_origin(&a), "http://127.0.0.1:8080");
        assert_ne!(policy_origin(&a), policy_origin(&b));
        assert_ne!(policy_origin(&a), policy_origin(&c));

        let default_port = Url::parse("https://Example.com:443/page").unwrap();
        assert_eq!(policy_origin(&default_port), "https://example.com");
        assert_eq!(
            origin_host("http://127.0.0.1:8080"),
            Some("127.0.0.1".to_string())
        );
    }

    #[test]
    fn test_policy_path_includes_query() {
        let url = Url::parse("https://example.com/search?q=rust").unwrap();
        assert_eq!(policy_path(&url), "/search?q=rust");

        let url = Url::parse("https://example.com").unwrap();
        assert_eq!(policy_path(&url), "/");
    }

    #[test]
    fn test_domain_patterns() {
        assert!(matches_domain_pattern("example.com", "example.com"));
        assert!(!matches_domain_pattern("example.com", "www.example.com"));
        assert!(matches_domain_pattern("*.example.com", "example.com"));
        assert!(matches_domain_pattern("*.example.com", "a.b.example.com"));
        assert!(!matches_domain_pattern("*.example.com", "myexample.com"));
        assert!(!matches_domain_pattern("*.example.com", "example.com.evil.net"));
    }

    #[test]
    fn test_empty_allowlist_allows_everything() {
        assert!(is_domain_allowed(&[], "anything.net"));

        let allowlist = vec!["*.example.com".to_string(), "docs.rs".to_string()];
        assert!(is_domain_allowed(&allowlist, "docs.rs"));
        assert!(is_domain_allowed(&allowlist, "api.example.com"));
        assert!(!is_domain_allowed(&allowlist, "crates.io"));
    }
}
