//! Integration tests for the fetch client
//!
//! These tests use wiremock to stand up real HTTP servers and run whole
//! fetches: policy lookup, rate limiting, retries and ledger recording.

use ripple_fetch::config::{Config, FetchSettings, PolicySettings, UserAgentSettings};
use ripple_fetch::storage::{SqliteStore, StateStore};
use ripple_fetch::{FetchClient, FetchContext, FetchStatus, RippleError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{any, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Settings that keep the tests fast: no jitter, tiny backoff, generous rate
fn fast_settings() -> FetchSettings {
    FetchSettings {
        requests_per_second: 100.0,
        burst: 10,
        timeout_secs: 5,
        base_backoff_ms: 10,
        jitter_probability: 0.0,
        ..FetchSettings::default()
    }
}

fn test_config(fetch: FetchSettings) -> Config {
    Config {
        fetch,
        user_agent: UserAgentSettings {
            pool: Vec::new(),
            seed: Some(7),
        },
        ..Config::default()
    }
}

async fn serve_robots(server: &MockServer, body: Option<&str>) {
    let template = match body {
        Some(body) => ResponseTemplate::new(200).set_body_string(body),
        None => ResponseTemplate::new(404),
    };
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(template)
        .mount(server)
        .await;
}

fn domain_of(server: &MockServer) -> String {
    url::Url::parse(&server.uri())
        .expect("Failed to parse base URL")
        .host_str()
        .expect("Failed to extract host")
        .to_string()
}

#[tokio::test]
async fn test_successful_fetch() {
    let server = MockServer::start().await;
    serve_robots(&server, None).await;
    Mock::given(method("GET"))
        .and(path("/listing"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body>hello</body></html>")
                .insert_header("content-type", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(fast_settings())).unwrap();
    let outcome = client
        .fetch(&format!("{}/listing", server.uri()), &FetchContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FetchStatus::Success);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.http_status.map(|s| s.as_u16()), Some(200));
    assert!(outcome.text().unwrap().contains("hello"));
    assert_eq!(outcome.headers.get("content-type").unwrap(), "text/html");
    assert!(outcome.error.is_none());
    assert_eq!(
        outcome.final_url.unwrap().as_str(),
        format!("{}/listing", server.uri())
    );
}

#[tokio::test]
async fn test_not_found_is_one_attempt_client_error() {
    let server = MockServer::start().await;
    serve_robots(&server, None).await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(fast_settings())).unwrap();
    let outcome = client
        .fetch(&format!("{}/gone", server.uri()), &FetchContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FetchStatus::ClientError);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.error.as_deref(), Some("HTTP 404"));
}

#[tokio::test]
async fn test_retry_after_is_waited_out() {
    let server = MockServer::start().await;
    serve_robots(&server, None).await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(fast_settings())).unwrap();
    let started = Instant::now();
    let outcome = client
        .fetch(&format!("{}/busy", server.uri()), &FetchContext::new())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(outcome.status, FetchStatus::Success);
    assert_eq!(outcome.attempts, 2);
}

#[tokio::test]
async fn test_excessive_retry_after_stops_retrying() {
    let server = MockServer::start().await;
    serve_robots(&server, None).await;
    Mock::given(method("GET"))
        .and(path("/closed"))
        .respond_with(ResponseTemplate::new(503).insert_header("retry-after", "3600"))
        .expect(1)
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(fast_settings())).unwrap();
    let outcome = client
        .fetch(&format!("{}/closed", server.uri()), &FetchContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FetchStatus::ServerError);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.retry_after, Some(Duration::from_secs(3600)));
}

#[tokio::test]
async fn test_recovers_after_service_unavailable() {
    let server = MockServer::start().await;
    serve_robots(&server, None).await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("back"))
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(fast_settings())).unwrap();
    let outcome = client
        .fetch(&format!("{}/flaky", server.uri()), &FetchContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FetchStatus::Success);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.text().as_deref(), Some("back"));
}

#[tokio::test]
async fn test_persistent_server_error_exhausts_attempts() {
    let server = MockServer::start().await;
    serve_robots(&server, None).await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(fast_settings())).unwrap();
    let url = format!("{}/broken", server.uri());
    let outcome = client.fetch(&url, &FetchContext::for_job("job")).await.unwrap();

    assert_eq!(outcome.status, FetchStatus::ServerError);
    assert_eq!(outcome.attempts, 3);

    let store = SqliteStore::new_in_memory().unwrap();
    outcome.record(&store, "job", &url).unwrap();
    let failures = store.list_failures("job").unwrap();
    assert_eq!(failures[0].retry_count, 3);
    assert_eq!(failures[0].last_error, "HTTP 500");
}

#[tokio::test]
async fn test_transient_failures_reach_the_ledger() {
    // Nothing listens on port 9 of the loopback interface
    let config = test_config(FetchSettings {
        max_retries: 2,
        ..fast_settings()
    });
    let config = Config {
        policy: PolicySettings {
            enforce: false,
            ..PolicySettings::default()
        },
        ..config
    };

    let client = FetchClient::new(&config).unwrap();
    let url = "http://127.0.0.1:9/unreachable";
    let outcome = client.fetch(url, &FetchContext::for_job("job")).await.unwrap();

    assert_eq!(outcome.status, FetchStatus::TransientNetworkError);
    assert_eq!(outcome.attempts, 3);
    assert!(outcome.http_status.is_none());
    assert!(outcome.error.as_deref().unwrap().starts_with("connection failed"));

    let store = SqliteStore::new_in_memory().unwrap();
    outcome.record(&store, "job", url).unwrap();
    assert_eq!(store.list_failures("job").unwrap()[0].retry_count, 3);
}

#[tokio::test]
async fn test_timeout_is_transient() {
    let server = MockServer::start().await;
    serve_robots(&server, None).await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(FetchSettings {
        timeout_secs: 1,
        max_retries: 0,
        ..fast_settings()
    }))
    .unwrap();
    let outcome = client
        .fetch(&format!("{}/slow", server.uri()), &FetchContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FetchStatus::TransientNetworkError);
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.error.as_deref().unwrap().starts_with("timeout"));
}

#[tokio::test]
async fn test_robots_denial_sends_no_request() {
    let server = MockServer::start().await;
    serve_robots(&server, Some("User-agent: *\nDisallow: /private\nAllow: /")).await;
    Mock::given(method("GET"))
        .and(path("/private/data"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(fast_settings())).unwrap();
    let outcome = client
        .fetch(&format!("{}/private/data", server.uri()), &FetchContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FetchStatus::PolicyDenied);
    assert_eq!(outcome.attempts, 0);
    assert!(outcome.error.unwrap().contains("Disallow: /private"));

    // Denials never reach the ledger
    let store = SqliteStore::new_in_memory().unwrap();
    let outcome = client
        .fetch(&format!("{}/private/data", server.uri()), &FetchContext::new())
        .await
        .unwrap();
    outcome.record(&store, "job", "x").unwrap();
    assert!(store.failure_history("job").unwrap().is_empty());
}

#[tokio::test]
async fn test_domain_allowlist() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(FetchSettings {
        allowed_domains: vec!["*.example.com".to_string()],
        ..fast_settings()
    }))
    .unwrap();
    let outcome = client
        .fetch(&format!("{}/page", server.uri()), &FetchContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FetchStatus::PolicyDenied);
    assert!(outcome.error.unwrap().contains("allowlist"));
}

#[tokio::test]
async fn test_redirect_into_disallowed_path_is_denied() {
    let server = MockServer::start().await;
    serve_robots(&server, Some("User-agent: *\nDisallow: /private")).await;
    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/private/secret"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string("SECRET"))
        .expect(0)
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(fast_settings())).unwrap();
    let outcome = client
        .fetch(&format!("{}/public", server.uri()), &FetchContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FetchStatus::PolicyDenied);
    assert!(outcome.body.is_none());
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.final_url.unwrap().path(), "/private/secret");
    assert!(outcome.error.unwrap().contains("Disallow: /private"));
}

#[tokio::test]
async fn test_allowed_redirect_is_followed() {
    let server = MockServer::start().await;
    serve_robots(&server, Some("User-agent: *\nDisallow: /private")).await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new?page=2"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved here"))
        .expect(1)
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(fast_settings())).unwrap();
    let outcome = client
        .fetch(&format!("{}/old", server.uri()), &FetchContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FetchStatus::Success);
    assert_eq!(outcome.text().as_deref(), Some("moved here"));
    assert_eq!(outcome.attempts, 2);
    let final_url = outcome.final_url.unwrap();
    assert_eq!(final_url.path(), "/new");
    assert_eq!(final_url.query(), Some("page=2"));
}

#[tokio::test]
async fn test_redirect_off_the_allowlist_is_denied() {
    let server = MockServer::start().await;
    serve_robots(&server, None).await;
    let port = url::Url::parse(&server.uri()).unwrap().port().unwrap();
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(
            ResponseTemplate::new(307)
                .insert_header("Location", format!("http://localhost:{}/elsewhere", port).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(FetchSettings {
        allowed_domains: vec![domain_of(&server)],
        ..fast_settings()
    }))
    .unwrap();
    let outcome = client
        .fetch(&format!("{}/start", server.uri()), &FetchContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FetchStatus::PolicyDenied);
    assert!(outcome.error.unwrap().contains("allowlist"));
}

#[tokio::test]
async fn test_redirect_loop_is_capped() {
    let server = MockServer::start().await;
    serve_robots(&server, None).await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
        .expect(11)
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(FetchSettings {
        burst: 20,
        ..fast_settings()
    }))
    .unwrap();
    let outcome = client
        .fetch(&format!("{}/loop", server.uri()), &FetchContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FetchStatus::ClientError);
    assert_eq!(outcome.attempts, 11);
    assert!(outcome.error.unwrap().contains("more than 10 redirects"));
}

#[test]
fn test_zero_rate_config_is_rejected() {
    for rate in [0.0, -1.0, f64::NAN] {
        let config = test_config(FetchSettings {
            requests_per_second: rate,
            ..fast_settings()
        });
        assert!(matches!(
            FetchClient::new(&config),
            Err(RippleError::Config(_))
        ));
    }
}

#[tokio::test]
async fn test_oversized_response_is_client_error() {
    let server = MockServer::start().await;
    serve_robots(&server, None).await;
    Mock::given(method("GET"))
        .and(path("/huge"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(4096)))
        .expect(1)
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(FetchSettings {
        max_response_bytes: 1024,
        ..fast_settings()
    }))
    .unwrap();
    let outcome = client
        .fetch(&format!("{}/huge", server.uri()), &FetchContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FetchStatus::ClientError);
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.body.is_none());
    assert_eq!(outcome.error.as_deref(), Some("response exceeds 1024 bytes"));
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_request() {
    let server = MockServer::start().await;
    serve_robots(&server, None).await;
    Mock::given(method("GET"))
        .and(path("/stall"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(fast_settings())).unwrap();
    let token = CancellationToken::new();
    let ctx = FetchContext::new().with_cancel(token.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let started = Instant::now();
    let result = client.fetch(&format!("{}/stall", server.uri()), &ctx).await;

    assert!(matches!(result, Err(RippleError::Cancelled { .. })));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_same_domain_requests_are_spaced() {
    let server = MockServer::start().await;
    serve_robots(&server, None).await;
    Mock::given(method("GET"))
        .and(path("/item"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(FetchSettings {
        requests_per_second: 4.0,
        burst: 1,
        ..fast_settings()
    }))
    .unwrap();

    let started = Instant::now();
    for _ in 0..3 {
        let outcome = client
            .fetch(&format!("{}/item", server.uri()), &FetchContext::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
    }
    // Tokens at 0, 0.25 and 0.5 seconds
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[tokio::test]
async fn test_crawl_delay_slows_the_domain() {
    let server = MockServer::start().await;
    serve_robots(&server, Some("User-agent: *\nCrawl-delay: 2")).await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = FetchClient::new(&test_config(fast_settings())).unwrap();
    client
        .fetch(&format!("{}/", server.uri()), &FetchContext::new())
        .await
        .unwrap();

    let rate = client.limiter().rate(&domain_of(&server)).await;
    assert!((rate - 0.5).abs() < 1e-9, "rate {}", rate);
}

#[tokio::test]
async fn test_configured_user_agent_is_sent() {
    let server = MockServer::start().await;
    serve_robots(&server, None).await;
    Mock::given(method("GET"))
        .and(path("/ua"))
        .and(header("user-agent", "TestAgent/1.0"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = Config {
        user_agent: UserAgentSettings {
            pool: vec!["TestAgent/1.0".to_string()],
            seed: Some(1),
        },
        ..test_config(fast_settings())
    };
    let client = FetchClient::new(&config).unwrap();
    let outcome = client
        .fetch(&format!("{}/ua", server.uri()), &FetchContext::new())
        .await
        .unwrap();
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_success_resolves_ledger_entry() {
    let server = MockServer::start().await;
    serve_robots(&server, None).await;
    Mock::given(method("GET"))
        .and(path("/later"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/later"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::new(&dir.path().join("state.db")).unwrap();
    let client = FetchClient::new(&test_config(fast_settings())).unwrap();
    let url = format!("{}/later", server.uri());
    let ctx = FetchContext::for_job("job");

    let first = client.fetch(&url, &ctx).await.unwrap();
    assert_eq!(first.status, FetchStatus::ClientError);
    first.record(&store, "job", &url).unwrap();
    assert_eq!(store.list_failures("job").unwrap().len(), 1);

    let second = client.fetch(&url, &ctx).await.unwrap();
    assert!(second.is_success());
    second.record(&store, "job", &url).unwrap();
    assert!(store.list_failures("job").unwrap().is_empty());
    assert_eq!(store.failure_history("job").unwrap()[0].retry_count, 1);
}
