// tests/integration/proxy_flow_test.rs

//! End-to-end proxy flows: cache-aside + SWR over HTTP, header hygiene,
//! throttling, and error mapping.

use super::test_helpers::{BrokenCounterStore, TestProxy};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const FIND_PATH: &str = "/api/v1/pst/find?searchWord=x&areaId=10790";

#[tokio::test]
async fn first_get_is_a_miss_and_populates_the_cache() {
    let proxy = TestProxy::spawn(Some("max-age=60"), |_| {}).await;
    let key = proxy.issue_key("mobile").await;

    let response = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", &key)
        .header("accept", "*/*")
        .header("accept-language", "de-DE")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-cache"], "MISS");
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    assert!(response.headers().contains_key("x-ratelimit-remaining"));
    assert!(response.headers().contains_key("x-ratelimit-reset"));
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "ok": true }));

    // The upstream saw the injected server-side credential, never the
    // client's.
    let seen = proxy.upstream.last_headers().await;
    assert_eq!(seen.get("api_key").unwrap(), "test-key");
    assert!(seen.get("x-api-key").is_none());
    assert_eq!(proxy.upstream.hit_count(), 1);
}

#[tokio::test]
async fn second_identical_get_is_a_hit_without_an_upstream_call() {
    let proxy = TestProxy::spawn(Some("max-age=60"), |_| {}).await;
    let key = proxy.issue_key("mobile").await;

    for expected in ["MISS", "HIT"] {
        let response = proxy
            .client
            .get(proxy.url(FIND_PATH))
            .header("x-api-key", &key)
            .header("accept", "*/*")
            .header("accept-language", "de-DE")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["x-cache"], expected);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body, serde_json::json!({ "ok": true }));
    }
    assert_eq!(proxy.upstream.hit_count(), 1);
}

#[tokio::test]
async fn header_casing_does_not_split_the_cache() {
    let proxy = TestProxy::spawn(Some("max-age=60"), |_| {}).await;
    let key = proxy.issue_key("mobile").await;

    let first = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", &key)
        .header("accept-language", "de-DE")
        .send()
        .await
        .unwrap();
    assert_eq!(first.headers()["x-cache"], "MISS");

    let second = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", &key)
        .header("accept-language", "DE-de")
        .send()
        .await
        .unwrap();
    assert_eq!(second.headers()["x-cache"], "HIT");
}

#[tokio::test]
async fn stale_entries_serve_and_refresh_in_the_background() {
    let proxy = TestProxy::spawn(Some("max-age=1"), |c| {
        c.cache.stale_ttl = 30;
    })
    .await;
    let key = proxy.issue_key("mobile").await;

    let first = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", &key)
        .send()
        .await
        .unwrap();
    assert_eq!(first.headers()["x-cache"], "MISS");

    // Past the fresh window, inside the stale window.
    sleep(Duration::from_millis(1300)).await;

    let second = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", &key)
        .send()
        .await
        .unwrap();
    assert_eq!(second.headers()["x-cache"], "STALE");
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "ok": true }));

    // The background refresh lands off the request path.
    sleep(Duration::from_millis(300)).await;
    assert_eq!(proxy.upstream.hit_count(), 2);

    let third = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", &key)
        .send()
        .await
        .unwrap();
    assert_eq!(third.headers()["x-cache"], "HIT");
}

#[tokio::test]
async fn authorization_header_bypasses_the_shared_cache() {
    let proxy = TestProxy::spawn(Some("max-age=60"), |_| {}).await;
    let key = proxy.issue_key("mobile").await;

    for _ in 0..2 {
        let response = proxy
            .client
            .get(proxy.url(FIND_PATH))
            .header("x-api-key", &key)
            .header("authorization", "Bearer user-token")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["x-cache"], "BYPASS");
    }
    assert_eq!(proxy.upstream.hit_count(), 2, "bypassed requests never cache");
}

#[tokio::test]
async fn configured_bypass_prefixes_are_never_cached() {
    let proxy = TestProxy::spawn(Some("max-age=60"), |c| {
        c.cache.bypass_paths = vec!["/live".to_string()];
    })
    .await;
    let key = proxy.issue_key("mobile").await;

    for _ in 0..2 {
        let response = proxy
            .client
            .get(proxy.url("/api/v1/live/scores"))
            .header("x-api-key", &key)
            .send()
            .await
            .unwrap();
        assert_eq!(response.headers()["x-cache"], "BYPASS");
    }
    assert_eq!(proxy.upstream.hit_count(), 2);
}

#[tokio::test]
async fn missing_key_is_unauthorized_with_preauth_budget_headers() {
    let proxy = TestProxy::spawn(None, |_| {}).await;

    let response = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    assert_eq!(proxy.upstream.hit_count(), 0, "401 must not reach upstream");
}

#[tokio::test]
async fn unknown_key_is_unauthorized() {
    let proxy = TestProxy::spawn(None, |_| {}).await;
    let response = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", "sk_not-a-real-key")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(proxy.upstream.hit_count(), 0);
}

#[tokio::test]
async fn key_budget_exhaustion_returns_429_with_retry_after() {
    let proxy = TestProxy::spawn(Some("max-age=60"), |c| {
        c.api_keys.rate_limit_max_requests = 5;
    })
    .await;
    let key = proxy.issue_key("mobile").await;

    for i in 0..5 {
        let response = proxy
            .client
            .get(proxy.url(FIND_PATH))
            .header("x-api-key", &key)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "request {} should pass", i + 1);
    }

    let response = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", &key)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
}

#[tokio::test]
async fn rate_limit_headers_survive_a_failing_counter_backend() {
    let proxy = TestProxy::spawn_with_store(
        Some("max-age=60"),
        |_| {},
        Arc::new(BrokenCounterStore::new()),
    )
    .await;
    let key = proxy.issue_key("mobile").await;

    // Authenticated traffic fails open with a best-effort full budget.
    let response = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", &key)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-ratelimit-limit"], "120");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "120");
    assert!(response.headers().contains_key("x-ratelimit-reset"));
}

#[tokio::test]
async fn preauth_401_keeps_its_budget_headers_when_counters_fail() {
    let proxy =
        TestProxy::spawn_with_store(None, |_| {}, Arc::new(BrokenCounterStore::new())).await;

    let response = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    assert!(response.headers().contains_key("x-ratelimit-remaining"));
    assert!(response.headers().contains_key("x-ratelimit-reset"));
    assert_eq!(proxy.upstream.hit_count(), 0);
}

#[tokio::test]
async fn unsupported_methods_are_not_found() {
    let proxy = TestProxy::spawn(None, |_| {}).await;
    let key = proxy.issue_key("mobile").await;

    let response = proxy
        .client
        .put(proxy.url(FIND_PATH))
        .header("x-api-key", &key)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(proxy.upstream.hit_count(), 0);
}

#[tokio::test]
async fn non_json_post_bodies_are_unsupported_media() {
    let proxy = TestProxy::spawn(None, |_| {}).await;
    let key = proxy.issue_key("mobile").await;

    let response = proxy
        .client
        .post(proxy.url("/api/v1/pst/report"))
        .header("x-api-key", &key)
        .header("content-type", "text/plain")
        .body("raw text")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 415);
    assert_eq!(proxy.upstream.hit_count(), 0);
}

#[tokio::test]
async fn post_requests_relay_without_caching() {
    let proxy = TestProxy::spawn(Some("max-age=60"), |_| {}).await;
    let key = proxy.issue_key("mobile").await;

    for _ in 0..2 {
        let response = proxy
            .client
            .post(proxy.url("/api/v1/pst/report"))
            .header("x-api-key", &key)
            .header("content-type", "application/json")
            .body("{\"reason\":\"test\"}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(
            !response.headers().contains_key("x-cache"),
            "POSTs carry no cache trace"
        );
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body, serde_json::json!({ "reason": "test" }));
    }
    assert_eq!(proxy.upstream.hit_count(), 2);
}

#[tokio::test]
async fn oversized_bodies_are_cut_off_with_413() {
    let proxy = TestProxy::spawn(None, |c| {
        c.proxy.body_limit = 1024;
    })
    .await;
    let key = proxy.issue_key("mobile").await;

    let response = proxy
        .client
        .post(proxy.url("/api/v1/pst/report"))
        .header("x-api-key", &key)
        .header("content-type", "application/json")
        .body(format!("{{\"blob\":\"{}\"}}", "x".repeat(4096)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 413);
    assert_eq!(proxy.upstream.hit_count(), 0);
}

#[tokio::test]
async fn upstream_failures_map_to_a_generic_502() {
    // A proxy whose upstream base points at a dead origin.
    let proxy = TestProxy::spawn(None, |c| {
        c.upstream.base_url = "http://127.0.0.1:9".to_string();
        c.upstream.timeout_ms = 300;
        c.upstream.retries = 0;
    })
    .await;
    let key = proxy.issue_key("mobile").await;

    let response = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", &key)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Upstream request failed");
}

#[tokio::test]
async fn cache_debug_exposes_the_key_fingerprint() {
    let proxy = TestProxy::spawn(Some("max-age=60"), |c| {
        c.cache.debug = true;
    })
    .await;
    let key = proxy.issue_key("mobile").await;

    let response = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", &key)
        .send()
        .await
        .unwrap();
    let hash = response.headers()["x-cache-key-hash"].to_str().unwrap();
    assert_eq!(hash.len(), 32);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn health_endpoints_respond() {
    let proxy = TestProxy::spawn(None, |_| {}).await;

    let health: serde_json::Value = proxy
        .client
        .get(proxy.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, serde_json::json!({ "status": "ok" }));

    let cache_health: serde_json::Value = proxy
        .client
        .get(proxy.url("/health/cache"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cache_health["status"], "ok");
}

#[tokio::test]
async fn internal_upstream_headers_are_not_relayed() {
    let proxy = TestProxy::spawn(Some("max-age=60"), |_| {}).await;
    let key = proxy.issue_key("mobile").await;

    let response = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", &key)
        .send()
        .await
        .unwrap();
    assert!(response.headers().contains_key("cache-control"));
    assert!(
        !response.headers().contains_key("x-upstream-internal"),
        "non-allowlisted upstream headers must be dropped"
    );
}
