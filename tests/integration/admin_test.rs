// tests/integration/admin_test.rs

//! End-to-end tests for the guarded admin surface: bearer authentication,
//! key lifecycle over HTTP, and cache invalidation.

use super::test_helpers::{ADMIN_TOKEN, BrokenCounterStore, TestProxy};
use std::sync::Arc;

const FIND_PATH: &str = "/api/v1/pst/find?searchWord=x&areaId=10790";

fn bearer() -> String {
    format!("Bearer {ADMIN_TOKEN}")
}

#[tokio::test]
async fn admin_requests_without_a_valid_bearer_are_rejected() {
    let proxy = TestProxy::spawn(None, |_| {}).await;

    let missing = proxy
        .client
        .get(proxy.url("/internal/api-keys"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 401);

    let wrong = proxy
        .client
        .get(proxy.url("/internal/api-keys"))
        .header("authorization", "Bearer wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);
}

#[tokio::test]
async fn admin_is_rejected_outright_when_no_token_is_configured() {
    let proxy = TestProxy::spawn(None, |c| {
        c.admin.token = None;
    })
    .await;

    let response = proxy
        .client
        .get(proxy.url("/internal/api-keys"))
        .header("authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn admin_guard_hides_counter_backend_failures() {
    let proxy =
        TestProxy::spawn_with_store(None, |_| {}, Arc::new(BrokenCounterStore::new())).await;

    let response = proxy
        .client
        .get(proxy.url("/internal/api-keys"))
        .header("authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "State store unavailable");
    assert!(
        !body.to_string().contains("counters offline"),
        "backend detail must not reach unauthenticated callers"
    );
}

#[tokio::test]
async fn created_keys_authenticate_proxy_traffic() {
    let proxy = TestProxy::spawn(Some("max-age=60"), |_| {}).await;

    let created = proxy
        .client
        .post(proxy.url("/internal/api-keys"))
        .header("authorization", bearer())
        .json(&serde_json::json!({
            "owner": "mobile-team",
            "label": "android",
            "createdBy": "ops",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let body: serde_json::Value = created.json().await.unwrap();
    let raw_key = body["apiKey"].as_str().unwrap().to_string();
    assert!(raw_key.starts_with("sk_"));
    assert!(body["keyId"].is_string());
    assert_eq!(body["owner"], "mobile-team");
    assert_eq!(body["revoked"], false);
    assert!(body.get("hash").is_none(), "the stored hash stays internal");

    let response = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", &raw_key)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn listing_exposes_neither_raw_keys_nor_hashes() {
    let proxy = TestProxy::spawn(None, |_| {}).await;
    let raw_key = proxy.issue_key("mobile").await;

    let listed: serde_json::Value = proxy
        .client
        .get(proxy.url("/internal/api-keys"))
        .header("authorization", bearer())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let items = listed["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert!(items[0].get("apiKey").is_none());
    assert!(items[0].get("hash").is_none());
    assert!(!listed.to_string().contains(&raw_key));
}

#[tokio::test]
async fn revoke_activate_delete_drive_key_validity() {
    let proxy = TestProxy::spawn(None, |_| {}).await;

    let created: serde_json::Value = proxy
        .client
        .post(proxy.url("/internal/api-keys"))
        .header("authorization", bearer())
        .json(&serde_json::json!({ "owner": "mobile" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let raw_key = created["apiKey"].as_str().unwrap().to_string();
    let key_id = created["keyId"].as_str().unwrap().to_string();

    let authed = |key: &str| {
        proxy
            .client
            .get(proxy.url(FIND_PATH))
            .header("x-api-key", key.to_string())
    };

    assert_eq!(authed(&raw_key).send().await.unwrap().status(), 200);

    let revoked: serde_json::Value = proxy
        .client
        .post(proxy.url(&format!("/internal/api-keys/{key_id}/revoke")))
        .header("authorization", bearer())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(revoked, serde_json::json!({ "ok": true }));
    assert_eq!(authed(&raw_key).send().await.unwrap().status(), 401);

    let activated: serde_json::Value = proxy
        .client
        .post(proxy.url(&format!("/internal/api-keys/{key_id}/activate")))
        .header("authorization", bearer())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(activated, serde_json::json!({ "ok": true }));
    assert_eq!(authed(&raw_key).send().await.unwrap().status(), 200);

    let deleted: serde_json::Value = proxy
        .client
        .delete(proxy.url(&format!("/internal/api-keys/{key_id}")))
        .header("authorization", bearer())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted, serde_json::json!({ "ok": true }));
    assert_eq!(authed(&raw_key).send().await.unwrap().status(), 401);
}

#[tokio::test]
async fn mutating_unknown_keys_is_not_found() {
    let proxy = TestProxy::spawn(None, |_| {}).await;
    let response = proxy
        .client
        .post(proxy.url("/internal/api-keys/no-such-id/revoke"))
        .header("authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn exact_invalidation_forces_the_next_get_to_miss() {
    let proxy = TestProxy::spawn(Some("max-age=60"), |_| {}).await;
    let key = proxy.issue_key("mobile").await;

    let get = || {
        proxy
            .client
            .get(proxy.url(FIND_PATH))
            .header("x-api-key", &key)
            .header("accept", "*/*")
            .header("accept-language", "de-DE")
    };

    assert_eq!(get().send().await.unwrap().headers()["x-cache"], "MISS");
    assert_eq!(get().send().await.unwrap().headers()["x-cache"], "HIT");

    let invalidated: serde_json::Value = proxy
        .client
        .post(proxy.url("/internal/cache/invalidate"))
        .header("authorization", bearer())
        .json(&serde_json::json!({
            "scope": "exact",
            "path": "/pst/find?searchWord=x&areaId=10790",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        invalidated,
        serde_json::json!({
            "ok": true,
            "scope": "exact",
            "dryRun": false,
            "matched": 1,
            "deleted": 1,
        })
    );

    assert_eq!(get().send().await.unwrap().headers()["x-cache"], "MISS");
    assert_eq!(proxy.upstream.hit_count(), 2);
}

#[tokio::test]
async fn dry_run_invalidation_reports_without_deleting() {
    let proxy = TestProxy::spawn(Some("max-age=60"), |_| {}).await;
    let key = proxy.issue_key("mobile").await;

    let get = || {
        proxy
            .client
            .get(proxy.url(FIND_PATH))
            .header("x-api-key", &key)
    };
    assert_eq!(get().send().await.unwrap().headers()["x-cache"], "MISS");

    let result: serde_json::Value = proxy
        .client
        .post(proxy.url("/internal/cache/invalidate"))
        .header("authorization", bearer())
        .json(&serde_json::json!({ "scope": "all", "dryRun": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(result["matched"], 1);
    assert_eq!(result["deleted"], 0);

    assert_eq!(get().send().await.unwrap().headers()["x-cache"], "HIT");
}

#[tokio::test]
async fn invalidation_leaves_the_key_registry_untouched() {
    let proxy = TestProxy::spawn(Some("max-age=60"), |_| {}).await;
    let key = proxy.issue_key("mobile").await;

    let warm = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", &key)
        .send()
        .await
        .unwrap();
    assert_eq!(warm.status(), 200);

    let result: serde_json::Value = proxy
        .client
        .post(proxy.url("/internal/cache/invalidate"))
        .header("authorization", bearer())
        .json(&serde_json::json!({ "scope": "all" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(result["ok"], true);

    // The key still authenticates: only the cache namespace was touched.
    let after = proxy
        .client
        .get(proxy.url(FIND_PATH))
        .header("x-api-key", &key)
        .send()
        .await
        .unwrap();
    assert_eq!(after.status(), 200);
    assert_eq!(after.headers()["x-cache"], "MISS");
}

#[tokio::test]
async fn invalid_invalidation_payloads_are_bad_requests() {
    let proxy = TestProxy::spawn(None, |_| {}).await;
    let response = proxy
        .client
        .post(proxy.url("/internal/cache/invalidate"))
        .header("authorization", bearer())
        .json(&serde_json::json!({ "scope": "exact" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}
