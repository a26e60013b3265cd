//! End-to-end tests of the gatekeeping pipeline over real sockets.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{routing::get, Router};
use decap_gateway::oauth::{InProcessBridge, ProxyBridge};
use reqwest::StatusCode;
use serde_json::Value;

use common::{client, spawn_gateway, test_config, unused_port};

fn oauth_stub() -> Arc<InProcessBridge<Router>> {
    let handler = Router::new()
        .route("/auth", get(|| async { "auth start" }).post(|| async { "auth posted" }))
        .route("/callback", get(|| async { "callback done" }));
    Arc::new(InProcessBridge::new(handler))
}

#[tokio::test]
async fn healthz_answers_while_oauth_is_down() {
    let config = test_config(unused_port());
    let bridge = Arc::new(ProxyBridge::new(&config.oauth).unwrap());
    let gateway = spawn_gateway(config, bridge).await;

    let response = client().get(gateway.url("/healthz")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "ok");

    gateway.stop().await;
}

#[tokio::test]
async fn origin_policy_rejects_unknown_hosts() {
    let mut config = test_config(unused_port());
    config.security.allowed_origins = vec!["cms.example.com".to_string()];
    let gateway = spawn_gateway(config, oauth_stub()).await;
    let client = client();

    let denied = client
        .get(gateway.url("/healthz"))
        .header("origin", "https://evil.example.net")
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    let body: Value = denied.json().await.unwrap();
    assert_eq!(body["error"], "Forbidden");

    let malformed = client
        .get(gateway.url("/healthz"))
        .header("origin", "not a url")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::FORBIDDEN);

    let allowed = client
        .get(gateway.url("/healthz"))
        .header("origin", "https://CMS.example.com:8443")
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    assert_eq!(
        allowed.headers()["access-control-allow-origin"],
        "https://CMS.example.com:8443"
    );
    assert_eq!(allowed.headers()["access-control-allow-credentials"], "true");

    let same_origin = client.get(gateway.url("/healthz")).send().await.unwrap();
    assert_eq!(same_origin.status(), StatusCode::OK);
    assert!(!same_origin.headers().contains_key("access-control-allow-origin"));

    let preflight = client
        .request(reqwest::Method::OPTIONS, gateway.url("/entries"))
        .header("origin", "https://cms.example.com")
        .header("access-control-request-method", "PUT")
        .header("access-control-request-headers", "x-csrf-token")
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        preflight.headers()["access-control-allow-headers"],
        "x-csrf-token"
    );

    gateway.stop().await;
}

#[tokio::test]
async fn empty_allow_list_accepts_any_origin() {
    let gateway = spawn_gateway(test_config(unused_port()), oauth_stub()).await;

    let response = client()
        .get(gateway.url("/healthz"))
        .header("origin", "https://anything.example.org")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    gateway.stop().await;
}

#[tokio::test]
async fn writes_need_a_token_except_on_oauth_paths() {
    let gateway = spawn_gateway(test_config(unused_port()), oauth_stub()).await;
    let client = client();

    let forged = client
        .post(gateway.url("/entries"))
        .json(&serde_json::json!({ "title": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::FORBIDDEN);
    let body: Value = forged.json().await.unwrap();
    assert_eq!(body["error"], "Invalid CSRF token");

    for method in [reqwest::Method::PUT, reqwest::Method::PATCH, reqwest::Method::DELETE] {
        let response = client
            .request(method.clone(), gateway.url("/entries/1"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{}", method);
    }

    let oauth = client.post(gateway.url("/auth")).send().await.unwrap();
    assert_eq!(oauth.status(), StatusCode::OK);
    assert_eq!(oauth.text().await.unwrap(), "auth posted");

    let read = client.get(gateway.url("/callback?code=1")).send().await.unwrap();
    assert_eq!(read.status(), StatusCode::OK);

    gateway.stop().await;
}

#[tokio::test]
async fn issued_token_unlocks_writes() {
    let gateway = spawn_gateway(test_config(unused_port()), oauth_stub()).await;
    let client = client();

    let issued = client.get(gateway.url("/csrf-token")).send().await.unwrap();
    assert_eq!(issued.status(), StatusCode::OK);
    let cookie = issued.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cookie.starts_with("_csrf="));
    assert!(cookie.contains("HttpOnly"));
    assert!(!cookie.contains("Secure"));
    let body: Value = issued.json().await.unwrap();
    let token = body["csrfToken"].as_str().unwrap().to_string();

    // Header source. Past the guard, a non-GET miss is a plain 404.
    let via_header = client
        .delete(gateway.url("/entries/1"))
        .header("x-csrf-token", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(via_header.status(), StatusCode::NOT_FOUND);

    // Form body source.
    let via_form = client
        .post(gateway.url("/entries"))
        .form(&[("_csrf", token.as_str()), ("title", "hello")])
        .send()
        .await
        .unwrap();
    assert_eq!(via_form.status(), StatusCode::NOT_FOUND);

    // Query source.
    let via_query = client
        .put(gateway.url(&format!("/entries/1?_csrf={}", token)))
        .send()
        .await
        .unwrap();
    assert_eq!(via_query.status(), StatusCode::NOT_FOUND);

    // A verified write to a read-only route is a JSON miss, never a bare 405.
    let wrong_method = client
        .post(gateway.url("/healthz"))
        .header("x-csrf-token", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_method.status(), StatusCode::NOT_FOUND);
    let body: Value = wrong_method.json().await.unwrap();
    assert_eq!(body["error"], "Not Found");

    // A second issuance reuses the cookie.
    let again = client.get(gateway.url("/csrf-token")).send().await.unwrap();
    assert!(!again.headers().contains_key("set-cookie"));

    // A token without the cookie is rejected.
    let cookieless = reqwest::Client::new()
        .post(gateway.url("/entries"))
        .header("csrf-token", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(cookieless.status(), StatusCode::FORBIDDEN);

    gateway.stop().await;
}

#[tokio::test]
async fn oversized_body_is_refused() {
    let mut config = test_config(unused_port());
    config.security.max_body_bytes = 64;
    let gateway = spawn_gateway(config, oauth_stub()).await;

    let response = client()
        .post(gateway.url("/entries"))
        .header("content-type", "application/json")
        .body(format!("{{\"body\":\"{}\"}}", "x".repeat(512)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    gateway.stop().await;
}

#[tokio::test]
async fn rate_limit_rejects_after_ceiling() {
    let mut config = test_config(unused_port());
    config.rate_limit.max_requests = 3;
    config.rate_limit.window_secs = 60;
    let gateway = spawn_gateway(config, oauth_stub()).await;
    let client = client();

    for remaining in (0..3).rev() {
        let response = client.get(gateway.url("/healthz")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["ratelimit-policy"], "3;w=60");
        let state = response.headers()["ratelimit"].to_str().unwrap().to_string();
        assert!(state.contains(&format!("remaining={}", remaining)), "{}", state);
    }

    let limited = client.get(gateway.url("/healthz")).send().await.unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = limited.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 60);

    gateway.stop().await;
}

#[tokio::test]
async fn security_headers_are_set() {
    let gateway = spawn_gateway(test_config(unused_port()), oauth_stub()).await;

    let response = client().get(gateway.url("/healthz")).send().await.unwrap();
    let headers = response.headers();
    assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
    assert_eq!(headers["cross-origin-opener-policy"], "same-origin");
    assert!(!headers.contains_key("content-security-policy"));
    assert!(!headers.contains_key("x-powered-by"));

    gateway.stop().await;
}

#[tokio::test]
async fn shutdown_drains_in_flight_requests() {
    let slow = Router::new().route(
        "/auth",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            "slow but done"
        }),
    );
    let gateway = spawn_gateway(test_config(unused_port()), Arc::new(InProcessBridge::new(slow))).await;

    let url = gateway.url("/auth");
    let in_flight = tokio::spawn(async move { reqwest::get(url).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    gateway.stop().await;
    assert!(started.elapsed() >= Duration::from_millis(100));

    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "slow but done");
}
