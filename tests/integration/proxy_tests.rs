//! Request forwarding tests

use axum::http::{header, Method, StatusCode};
use serde_json::{json, Value};
use wiremock::matchers::method;
use wiremock::ResponseTemplate;

use crate::common::{query_param, TestApp, TEST_HOST};

async fn public_app() -> TestApp {
    TestApp::with_config(|config| config.default_public = true).await
}

#[tokio::test]
async fn test_forwards_method_path_query_and_body() {
    let app = public_app().await;
    app.upstream
        .mount(
            method("POST"),
            "/search",
            ResponseTemplate::new(200).set_body_json(json!({"type": "FeatureCollection", "features": []})),
        )
        .await;

    let body = json!({"collections": ["landsat"], "limit": 5});
    let response = app.post_json("/search?token=abc", body.clone()).await;

    response.assert_ok();
    let received = app.upstream.last_request().await;
    assert_eq!(received.method.as_str(), "POST");
    assert_eq!(received.url.path(), "/search");
    assert_eq!(query_param(&received, "token").as_deref(), Some("abc"));
    let forwarded: Value = serde_json::from_slice(&received.body).unwrap();
    assert_eq!(forwarded, body);
}

#[tokio::test]
async fn test_relays_upstream_status_and_body() {
    let app = public_app().await;
    app.upstream
        .mount_any(
            "/collections/missing",
            ResponseTemplate::new(404).set_body_json(json!({"code": "NotFoundError"})),
        )
        .await;

    let response = app.get("/collections/missing").await;

    response.assert_not_found();
    let json: Value = response.json();
    assert_eq!(json["code"], "NotFoundError");
}

#[tokio::test]
async fn test_timing_headers_are_added() {
    let app = public_app().await;
    app.upstream.mount_json("/conformance", json!({"conformsTo": []})).await;

    let response = app.get("/conformance").await;

    response.assert_ok();
    for name in ["x-upstream-time", "x-process-time"] {
        let value: f64 = response
            .header(name)
            .unwrap_or_else(|| panic!("missing {}", name))
            .parse()
            .unwrap();
        assert!(value >= 0.0);
    }
}

#[tokio::test]
async fn test_forwarded_headers_describe_the_client_request() {
    let app = public_app().await;
    app.upstream.mount_json("/conformance", json!({"conformsTo": []})).await;

    app.get("/conformance").await.assert_ok();

    let received = app.upstream.last_request().await;
    let forwarded = received.headers.get(header::FORWARDED).unwrap().to_str().unwrap();
    assert!(forwarded.contains(&format!("host={}", TEST_HOST)), "{}", forwarded);
    assert!(forwarded.contains("proto=http"), "{}", forwarded);
    assert!(forwarded.contains("path=/"), "{}", forwarded);
    assert_eq!(
        received.headers.get(header::VIA).unwrap(),
        "1.1 stac-auth-proxy"
    );
    assert_ne!(received.headers.get(header::HOST).unwrap(), TEST_HOST);
    assert!(received.headers.get("x-forwarded-host").is_none());
}

#[tokio::test]
async fn test_legacy_forwarded_headers_and_host_passthrough() {
    let app = TestApp::with_config(|config| {
        config.default_public = true;
        config.override_host = false;
        config.enable_legacy_forwarded_headers = true;
    })
    .await;
    app.upstream.mount_json("/conformance", json!({"conformsTo": []})).await;

    app.get("/conformance").await.assert_ok();

    let received = app.upstream.last_request().await;
    assert_eq!(received.headers.get(header::HOST).unwrap(), TEST_HOST);
    assert_eq!(received.headers.get("x-forwarded-host").unwrap(), TEST_HOST);
    assert_eq!(received.headers.get("x-forwarded-proto").unwrap(), "http");
    assert_eq!(received.headers.get("x-forwarded-path").unwrap(), "/");
}

#[tokio::test]
async fn test_client_accept_encoding_is_not_forwarded() {
    let app = public_app().await;
    app.upstream.mount_json("/conformance", json!({"conformsTo": []})).await;
    let request = axum::http::Request::builder()
        .uri("/conformance")
        .header(header::ACCEPT_ENCODING, "x-custom-codec")
        .body(axum::body::Body::empty())
        .unwrap();

    app.request(request).await.assert_ok();

    let received = app.upstream.last_request().await;
    let forwarded = received
        .headers
        .get(header::ACCEPT_ENCODING)
        .map(|value| value.to_str().unwrap().to_string())
        .unwrap_or_default();
    assert!(!forwarded.contains("x-custom-codec"), "{}", forwarded);
}

#[tokio::test]
async fn test_unsupported_method_is_rejected() {
    let app = public_app().await;

    let response = app.send(Method::OPTIONS, "/collections", None, None).await;

    response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    assert!(app.upstream.requests().await.is_empty());
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let app = TestApp::with_config(|config| {
        config.default_public = true;
        config.upstream_url = "http://127.0.0.1:9".to_string();
    })
    .await;

    app.get("/collections").await.assert_bad_gateway();
}

#[tokio::test]
async fn test_upstream_path_is_prefixed() {
    let app = TestApp::with_config(|config| {
        config.default_public = true;
        config.upstream_url.push_str("/api/v1/");
    })
    .await;
    app.upstream
        .mount_json("/api/v1/collections", json!({"collections": [], "links": []}))
        .await;

    app.get("/collections?limit=1").await.assert_ok();

    let received = app.upstream.last_request().await;
    assert_eq!(received.url.path(), "/api/v1/collections");
}
