//! Health endpoint tests

use serde_json::{json, Value};

use crate::common::TestApp;

#[tokio::test]
async fn test_healthz_is_public_by_default() {
    let app = TestApp::new().await;

    let response = app.get("/healthz").await;

    response.assert_ok();
    let json: Value = response.json();
    assert_eq!(json, json!({"status": "ok"}));
    assert!(app.upstream.requests().await.is_empty());
}

#[tokio::test]
async fn test_upstream_health_reports_status_code() {
    let app = TestApp::new().await;
    app.upstream.mount_json("/", json!({"type": "Catalog"})).await;

    let response = app.get("/healthz/upstream").await;

    response.assert_ok();
    let json: Value = response.json();
    assert_eq!(json, json!({"status": "ok", "code": 200}));
}

#[tokio::test]
async fn test_unhealthy_upstream_is_bad_gateway() {
    let app = TestApp::new().await;

    app.get("/healthz/upstream").await.assert_bad_gateway();
}

#[tokio::test]
async fn test_custom_prefix() {
    let app = TestApp::with_config(|config| {
        config.healthz_prefix = "/_mgmt/health".to_string();
        config.default_public = true;
    })
    .await;

    app.get("/_mgmt/health").await.assert_ok();
    assert!(app.upstream.requests().await.is_empty());
}

#[tokio::test]
async fn test_empty_prefix_disables_health_routes() {
    let app = TestApp::with_config(|config| config.healthz_prefix = String::new()).await;
    app.upstream
        .mount_json("/healthz", json!({"from": "upstream"}))
        .await;

    let response = app.get("/healthz").await;

    response.assert_ok();
    let json: Value = response.json();
    assert_eq!(json["from"], "upstream");
}
