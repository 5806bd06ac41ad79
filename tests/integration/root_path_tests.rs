//! Tests for serving the proxy below a root path

use serde_json::{json, Value};

use crate::common::{landing_page, TestApp, TEST_HOST};

async fn mounted_app() -> TestApp {
    TestApp::with_config(|config| {
        config.root_path = "/stac".to_string();
        config.default_public = true;
        config.enable_authentication_extension = false;
    })
    .await
}

#[tokio::test]
async fn test_root_path_is_removed_before_forwarding() {
    let app = mounted_app().await;
    app.upstream
        .mount_json("/collections", json!({"collections": [], "links": []}))
        .await;

    app.get("/stac/collections?limit=2").await.assert_ok();

    let received = app.upstream.last_request().await;
    assert_eq!(received.url.path(), "/collections");
    assert_eq!(received.url.query(), Some("limit=2"));
    let forwarded = received.headers.get("forwarded").unwrap().to_str().unwrap();
    assert!(forwarded.ends_with("path=/stac/"), "{}", forwarded);
}

#[tokio::test]
async fn test_bare_root_path_maps_to_landing_page() {
    let app = mounted_app().await;
    app.upstream
        .mount_json("/", landing_page(&format!("http://{}", TEST_HOST)))
        .await;

    app.get("/stac").await.assert_ok();

    assert_eq!(app.upstream.last_request().await.url.path(), "/");
}

#[tokio::test]
async fn test_paths_outside_root_path_are_not_found() {
    let app = mounted_app().await;

    app.get("/collections").await.assert_not_found();
    app.get("/stacks/collections").await.assert_not_found();
    assert!(app.upstream.requests().await.is_empty());
}

#[tokio::test]
async fn test_local_routes_live_below_root_path() {
    let app = mounted_app().await;

    app.get("/stac/healthz").await.assert_ok();
    assert!(app.upstream.requests().await.is_empty());
}

#[tokio::test]
async fn test_links_point_back_through_root_path() {
    let app = mounted_app().await;
    app.upstream
        .mount_json("/", landing_page(&format!("http://{}", TEST_HOST)))
        .await;

    let response = app.get("/stac/").await;

    response.assert_ok();
    let json: Value = response.json();
    let hrefs: Vec<&str> = json["links"]
        .as_array()
        .unwrap()
        .iter()
        .map(|link| link["href"].as_str().unwrap())
        .collect();
    assert_eq!(
        hrefs,
        vec![
            "http://proxy.example.com/stac/",
            "http://proxy.example.com/stac/collections",
            "http://proxy.example.com/stac/search",
            "https://example.org/license",
        ]
    );
    assert_eq!(
        response.header("content-length").map(str::to_string),
        Some(response.body.len().to_string())
    );
}

#[tokio::test]
async fn test_links_drop_upstream_path() {
    let app = TestApp::with_config(|config| {
        config.upstream_url.push_str("/api");
        config.default_public = true;
        config.enable_authentication_extension = false;
    })
    .await;
    app.upstream
        .mount_json(
            "/api/collections",
            json!({
                "collections": [],
                "links": [{"rel": "self", "href": format!("http://{}/api/collections", TEST_HOST)}]
            }),
        )
        .await;

    let response = app.get("/collections").await;

    response.assert_ok();
    let json: Value = response.json();
    assert_eq!(
        json["links"][0]["href"],
        format!("http://{}/collections", TEST_HOST)
    );
}

#[tokio::test]
async fn test_non_json_responses_pass_through_unchanged() {
    let app = mounted_app().await;
    let body = b"\x89PNG\r\n\x1a\nnot really an image".to_vec();
    app.upstream
        .mount_any(
            "/collections/a/thumbnail",
            wiremock::ResponseTemplate::new(200).set_body_raw(body.clone(), "image/png"),
        )
        .await;

    let response = app.get("/stac/collections/a/thumbnail").await;

    response.assert_ok();
    assert_eq!(response.body.as_ref(), body.as_slice());
    assert_eq!(response.header("content-type"), Some("image/png"));
}
