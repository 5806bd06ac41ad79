//! Authentication enforcement tests

use axum::http::{header, Method, StatusCode};
use serde_json::{json, Value};
use wiremock::ResponseTemplate;

use crate::common::{sign_token, token_with_scope, user_token, TestApp};

fn scoped_private_endpoints() -> stac_auth_proxy::config::EndpointMethods {
    serde_json::from_value(json!({
        "^/collections$": [["POST", "collection:create"]],
        "^/collections/([^/]+)/items$": [["POST", "item:create collection:write"]]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_private_endpoint_rejects_anonymous_request() {
    let app = TestApp::new().await;
    app.upstream.mount_json("/collections", json!({"collections": []})).await;

    let response = app.get("/collections").await;

    response.assert_forbidden();
    let json: Value = response.json();
    assert_eq!(json["detail"], "Not authenticated");
    assert!(app.upstream.requests().await.is_empty());
}

#[tokio::test]
async fn test_valid_token_is_forwarded() {
    let app = TestApp::new().await;
    app.upstream.mount_json("/collections", json!({"collections": []})).await;
    let token = user_token("alice");

    let response = app.get_with_token("/collections", &token).await;

    response.assert_ok();
    let received = app.upstream.last_request().await;
    assert_eq!(
        received.headers.get(header::AUTHORIZATION).unwrap(),
        &format!("Bearer {}", token)
    );
}

#[tokio::test]
async fn test_invalid_token_is_rejected() {
    let app = TestApp::new().await;

    let response = app.get_with_token("/collections", "not-a-jwt").await;

    response.assert_unauthorized();
    assert_eq!(response.header("www-authenticate"), Some("Bearer"));
    let json: Value = response.json();
    assert_eq!(json["detail"], "Could not validate credentials");
}

#[tokio::test]
async fn test_malformed_authorization_header_is_rejected() {
    let app = TestApp::new().await;
    let request = axum::http::Request::builder()
        .uri("/collections")
        .header(header::AUTHORIZATION, format!("Token {}", user_token("alice")))
        .body(axum::body::Body::empty())
        .unwrap();

    app.request(request).await.assert_unauthorized();
}

#[tokio::test]
async fn test_expired_token_is_rejected() {
    let app = TestApp::new().await;
    let now = chrono::Utc::now().timestamp();
    let token = sign_token(json!({"sub": "alice", "iat": now - 7200, "exp": now - 3600}));

    app.get_with_token("/collections", &token)
        .await
        .assert_unauthorized();
}

#[tokio::test]
async fn test_public_endpoint_allows_anonymous_request() {
    let app = TestApp::with_config(|config| config.default_public = true).await;
    app.upstream.mount_json("/collections", json!({"collections": []})).await;

    app.get("/collections").await.assert_ok();
}

#[tokio::test]
async fn test_public_endpoint_still_rejects_bad_token() {
    let app = TestApp::with_config(|config| config.default_public = true).await;
    app.upstream.mount_json("/collections", json!({"collections": []})).await;

    app.get_with_token("/collections", "garbage")
        .await
        .assert_unauthorized();
}

#[tokio::test]
async fn test_missing_scope_is_rejected_with_challenge() {
    let app = TestApp::with_config(|config| {
        config.default_public = true;
        config.private_endpoints = scoped_private_endpoints();
    })
    .await;
    app.upstream
        .mount(
            wiremock::matchers::method("POST"),
            "/collections",
            ResponseTemplate::new(201).set_body_json(json!({"id": "new"})),
        )
        .await;

    let response = app
        .post_json_with_token("/collections", &user_token("alice"), json!({"id": "new"}))
        .await;
    response.assert_unauthorized();
    assert_eq!(
        response.header("www-authenticate"),
        Some("Bearer scope=\"collection:create\"")
    );

    let token = token_with_scope("alice", "openid collection:create");
    let response = app
        .post_json_with_token("/collections", &token, json!({"id": "new"}))
        .await;
    response.assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_every_listed_scope_is_required() {
    let app = TestApp::with_config(|config| {
        config.default_public = true;
        config.private_endpoints = scoped_private_endpoints();
    })
    .await;
    app.upstream
        .mount_any("/collections/a/items", ResponseTemplate::new(201))
        .await;

    let partial = token_with_scope("alice", "item:create");
    let response = app
        .post_json_with_token("/collections/a/items", &partial, json!({"id": "x"}))
        .await;
    response.assert_unauthorized();
    assert_eq!(
        response.header("www-authenticate"),
        Some("Bearer scope=\"collection:write\"")
    );

    let full = token_with_scope("alice", "collection:write item:create");
    app.post_json_with_token("/collections/a/items", &full, json!({"id": "x"}))
        .await
        .assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_method_not_listed_falls_back_to_default_policy() {
    let app = TestApp::with_config(|config| config.default_public = true).await;
    app.upstream.mount_json("/collections/a", json!({"id": "a"})).await;

    app.get("/collections/a").await.assert_ok();
    app.send(Method::DELETE, "/collections/a", None, None)
        .await
        .assert_forbidden();
}

#[tokio::test]
async fn test_audience_is_checked_when_configured() {
    let app = TestApp::with_config(|config| {
        config.allowed_jwt_audiences = Some(vec!["stac".to_string()]);
    })
    .await;
    app.upstream.mount_json("/collections", json!({"collections": []})).await;
    let now = chrono::Utc::now().timestamp();

    let wrong = sign_token(json!({"sub": "alice", "aud": "other", "exp": now + 60}));
    app.get_with_token("/collections", &wrong)
        .await
        .assert_unauthorized();

    let right = sign_token(json!({"sub": "alice", "aud": ["stac", "other"], "exp": now + 60}));
    app.get_with_token("/collections", &right).await.assert_ok();
}

#[tokio::test]
async fn test_oidc_provider_failure_is_bad_gateway() {
    let app = TestApp::with_config(|config| {
        config.default_public = true;
        config.oidc_discovery_url = "http://127.0.0.1:9/.well-known/openid-configuration".to_string();
    })
    .await;

    app.get("/collections").await.assert_bad_gateway();
}

#[tokio::test]
async fn test_default_private_end_to_end() {
    let app = TestApp::with_config(|config| {
        config.items_filter = Some(stac_auth_proxy::config::FilterConfig {
            cls: "template".to_string(),
            args: vec![json!("owner = '{{ payload.sub }}'")],
            kwargs: Default::default(),
        });
    })
    .await;
    app.upstream
        .mount_json("/search", json!({"type": "FeatureCollection", "features": [], "links": []}))
        .await;

    app.get("/search").await.assert_forbidden();
    assert!(app.upstream.requests().await.is_empty());

    let response = app.get_with_token("/search", &user_token("alice")).await;
    response.assert_ok();
    let json: Value = response.json();
    assert!(json["stac_extensions"].is_array());

    let received = app.upstream.last_request().await;
    let filter = crate::common::query_param(&received, "filter").unwrap();
    let expected: stac_auth_proxy::cql2::Expr = "owner = 'alice'".parse().unwrap();
    assert_eq!(filter.parse::<stac_auth_proxy::cql2::Expr>().unwrap(), expected);
}
