//! CQL2 filter generation and enforcement tests

use std::str::FromStr;

use axum::http::Method;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stac_auth_proxy::config::FilterConfig;
use stac_auth_proxy::cql2::Expr;

use crate::common::{item, query_param, user_token, TestApp};

const ANONYMOUS_PUBLIC_ONLY: &str = "{{ '(private = false)' if payload is none else 'true' }}";

fn template(template_str: &str) -> FilterConfig {
    FilterConfig {
        cls: "template".to_string(),
        args: vec![json!(template_str)],
        kwargs: Default::default(),
    }
}

async fn filtered_app(items: Option<FilterConfig>, collections: Option<FilterConfig>) -> TestApp {
    TestApp::with_config(|config| {
        config.default_public = true;
        config.enable_authentication_extension = false;
        config.items_filter = items;
        config.collections_filter = collections;
    })
    .await
}

fn expr(text: &str) -> Expr {
    Expr::from_str(text).unwrap()
}

#[tokio::test]
async fn test_search_query_gets_generated_filter() {
    let app = filtered_app(Some(template(ANONYMOUS_PUBLIC_ONLY)), None).await;
    app.upstream
        .mount_json("/search", json!({"type": "FeatureCollection", "features": []}))
        .await;

    app.get("/search?limit=10").await.assert_ok();

    let received = app.upstream.last_request().await;
    assert_eq!(query_param(&received, "limit").as_deref(), Some("10"));
    assert_eq!(query_param(&received, "filter-lang").as_deref(), Some("cql2-text"));
    let filter = query_param(&received, "filter").unwrap();
    assert_eq!(expr(&filter), expr("private = false"));
}

#[tokio::test]
async fn test_filter_depends_on_token() {
    let app = filtered_app(Some(template(ANONYMOUS_PUBLIC_ONLY)), None).await;
    app.upstream
        .mount_json("/search", json!({"type": "FeatureCollection", "features": []}))
        .await;

    app.get_with_token("/search", &user_token("alice"))
        .await
        .assert_ok();

    let received = app.upstream.last_request().await;
    let filter = query_param(&received, "filter").unwrap();
    assert_eq!(expr(&filter), Expr::Bool(true));
}

#[tokio::test]
async fn test_client_filter_is_combined() {
    let app = filtered_app(Some(template(ANONYMOUS_PUBLIC_ONLY)), None).await;
    app.upstream
        .mount_json("/collections/a/items", json!({"type": "FeatureCollection", "features": []}))
        .await;

    app.get("/collections/a/items?filter=collection%3D%27a%27")
        .await
        .assert_ok();

    let received = app.upstream.last_request().await;
    let filter = query_param(&received, "filter").unwrap();
    assert_eq!(
        expr(&filter),
        expr("(private = false) AND (collection = 'a')")
    );
}

#[tokio::test]
async fn test_spatial_and_temporal_query_filter_is_combined() {
    let app = filtered_app(Some(template(ANONYMOUS_PUBLIC_ONLY)), None).await;
    app.upstream
        .mount_json("/search", json!({"type": "FeatureCollection", "features": []}))
        .await;

    let client = "S_INTERSECTS(geometry, POLYGON((0 0, 10 0, 10 10, 0 0))) \
                  AND T_INTERSECTS(datetime, INTERVAL('2020-01-01', '2021-01-01T00:00:00Z'))";
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("filter", client)
        .append_pair("filter-lang", "cql2-text")
        .finish();

    app.get(&format!("/search?{}", query)).await.assert_ok();

    let received = app.upstream.last_request().await;
    let filter = query_param(&received, "filter").unwrap();
    assert_eq!(
        expr(&filter),
        expr(&format!("(private = false) AND ({})", client))
    );
    assert!(filter.contains("POLYGON((0 0, 10 0, 10 10, 0 0))"));
    assert!(filter.contains("INTERVAL(DATE('2020-01-01'), TIMESTAMP('2021-01-01T00:00:00Z'))"));
}

#[tokio::test]
async fn test_geojson_and_interval_body_filter_is_combined() {
    let app = filtered_app(Some(template(ANONYMOUS_PUBLIC_ONLY)), None).await;
    app.upstream
        .mount(
            method("POST"),
            "/search",
            ResponseTemplate::new(200).set_body_json(json!({"type": "FeatureCollection", "features": []})),
        )
        .await;

    let client = json!({"op": "and", "args": [
        {"op": "s_intersects", "args": [
            {"property": "geometry"},
            {"type": "Point", "coordinates": [-105.1, 40.2]}
        ]},
        {"op": "t_intersects", "args": [
            {"property": "datetime"},
            {"interval": ["2020-01-01T00:00:00Z", ".."]}
        ]}
    ]});

    app.post_json("/search", json!({"filter": client.clone(), "filter-lang": "cql2-json"}))
        .await
        .assert_ok();

    let received = app.upstream.last_request().await;
    let body: Value = serde_json::from_slice(&received.body).unwrap();
    assert_eq!(body["filter-lang"], "cql2-json");
    assert_eq!(
        body["filter"],
        json!({"op": "and", "args": [
            {"op": "=", "args": [{"property": "private"}, false]},
            client
        ]})
    );
}

#[tokio::test]
async fn test_invalid_client_filter_is_bad_request() {
    let app = filtered_app(Some(template(ANONYMOUS_PUBLIC_ONLY)), None).await;

    app.get("/search?filter=%28%28%28").await.assert_bad_request();
    assert!(app.upstream.requests().await.is_empty());
}

#[tokio::test]
async fn test_search_body_gets_generated_filter() {
    let app = filtered_app(Some(template(ANONYMOUS_PUBLIC_ONLY)), None).await;
    app.upstream
        .mount(
            method("POST"),
            "/search",
            ResponseTemplate::new(200).set_body_json(json!({"type": "FeatureCollection", "features": []})),
        )
        .await;

    app.post_json("/search", json!({"collections": ["a"]}))
        .await
        .assert_ok();

    let received = app.upstream.last_request().await;
    let body: Value = serde_json::from_slice(&received.body).unwrap();
    assert_eq!(body["collections"], json!(["a"]));
    assert_eq!(body["filter-lang"], "cql2-json");
    assert_eq!(Expr::from_json(&body["filter"]).unwrap(), expr("private = false"));
    assert_eq!(
        received.headers.get("content-length").unwrap().to_str().unwrap(),
        received.body.len().to_string()
    );
}

#[tokio::test]
async fn test_non_json_write_body_is_bad_request() {
    let app = filtered_app(Some(template(ANONYMOUS_PUBLIC_ONLY)), None).await;
    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/search")
        .header("content-type", "text/plain")
        .body(axum::body::Body::from("not json"))
        .unwrap();

    app.request(request).await.assert_bad_request();
    assert!(app.upstream.requests().await.is_empty());
}

#[tokio::test]
async fn test_single_item_hidden_when_filter_does_not_match() {
    let app = filtered_app(Some(template(ANONYMOUS_PUBLIC_ONLY)), None).await;
    app.upstream
        .mount_json("/collections/a/items/secret", item("a", "secret", true))
        .await;
    app.upstream
        .mount_json("/collections/a/items/open", item("a", "open", false))
        .await;

    let response = app.get("/collections/a/items/secret").await;
    response.assert_not_found();
    let json: Value = response.json();
    assert_eq!(json["code"], "NotFoundError");
    assert_eq!(json["description"], "Record not found.");

    let response = app.get("/collections/a/items/open").await;
    response.assert_ok();
    let json: Value = response.json();
    assert_eq!(json["id"], "open");

    let received = app.upstream.last_request().await;
    assert!(query_param(&received, "filter").is_none());
}

#[tokio::test]
async fn test_missing_record_looks_like_filtered_record() {
    let app = filtered_app(Some(template(ANONYMOUS_PUBLIC_ONLY)), None).await;
    app.upstream
        .mount_any(
            "/collections/a/items/gone",
            ResponseTemplate::new(404).set_body_json(json!({"code": "NotFound", "description": "upstream"})),
        )
        .await;

    let response = app.get("/collections/a/items/gone").await;

    response.assert_not_found();
    let json: Value = response.json();
    assert_eq!(json["description"], "Record not found.");
}

#[tokio::test]
async fn test_collections_filter_applies_only_to_collections() {
    let app = filtered_app(None, Some(template("id = 'public'"))).await;
    app.upstream
        .mount_json("/collections", json!({"collections": [], "links": []}))
        .await;
    app.upstream
        .mount_json("/search", json!({"type": "FeatureCollection", "features": []}))
        .await;

    app.get("/collections").await.assert_ok();
    let received = app.upstream.last_request().await;
    assert_eq!(expr(&query_param(&received, "filter").unwrap()), expr("id = 'public'"));

    app.get("/search").await.assert_ok();
    let received = app.upstream.last_request().await;
    assert!(query_param(&received, "filter").is_none());
}

#[tokio::test]
async fn test_unfiltered_paths_pass_through() {
    let app = filtered_app(Some(template(ANONYMOUS_PUBLIC_ONLY)), None).await;
    app.upstream.mount_json("/conformance", json!({"conformsTo": []})).await;

    app.get("/conformance").await.assert_ok();

    let received = app.upstream.last_request().await;
    assert!(received.url.query().is_none());
}

#[tokio::test]
async fn test_invalid_generated_filter_is_bad_gateway() {
    let app = filtered_app(Some(template("this is ((( not cql2")), None).await;

    app.get("/search").await.assert_bad_gateway();
    assert!(app.upstream.requests().await.is_empty());
}

#[tokio::test]
async fn test_template_sees_path_parameters() {
    let app = filtered_app(
        Some(template("collection = '{{ req.path_params.collection_id }}'")),
        None,
    )
    .await;
    app.upstream
        .mount_json("/collections/landsat/items", json!({"type": "FeatureCollection", "features": []}))
        .await;

    app.get("/collections/landsat/items").await.assert_ok();

    let received = app.upstream.last_request().await;
    assert_eq!(
        expr(&query_param(&received, "filter").unwrap()),
        expr("collection = 'landsat'")
    );
}

#[tokio::test]
async fn test_opa_decision_is_used_and_cached() {
    let opa = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/data/stac/filter"))
        .and(body_partial_json(json!({"input": {"req": {"path": "/search"}}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "collection = 'public'"})))
        .expect(1)
        .mount(&opa)
        .await;

    let opa_filter = FilterConfig {
        cls: "opa".to_string(),
        args: vec![json!(opa.uri()), json!("stac/filter")],
        kwargs: Default::default(),
    };
    let app = filtered_app(Some(opa_filter), None).await;
    app.upstream
        .mount_json("/search", json!({"type": "FeatureCollection", "features": []}))
        .await;

    app.get("/search").await.assert_ok();
    app.get("/search").await.assert_ok();

    for received in app.upstream.requests().await {
        assert_eq!(
            expr(&query_param(&received, "filter").unwrap()),
            expr("collection = 'public'")
        );
    }
}

#[tokio::test]
async fn test_opa_failure_is_bad_gateway() {
    let opa = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&opa)
        .await;

    let opa_filter = FilterConfig {
        cls: "opa".to_string(),
        args: vec![json!(opa.uri()), json!("stac/filter")],
        kwargs: Default::default(),
    };
    let app = filtered_app(Some(opa_filter), None).await;

    app.get("/search").await.assert_bad_gateway();
}
