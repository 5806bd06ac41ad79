//! Test application setup utilities
//!
//! Provides utilities for setting up test instances of the proxy in front
//! of a mock OIDC provider and a mock STAC API.

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use tower::ServiceExt;

use stac_auth_proxy::{create_app, AppConfig, AppState};

use super::mocks::{MockOidcProvider, MockStacApi};

/// Host header sent with every test request
pub const TEST_HOST: &str = "proxy.example.com";

/// Test application wrapper for integration testing
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub upstream: MockStacApi,
    pub oidc: MockOidcProvider,
}

impl TestApp {
    /// Create a new test application with the default configuration
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a new test application, adjusting the configuration first
    ///
    /// `configure` sees a configuration already pointing at the mock servers.
    pub async fn with_config<F>(configure: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let upstream = MockStacApi::start().await;
        let oidc = MockOidcProvider::start().await;

        let mut config = test_config(&upstream.uri(), &oidc.discovery_url());
        configure(&mut config);
        config.validate().expect("Invalid test configuration");

        let state = AppState::new(config).expect("Failed to create application state");
        let router = create_app(state.clone());

        Self {
            router,
            state,
            upstream,
            oidc,
        }
    }

    /// Make a GET request to the test application
    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Method::GET, uri, None, None).await
    }

    /// Make an authenticated GET request
    pub async fn get_with_token(&self, uri: &str, token: &str) -> TestResponse {
        self.send(Method::GET, uri, Some(token), None).await
    }

    /// Make a POST request with JSON body
    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> TestResponse {
        self.send(Method::POST, uri, None, Some(body)).await
    }

    /// Make an authenticated POST request with JSON body
    pub async fn post_json_with_token(
        &self,
        uri: &str,
        token: &str,
        body: serde_json::Value,
    ) -> TestResponse {
        self.send(Method::POST, uri, Some(token), Some(body)).await
    }

    /// Make a request with an optional bearer token and JSON body
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        self.request(request).await
    }

    /// Make an arbitrary request
    pub async fn request(&self, mut request: Request<Body>) -> TestResponse {
        if !request.headers().contains_key(header::HOST) {
            request
                .headers_mut()
                .insert(header::HOST, TEST_HOST.parse().unwrap());
        }

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");

        TestResponse {
            status,
            headers,
            body,
        }
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    /// Get the response body as a string
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Parse the response body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("Failed to parse response as JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Assert the response status
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {}, got {}. Body: {}",
            expected,
            self.status,
            self.text()
        );
        self
    }

    /// Assert the response status is OK (200)
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    /// Assert the response status is Bad Request (400)
    pub fn assert_bad_request(&self) -> &Self {
        self.assert_status(StatusCode::BAD_REQUEST)
    }

    /// Assert the response status is Unauthorized (401)
    pub fn assert_unauthorized(&self) -> &Self {
        self.assert_status(StatusCode::UNAUTHORIZED)
    }

    /// Assert the response status is Forbidden (403)
    pub fn assert_forbidden(&self) -> &Self {
        self.assert_status(StatusCode::FORBIDDEN)
    }

    /// Assert the response status is Not Found (404)
    pub fn assert_not_found(&self) -> &Self {
        self.assert_status(StatusCode::NOT_FOUND)
    }

    /// Assert the response status is Bad Gateway (502)
    pub fn assert_bad_gateway(&self) -> &Self {
        self.assert_status(StatusCode::BAD_GATEWAY)
    }
}

/// Configuration pointing at the mock servers, with startup checks and
/// compression off
pub fn test_config(upstream_url: &str, oidc_discovery_url: &str) -> AppConfig {
    AppConfig {
        upstream_url: upstream_url.to_string(),
        oidc_discovery_url: oidc_discovery_url.to_string(),
        wait_for_upstream: false,
        check_conformance: false,
        enable_compression: false,
        ..AppConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_creation() {
        let app = TestApp::new().await;
        assert!(!app.state.has_filters());
        assert_eq!(app.state.config.upstream_url, app.upstream.uri());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = TestApp::new().await;
        let response = app.get("/healthz").await;
        response.assert_ok();
        let json: serde_json::Value = response.json();
        assert_eq!(json["status"], "ok");
    }
}
