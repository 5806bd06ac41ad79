//! Reverse proxy to the upstream STAC API

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    body::{Body, HttpBody},
    extract::Request,
    http::{
        header::{self, HeaderMap, HeaderName, HeaderValue},
        Method,
    },
    response::Response,
};
use tracing::debug;

use crate::config::AppConfig;
use crate::utils::AppError;

pub const PROXY_NAME: &str = "stac-auth-proxy";

/// Methods forwarded upstream; anything else is answered with 405
pub const PROXIED_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
];

/// Headers that only apply to a single connection
static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_PATH: HeaderName = HeaderName::from_static("x-forwarded-path");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub static X_UPSTREAM_TIME: HeaderName = HeaderName::from_static("x-upstream-time");

/// Forwards requests to the upstream API and relays its responses
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    client: reqwest::Client,
    upstream_url: String,
    override_host: bool,
    legacy_forwarded_headers: bool,
    root_path: String,
}

impl ReverseProxy {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upstream_timeout_secs))
            .pool_max_idle_per_host(100)
            .build()
            .context("Failed to create upstream HTTP client")?;

        Ok(Self {
            client,
            upstream_url: config.upstream_url.trim_end_matches('/').to_string(),
            override_host: config.override_host,
            legacy_forwarded_headers: config.enable_legacy_forwarded_headers,
            root_path: config.root_path.clone(),
        })
    }

    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    /// Forward a request, streaming both bodies
    pub async fn forward(
        &self,
        request: Request,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response, AppError> {
        if !PROXIED_METHODS.contains(request.method()) {
            return Err(AppError::MethodNotAllowed);
        }

        let (parts, body) = request.into_parts();
        let url = self.target_url(&parts.uri);
        let headers = self.prepare_headers(&parts.headers, &parts.uri, client_addr);

        let has_body = !body.is_end_stream();

        let mut upstream_request = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers);
        if has_body {
            upstream_request =
                upstream_request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        debug!(method = %parts.method, url = %url, "Proxying request");
        let start = Instant::now();
        let upstream_response = upstream_request.send().await?;
        let elapsed = start.elapsed().as_secs_f64();
        debug!(
            status = upstream_response.status().as_u16(),
            url = %url,
            elapsed = %format!("{:.3}s", elapsed),
            "Received upstream response"
        );

        let mut response = Response::builder().status(upstream_response.status());
        if let Some(response_headers) = response.headers_mut() {
            for (name, value) in upstream_response.headers() {
                if is_hop_by_hop(name)
                    || name == header::CONTENT_ENCODING
                    || name == header::CONTENT_LENGTH
                {
                    continue;
                }
                response_headers.append(name.clone(), value.clone());
            }
            if let Ok(value) = HeaderValue::from_str(&format!("{:.3}", elapsed)) {
                response_headers.insert(X_UPSTREAM_TIME.clone(), value);
            }
        }

        response
            .body(Body::from_stream(upstream_response.bytes_stream()))
            .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
    }

    fn target_url(&self, uri: &axum::http::Uri) -> String {
        match uri.query() {
            Some(query) => format!("{}{}?{}", self.upstream_url, uri.path(), query),
            None => format!("{}{}", self.upstream_url, uri.path()),
        }
    }

    fn prepare_headers(
        &self,
        incoming: &HeaderMap,
        uri: &axum::http::Uri,
        client_addr: Option<SocketAddr>,
    ) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(incoming.len() + 2);
        for (name, value) in incoming {
            if is_hop_by_hop(name) || name == header::ACCEPT_ENCODING {
                continue;
            }
            if name == header::HOST && self.override_host {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        let client = client_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let host = incoming
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| uri.authority().map(|authority| authority.as_str()))
            .unwrap_or_default()
            .to_string();
        let proto = uri.scheme_str().unwrap_or("http").to_string();
        let path = format!("{}/", self.root_path);

        set_default(&mut headers, header::VIA, format!("1.1 {}", PROXY_NAME));
        set_default(
            &mut headers,
            header::FORWARDED,
            format!("for={};host={};proto={};path={}", client, host, proto, path),
        );
        if self.legacy_forwarded_headers {
            set_default(&mut headers, X_FORWARDED_FOR.clone(), client);
            set_default(&mut headers, X_FORWARDED_HOST.clone(), host);
            set_default(&mut headers, X_FORWARDED_PATH.clone(), path);
            set_default(&mut headers, X_FORWARDED_PROTO.clone(), proto);
        }

        headers
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Insert a header unless the client already sent one
fn set_default(headers: &mut HeaderMap, name: HeaderName, value: String) {
    if headers.contains_key(&name) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name, value);
    }
}
