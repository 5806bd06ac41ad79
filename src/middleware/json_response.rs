//! Buffer-then-transform support for JSON response middleware
//!
//! A [`JsonResponseTransform`] decides from the request and the response
//! head whether to rewrite a response. Selected responses are buffered,
//! parsed, transformed and re-encoded with a corrected `content-length`;
//! everything else streams through untouched.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, response, HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::warn;

use crate::utils::AppError;

/// The parts of the request a transform may look at
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
}

impl RequestInfo {
    pub fn from_request(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            headers: request.headers().clone(),
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
    }
}

/// A response body rewrite
pub trait JsonResponseTransform: Send + Sync + 'static {
    /// Whether this response should be buffered and transformed
    fn should_transform_response(&self, request: &RequestInfo, response: &response::Parts)
        -> bool;

    fn transform_json(&self, data: Value, request: &RequestInfo) -> Value;
}

/// `content-type` of a response head, or an empty string
pub fn content_type(response: &response::Parts) -> &str {
    response
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

/// Middleware function running a [`JsonResponseTransform`]
pub async fn json_response_middleware<T: JsonResponseTransform>(
    State(transform): State<Arc<T>>,
    request: Request,
    next: Next,
) -> Response {
    let info = RequestInfo::from_request(&request);
    let response = next.run(request).await;

    let (mut parts, body) = response.into_parts();
    if !transform.should_transform_response(&info, &parts) {
        return Response::from_parts(parts, body);
    }

    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return AppError::Upstream(format!("Failed to read response body: {}", e))
                .into_response()
        }
    };
    if bytes.is_empty() {
        return Response::from_parts(parts, Body::empty());
    }

    let body = match serde_json::from_slice::<Value>(&bytes) {
        Ok(data) => {
            let transformed = transform.transform_json(data, &info);
            match serde_json::to_vec(&transformed) {
                Ok(encoded) => encoded.into(),
                Err(e) => return AppError::Internal(e.to_string()).into_response(),
            }
        }
        Err(e) => {
            warn!(path = %info.path, error = %e, "Response body is not valid JSON, passing through");
            bytes
        }
    };

    parts.headers.remove(header::TRANSFER_ENCODING);
    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    Response::from_parts(parts, Body::from(body))
}
