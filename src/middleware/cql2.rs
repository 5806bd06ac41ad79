//! CQL2 filter middleware
//!
//! `build_cql2_filter_middleware` asks the configured generator for a
//! filter and stores it on the request. `apply_cql2_filter_middleware`
//! enforces it: merged into write bodies, checked against single-record
//! responses, or merged into the query string of listings and searches.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, uri::PathAndQuery, HeaderValue, Method, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};
use url::form_urlencoded;

use crate::cql2::Expr;
use crate::middleware::auth::AuthContext;
use crate::services::filters::FilterGenerator;
use crate::utils::filters::{append_body_filter, append_qs_filter};
use crate::utils::requests::extract_variables;
use crate::utils::{AppError, StacError};
use crate::AppState;

static COLLECTIONS_FILTER_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/collections(/[^/]+)?$").unwrap());
static ITEMS_FILTER_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(/collections/([^/]+)/items(/[^/]+)?$|/search$)").unwrap());
static SINGLE_RECORD_PATHS: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"^/collections/([^/]+)/items/([^/]+)$").unwrap(),
        Regex::new(r"^/collections/([^/]+)$").unwrap(),
    ]
});

pub const CQL2_CONFORMANCES: [&str; 3] = [
    "http://www.opengis.net/spec/cql2/1.0/conf/basic-cql2",
    "http://www.opengis.net/spec/cql2/1.0/conf/cql2-text",
    "http://www.opengis.net/spec/cql2/1.0/conf/cql2-json",
];

pub const COLLECTIONS_FILTER_CONFORMANCES: [&str; 4] = [
    "https://api.stacspec.org/v1.0.0/core",
    r"https://api.stacspec.org/v1\.0\.0(?:-[\w\.]+)?/collection-search",
    r"https://api.stacspec.org/v1\.0\.0(?:-[\w\.]+)?/collection-search#filter",
    "http://www.opengis.net/spec/ogcapi-common-2/1.0/conf/simple-query",
];

pub const ITEMS_FILTER_CONFORMANCES: [&str; 3] = [
    "http://www.opengis.net/spec/ogcapi-features-3/1.0/conf/filter",
    "http://www.opengis.net/spec/ogcapi-features-3/1.0/conf/features-filter",
    r"https://api.stacspec.org/v1\.0\.0(?:-[\w\.]+)?/item-search#filter",
];

/// The filter every upstream request of this call must honour
#[derive(Debug, Clone)]
pub struct Cql2Filter(pub Arc<Expr>);

/// Input handed to filter generators
pub fn filter_context(request: &Request) -> Value {
    let path = request.uri().path();

    let mut query_params = Map::new();
    if let Some(query) = request.uri().query() {
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            query_params.insert(key.into_owned(), Value::String(value.into_owned()));
        }
    }

    let mut headers = Map::new();
    for (name, value) in request.headers() {
        headers.insert(
            name.as_str().to_string(),
            Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        );
    }

    let path_params: Map<String, Value> = extract_variables(path)
        .into_iter()
        .map(|(name, value)| (name, Value::String(value)))
        .collect();

    let auth = request.extensions().get::<AuthContext>();
    json!({
        "req": {
            "path": path,
            "method": request.method().as_str(),
            "query_params": query_params,
            "path_params": path_params,
            "headers": headers,
        },
        "payload": auth.and_then(|auth| auth.payload.clone()),
        "oidc_metadata": auth.map(|auth| auth.oidc_metadata.clone()).unwrap_or_else(|| json!({})),
    })
}

fn generator_for<'a>(state: &'a AppState, path: &str) -> Option<&'a Arc<dyn FilterGenerator>> {
    if COLLECTIONS_FILTER_PATH.is_match(path) {
        state.collections_filter.as_ref()
    } else if ITEMS_FILTER_PATH.is_match(path) {
        state.items_filter.as_ref()
    } else {
        None
    }
}

/// Generate the request's CQL2 filter
pub async fn build_cql2_filter_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(generator) = generator_for(&state, request.uri().path()).cloned() else {
        return Ok(next.run(request).await);
    };

    let context = filter_context(&request);
    let rendered = generator.generate(&context).await?;

    let expr = Expr::from_str(&rendered)
        .and_then(|expr| expr.validate().map(|_| expr))
        .map_err(|e| {
            error!(filter = %rendered, error = %e, "Invalid CQL2 filter");
            AppError::InvalidFilter(e.to_string())
        })?;

    debug!(filter = %expr, "Built CQL2 filter");
    request.extensions_mut().insert(Cql2Filter(Arc::new(expr)));
    Ok(next.run(request).await)
}

/// Enforce the request's CQL2 filter, if one was built
pub async fn apply_cql2_filter_middleware(
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(Cql2Filter(filter)) = request.extensions().get::<Cql2Filter>().cloned() else {
        return Ok(next.run(request).await);
    };

    if matches!(*request.method(), Method::POST | Method::PUT | Method::PATCH) {
        let request = augment_request_body(request, &filter).await?;
        return Ok(next.run(request).await);
    }

    let path = request.uri().path();
    if SINGLE_RECORD_PATHS.iter().any(|regex| regex.is_match(path)) {
        let response = next.run(request).await;
        return Ok(validate_response_body(response, &filter).await);
    }

    let request = augment_query(request, &filter)?;
    Ok(next.run(request).await)
}

async fn augment_request_body(request: Request, filter: &Expr) -> Result<Request, AppError> {
    let (mut parts, body) = request.into_parts();
    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read request body: {}", e)))?;

    let body = match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(body)) => body,
        Ok(_) => {
            return Err(AppError::BadRequest(
                "Request body must be a JSON object".to_string(),
            ))
        }
        Err(e) => {
            warn!(error = %e, "Failed to parse request body as JSON");
            return Err(AppError::BadRequest(
                "Request body must be valid JSON".to_string(),
            ));
        }
    };

    let augmented = serde_json::to_vec(&append_body_filter(body, filter, None)?)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(augmented.len()));
    parts.headers.remove(header::TRANSFER_ENCODING);
    Ok(Request::from_parts(parts, Body::from(augmented)))
}

fn augment_query(mut request: Request, filter: &Expr) -> Result<Request, AppError> {
    let query = append_qs_filter(request.uri().query().unwrap_or_default(), filter, None)?;
    let path_and_query = format!("{}?{}", request.uri().path(), query);

    let mut uri_parts = request.uri().clone().into_parts();
    uri_parts.path_and_query = Some(
        PathAndQuery::from_str(&path_and_query)
            .map_err(|e| AppError::Internal(format!("Failed to rewrite query: {}", e)))?,
    );
    *request.uri_mut() = Uri::from_parts(uri_parts)
        .map_err(|e| AppError::Internal(format!("Failed to rewrite query: {}", e)))?;

    debug!(query = %query, "Applied CQL2 filter to query");
    Ok(request)
}

/// Hide single records the filter does not match
///
/// 404s are answered the same way as rejected records so the two cannot be
/// told apart.
async fn validate_response_body(response: Response, filter: &Expr) -> Response {
    if !matches!(response.status(), StatusCode::OK | StatusCode::NOT_FOUND) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read response body");
            return StacError::parse_error().into_response();
        }
    };

    let record: Value = match serde_json::from_slice(&bytes) {
        Ok(record) => record,
        Err(_) => {
            warn!("Failed to parse response body as JSON");
            return StacError::parse_error().into_response();
        }
    };

    if parts.status != StatusCode::OK {
        debug!("Upstream record not found");
        return StacError::record_not_found().into_response();
    }

    let matched = filter.matches(&record).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to apply filter");
        false
    });
    if matched {
        debug!("Response matches filter, returning record");
        Response::from_parts(parts, Body::from(bytes))
    } else {
        debug!("Response did not match filter, returning 404");
        StacError::record_not_found().into_response()
    }
}
