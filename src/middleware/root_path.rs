//! Root path handling
//!
//! The proxy may be mounted below a path prefix. The prefix is removed
//! before any other stage sees the request; requests outside it get a 404.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{uri::PathAndQuery, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::utils::AppError;

/// Path below `root_path`, or `None` when the path is outside it
pub fn strip_root_path<'a>(path: &'a str, root_path: &str) -> Option<&'a str> {
    match path.strip_prefix(root_path)? {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

pub async fn remove_root_path_middleware(
    State(root_path): State<Arc<str>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(path) = strip_root_path(request.uri().path(), &root_path) else {
        warn!(
            root_path = %root_path,
            path = %request.uri().path(),
            "Request path is outside the root path"
        );
        return AppError::NotFound("Not Found".to_string()).into_response();
    };

    let path_and_query = match request.uri().query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };

    let mut parts = request.uri().clone().into_parts();
    parts.path_and_query = PathAndQuery::from_str(&path_and_query).ok();
    match Uri::from_parts(parts) {
        Ok(uri) => *request.uri_mut() = uri,
        Err(e) => return AppError::Internal(e.to_string()).into_response(),
    }

    next.run(request).await
}
