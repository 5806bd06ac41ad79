//! Authentication enforcement middleware
//!
//! Classifies each request with the endpoint tables, validates the bearer
//! token when one is present (or required) and records the token payload
//! and OIDC metadata for later stages.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use tracing::debug;

use crate::{utils::AppError, AppState};

/// Identity attached to a request once authentication has run
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Validated token claims; `None` for anonymous requests
    pub payload: Option<Value>,
    pub oidc_metadata: Value,
}

/// Enforce the endpoint access rules
///
/// Private endpoints require a valid token carrying the rule's scopes.
/// Public endpoints still validate a token if one is sent, so downstream
/// filters can see who is asking.
pub async fn enforce_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = request.uri().path().to_string();
    let matched = state
        .endpoints
        .find_match(&path, request.method().as_str());

    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let payload = state
        .oidc
        .validate_token(auth_header, matched.is_private, &matched.required_scopes)
        .await?;
    let metadata = state.oidc.metadata().await?;

    debug!(
        path = %path,
        private = matched.is_private,
        authenticated = payload.is_some(),
        "Access check passed"
    );

    request.extensions_mut().insert(AuthContext {
        payload,
        oidc_metadata: metadata.document.clone(),
    });

    Ok(next.run(request).await)
}
