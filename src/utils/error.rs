//! Error types and handling
//!
//! Every error that reaches a client is rendered as JSON. Proxy errors use
//! the FastAPI-style `{"detail": ...}` body; errors that stand in for STAC
//! API responses use `{"code": ..., "description": ...}`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::cql2::Cql2Error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// No credentials on a private endpoint (403)
    #[error("{0}")]
    NotAuthenticated(String),

    /// Invalid credentials or missing scopes (401)
    #[error("{detail}")]
    Unauthorized { detail: String, challenge: String },

    /// Bad request - invalid input (400)
    #[error("{0}")]
    BadRequest(String),

    /// Resource not found (404)
    #[error("{0}")]
    NotFound(String),

    /// Method not proxied (405)
    #[error("Method Not Allowed")]
    MethodNotAllowed,

    /// A filter generator produced an unusable expression (502)
    #[error("Invalid CQL2 filter")]
    InvalidFilter(String),

    /// A filter generator failed (502)
    #[error("Filter generation failed: {0}")]
    FilterGenerator(String),

    /// OIDC discovery or key retrieval failed (502)
    #[error("OIDC provider error: {0}")]
    Oidc(String),

    /// Upstream STAC API unreachable or misbehaving (502)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// 401 with the plain `Bearer` challenge
    pub fn invalid_credentials() -> Self {
        AppError::Unauthorized {
            detail: "Could not validate credentials".to_string(),
            challenge: "Bearer".to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotAuthenticated(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::InvalidFilter(_)
            | AppError::FilterGenerator(_)
            | AppError::Oidc(_)
            | AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// STAC API style error, used where the proxy answers on behalf of the upstream
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StacError {
    #[serde(skip)]
    pub status: StatusCode,
    pub code: String,
    pub description: String,
}

impl StacError {
    pub fn new(status: StatusCode, code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            description: description.into(),
        }
    }

    /// The same 404 an upstream returns for a missing record
    pub fn record_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "NotFoundError", "Record not found.")
    }

    pub fn parse_error() -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            "ParseError",
            "Failed to parse response body as JSON",
        )
    }
}

impl IntoResponse for StacError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log server errors
        if status.is_server_error() {
            match &self {
                AppError::InvalidFilter(reason) => {
                    error!(error = %self, reason = %reason, "Request error")
                }
                _ => error!(error = %self, status = status.as_u16(), "Request error"),
            }
        }

        let challenge = match &self {
            AppError::Unauthorized { challenge, .. } => HeaderValue::from_str(challenge).ok(),
            _ => None,
        };

        let mut response = (status, Json(ErrorResponse::new(self.to_string()))).into_response();
        if let Some(challenge) = challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, challenge);
        }
        response
    }
}

// Implement From for common error types

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("Invalid JSON: {}", err))
    }
}

impl From<Cql2Error> for AppError {
    fn from(err: Cql2Error) -> Self {
        AppError::BadRequest(format!("Invalid CQL2 filter in request: {}", err))
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
