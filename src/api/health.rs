//! Health check endpoints
//!
//! `{prefix}` reports on the proxy itself; `{prefix}/upstream` probes the
//! upstream STAC API.

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::warn;

use crate::{utils::AppError, AppState};

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl HealthResponse {
    fn ok(code: Option<u16>) -> Self {
        Self {
            status: "ok".to_string(),
            code,
        }
    }
}

/// Returns 200 while the proxy is running
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse::ok(None))
}

/// Returns 200 with the upstream status code if the upstream answers successfully
pub async fn healthz_upstream(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, AppError> {
    let response = state
        .http
        .get(&state.config.upstream_url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| {
            warn!(error = %e, "Upstream health check failed");
            AppError::Upstream(e.to_string())
        })?;

    Ok(Json(HealthResponse::ok(Some(response.status().as_u16()))))
}
