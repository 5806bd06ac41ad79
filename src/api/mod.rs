//! HTTP endpoints served by the proxy itself
//!
//! Health checks and the Swagger UI are answered locally; every other
//! request falls through to the reverse proxy.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    response::Response,
    routing::get,
    Router,
};

use crate::{utils::AppResult, AppState};

mod health;
mod swagger;

pub use health::{healthz, healthz_upstream, HealthResponse};
pub use swagger::swagger_ui;

/// Local routes plus the catch-all proxy handler
pub fn routes(state: &AppState) -> Router<AppState> {
    let config = &state.config;
    let mut router = Router::new();

    if !config.healthz_prefix.is_empty() {
        router = router
            .route(&config.healthz_prefix, get(health::healthz))
            .route(
                &format!("{}/upstream", config.healthz_prefix.trim_end_matches('/')),
                get(health::healthz_upstream),
            );
    }

    if let Some(endpoint) = &config.swagger_ui_endpoint {
        router = router.route(endpoint, get(swagger::swagger_ui));
    }

    router.fallback(proxy_request)
}

/// Forward anything not answered locally to the upstream API
pub async fn proxy_request(State(state): State<AppState>, request: Request) -> AppResult<Response> {
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    state.proxy.forward(request, client_addr).await
}
