//! Middleware pipeline assembly
//!
//! Stages run in a fixed order, outermost first:
//!
//! 1. Compression (optional)
//! 2. Root path removal (when mounted below a prefix)
//! 3. Link rewriting (when the root path or upstream path is not `/`)
//! 4. Authentication enforcement
//! 5. Process time header
//! 6. CQL2 filter build and apply (when a filter generator is configured)
//! 7. OpenAPI augmentation (optional)
//! 8. Authentication extension (optional)

use std::sync::Arc;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::middleware::{
    apply_cql2_filter_middleware, build_cql2_filter_middleware,
    cql2::{COLLECTIONS_FILTER_CONFORMANCES, CQL2_CONFORMANCES, ITEMS_FILTER_CONFORMANCES},
    enforce_auth_middleware, json_response_middleware, process_time_middleware,
    remove_root_path_middleware, AuthenticationExtension, OpenApiTransform, ProcessLinks,
};
use crate::services::RequiredConformances;
use crate::{api, AppConfig, AppState};

/// A pipeline stage, as reported at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compression,
    RemoveRootPath,
    ProcessLinks,
    EnforceAuth,
    AddProcessTimeHeader,
    BuildCql2Filter,
    ApplyCql2Filter,
    OpenApi,
    AuthenticationExtension,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Compression => "CompressionMiddleware",
            Stage::RemoveRootPath => "RemoveRootPathMiddleware",
            Stage::ProcessLinks => "ProcessLinksMiddleware",
            Stage::EnforceAuth => "EnforceAuthMiddleware",
            Stage::AddProcessTimeHeader => "AddProcessTimeHeaderMiddleware",
            Stage::BuildCql2Filter => "BuildCql2FilterMiddleware",
            Stage::ApplyCql2Filter => "ApplyCql2FilterMiddleware",
            Stage::OpenApi => "OpenApiMiddleware",
            Stage::AuthenticationExtension => "AuthenticationExtensionMiddleware",
        }
    }

    /// Conformance classes the upstream must advertise for this stage
    pub fn required_conformances(&self, config: &AppConfig) -> Vec<&'static str> {
        match self {
            Stage::BuildCql2Filter => {
                let mut required = CQL2_CONFORMANCES.to_vec();
                if config.collections_filter.is_some() {
                    required.extend(COLLECTIONS_FILTER_CONFORMANCES);
                }
                if config.items_filter.is_some() {
                    required.extend(ITEMS_FILTER_CONFORMANCES);
                }
                required
            }
            Stage::ApplyCql2Filter => CQL2_CONFORMANCES.to_vec(),
            _ => Vec::new(),
        }
    }
}

fn has_filters(config: &AppConfig) -> bool {
    config.items_filter.is_some() || config.collections_filter.is_some()
}

fn rewrites_links(config: &AppConfig) -> bool {
    !config.root_path.is_empty() || !config.upstream_path().is_empty()
}

/// Stages enabled by `config`, outermost first
pub fn enabled_stages(config: &AppConfig) -> Vec<Stage> {
    let mut stages = Vec::new();
    if config.enable_compression {
        stages.push(Stage::Compression);
    }
    if !config.root_path.is_empty() {
        stages.push(Stage::RemoveRootPath);
    }
    if rewrites_links(config) {
        stages.push(Stage::ProcessLinks);
    }
    stages.push(Stage::EnforceAuth);
    stages.push(Stage::AddProcessTimeHeader);
    if has_filters(config) {
        stages.push(Stage::BuildCql2Filter);
        stages.push(Stage::ApplyCql2Filter);
    }
    if config.openapi_spec_endpoint.is_some() {
        stages.push(Stage::OpenApi);
    }
    if config.enable_authentication_extension {
        stages.push(Stage::AuthenticationExtension);
    }
    stages
}

/// Conformance patterns the upstream must advertise, with the stages needing each
pub fn required_conformances(config: &AppConfig) -> RequiredConformances {
    let mut required = RequiredConformances::new();
    for stage in enabled_stages(config) {
        for pattern in stage.required_conformances(config) {
            required
                .entry(pattern.to_string())
                .or_default()
                .push(stage.name());
        }
    }
    required
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let config = state.config.clone();

    // Layers wrap what is already there, so the innermost stage goes first
    let mut router = api::routes(&state);

    if config.enable_authentication_extension {
        let transform = Arc::new(AuthenticationExtension::new(
            state.endpoints.clone(),
            config.oidc_discovery_url.clone(),
        ));
        router = router.layer(from_fn_with_state(
            transform,
            json_response_middleware::<AuthenticationExtension>,
        ));
    }

    if let Some(spec_path) = &config.openapi_spec_endpoint {
        let transform = Arc::new(OpenApiTransform {
            spec_path: spec_path.clone(),
            oidc_discovery_url: config.oidc_discovery_url.clone(),
            endpoints: state.endpoints.clone(),
            root_path: config.root_path.clone(),
            auth_scheme_name: config.openapi_auth_scheme_name.clone(),
            auth_scheme_override: config.openapi_auth_scheme_override.clone(),
        });
        router = router.layer(from_fn_with_state(
            transform,
            json_response_middleware::<OpenApiTransform>,
        ));
    }

    if state.has_filters() {
        router = router
            .layer(from_fn(apply_cql2_filter_middleware))
            .layer(from_fn_with_state(state.clone(), build_cql2_filter_middleware));
    }

    router = router
        .layer(from_fn(process_time_middleware))
        .layer(from_fn_with_state(state.clone(), enforce_auth_middleware));

    if rewrites_links(&config) {
        let transform = Arc::new(ProcessLinks::new(
            config.upstream_path(),
            config.root_path.clone(),
        ));
        router = router.layer(from_fn_with_state(
            transform,
            json_response_middleware::<ProcessLinks>,
        ));
    }

    // Route matching must see the path with the root path removed, so the
    // prefix is stripped outside the router that owns the routes
    let mut app = Router::new().fallback_service(router.with_state(state));

    if !config.root_path.is_empty() {
        let root_path: Arc<str> = Arc::from(config.root_path.as_str());
        app = app.layer(from_fn_with_state(root_path, remove_root_path_middleware));
    }

    if config.enable_compression {
        app = app.layer(CompressionLayer::new());
    }

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    app.layer(trace_layer)
}
