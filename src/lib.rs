//! STAC Auth Proxy Library
//!
//! A reverse proxy that puts OpenID Connect authentication and CQL2 row-level
//! filtering in front of a STAC API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

pub mod api;
pub mod app;
pub mod config;
pub mod cql2;
pub mod middleware;
pub mod services;
pub mod utils;

pub use app::create_app;
pub use config::AppConfig;

use services::{FilterGenerator, FilterRegistry, OidcService, ReverseProxy};
use utils::requests::EndpointRules;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Compiled public/private endpoint tables
    pub endpoints: Arc<EndpointRules>,
    pub oidc: Arc<OidcService>,
    pub proxy: Arc<ReverseProxy>,
    pub items_filter: Option<Arc<dyn FilterGenerator>>,
    pub collections_filter: Option<Arc<dyn FilterGenerator>>,
    /// Client for health probes and startup checks
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::with_registry(config, &FilterRegistry::new())
    }

    /// Build the state, resolving filter generators through `registry`
    pub fn with_registry(config: AppConfig, registry: &FilterRegistry) -> Result<Self> {
        let endpoints = EndpointRules::new(
            &config.private_endpoints,
            &config.public_endpoints,
            config.default_public,
        )
        .context("Invalid endpoint pattern")?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upstream_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let oidc = OidcService::new(
            config.internal_discovery_url(),
            config.allowed_jwt_audiences.clone(),
            http.clone(),
        );
        let proxy = ReverseProxy::new(&config)?;

        let items_filter = config
            .items_filter
            .as_ref()
            .map(|filter| registry.build(filter))
            .transpose()
            .context("Failed to create items filter generator")?;
        let collections_filter = config
            .collections_filter
            .as_ref()
            .map(|filter| registry.build(filter))
            .transpose()
            .context("Failed to create collections filter generator")?;

        Ok(Self {
            config: Arc::new(config),
            endpoints: Arc::new(endpoints),
            oidc: Arc::new(oidc),
            proxy: Arc::new(proxy),
            items_filter,
            collections_filter,
            http,
        })
    }

    pub fn has_filters(&self) -> bool {
        self.items_filter.is_some() || self.collections_filter.is_some()
    }
}
