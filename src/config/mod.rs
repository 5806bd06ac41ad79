//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides (JSON for structured values)
//! - Multiple configuration file locations
//! - Default values for every optional setting
//! - Endpoint access tables and filter generator definitions

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::utils::requests::EndpointTable;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Base URL of the STAC API being protected
    #[serde(default)]
    pub upstream_url: String,
    /// Public OIDC discovery document URL (advertised to clients)
    #[serde(default)]
    pub oidc_discovery_url: String,
    /// Discovery URL reachable from the proxy, when it differs from the public one
    #[serde(default)]
    pub oidc_discovery_internal_url: Option<String>,
    /// Accepted `aud` claim values; audience is not checked when unset
    #[serde(default)]
    pub allowed_jwt_audiences: Option<Vec<String>>,
    /// Path prefix the proxy is mounted under
    #[serde(default)]
    pub root_path: String,
    /// Replace the Host header with the upstream host
    #[serde(default = "default_true")]
    pub override_host: bool,
    #[serde(default = "default_healthz_prefix")]
    pub healthz_prefix: String,
    #[serde(default = "default_true")]
    pub wait_for_upstream: bool,
    #[serde(default = "default_true")]
    pub check_conformance: bool,
    #[serde(default = "default_true")]
    pub enable_compression: bool,
    /// Also send X-Forwarded-* headers upstream
    #[serde(default)]
    pub enable_legacy_forwarded_headers: bool,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    // OpenAPI / Swagger UI
    #[serde(default)]
    pub openapi_spec_endpoint: Option<String>,
    #[serde(default = "default_openapi_auth_scheme_name")]
    pub openapi_auth_scheme_name: String,
    #[serde(default)]
    pub openapi_auth_scheme_override: Option<Value>,
    #[serde(default)]
    pub swagger_ui_endpoint: Option<String>,
    #[serde(default)]
    pub swagger_ui_init_oauth: Map<String, Value>,

    // Auth
    #[serde(default = "default_true")]
    pub enable_authentication_extension: bool,
    #[serde(default)]
    pub default_public: bool,
    #[serde(default = "default_public_endpoints")]
    pub public_endpoints: EndpointMethods,
    #[serde(default = "default_private_endpoints")]
    pub private_endpoints: EndpointMethods,

    // Filters
    #[serde(default)]
    pub items_filter: Option<FilterConfig>,
    #[serde(default)]
    pub collections_filter: Option<FilterConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ordered mapping of path regex to the methods it covers
pub type EndpointMethods = IndexMap<String, Vec<EndpointMethod>>;

/// A method, optionally paired with space-delimited required scopes
///
/// Written as `"GET"` or `["POST", "collection:create"]`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EndpointMethod {
    Method(String),
    Scoped(String, String),
}

impl EndpointMethod {
    pub fn method(&self) -> &str {
        match self {
            EndpointMethod::Method(method) | EndpointMethod::Scoped(method, _) => method,
        }
    }

    /// Required scopes; an empty scope string means none
    pub fn scopes(&self) -> Vec<String> {
        match self {
            EndpointMethod::Method(_) => Vec::new(),
            EndpointMethod::Scoped(_, scopes) => {
                scopes.split_whitespace().map(str::to_string).collect()
            }
        }
    }
}

/// Filter generator definition: a registered generator name plus constructor arguments
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FilterConfig {
    pub cls: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Startup health probe settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: f64,
    #[serde(default = "default_retry_delay_max")]
    pub retry_delay_max_secs: f64,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: f64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            retry_delay_max_secs: default_retry_delay_max(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default)]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file" or "both")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Log file name prefix
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Enable daily log rotation
    #[serde(default = "default_true")]
    pub daily_rotation: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: true,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Log to console (stdout/stderr)
    #[default]
    Console,
    /// Log to file with optional rotation
    File,
    /// Log to both console and file
    Both,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_healthz_prefix() -> String {
    "/healthz".to_string()
}

fn default_upstream_timeout() -> u64 {
    15
}

fn default_openapi_auth_scheme_name() -> String {
    "oidcAuth".to_string()
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_retry_delay_max() -> f64 {
    5.0
}

fn default_probe_timeout() -> f64 {
    5.0
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/stac-auth-proxy")
}

fn default_log_prefix() -> String {
    "stac-auth-proxy".to_string()
}

fn method(name: &str) -> EndpointMethod {
    EndpointMethod::Method(name.to_string())
}

pub fn default_public_endpoints() -> EndpointMethods {
    let mut endpoints = EndpointMethods::new();
    endpoints.insert(r"^/api\.html$".to_string(), vec![method("GET")]);
    endpoints.insert(r"^/api$".to_string(), vec![method("GET")]);
    endpoints.insert(r"^/docs/oauth2-redirect".to_string(), vec![method("GET")]);
    endpoints.insert(r"^/healthz".to_string(), vec![method("GET")]);
    endpoints
}

pub fn default_private_endpoints() -> EndpointMethods {
    let mut endpoints = EndpointMethods::new();
    endpoints.insert(r"^/collections$".to_string(), vec![method("POST")]);
    endpoints.insert(
        r"^/collections/([^/]+)$".to_string(),
        vec![method("PUT"), method("PATCH"), method("DELETE")],
    );
    endpoints.insert(r"^/collections/([^/]+)/items$".to_string(), vec![method("POST")]);
    endpoints.insert(
        r"^/collections/([^/]+)/items/([^/]+)$".to_string(),
        vec![method("PUT"), method("PATCH"), method("DELETE")],
    );
    endpoints.insert(
        r"^/collections/([^/]+)/bulk_items$".to_string(),
        vec![method("POST")],
    );
    endpoints
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream_url: String::new(),
            oidc_discovery_url: String::new(),
            oidc_discovery_internal_url: None,
            allowed_jwt_audiences: None,
            root_path: String::new(),
            override_host: true,
            healthz_prefix: default_healthz_prefix(),
            wait_for_upstream: true,
            check_conformance: true,
            enable_compression: true,
            enable_legacy_forwarded_headers: false,
            upstream_timeout_secs: default_upstream_timeout(),
            health_check: HealthCheckConfig::default(),
            openapi_spec_endpoint: None,
            openapi_auth_scheme_name: default_openapi_auth_scheme_name(),
            openapi_auth_scheme_override: None,
            swagger_ui_endpoint: None,
            swagger_ui_init_oauth: Map::new(),
            enable_authentication_extension: true,
            default_public: false,
            public_endpoints: default_public_endpoints(),
            private_endpoints: default_private_endpoints(),
            items_filter: None,
            collections_filter: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables
    pub fn load() -> Result<Self> {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("STAC_AUTH_PROXY_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                serde_norway::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file: {:?}", path))?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}", path);
                AppConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults and environment");
                AppConfig::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/stac-auth-proxy/config.yaml"),
            dirs::config_dir()
                .map(|p| p.join("stac-auth-proxy/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // Server overrides
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        // Upstream and OIDC
        if let Ok(url) = std::env::var("UPSTREAM_URL") {
            self.upstream_url = url;
        }
        if let Ok(url) = std::env::var("OIDC_DISCOVERY_URL") {
            self.oidc_discovery_url = url;
        }
        if let Some(url) = env_optional("OIDC_DISCOVERY_INTERNAL_URL") {
            self.oidc_discovery_internal_url = url;
        }
        if let Some(audiences) = env_optional("ALLOWED_JWT_AUDIENCES") {
            self.allowed_jwt_audiences = audiences.map(|raw| {
                raw.split(',')
                    .map(|aud| aud.trim().to_string())
                    .filter(|aud| !aud.is_empty())
                    .collect()
            });
        }
        if let Ok(root_path) = std::env::var("ROOT_PATH") {
            self.root_path = root_path;
        }
        if let Ok(prefix) = std::env::var("HEALTHZ_PREFIX") {
            self.healthz_prefix = prefix;
        }
        if let Some(timeout) = std::env::var("UPSTREAM_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse().ok())
        {
            self.upstream_timeout_secs = timeout;
        }

        // Toggles
        let flags: [(&str, &mut bool); 7] = [
            ("OVERRIDE_HOST", &mut self.override_host),
            ("WAIT_FOR_UPSTREAM", &mut self.wait_for_upstream),
            ("CHECK_CONFORMANCE", &mut self.check_conformance),
            ("ENABLE_COMPRESSION", &mut self.enable_compression),
            (
                "ENABLE_LEGACY_FORWARDED_HEADERS",
                &mut self.enable_legacy_forwarded_headers,
            ),
            (
                "ENABLE_AUTHENTICATION_EXTENSION",
                &mut self.enable_authentication_extension,
            ),
            ("DEFAULT_PUBLIC", &mut self.default_public),
        ];
        for (name, target) in flags {
            if let Ok(raw) = std::env::var(name) {
                *target = parse_bool(&raw)
                    .with_context(|| format!("{} must be a boolean, got '{}'", name, raw))?;
            }
        }

        // OpenAPI / Swagger UI
        if let Some(endpoint) = env_optional("OPENAPI_SPEC_ENDPOINT") {
            self.openapi_spec_endpoint = endpoint;
        }
        if let Ok(name) = std::env::var("OPENAPI_AUTH_SCHEME_NAME") {
            self.openapi_auth_scheme_name = name;
        }
        if let Some(scheme) = env_json("OPENAPI_AUTH_SCHEME_OVERRIDE")? {
            self.openapi_auth_scheme_override = Some(scheme);
        }
        if let Some(endpoint) = env_optional("SWAGGER_UI_ENDPOINT") {
            self.swagger_ui_endpoint = endpoint;
        }
        if let Some(init_oauth) = env_json("SWAGGER_UI_INIT_OAUTH")? {
            self.swagger_ui_init_oauth = init_oauth;
        }

        // Endpoint tables
        if let Some(endpoints) = env_json("PUBLIC_ENDPOINTS")? {
            self.public_endpoints = endpoints;
        }
        if let Some(endpoints) = env_json("PRIVATE_ENDPOINTS")? {
            self.private_endpoints = endpoints;
        }

        // Filters
        if let Some(filter) = env_filter("ITEMS_FILTER")? {
            self.items_filter = Some(filter);
        }
        if let Some(filter) = env_filter("COLLECTIONS_FILTER")? {
            self.collections_filter = Some(filter);
        }

        // Logging overrides
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_http_url("upstream_url", &self.upstream_url)?;
        validate_http_url("oidc_discovery_url", &self.oidc_discovery_url)?;
        if let Some(ref internal) = self.oidc_discovery_internal_url {
            validate_http_url("oidc_discovery_internal_url", internal)?;
        }

        if !self.root_path.is_empty()
            && (!self.root_path.starts_with('/') || self.root_path.ends_with('/'))
        {
            anyhow::bail!(
                "root_path must start with '/' and must not end with '/': {:?}",
                self.root_path
            );
        }

        if !self.healthz_prefix.is_empty() && !self.healthz_prefix.starts_with('/') {
            anyhow::bail!("healthz_prefix must start with '/': {:?}", self.healthz_prefix);
        }

        if self.swagger_ui_endpoint.is_some() && self.openapi_spec_endpoint.is_none() {
            anyhow::bail!("swagger_ui_endpoint requires openapi_spec_endpoint to be set");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        EndpointTable::compile(&self.public_endpoints)
            .context("Invalid pattern in public_endpoints")?;
        EndpointTable::compile(&self.private_endpoints)
            .context("Invalid pattern in private_endpoints")?;

        for filter in [&self.items_filter, &self.collections_filter]
            .into_iter()
            .flatten()
        {
            if filter.cls.trim().is_empty() {
                anyhow::bail!("Filter definitions require a non-empty 'cls'");
            }
        }

        Ok(())
    }

    /// Discovery URL used for server-side fetches
    pub fn internal_discovery_url(&self) -> &str {
        self.oidc_discovery_internal_url
            .as_deref()
            .unwrap_or(&self.oidc_discovery_url)
    }

    /// Path component of the upstream URL without a trailing slash
    pub fn upstream_path(&self) -> String {
        url::Url::parse(&self.upstream_url)
            .map(|url| url.path().trim_end_matches('/').to_string())
            .unwrap_or_default()
    }

    /// OpenAPI document location as seen by clients
    pub fn public_openapi_url(&self) -> Option<String> {
        self.openapi_spec_endpoint
            .as_ref()
            .map(|endpoint| format!("{}{}", self.root_path, endpoint))
    }
}

fn validate_http_url(field: &str, raw: &str) -> Result<()> {
    if raw.is_empty() {
        anyhow::bail!("{} must be set", field);
    }
    let url = url::Url::parse(raw).with_context(|| format!("{} is not a valid URL: {}", field, raw))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("{} must use http or https: {}", field, raw);
    }
    Ok(())
}

/// Parse the usual spellings of a boolean environment value
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `Some(None)` when the variable is set but empty
fn env_optional(name: &str) -> Option<Option<String>> {
    std::env::var(name)
        .ok()
        .map(|raw| if raw.trim().is_empty() { None } else { Some(raw) })
}

fn env_json<T: DeserializeOwned>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
            .map(Some)
            .with_context(|| format!("{} must be valid JSON", name)),
        _ => Ok(None),
    }
}

fn env_filter(prefix: &str) -> Result<Option<FilterConfig>> {
    let Ok(cls) = std::env::var(format!("{}_CLS", prefix)) else {
        return Ok(None);
    };
    if cls.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(FilterConfig {
        cls,
        args: env_json(&format!("{}_ARGS", prefix))?.unwrap_or_default(),
        kwargs: env_json(&format!("{}_KWARGS", prefix))?.unwrap_or_default(),
    }))
}
