//! CQL2 filter generators
//!
//! A filter generator turns a request context (request summary, token
//! payload and OIDC metadata) into a cql2-text expression. Generators are
//! configured by name through [`FilterRegistry`], which maps a tag to a
//! constructor taking positional and keyword arguments.

mod opa;
mod template;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::FilterConfig;
use crate::utils::AppError;

pub use opa::Opa;
pub use template::Template;

/// Errors raised while building or running a filter generator
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("unknown filter generator '{0}'")]
    UnknownGenerator(String),

    #[error("invalid filter generator arguments: {0}")]
    Arguments(String),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("policy engine request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected policy engine response: {0}")]
    Response(String),
}

impl From<FilterError> for AppError {
    fn from(err: FilterError) -> Self {
        AppError::FilterGenerator(err.to_string())
    }
}

/// Produces a cql2-text filter for a request context
#[async_trait]
pub trait FilterGenerator: Send + Sync + fmt::Debug {
    async fn generate(&self, context: &Value) -> Result<String, FilterError>;
}

/// Constructor registered under a generator name
pub type FilterFactory =
    Box<dyn Fn(&FilterConfig) -> Result<Arc<dyn FilterGenerator>, FilterError> + Send + Sync>;

/// Name → constructor table for filter generators
pub struct FilterRegistry {
    factories: HashMap<String, FilterFactory>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        for name in ["template", "stac_auth_proxy.filters:Template"] {
            registry.register(name, |config| {
                Ok(Arc::new(Template::from_config(config)?) as Arc<dyn FilterGenerator>)
            });
        }
        for name in ["opa", "stac_auth_proxy.filters:Opa"] {
            registry.register(name, |config| {
                Ok(Arc::new(Opa::from_config(config)?) as Arc<dyn FilterGenerator>)
            });
        }
        registry
    }
}

impl FilterRegistry {
    /// Registry with the built-in generators
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generator; names are case-insensitive
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&FilterConfig) -> Result<Arc<dyn FilterGenerator>, FilterError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(name.to_ascii_lowercase(), Box::new(factory));
    }

    pub fn build(&self, config: &FilterConfig) -> Result<Arc<dyn FilterGenerator>, FilterError> {
        let factory = self
            .factories
            .get(&config.cls.to_ascii_lowercase())
            .ok_or_else(|| FilterError::UnknownGenerator(config.cls.clone()))?;
        factory(config)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Positional argument, falling back to the keyword of the same name
fn argument<'a>(config: &'a FilterConfig, position: usize, name: &str) -> Option<&'a Value> {
    config
        .args
        .get(position)
        .or_else(|| config.kwargs.get(name))
}

fn string_argument(
    config: &FilterConfig,
    position: usize,
    name: &str,
) -> Result<String, FilterError> {
    match argument(config, position, name) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => Err(FilterError::Arguments(format!(
            "'{}' must be a string, got {}",
            name, other
        ))),
        None => Err(FilterError::Arguments(format!(
            "'{}' is required for {}",
            name, config.cls
        ))),
    }
}
