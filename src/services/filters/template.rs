//! Template-based filter generator

use async_trait::async_trait;
use minijinja::Environment;
use serde_json::Value;

use super::{string_argument, FilterError, FilterGenerator};
use crate::config::FilterConfig;

/// Renders a Jinja template against the request context
///
/// ```yaml
/// items_filter:
///   cls: template
///   args:
///     - "{{ '(properties.private = false)' if payload is none else true }}"
/// ```
#[derive(Debug)]
pub struct Template {
    template_str: String,
    env: Environment<'static>,
}

impl Template {
    /// Compile-check the template and keep it for rendering
    pub fn new(template_str: impl Into<String>) -> Result<Self, FilterError> {
        let template_str = template_str.into();
        let env = Environment::new();
        env.template_from_str(&template_str)?;
        Ok(Self { template_str, env })
    }

    pub fn from_config(config: &FilterConfig) -> Result<Self, FilterError> {
        Self::new(string_argument(config, 0, "template_str")?)
    }
}

#[async_trait]
impl FilterGenerator for Template {
    async fn generate(&self, context: &Value) -> Result<String, FilterError> {
        let rendered = self.env.render_str(&self.template_str, context)?;
        Ok(rendered.trim().to_string())
    }
}
