//! Open Policy Agent filter generator

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{argument, string_argument, FilterError, FilterGenerator};
use crate::config::FilterConfig;
use crate::services::cache::MemoryCache;
use crate::utils::requests::value_by_path;

pub const DEFAULT_CACHE_KEY: &str = "req.headers.authorization";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

/// Queries an OPA decision for the filter
///
/// Sends `{"input": context}` to `{host}/v1/data/{decision}` and expects the
/// decision's `result` to be cql2-text. Results are cached per value of the
/// context path named by `cache_key`.
#[derive(Debug)]
pub struct Opa {
    host: String,
    decision: String,
    client: reqwest::Client,
    cache_key: String,
    cache: MemoryCache<String, String>,
}

impl Opa {
    pub fn new(host: impl Into<String>, decision: impl Into<String>) -> Result<Self, FilterError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            host: host.into(),
            decision: decision.into(),
            client,
            cache_key: DEFAULT_CACHE_KEY.to_string(),
            cache: MemoryCache::new(DEFAULT_CACHE_TTL),
        })
    }

    pub fn with_cache(mut self, cache_key: impl Into<String>, ttl: Duration) -> Self {
        self.cache_key = cache_key.into();
        self.cache = MemoryCache::new(ttl);
        self
    }

    pub fn from_config(config: &FilterConfig) -> Result<Self, FilterError> {
        let host = string_argument(config, 0, "host")?;
        let decision = string_argument(config, 1, "decision")?;

        let cache_key = match argument(config, 2, "cache_key") {
            None => DEFAULT_CACHE_KEY.to_string(),
            Some(_) => string_argument(config, 2, "cache_key")?,
        };
        let ttl = match argument(config, 3, "cache_ttl") {
            None => DEFAULT_CACHE_TTL,
            Some(value) => value
                .as_f64()
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64)
                .ok_or_else(|| {
                    FilterError::Arguments(format!(
                        "'cache_ttl' must be a non-negative number, got {}",
                        value
                    ))
                })?,
        };

        Ok(Self::new(host, decision)?.with_cache(cache_key, ttl))
    }

    fn decision_url(&self) -> String {
        format!(
            "{}/v1/data/{}",
            self.host.trim_end_matches('/'),
            self.decision.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl FilterGenerator for Opa {
    async fn generate(&self, context: &Value) -> Result<String, FilterError> {
        let key = value_by_path(context, &self.cache_key)
            .unwrap_or(&Value::Null)
            .to_string();

        if let Some(filter) = self.cache.get(&key).await {
            debug!(decision = %self.decision, "Using cached OPA decision");
            return Ok(filter);
        }

        let body: Value = self
            .client
            .post(self.decision_url())
            .json(&json!({ "input": context }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let filter = body
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FilterError::Response(format!(
                    "decision '{}' did not return a string result",
                    self.decision
                ))
            })?
            .to_string();

        self.cache.set(key, filter.clone()).await;
        Ok(filter)
    }
}
