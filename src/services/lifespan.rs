//! Startup checks run before the server accepts traffic

use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{AppConfig, HealthCheckConfig};

#[derive(Debug, Error)]
pub enum LifespanError {
    #[error("Upstream API '{url}' failed to respond after {attempts} attempts")]
    Unhealthy { url: String, attempts: u32 },

    #[error("Upstream catalog is missing the following conformance classes:\n{0}")]
    MissingConformance(String),

    #[error("Upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid conformance pattern '{0}'")]
    Pattern(String),
}

/// Conformance pattern → names of the stages that need it
pub type RequiredConformances = IndexMap<String, Vec<&'static str>>;

/// Delay before retry number `attempt` (zero based)
fn retry_delay(config: &HealthCheckConfig, attempt: u32) -> Duration {
    let delay = config.retry_delay_secs * 2f64.powi(attempt.min(30) as i32);
    Duration::from_secs_f64(delay.min(config.retry_delay_max_secs).max(0.0))
}

/// Wait until `url` accepts connections and answers without an error status
///
/// Only connection failures are retried. An error status or any other
/// request failure ends the check immediately.
pub async fn check_server_health(
    client: &reqwest::Client,
    url: &str,
    config: &HealthCheckConfig,
) -> Result<(), LifespanError> {
    let timeout = Duration::from_secs_f64(config.timeout_secs.max(0.0));

    for attempt in 0..config.max_retries {
        let result = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => {
                info!(url = %url, "Upstream API is healthy");
                return Ok(());
            }
            Err(e) if e.is_connect() => {
                let retry_in = retry_delay(config, attempt);
                warn!(
                    url = %url,
                    error = %e,
                    "Upstream API not healthy, retrying in {:.1}s (attempt {}/{})",
                    retry_in.as_secs_f64(),
                    attempt + 1,
                    config.max_retries
                );
                tokio::time::sleep(retry_in).await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(LifespanError::Unhealthy {
        url: url.to_string(),
        attempts: config.max_retries,
    })
}

/// Verify the upstream advertises every conformance class the pipeline needs
///
/// Patterns are regular expressions matched at the start of each advertised
/// class.
pub async fn check_conformance(
    client: &reqwest::Client,
    api_url: &str,
    required: &RequiredConformances,
) -> Result<(), LifespanError> {
    let url = format!("{}/conformance", api_url.trim_end_matches('/'));
    let body: Value = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let conforms_to: Vec<&str> = body
        .get("conformsTo")
        .and_then(Value::as_array)
        .map(|classes| classes.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut missing = Vec::new();
    for pattern in required.keys() {
        let regex = Regex::new(&format!("^(?:{})", pattern))
            .map_err(|_| LifespanError::Pattern(pattern.clone()))?;
        if !conforms_to.iter().any(|class| regex.is_match(class)) {
            missing.push(pattern.as_str());
        }
    }

    let describe = |pattern: &str| {
        format!(
            " - {} [{}]",
            pattern,
            required
                .get(pattern)
                .map(|stages| stages.join(","))
                .unwrap_or_default()
        )
    };

    if !missing.is_empty() {
        let lines: Vec<String> = missing.iter().map(|pattern| describe(pattern)).collect();
        return Err(LifespanError::MissingConformance(lines.join("\n")));
    }

    let lines: Vec<String> = required.keys().map(|pattern| describe(pattern)).collect();
    info!(
        "Upstream catalog conforms to the following required conformance classes:\n{}",
        lines.join("\n")
    );
    Ok(())
}

/// Health and conformance checks, as enabled in the configuration
pub async fn run_startup_checks(
    config: &AppConfig,
    client: &reqwest::Client,
    required: &RequiredConformances,
) -> Result<(), LifespanError> {
    if config.wait_for_upstream {
        info!("Running upstream server health checks...");
        let urls = [config.upstream_url.as_str(), config.internal_discovery_url()];
        for url in urls {
            check_server_health(client, url, &config.health_check).await?;
        }
        info!(
            "Upstream servers are healthy:\n{}",
            urls.iter()
                .map(|url| format!(" - {}", url))
                .collect::<Vec<_>>()
                .join("\n")
        );
    }

    if config.check_conformance {
        check_conformance(client, &config.upstream_url, required).await?;
    }

    Ok(())
}
