//! Link rewriting for proxied STAC documents
//!
//! Links that point at this proxy's host have the upstream URL's path
//! removed and the proxy's root path added, so clients follow them back
//! through the proxy.

use axum::http::response;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::json_response::{content_type, JsonResponseTransform, RequestInfo};
use crate::utils::stac::for_each_link;

static JSON_CONTENT_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^application/(geo\+)?json").unwrap());

#[derive(Debug, Clone)]
pub struct ProcessLinks {
    /// Upstream URL path without a trailing slash; empty when mounted at `/`
    upstream_path: String,
    root_path: String,
}

impl ProcessLinks {
    pub fn new(upstream_path: impl Into<String>, root_path: impl Into<String>) -> Self {
        Self {
            upstream_path: upstream_path.into().trim_end_matches('/').to_string(),
            root_path: root_path.into(),
        }
    }

    fn rewrite_path(&self, path: &str) -> String {
        let mut path = path.to_string();

        if !self.upstream_path.is_empty() {
            if let Some(rest) = path.strip_prefix(&self.upstream_path) {
                if rest.is_empty() || rest.starts_with('/') {
                    path = rest.to_string();
                }
            }
        }

        if !self.root_path.is_empty() {
            let mounted = path
                .strip_prefix(&self.root_path)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));
            if !mounted {
                path = format!("{}{}", self.root_path, path);
            }
        }

        path
    }

    fn rewrite_href(&self, href: &str, host: &str) -> Option<String> {
        let mut url = Url::parse(href).ok()?;
        if netloc(&url) != host {
            return None;
        }
        let path = self.rewrite_path(url.path());
        url.set_path(&path);
        Some(url.to_string())
    }
}

/// `host[:port]` as it appears in a Host header
fn netloc(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    }
}

impl JsonResponseTransform for ProcessLinks {
    fn should_transform_response(&self, _request: &RequestInfo, response: &response::Parts) -> bool {
        JSON_CONTENT_TYPE.is_match(content_type(response))
    }

    fn transform_json(&self, mut data: Value, request: &RequestInfo) -> Value {
        let Some(host) = request.host().map(str::to_string) else {
            return data;
        };

        for_each_link(&mut data, |link| {
            let Some(href) = link.get("href").and_then(Value::as_str) else {
                return;
            };
            if href.is_empty() {
                return;
            }
            if let Some(rewritten) = self.rewrite_href(href, &host) {
                debug!(from = %href, to = %rewritten, "Rewrote link");
                link.insert("href".to_string(), Value::String(rewritten));
            }
        });

        data
    }
}
