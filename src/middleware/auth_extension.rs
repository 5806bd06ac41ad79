//! Authentication extension for STAC documents
//!
//! Declares the proxy's OIDC scheme on catalogs, collections and items and
//! marks links to private endpoints with `auth:refs`.

use std::sync::Arc;

use axum::http::response;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::warn;
use url::Url;

use super::json_response::{content_type, JsonResponseTransform, RequestInfo};
use crate::utils::requests::EndpointRules;
use crate::utils::stac::for_each_link;

pub const EXTENSION_URL: &str =
    "https://stac-extensions.github.io/authentication/v1.1.0/schema.json";
pub const AUTH_SCHEME_NAME: &str = "oidc";

/// Catalog, collections, collection, items, item and search
static STAC_PATHS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(/|/collections(/[^/]+(/items(/[^/]+)?)?)?|/search)$").unwrap()
});
static JSON_CONTENT_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^application/(geo\+)?json").unwrap());

#[derive(Debug, Clone)]
pub struct AuthenticationExtension {
    endpoints: Arc<EndpointRules>,
    oidc_discovery_url: String,
}

impl AuthenticationExtension {
    pub fn new(endpoints: Arc<EndpointRules>, oidc_discovery_url: impl Into<String>) -> Self {
        Self {
            endpoints,
            oidc_discovery_url: oidc_discovery_url.into(),
        }
    }
}

impl JsonResponseTransform for AuthenticationExtension {
    fn should_transform_response(&self, request: &RequestInfo, response: &response::Parts) -> bool {
        STAC_PATHS.is_match(&request.path)
            && JSON_CONTENT_TYPE.is_match(content_type(response))
            && response.status.is_success()
    }

    fn transform_json(&self, mut data: Value, _request: &RequestInfo) -> Value {
        let Some(document) = data.as_object_mut() else {
            return data;
        };

        let extensions = document
            .entry("stac_extensions")
            .or_insert_with(|| json!([]));
        if let Value::Array(extensions) = extensions {
            if !extensions.iter().any(|ext| ext == EXTENSION_URL) {
                extensions.push(json!(EXTENSION_URL));
            }
        }

        // Items carry schemes in their properties, catalogs and collections at the top level
        let has_properties = matches!(document.get("properties"), Some(Value::Object(_)));
        let scheme_owner = if has_properties {
            document.get_mut("properties").and_then(Value::as_object_mut)
        } else {
            Some(document)
        };
        let schemes = scheme_owner.map(|owner| {
            owner
                .entry("auth:schemes")
                .or_insert_with(|| json!({}))
        });
        if let Some(Value::Object(schemes)) = schemes {
            schemes.insert(
                AUTH_SCHEME_NAME.to_string(),
                json!({
                    "type": "openIdConnect",
                    "openIdConnectUrl": self.oidc_discovery_url,
                }),
            );
        }

        for_each_link(&mut data, |link| {
            let Some(href) = link.get("href").and_then(Value::as_str) else {
                warn!(link = ?link, "Link has no href");
                return;
            };
            let path = link_path(href);
            if !self.endpoints.find_match(&path, "GET").is_private {
                return;
            }

            let refs = link.entry("auth:refs").or_insert_with(|| json!([]));
            if let Value::Array(refs) = refs {
                if !refs.iter().any(|name| name == AUTH_SCHEME_NAME) {
                    refs.push(json!(AUTH_SCHEME_NAME));
                }
            }
        });

        data
    }
}

/// Path component of an absolute or relative href
fn link_path(href: &str) -> String {
    match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}
