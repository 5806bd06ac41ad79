//! OpenAPI document augmentation
//!
//! Adds the proxy's security scheme to the upstream's OpenAPI document and
//! marks private operations as requiring it.

use std::sync::Arc;

use axum::http::response;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use super::json_response::{content_type, JsonResponseTransform, RequestInfo};
use crate::utils::requests::EndpointRules;

static OPENAPI_CONTENT_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^application/(vnd\.oai\.openapi\+json?|json)").unwrap());

const HTTP_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

#[derive(Debug, Clone)]
pub struct OpenApiTransform {
    pub spec_path: String,
    pub oidc_discovery_url: String,
    pub endpoints: Arc<EndpointRules>,
    pub root_path: String,
    pub auth_scheme_name: String,
    pub auth_scheme_override: Option<Value>,
}

impl OpenApiTransform {
    fn security_scheme(&self) -> Value {
        self.auth_scheme_override.clone().unwrap_or_else(|| {
            json!({
                "type": "openIdConnect",
                "openIdConnectUrl": self.oidc_discovery_url,
            })
        })
    }
}

impl JsonResponseTransform for OpenApiTransform {
    fn should_transform_response(&self, request: &RequestInfo, response: &response::Parts) -> bool {
        request.path == self.spec_path
            && OPENAPI_CONTENT_TYPE.is_match(content_type(response))
            && response.status.is_success()
    }

    fn transform_json(&self, mut data: Value, _request: &RequestInfo) -> Value {
        let Some(document) = data.as_object_mut() else {
            return data;
        };

        if !self.root_path.is_empty() {
            document.insert("servers".to_string(), json!([{"url": self.root_path}]));
        }

        let components = document
            .entry("components")
            .or_insert_with(|| json!({}));
        if let Some(components) = components.as_object_mut() {
            let schemes = components
                .entry("securitySchemes")
                .or_insert_with(|| json!({}));
            if let Some(schemes) = schemes.as_object_mut() {
                schemes.insert(self.auth_scheme_name.clone(), self.security_scheme());
            }
        }

        let Some(Value::Object(paths)) = document.get_mut("paths") else {
            return data;
        };
        for (path, operations) in paths.iter_mut() {
            let Some(operations) = operations.as_object_mut() else {
                continue;
            };
            for (method, operation) in operations.iter_mut() {
                if !HTTP_METHODS.contains(&method.to_ascii_lowercase().as_str()) {
                    continue;
                }
                let matched = self.endpoints.find_match(path, method);
                if !matched.is_private {
                    continue;
                }
                let Some(operation) = operation.as_object_mut() else {
                    continue;
                };
                let security = operation.entry("security").or_insert_with(|| json!([]));
                if let Some(security) = security.as_array_mut() {
                    security.push(json!({ self.auth_scheme_name.as_str(): matched.required_scopes }));
                }
            }
        }

        data
    }
}
