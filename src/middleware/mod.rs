//! Middleware components
//!
//! Request-side stages:
//! - Root path removal
//! - Authentication enforcement
//! - CQL2 filter generation and enforcement
//!
//! Response-side stages, built on [`json_response`]:
//! - Link rewriting
//! - OpenAPI augmentation
//! - Authentication extension

pub mod auth;
pub mod auth_extension;
pub mod cql2;
pub mod json_response;
pub mod openapi;
pub mod process_links;
pub mod process_time;
pub mod root_path;

pub use auth::{enforce_auth_middleware, AuthContext};
pub use auth_extension::AuthenticationExtension;
pub use cql2::{apply_cql2_filter_middleware, build_cql2_filter_middleware, Cql2Filter};
pub use json_response::{json_response_middleware, JsonResponseTransform, RequestInfo};
pub use openapi::OpenApiTransform;
pub use process_links::ProcessLinks;
pub use process_time::process_time_middleware;
pub use root_path::remove_root_path_middleware;
