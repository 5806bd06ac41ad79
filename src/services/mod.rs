//! Business logic services

pub mod cache;
pub mod filters;
pub mod lifespan;
pub mod oidc;
pub mod proxy;

pub use cache::{CacheEntry, MemoryCache};
pub use filters::{FilterError, FilterGenerator, FilterRegistry};
pub use lifespan::{run_startup_checks, LifespanError, RequiredConformances};
pub use oidc::{OidcMetadata, OidcService};
pub use proxy::ReverseProxy;
