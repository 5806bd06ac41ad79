//! OIDC discovery and bearer token validation
//!
//! The discovery document is fetched once per process. Signing keys are
//! cached for a few minutes and refetched when a token names an unknown key.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use crate::services::cache::MemoryCache;
use crate::utils::AppError;

const JWKS_CACHE_TTL: Duration = Duration::from_secs(300);
const JWKS_CACHE_KEY: &str = "jwks";

/// Discovery document with its key set location
#[derive(Debug, Clone)]
pub struct OidcMetadata {
    /// `jwks_uri` moved onto the origin of the discovery URL
    pub jwks_uri: String,
    pub document: Value,
}

/// Validates bearer tokens against an OIDC provider
#[derive(Debug)]
pub struct OidcService {
    discovery_url: String,
    allowed_audiences: Option<Vec<String>>,
    client: reqwest::Client,
    metadata: OnceCell<Arc<OidcMetadata>>,
    jwks: MemoryCache<&'static str, Arc<JwkSet>>,
}

impl OidcService {
    pub fn new(
        discovery_url: impl Into<String>,
        allowed_audiences: Option<Vec<String>>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            discovery_url: discovery_url.into(),
            allowed_audiences,
            client,
            metadata: OnceCell::new(),
            jwks: MemoryCache::new(JWKS_CACHE_TTL),
        }
    }

    pub fn discovery_url(&self) -> &str {
        &self.discovery_url
    }

    /// Discovery metadata, fetched on first use
    ///
    /// A failed fetch is not remembered; the next caller tries again.
    pub async fn metadata(&self) -> Result<Arc<OidcMetadata>, AppError> {
        self.metadata
            .get_or_try_init(|| async { self.fetch_metadata().await.map(Arc::new) })
            .await
            .cloned()
    }

    async fn fetch_metadata(&self) -> Result<OidcMetadata, AppError> {
        debug!(url = %self.discovery_url, "Fetching OIDC discovery document");
        let document: Value = self
            .client
            .get(&self.discovery_url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| AppError::Oidc(format!("discovery request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| AppError::Oidc(format!("invalid discovery document: {}", e)))?;

        let advertised = document
            .get("jwks_uri")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Oidc("discovery document has no jwks_uri".to_string()))?;

        let jwks_uri = rewrite_origin(advertised, &self.discovery_url)
            .map_err(|e| AppError::Oidc(format!("invalid jwks_uri '{}': {}", advertised, e)))?;
        if jwks_uri != advertised {
            warn!(
                original = %advertised,
                rewritten = %jwks_uri,
                "Rewrote jwks_uri to match the discovery URL origin"
            );
        }

        Ok(OidcMetadata { jwks_uri, document })
    }

    async fn jwks(&self, refresh: bool) -> Result<Arc<JwkSet>, AppError> {
        if !refresh {
            if let Some(jwks) = self.jwks.get(&JWKS_CACHE_KEY).await {
                return Ok(jwks);
            }
        }

        let metadata = self.metadata().await?;
        debug!(url = %metadata.jwks_uri, "Fetching JWKS");
        let jwks: JwkSet = self
            .client
            .get(&metadata.jwks_uri)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| AppError::Oidc(format!("JWKS request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| AppError::Oidc(format!("invalid JWKS: {}", e)))?;

        let jwks = Arc::new(jwks);
        self.jwks.set(JWKS_CACHE_KEY, jwks.clone()).await;
        Ok(jwks)
    }

    /// Signing key for a token, refetching the key set once on a `kid` miss
    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, AppError> {
        for refresh in [false, true] {
            let jwks = self.jwks(refresh).await?;
            let jwk = match kid {
                Some(kid) => jwks.find(kid),
                None if jwks.keys.len() == 1 => jwks.keys.first(),
                None => None,
            };
            if let Some(jwk) = jwk {
                return DecodingKey::from_jwk(jwk).map_err(|e| {
                    warn!(error = %e, "Unusable signing key");
                    AppError::invalid_credentials()
                });
            }
        }

        warn!(kid = ?kid, "No signing key matches token");
        Err(AppError::invalid_credentials())
    }

    /// Validate an `Authorization` header
    ///
    /// Returns `Ok(None)` for an anonymous request when `auto_error` is off.
    pub async fn validate_token(
        &self,
        auth_header: Option<&str>,
        auto_error: bool,
        required_scopes: &[String],
    ) -> Result<Option<Value>, AppError> {
        let auth_header = match auth_header.map(str::trim) {
            Some(header) if !header.is_empty() => header,
            _ if auto_error => {
                return Err(AppError::NotAuthenticated("Not authenticated".to_string()))
            }
            _ => return Ok(None),
        };

        let token = bearer_token(auth_header).ok_or_else(|| {
            warn!("Malformed Authorization header");
            AppError::invalid_credentials()
        })?;

        let header = decode_header(token).map_err(|e| {
            warn!(error = %e, "Invalid token header");
            AppError::invalid_credentials()
        })?;
        let key = self.decoding_key(header.kid.as_deref()).await?;

        let claims = decode::<Value>(token, &key, &self.validation())
            .map_err(|e| {
                warn!(error = %e, "Token validation failed");
                AppError::invalid_credentials()
            })?
            .claims;

        let granted = token_scopes(&claims);
        if let Some(missing) = required_scopes
            .iter()
            .find(|scope| !granted.contains(&scope.as_str()))
        {
            return Err(AppError::Unauthorized {
                detail: "Not enough permissions".to_string(),
                challenge: format!("Bearer scope=\"{}\"", missing),
            });
        }

        Ok(Some(claims))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims::<&str>(&[]);
        validation.validate_nbf = true;
        if let Some(audiences) = &self.allowed_audiences {
            validation.set_audience(audiences.as_slice());
        }
        validation
    }
}

/// Token from a `Bearer <token>` header value; the scheme is case-insensitive
fn bearer_token(header: &str) -> Option<&str> {
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None)
            if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() =>
        {
            Some(token)
        }
        _ => None,
    }
}

/// Scopes granted by the `scope` claim
fn token_scopes(claims: &Value) -> Vec<&str> {
    match claims.get("scope") {
        Some(Value::String(scope)) => scope.split_whitespace().collect(),
        Some(Value::Array(scopes)) => scopes.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Move `url` onto the scheme, host and port of `origin`
pub fn rewrite_origin(url: &str, origin: &str) -> Result<String, url::ParseError> {
    let mut rewritten = Url::parse(url)?;
    let origin = Url::parse(origin)?;

    // Both URLs are absolute http(s), so these setters cannot fail
    let _ = rewritten.set_scheme(origin.scheme());
    let _ = rewritten.set_host(origin.host_str());
    let _ = rewritten.set_port(origin.port());

    Ok(rewritten.to_string())
}
