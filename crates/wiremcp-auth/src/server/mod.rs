//! Server-side authorization endpoints.
//!
//! [`auth_router`] assembles the authorization, token, and discovery
//! handlers into an axum [`Router`] around a pluggable
//! [`OAuthServerProvider`].

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use url::Url;

use crate::error::OAuthError;

pub mod authorize;
pub mod memory;
pub mod metadata;
pub mod provider;
pub mod rate_limit;
pub mod token;

pub use authorize::{authorize_get, authorize_post};
pub use memory::{InMemoryClientsStore, InMemoryOAuthProvider};
pub use metadata::WwwAuthenticateBuilder;
pub use provider::{AuthorizationParams, OAuthRegisteredClientsStore, OAuthServerProvider};
pub use rate_limit::{RateLimitConfig, RateLimitExceeded, RateLimiter};
pub use token::token_handler;

/// Authorization-server configuration.
#[derive(Debug, Clone)]
pub struct AuthServerConfig {
    /// Issuer identifier; endpoint URLs hang off it.
    pub issuer_url: Url,
    /// Canonical URL of the protected resource this server guards.
    pub server_url: Url,
    /// Enforce RFC 8707: `resource` must be present and match
    /// `server_url` exactly.
    pub validate_resource_matches_server: bool,
    /// Scopes advertised in the discovery documents.
    pub scopes_supported: Vec<String>,
    /// Rate limit for the authorization endpoint.
    pub authorize_rate_limit: RateLimitConfig,
    /// Rate limit for the token endpoint.
    pub token_rate_limit: RateLimitConfig,
}

impl AuthServerConfig {
    /// Configuration with per-endpoint defaults (100 requests / 15 min).
    pub fn new(issuer_url: Url, server_url: Url) -> Self {
        Self {
            issuer_url,
            server_url,
            validate_resource_matches_server: false,
            scopes_supported: Vec::new(),
            authorize_rate_limit: RateLimitConfig::default(),
            token_rate_limit: RateLimitConfig::default(),
        }
    }

    /// Require the resource indicator to name this server.
    pub fn with_resource_validation(mut self) -> Self {
        self.validate_resource_matches_server = true;
        self
    }

    /// Advertise supported scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes_supported = scopes;
        self
    }
}

/// Shared state behind the endpoint handlers.
#[derive(Clone)]
pub struct AuthServerState {
    /// Stateful behavior: clients, codes, grants.
    pub provider: Arc<dyn OAuthServerProvider>,
    /// Endpoint configuration.
    pub config: Arc<AuthServerConfig>,
    pub(crate) authorize_limiter: RateLimiter,
    pub(crate) token_limiter: RateLimiter,
}

impl std::fmt::Debug for AuthServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthServerState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AuthServerState {
    /// Build endpoint state from a provider and configuration.
    pub fn new(provider: Arc<dyn OAuthServerProvider>, config: AuthServerConfig) -> Self {
        let authorize_limiter = RateLimiter::new(config.authorize_rate_limit.clone());
        let token_limiter = RateLimiter::new(config.token_rate_limit.clone());
        Self {
            provider,
            config: Arc::new(config),
            authorize_limiter,
            token_limiter,
        }
    }
}

/// Assemble the authorization-server router: `/authorize` (GET and POST),
/// `/token`, and the two `.well-known` discovery documents.
pub fn auth_router(state: AuthServerState) -> Router {
    Router::new()
        .route("/authorize", get(authorize_get).post(authorize_post))
        .route("/token", post(token_handler))
        .route(
            "/.well-known/oauth-authorization-server",
            get(metadata::authorization_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(metadata::protected_resource_metadata),
        )
        .with_state(state)
}

/// Rate-limit key for a request: the nearest client IP we can see.
pub(crate) fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Direct JSON error response (pre-redirect failures and the token
/// endpoint).
pub(crate) fn direct_error(error: &OAuthError) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error.to_error_body())).into_response()
}

/// 429 with a Retry-After hint.
pub(crate) fn rate_limited(exceeded: &RateLimitExceeded) -> Response {
    let error = OAuthError::TemporarilyUnavailable("rate limit exceeded".to_string());
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, exceeded.retry_after.as_secs().to_string())],
        Json(error.to_error_body()),
    )
        .into_response()
}

/// 302 to `redirect_uri` with the given query pairs appended.
pub(crate) fn redirect_with(redirect_uri: &str, pairs: &[(&str, String)]) -> Response {
    let Ok(mut url) = Url::parse(redirect_uri) else {
        return direct_error(&OAuthError::ServerError(
            "registered redirect URI is not a valid URL".to_string(),
        ));
    };
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in pairs {
            query.append_pair(key, value);
        }
    }
    (
        StatusCode::FOUND,
        [(header::LOCATION, url.to_string())],
    )
        .into_response()
}
