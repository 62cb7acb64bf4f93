//! Server-side provider interfaces.
//!
//! The endpoint handlers own wire-level validation; everything stateful
//! (clients, codes, tokens) lives behind these traits so backing stores
//! stay pluggable.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::OAuthResult;
use crate::types::{OAuthClientInformationFull, OAuthTokens};

/// What the authorization endpoint binds an issued code to.
#[derive(Debug, Clone)]
pub struct AuthorizationParams {
    /// Caller's `state`, echoed on the redirect
    pub state: Option<String>,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// PKCE S256 challenge
    pub code_challenge: String,
    /// Redirect URI the code is bound to
    pub redirect_uri: String,
    /// RFC 8707 resource the code is bound to
    pub resource: Option<Url>,
}

/// Registered-clients store.
#[async_trait]
pub trait OAuthRegisteredClientsStore: Send + Sync {
    /// Look up a client by id.
    async fn get_client(&self, client_id: &str) -> OAuthResult<Option<OAuthClientInformationFull>>;

    /// Register a new client. Stores that do not support dynamic
    /// registration keep the default.
    async fn register_client(
        &self,
        client: OAuthClientInformationFull,
    ) -> OAuthResult<OAuthClientInformationFull> {
        let _ = client;
        Err(crate::error::OAuthError::ServerError(
            "dynamic client registration is not supported".to_string(),
        ))
    }
}

/// Authorization-server behavior behind the HTTP endpoints.
#[async_trait]
pub trait OAuthServerProvider: Send + Sync {
    /// The clients store this provider authenticates against.
    fn clients_store(&self) -> Arc<dyn OAuthRegisteredClientsStore>;

    /// Issue an authorization code bound to `params`.
    async fn authorize(
        &self,
        client: &OAuthClientInformationFull,
        params: &AuthorizationParams,
    ) -> OAuthResult<String>;

    /// The PKCE challenge stored for a code, without consuming it.
    async fn challenge_for_authorization_code(
        &self,
        client: &OAuthClientInformationFull,
        code: &str,
    ) -> OAuthResult<String>;

    /// Consume a code and issue a grant. Enforces single use and the exact
    /// match of `redirect_uri` and `resource` against what the code was
    /// bound to.
    async fn exchange_authorization_code(
        &self,
        client: &OAuthClientInformationFull,
        code: &str,
        redirect_uri: Option<&str>,
        resource: Option<&Url>,
    ) -> OAuthResult<OAuthTokens>;

    /// Rotate a refresh token and issue a fresh grant.
    async fn exchange_refresh_token(
        &self,
        client: &OAuthClientInformationFull,
        refresh_token: &str,
        scopes: &[String],
        resource: Option<&Url>,
    ) -> OAuthResult<OAuthTokens>;
}
