//! OAuth wire types and the pluggable provider interfaces.
//!
//! Serde shapes follow RFC 6749/7591: optional fields are skipped when
//! absent, unknown server additions are retained in a flattened map.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::OAuthResult;

/// A token grant as returned by a token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    /// The access token
    pub access_token: String,
    /// Token type, `bearer` in this profile
    pub token_type: String,
    /// Lifetime in seconds from issuance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Space-separated granted scopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Refresh token, when the grant supports refresh
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Client metadata sent with a registration request (RFC 7591 §2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthClientMetadata {
    /// Redirect URIs (required for the authorization code flow)
    pub redirect_uris: Vec<String>,
    /// Token endpoint authentication method
    /// (`client_secret_basic`, `client_secret_post`, or `none`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,
    /// Grant types the client will use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_types: Option<Vec<String>>,
    /// Response types the client will use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_types: Option<Vec<String>>,
    /// Human-readable client name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// Client homepage URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,
    /// Space-separated scopes the client intends to request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Contact addresses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contacts: Option<Vec<String>>,
    /// Software identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_id: Option<String>,
    /// Software version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
}

/// Credentials issued by a registration endpoint (RFC 7591 §3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClientInformation {
    /// Client identifier
    pub client_id: String,
    /// Client secret, absent for public clients
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Issuance time, seconds since the epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id_issued_at: Option<u64>,
    /// Secret expiry, seconds since the epoch; 0 means never
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<u64>,
}

/// Issued credentials together with the registered metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClientInformationFull {
    /// Issued credentials
    #[serde(flatten)]
    pub client: OAuthClientInformation,
    /// Registered metadata
    #[serde(flatten)]
    pub metadata: OAuthClientMetadata,
    /// Anything else the server echoed back
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

impl OAuthClientInformationFull {
    /// Whether the client secret has expired at `now` (epoch seconds).
    pub fn secret_expired_at(&self, now: u64) -> bool {
        match self.client.client_secret_expires_at {
            Some(0) | None => false,
            Some(expiry) => now >= expiry,
        }
    }
}

/// RFC 6749 §5.2 error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthErrorBody {
    /// Error code
    pub error: String,
    /// Human-readable detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    /// URI with more information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

/// Which stored credentials to discard after a terminal auth failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
    /// Tokens, client registration, and code verifier
    All,
    /// Client registration only
    Client,
    /// Access/refresh tokens only
    Tokens,
    /// The transient PKCE verifier only
    Verifier,
}

/// Client-side storage and interaction hooks for the OAuth flow.
///
/// The flow only reads and writes through this interface; where the state
/// lives (memory, keychain, database) is the application's business.
#[async_trait]
pub trait OAuthClientProvider: Send + Sync {
    /// The redirect URI this client registered.
    fn redirect_url(&self) -> String;

    /// Metadata used for dynamic registration.
    fn client_metadata(&self) -> OAuthClientMetadata;

    /// CSRF `state` value for the next authorization request; a random
    /// value is generated when `None`.
    fn state(&self) -> Option<String> {
        None
    }

    /// Stored registration, if the client has registered before.
    async fn client_information(&self) -> OAuthResult<Option<OAuthClientInformation>>;

    /// Persist a fresh registration.
    async fn save_client_information(&self, info: OAuthClientInformationFull) -> OAuthResult<()>;

    /// Stored token grant, if any.
    async fn tokens(&self) -> OAuthResult<Option<OAuthTokens>>;

    /// Persist a token grant. Replaces the prior grant atomically: the old
    /// refresh token is gone once this returns.
    async fn save_tokens(&self, tokens: OAuthTokens) -> OAuthResult<()>;

    /// Send the user to the authorization URL. The application completes
    /// the flow later via `finish_authorization`.
    async fn redirect_to_authorization(&self, url: Url) -> OAuthResult<()>;

    /// Persist the PKCE verifier for the pending authorization.
    async fn save_code_verifier(&self, verifier: String) -> OAuthResult<()>;

    /// The PKCE verifier saved for the pending authorization.
    async fn code_verifier(&self) -> OAuthResult<String>;

    /// Discard stored credentials per the given scope.
    async fn invalidate_credentials(&self, scope: InvalidationScope) -> OAuthResult<()>;
}
