//! Client-side OAuth 2.1 orchestration.
//!
//! Drives the flow a transport invokes when it observes a 401:
//! protected-resource discovery, authorization-server discovery, dynamic
//! registration, a refresh attempt, and finally the PKCE authorization
//! code flow via the provider's redirect. The application completes the
//! redirect leg by calling [`OAuthClient::finish_authorization`] with the
//! code it received.

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::discovery::{
    AuthorizationServerMetadata, discover_authorization_server, discover_protected_resource,
};
use crate::error::{OAuthError, OAuthResult};
use crate::pkce::generate_pkce;
use crate::resource::resource_url_from_server_url;
use crate::types::{
    InvalidationScope, OAuthClientInformation, OAuthClientInformationFull, OAuthClientProvider,
    OAuthErrorBody, OAuthTokens,
};

/// Outcome of an [`OAuthClient::authenticate`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    /// A valid access token is stored; the caller may retry its request.
    Authorized,
    /// The user was sent to the authorization URL; the flow resumes via
    /// [`OAuthClient::finish_authorization`].
    Redirect,
}

/// Options for an authentication run.
#[derive(Debug, Clone, Default)]
pub struct AuthenticateOptions {
    /// `resource_metadata` URL from a `WWW-Authenticate` challenge.
    pub resource_metadata_url: Option<Url>,
    /// Scope to request in the authorization leg.
    pub scope: Option<String>,
}

/// Client-side OAuth flow driver.
///
/// Holds the injected HTTP client so every request in the flow, discovery
/// included, goes through the same stack the transport uses.
#[derive(Clone)]
pub struct OAuthClient {
    provider: Arc<dyn OAuthClientProvider>,
    http: reqwest::Client,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient").finish_non_exhaustive()
    }
}

impl OAuthClient {
    /// Create a flow driver around a provider and an HTTP client.
    pub fn new(provider: Arc<dyn OAuthClientProvider>, http: reqwest::Client) -> Self {
        Self { provider, http }
    }

    /// The provider this client reads and persists state through.
    pub fn provider(&self) -> &Arc<dyn OAuthClientProvider> {
        &self.provider
    }

    /// Run the authorization flow for `server_url`.
    ///
    /// Returns [`AuthResult::Authorized`] when a refresh produced a usable
    /// token, or [`AuthResult::Redirect`] after handing the user to the
    /// authorization endpoint. Terminal failures surface as
    /// [`OAuthError::Unauthorized`] or the specific discovery/registration
    /// error.
    pub async fn authenticate(
        &self,
        server_url: &Url,
        options: AuthenticateOptions,
    ) -> OAuthResult<AuthResult> {
        let resource = resource_url_from_server_url(server_url);
        let metadata = self
            .discover(server_url, options.resource_metadata_url.clone())
            .await?;

        let client_info = match self.provider.client_information().await? {
            Some(info) => info,
            None => self.register(&metadata).await?,
        };

        if let Some(tokens) = self.provider.tokens().await?
            && let Some(refresh_token) = tokens.refresh_token.clone()
        {
            match self
                .refresh_tokens(&metadata, &client_info, &refresh_token, &resource)
                .await
            {
                Ok(fresh) => {
                    self.provider.save_tokens(fresh).await?;
                    return Ok(AuthResult::Authorized);
                }
                Err(e) => {
                    self.apply_invalidation_policy(&e).await?;
                    warn!("token refresh failed, falling back to authorization: {e}");
                }
            }
        }

        // Registration may have been invalidated by the refresh failure.
        let client_info = match self.provider.client_information().await? {
            Some(info) => info,
            None => self.register(&metadata).await?,
        };

        self.start_authorization(&metadata, &client_info, &resource, options.scope.as_deref())
            .await?;
        Ok(AuthResult::Redirect)
    }

    /// Exchange an authorization code and persist the resulting grant.
    pub async fn finish_authorization(
        &self,
        server_url: &Url,
        authorization_code: &str,
    ) -> OAuthResult<OAuthTokens> {
        let resource = resource_url_from_server_url(server_url);
        let metadata = self.discover(server_url, None).await?;
        let client_info = self
            .provider
            .client_information()
            .await?
            .ok_or_else(|| OAuthError::Provider("no registered client".to_string()))?;
        let verifier = self.provider.code_verifier().await?;
        let token_endpoint = required_endpoint(metadata.token_endpoint.as_deref(), "token")?;

        let params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", authorization_code.to_string()),
            ("code_verifier", verifier),
            ("redirect_uri", self.provider.redirect_url()),
            ("resource", resource.to_string()),
        ];
        let tokens = self
            .token_request(&token_endpoint, params, &client_info)
            .await?;
        self.provider.save_tokens(tokens.clone()).await?;
        // The verifier is bound to the exchanged code; it must not outlive
        // it.
        self.provider
            .invalidate_credentials(InvalidationScope::Verifier)
            .await?;
        Ok(tokens)
    }

    /// The access token currently stored, if one exists.
    pub async fn access_token(&self) -> OAuthResult<Option<String>> {
        Ok(self.provider.tokens().await?.map(|t| t.access_token))
    }

    async fn discover(
        &self,
        server_url: &Url,
        metadata_hint: Option<Url>,
    ) -> OAuthResult<AuthorizationServerMetadata> {
        let resource_metadata =
            match discover_protected_resource(&self.http, server_url, metadata_hint).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!("protected resource discovery failed (continuing): {e}");
                    None
                }
            };

        let issuer = resource_metadata
            .as_ref()
            .and_then(|m| m.authorization_servers.first())
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| OAuthError::Discovery(format!("invalid issuer {raw}: {e}")))
            })
            .transpose()?
            .unwrap_or_else(|| origin_of(server_url));

        discover_authorization_server(&self.http, &issuer).await
    }

    async fn register(
        &self,
        metadata: &AuthorizationServerMetadata,
    ) -> OAuthResult<OAuthClientInformation> {
        let endpoint = metadata.registration_endpoint.as_deref().ok_or_else(|| {
            OAuthError::Registration(
                "no client registration stored and the server offers no registration endpoint"
                    .to_string(),
            )
        })?;

        let mut client_metadata = self.provider.client_metadata();
        if client_metadata.redirect_uris.is_empty() {
            client_metadata.redirect_uris = vec![self.provider.redirect_url()];
        }

        debug!("registering client at {endpoint}");
        let response = self
            .http
            .post(endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&client_metadata)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(OAuthError::Registration(format!(
                "registration endpoint answered {status}: {detail}"
            )));
        }
        let full = response
            .json::<OAuthClientInformationFull>()
            .await
            .map_err(|e| OAuthError::Registration(format!("invalid registration response: {e}")))?;
        let info = full.client.clone();
        self.provider.save_client_information(full).await?;
        Ok(info)
    }

    async fn refresh_tokens(
        &self,
        metadata: &AuthorizationServerMetadata,
        client_info: &OAuthClientInformation,
        refresh_token: &str,
        resource: &Url,
    ) -> OAuthResult<OAuthTokens> {
        let token_endpoint = required_endpoint(metadata.token_endpoint.as_deref(), "token")?;
        let params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("resource", resource.to_string()),
        ];
        self.token_request(&token_endpoint, params, client_info)
            .await
    }

    async fn start_authorization(
        &self,
        metadata: &AuthorizationServerMetadata,
        client_info: &OAuthClientInformation,
        resource: &Url,
        scope: Option<&str>,
    ) -> OAuthResult<()> {
        let authorization_endpoint =
            required_endpoint(metadata.authorization_endpoint.as_deref(), "authorization")?;
        let pkce = generate_pkce();
        self.provider.save_code_verifier(pkce.verifier).await?;

        let state = self
            .provider
            .state()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let mut url = Url::parse(&authorization_endpoint)
            .map_err(|e| OAuthError::Discovery(format!("invalid authorization endpoint: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &client_info.client_id)
                .append_pair("redirect_uri", &self.provider.redirect_url())
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", "S256")
                .append_pair("state", &state)
                .append_pair("resource", resource.as_str());
            if let Some(scope) = scope {
                query.append_pair("scope", scope);
            }
        }

        self.provider.redirect_to_authorization(url).await
    }

    async fn token_request(
        &self,
        token_endpoint: &str,
        mut params: Vec<(&str, String)>,
        client_info: &OAuthClientInformation,
    ) -> OAuthResult<OAuthTokens> {
        let auth_method = self
            .provider
            .client_metadata()
            .token_endpoint_auth_method
            .unwrap_or_else(|| "client_secret_post".to_string());

        let mut request = self
            .http
            .post(token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json");

        match (auth_method.as_str(), &client_info.client_secret) {
            ("client_secret_basic", Some(secret)) => {
                request = request.basic_auth(&client_info.client_id, Some(secret));
            }
            (_, secret) => {
                params.push(("client_id", client_info.client_id.clone()));
                if let Some(secret) = secret {
                    params.push(("client_secret", secret.clone()));
                }
            }
        }

        let response = request.form(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<OAuthErrorBody>(&body) {
                Ok(error_body) => OAuthError::from_error_body(error_body),
                Err(_) => OAuthError::Http {
                    status: status.as_u16(),
                    message: body,
                },
            });
        }
        response
            .json::<OAuthTokens>()
            .await
            .map_err(|e| OAuthError::Serialization(format!("invalid token response: {e}")))
    }

    async fn apply_invalidation_policy(&self, error: &OAuthError) -> OAuthResult<()> {
        match error {
            OAuthError::InvalidClient(_) | OAuthError::UnauthorizedClient(_) => {
                self.provider
                    .invalidate_credentials(InvalidationScope::All)
                    .await
            }
            OAuthError::InvalidGrant(_) => {
                self.provider
                    .invalidate_credentials(InvalidationScope::Tokens)
                    .await
            }
            _ => Ok(()),
        }
    }
}

fn required_endpoint(endpoint: Option<&str>, kind: &str) -> OAuthResult<String> {
    endpoint.map(str::to_string).ok_or_else(|| {
        OAuthError::Discovery(format!("metadata declares no {kind} endpoint"))
    })
}

fn origin_of(url: &Url) -> Url {
    let mut origin = url.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}

/// Extract the `resource_metadata` URL from a `WWW-Authenticate` value,
/// e.g. `Bearer resource_metadata="https://api.example.com/.well-known/..."`.
pub fn extract_resource_metadata_url(www_authenticate: &str) -> Option<Url> {
    let marker = "resource_metadata=";
    let start = www_authenticate.find(marker)? + marker.len();
    let rest = &www_authenticate[start..];
    let value = if let Some(stripped) = rest.strip_prefix('"') {
        stripped.split('"').next()?
    } else {
        rest.split([',', ' ']).next()?
    };
    Url::parse(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_resource_metadata_quoted() {
        let url = extract_resource_metadata_url(
            r#"Bearer resource_metadata="https://api.example.com/.well-known/oauth-protected-resource", scope="mcp""#,
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/.well-known/oauth-protected-resource"
        );
    }

    #[test]
    fn test_extract_resource_metadata_unquoted() {
        let url = extract_resource_metadata_url(
            "Bearer resource_metadata=https://api.example.com/meta",
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/meta");
    }

    #[test]
    fn test_extract_resource_metadata_absent() {
        assert!(extract_resource_metadata_url("Bearer realm=\"mcp\"").is_none());
    }

    #[test]
    fn test_origin_of_strips_path() {
        let url = Url::parse("https://api.example.com/mcp/v1?x=1").unwrap();
        assert_eq!(origin_of(&url).as_str(), "https://api.example.com/");
    }
}
