//! Authorization-server and protected-resource metadata discovery.
//!
//! Implements RFC 9728 (protected resource metadata, optional - a 404 is
//! tolerated) and RFC 8414 (authorization server metadata) with a fallback
//! to OpenID Connect Discovery when the RFC 8414 document is absent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::{OAuthError, OAuthResult};

/// RFC 9728 protected-resource metadata document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// The resource identifier this document describes
    pub resource: String,
    /// Authorization servers that can issue tokens for this resource
    #[serde(default)]
    pub authorization_servers: Vec<String>,
    /// Scopes the resource understands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    /// How bearer tokens may be presented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_methods_supported: Option<Vec<String>>,
    /// Documentation URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_documentation: Option<String>,
    /// Server additions not modeled here
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

/// RFC 8414 authorization-server metadata document (also accepts OIDC
/// discovery documents, which are a superset for our purposes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Issuer identifier
    pub issuer: String,
    /// Authorization endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    /// Token endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    /// RFC 7591 registration endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    /// Supported response types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_types_supported: Option<Vec<String>>,
    /// Supported grant types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,
    /// Supported PKCE methods
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,
    /// Supported scopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    /// Supported token endpoint auth methods
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,
    /// Server additions not modeled here
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

fn well_known_url(base: &Url, well_known: &str) -> OAuthResult<Url> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    // RFC 8414 / RFC 9728 path insertion: the well-known segment sits at
    // the root, with the issuer path appended after it.
    let path = base.path().trim_end_matches('/');
    let full = if path.is_empty() {
        format!("/.well-known/{well_known}")
    } else {
        format!("/.well-known/{well_known}{path}")
    };
    url.set_path(&full);
    Ok(url)
}

/// The RFC 9728 metadata URL for a protected resource.
pub fn protected_resource_metadata_url(server_url: &Url) -> OAuthResult<Url> {
    well_known_url(server_url, "oauth-protected-resource")
}

/// Fetch protected-resource metadata for `server_url`.
///
/// `metadata_hint` is the `resource_metadata` URL taken from a
/// `WWW-Authenticate` challenge, when the server offered one. A 404 means
/// the server simply does not publish the document and yields `Ok(None)`.
pub async fn discover_protected_resource(
    http: &reqwest::Client,
    server_url: &Url,
    metadata_hint: Option<Url>,
) -> OAuthResult<Option<ProtectedResourceMetadata>> {
    let url = match metadata_hint {
        Some(url) => url,
        None => protected_resource_metadata_url(server_url)?,
    };
    debug!("fetching protected resource metadata from {url}");
    let response = http
        .get(url.clone())
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await?;
    if response.status().as_u16() == 404 {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(OAuthError::Http {
            status: response.status().as_u16(),
            message: format!("protected resource metadata fetch from {url}"),
        });
    }
    let metadata = response
        .json::<ProtectedResourceMetadata>()
        .await
        .map_err(|e| OAuthError::Discovery(format!("invalid protected resource metadata: {e}")))?;
    Ok(Some(metadata))
}

/// Fetch authorization-server metadata for `issuer`.
///
/// Tries the RFC 8414 document first and falls back to OpenID discovery
/// when that fails; only when both fail is the combined error surfaced.
pub async fn discover_authorization_server(
    http: &reqwest::Client,
    issuer: &Url,
) -> OAuthResult<AuthorizationServerMetadata> {
    let oauth_url = well_known_url(issuer, "oauth-authorization-server")?;
    let oauth_error = match fetch_metadata(http, &oauth_url).await {
        Ok(metadata) => return Ok(validate_issuer(metadata, issuer)),
        Err(e) => e,
    };

    let mut oidc_url = issuer.clone();
    oidc_url.set_query(None);
    oidc_url.set_fragment(None);
    let oidc_path = format!(
        "{}/.well-known/openid-configuration",
        issuer.path().trim_end_matches('/')
    );
    oidc_url.set_path(&oidc_path);
    match fetch_metadata(http, &oidc_url).await {
        Ok(metadata) => Ok(validate_issuer(metadata, issuer)),
        Err(oidc_error) => Err(OAuthError::Discovery(format!(
            "all discovery endpoints failed; RFC 8414: {oauth_error}; OIDC: {oidc_error}"
        ))),
    }
}

async fn fetch_metadata(
    http: &reqwest::Client,
    url: &Url,
) -> OAuthResult<AuthorizationServerMetadata> {
    debug!("fetching authorization server metadata from {url}");
    let response = http
        .get(url.clone())
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(OAuthError::Http {
            status: response.status().as_u16(),
            message: format!("metadata fetch from {url}"),
        });
    }
    response
        .json::<AuthorizationServerMetadata>()
        .await
        .map_err(|e| OAuthError::Discovery(format!("invalid metadata document: {e}")))
}

fn validate_issuer(
    metadata: AuthorizationServerMetadata,
    expected: &Url,
) -> AuthorizationServerMetadata {
    let declared = metadata.issuer.trim_end_matches('/');
    let requested = expected.as_str().trim_end_matches('/');
    if declared != requested {
        warn!("issuer mismatch: document says {declared}, requested {requested}");
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_well_known_url_without_path() {
        let base = Url::parse("https://auth.example.com").unwrap();
        let url = well_known_url(&base, "oauth-authorization-server").unwrap();
        assert_eq!(
            url.as_str(),
            "https://auth.example.com/.well-known/oauth-authorization-server"
        );
    }

    #[test]
    fn test_well_known_url_inserts_before_path() {
        let base = Url::parse("https://auth.example.com/tenant1").unwrap();
        let url = well_known_url(&base, "oauth-authorization-server").unwrap();
        assert_eq!(
            url.as_str(),
            "https://auth.example.com/.well-known/oauth-authorization-server/tenant1"
        );
    }

    #[test]
    fn test_protected_resource_url() {
        let base = Url::parse("https://api.example.com/mcp").unwrap();
        let url = protected_resource_metadata_url(&base).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/.well-known/oauth-protected-resource/mcp"
        );
    }

    #[test]
    fn test_metadata_retains_unknown_fields() {
        let metadata: AuthorizationServerMetadata = serde_json::from_str(
            r#"{"issuer":"https://as.example.com","token_endpoint":"https://as.example.com/token","revocation_endpoint":"https://as.example.com/revoke"}"#,
        )
        .unwrap();
        assert!(metadata.additional.contains_key("revocation_endpoint"));
    }
}
