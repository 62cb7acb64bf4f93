//! Discovery documents and the `WWW-Authenticate` challenge builder.

use axum::extract::State;
use axum::response::Json;

use crate::discovery::{AuthorizationServerMetadata, ProtectedResourceMetadata};

use super::AuthServerState;

/// RFC 8414 authorization-server metadata handler.
pub async fn authorization_server_metadata(
    State(state): State<AuthServerState>,
) -> Json<AuthorizationServerMetadata> {
    let issuer = &state.config.issuer_url;
    let endpoint = |path: &str| {
        issuer
            .join(path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{issuer}{path}"))
    };
    Json(AuthorizationServerMetadata {
        issuer: issuer.to_string(),
        authorization_endpoint: Some(endpoint("authorize")),
        token_endpoint: Some(endpoint("token")),
        registration_endpoint: None,
        response_types_supported: Some(vec!["code".to_string()]),
        grant_types_supported: Some(vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
        ]),
        code_challenge_methods_supported: Some(vec!["S256".to_string()]),
        scopes_supported: if state.config.scopes_supported.is_empty() {
            None
        } else {
            Some(state.config.scopes_supported.clone())
        },
        token_endpoint_auth_methods_supported: Some(vec![
            "client_secret_basic".to_string(),
            "client_secret_post".to_string(),
            "none".to_string(),
        ]),
        additional: Default::default(),
    })
}

/// RFC 9728 protected-resource metadata handler.
pub async fn protected_resource_metadata(
    State(state): State<AuthServerState>,
) -> Json<ProtectedResourceMetadata> {
    Json(ProtectedResourceMetadata {
        resource: state.config.server_url.to_string(),
        authorization_servers: vec![state.config.issuer_url.to_string()],
        scopes_supported: if state.config.scopes_supported.is_empty() {
            None
        } else {
            Some(state.config.scopes_supported.clone())
        },
        bearer_methods_supported: Some(vec!["header".to_string()]),
        resource_documentation: None,
        additional: Default::default(),
    })
}

/// Builder for `WWW-Authenticate` values on 401 responses (RFC 9728 §5.1).
#[derive(Debug, Clone)]
pub struct WwwAuthenticateBuilder {
    metadata_uri: String,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl WwwAuthenticateBuilder {
    /// Create a builder pointing at a protected-resource metadata URL.
    pub fn new(metadata_uri: impl Into<String>) -> Self {
        Self {
            metadata_uri: metadata_uri.into(),
            scope: None,
            error: None,
            error_description: None,
        }
    }

    /// Declare the scope the resource requires.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Attach an error code and optional description.
    pub fn with_error(mut self, error: impl Into<String>, description: Option<String>) -> Self {
        self.error = Some(error.into());
        self.error_description = description;
        self
    }

    /// Render the header value.
    pub fn build(self) -> String {
        let mut parts = vec![format!("Bearer resource_metadata=\"{}\"", self.metadata_uri)];
        if let Some(scope) = self.scope {
            parts.push(format!("scope=\"{scope}\""));
        }
        if let Some(error) = self.error {
            parts.push(format!("error=\"{error}\""));
        }
        if let Some(description) = self.error_description {
            parts.push(format!("error_description=\"{description}\""));
        }
        parts.join(", ")
    }
}
