//! In-memory provider and clients store.
//!
//! Backs the endpoint handlers when no external store is wired in, and
//! carries the reference semantics for single-use codes, refresh rotation,
//! and resource binding.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use url::Url;
use uuid::Uuid;

use crate::error::{OAuthError, OAuthResult};
use crate::types::{OAuthClientInformationFull, OAuthTokens};

use super::provider::{AuthorizationParams, OAuthRegisteredClientsStore, OAuthServerProvider};

/// In-memory registered-clients store.
#[derive(Debug, Default)]
pub struct InMemoryClientsStore {
    clients: DashMap<String, OAuthClientInformationFull>,
}

impl InMemoryClientsStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a client, e.g. from static configuration.
    pub fn insert(&self, client: OAuthClientInformationFull) {
        self.clients.insert(client.client.client_id.clone(), client);
    }
}

#[async_trait]
impl OAuthRegisteredClientsStore for InMemoryClientsStore {
    async fn get_client(&self, client_id: &str) -> OAuthResult<Option<OAuthClientInformationFull>> {
        Ok(self.clients.get(client_id).map(|c| c.clone()))
    }

    async fn register_client(
        &self,
        client: OAuthClientInformationFull,
    ) -> OAuthResult<OAuthClientInformationFull> {
        self.insert(client.clone());
        Ok(client)
    }
}

#[derive(Debug, Clone)]
struct CodeRecord {
    client_id: String,
    code_challenge: String,
    scopes: Vec<String>,
    redirect_uri: String,
    resource: Option<Url>,
}

#[derive(Debug, Clone)]
struct RefreshRecord {
    client_id: String,
    scopes: Vec<String>,
    resource: Option<Url>,
}

/// In-memory [`OAuthServerProvider`].
#[derive(Debug)]
pub struct InMemoryOAuthProvider {
    clients: Arc<InMemoryClientsStore>,
    codes: DashMap<String, CodeRecord>,
    refresh_tokens: DashMap<String, RefreshRecord>,
    access_token_ttl: Duration,
}

impl InMemoryOAuthProvider {
    /// Create a provider around a clients store.
    pub fn new(clients: Arc<InMemoryClientsStore>) -> Self {
        Self {
            clients,
            codes: DashMap::new(),
            refresh_tokens: DashMap::new(),
            access_token_ttl: Duration::from_secs(3600),
        }
    }

    /// Override the access-token lifetime.
    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    fn issue_grant(&self, client_id: &str, scopes: &[String], resource: Option<&Url>) -> OAuthTokens {
        let refresh_token = format!("rt-{}", Uuid::new_v4().simple());
        self.refresh_tokens.insert(
            refresh_token.clone(),
            RefreshRecord {
                client_id: client_id.to_string(),
                scopes: scopes.to_vec(),
                resource: resource.cloned(),
            },
        );
        OAuthTokens {
            access_token: format!("at-{}", Uuid::new_v4().simple()),
            token_type: "bearer".to_string(),
            expires_in: Some(self.access_token_ttl.as_secs()),
            scope: if scopes.is_empty() {
                None
            } else {
                Some(scopes.join(" "))
            },
            refresh_token: Some(refresh_token),
        }
    }
}

#[async_trait]
impl OAuthServerProvider for InMemoryOAuthProvider {
    fn clients_store(&self) -> Arc<dyn OAuthRegisteredClientsStore> {
        Arc::clone(&self.clients) as Arc<dyn OAuthRegisteredClientsStore>
    }

    async fn authorize(
        &self,
        client: &OAuthClientInformationFull,
        params: &AuthorizationParams,
    ) -> OAuthResult<String> {
        let code = format!("ac-{}", Uuid::new_v4().simple());
        self.codes.insert(
            code.clone(),
            CodeRecord {
                client_id: client.client.client_id.clone(),
                code_challenge: params.code_challenge.clone(),
                scopes: params.scopes.clone(),
                redirect_uri: params.redirect_uri.clone(),
                resource: params.resource.clone(),
            },
        );
        Ok(code)
    }

    async fn challenge_for_authorization_code(
        &self,
        client: &OAuthClientInformationFull,
        code: &str,
    ) -> OAuthResult<String> {
        let record = self
            .codes
            .get(code)
            .ok_or_else(|| OAuthError::InvalidGrant("unknown authorization code".to_string()))?;
        if record.client_id != client.client.client_id {
            return Err(OAuthError::InvalidGrant(
                "authorization code was issued to a different client".to_string(),
            ));
        }
        Ok(record.code_challenge.clone())
    }

    async fn exchange_authorization_code(
        &self,
        client: &OAuthClientInformationFull,
        code: &str,
        redirect_uri: Option<&str>,
        resource: Option<&Url>,
    ) -> OAuthResult<OAuthTokens> {
        // Single use: the record is gone whether or not the rest passes.
        let (_, record) = self
            .codes
            .remove(code)
            .ok_or_else(|| OAuthError::InvalidGrant("unknown authorization code".to_string()))?;
        if record.client_id != client.client.client_id {
            return Err(OAuthError::InvalidGrant(
                "authorization code was issued to a different client".to_string(),
            ));
        }
        if let Some(redirect_uri) = redirect_uri
            && redirect_uri != record.redirect_uri
        {
            return Err(OAuthError::InvalidGrant(
                "redirect_uri does not match the authorization request".to_string(),
            ));
        }
        if resource.map(Url::as_str) != record.resource.as_ref().map(Url::as_str) {
            return Err(OAuthError::InvalidTarget(
                "resource does not match the authorization request".to_string(),
            ));
        }
        Ok(self.issue_grant(&record.client_id, &record.scopes, record.resource.as_ref()))
    }

    async fn exchange_refresh_token(
        &self,
        client: &OAuthClientInformationFull,
        refresh_token: &str,
        scopes: &[String],
        resource: Option<&Url>,
    ) -> OAuthResult<OAuthTokens> {
        let (_, record) = self
            .refresh_tokens
            .remove(refresh_token)
            .ok_or_else(|| OAuthError::InvalidGrant("unknown refresh token".to_string()))?;
        if record.client_id != client.client.client_id {
            return Err(OAuthError::InvalidGrant(
                "refresh token was issued to a different client".to_string(),
            ));
        }
        if resource.map(Url::as_str) != record.resource.as_ref().map(Url::as_str) {
            return Err(OAuthError::InvalidTarget(
                "resource does not match the original grant".to_string(),
            ));
        }
        let scopes = if scopes.is_empty() {
            record.scopes.clone()
        } else {
            // Narrowing only: a refresh may not widen the grant.
            if scopes.iter().any(|s| !record.scopes.contains(s)) {
                return Err(OAuthError::InvalidScope(
                    "requested scope exceeds the original grant".to_string(),
                ));
            }
            scopes.to_vec()
        };
        Ok(self.issue_grant(&record.client_id, &scopes, record.resource.as_ref()))
    }
}

/// Current time as epoch seconds; used for secret-expiry checks.
pub(crate) fn now_epoch_seconds() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn demo_client() -> OAuthClientInformationFull {
        serde_json::from_value(json!({
            "client_id": "client-1",
            "redirect_uris": ["http://localhost:3000/callback"],
            "scope": "mcp:tools mcp:resources"
        }))
        .unwrap()
    }

    fn demo_params(resource: Option<Url>) -> AuthorizationParams {
        AuthorizationParams {
            state: None,
            scopes: vec!["mcp:tools".to_string()],
            code_challenge: "challenge".to_string(),
            redirect_uri: "http://localhost:3000/callback".to_string(),
            resource,
        }
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let provider = InMemoryOAuthProvider::new(Arc::new(InMemoryClientsStore::new()));
        let client = demo_client();
        let code = provider.authorize(&client, &demo_params(None)).await.unwrap();

        let first = provider
            .exchange_authorization_code(&client, &code, None, None)
            .await;
        assert!(first.is_ok());

        let second = provider
            .exchange_authorization_code(&client, &code, None, None)
            .await;
        assert!(matches!(second, Err(OAuthError::InvalidGrant(_))));
    }

    #[tokio::test]
    async fn test_resource_must_match_the_code() {
        let provider = InMemoryOAuthProvider::new(Arc::new(InMemoryClientsStore::new()));
        let client = demo_client();
        let bound = Url::parse("https://api.example.com/mcp").unwrap();
        let code = provider
            .authorize(&client, &demo_params(Some(bound)))
            .await
            .unwrap();

        let other = Url::parse("https://evil.example.com/mcp").unwrap();
        let result = provider
            .exchange_authorization_code(&client, &code, None, Some(&other))
            .await;
        assert!(matches!(result, Err(OAuthError::InvalidTarget(_))));
    }

    #[tokio::test]
    async fn test_refresh_rotation_invalidates_old_token() {
        let provider = InMemoryOAuthProvider::new(Arc::new(InMemoryClientsStore::new()));
        let client = demo_client();
        let code = provider.authorize(&client, &demo_params(None)).await.unwrap();
        let grant = provider
            .exchange_authorization_code(&client, &code, None, None)
            .await
            .unwrap();
        let old_refresh = grant.refresh_token.unwrap();

        let rotated = provider
            .exchange_refresh_token(&client, &old_refresh, &[], None)
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token.as_deref(), Some(old_refresh.as_str()));

        let replay = provider
            .exchange_refresh_token(&client, &old_refresh, &[], None)
            .await;
        assert!(matches!(replay, Err(OAuthError::InvalidGrant(_))));
    }

    #[tokio::test]
    async fn test_refresh_cannot_widen_scope() {
        let provider = InMemoryOAuthProvider::new(Arc::new(InMemoryClientsStore::new()));
        let client = demo_client();
        let code = provider.authorize(&client, &demo_params(None)).await.unwrap();
        let grant = provider
            .exchange_authorization_code(&client, &code, None, None)
            .await
            .unwrap();

        let result = provider
            .exchange_refresh_token(
                &client,
                grant.refresh_token.as_deref().unwrap(),
                &["mcp:admin".to_string()],
                None,
            )
            .await;
        assert!(matches!(result, Err(OAuthError::InvalidScope(_))));
    }
}
