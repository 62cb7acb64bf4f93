//! Client-side flow tests against a mocked authorization server.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wiremcp_auth::{
    AuthResult, AuthenticateOptions, InvalidationScope, OAuthClient, OAuthClientInformation,
    OAuthClientInformationFull, OAuthClientMetadata, OAuthClientProvider, OAuthResult, OAuthTokens,
};

#[derive(Default)]
struct MemoryProvider {
    client_info: StdMutex<Option<OAuthClientInformationFull>>,
    tokens: StdMutex<Option<OAuthTokens>>,
    verifier: StdMutex<Option<String>>,
    redirects: StdMutex<Vec<Url>>,
}

impl MemoryProvider {
    fn with_client(self, client_id: &str) -> Self {
        let full: OAuthClientInformationFull = serde_json::from_value(json!({
            "client_id": client_id,
            "redirect_uris": ["http://localhost:3000/callback"],
        }))
        .unwrap();
        *self.client_info.lock().unwrap() = Some(full);
        self
    }

    fn with_tokens(self, tokens: OAuthTokens) -> Self {
        *self.tokens.lock().unwrap() = Some(tokens);
        self
    }

    fn last_redirect(&self) -> Option<Url> {
        self.redirects.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl OAuthClientProvider for MemoryProvider {
    fn redirect_url(&self) -> String {
        "http://localhost:3000/callback".to_string()
    }

    fn client_metadata(&self) -> OAuthClientMetadata {
        OAuthClientMetadata {
            redirect_uris: vec!["http://localhost:3000/callback".to_string()],
            client_name: Some("wiremcp test client".to_string()),
            ..Default::default()
        }
    }

    async fn client_information(&self) -> OAuthResult<Option<OAuthClientInformation>> {
        Ok(self
            .client_info
            .lock()
            .unwrap()
            .as_ref()
            .map(|full| full.client.clone()))
    }

    async fn save_client_information(&self, info: OAuthClientInformationFull) -> OAuthResult<()> {
        *self.client_info.lock().unwrap() = Some(info);
        Ok(())
    }

    async fn tokens(&self) -> OAuthResult<Option<OAuthTokens>> {
        Ok(self.tokens.lock().unwrap().clone())
    }

    async fn save_tokens(&self, tokens: OAuthTokens) -> OAuthResult<()> {
        *self.tokens.lock().unwrap() = Some(tokens);
        Ok(())
    }

    async fn redirect_to_authorization(&self, url: Url) -> OAuthResult<()> {
        self.redirects.lock().unwrap().push(url);
        Ok(())
    }

    async fn save_code_verifier(&self, verifier: String) -> OAuthResult<()> {
        *self.verifier.lock().unwrap() = Some(verifier);
        Ok(())
    }

    async fn code_verifier(&self) -> OAuthResult<String> {
        Ok(self
            .verifier
            .lock()
            .unwrap()
            .clone()
            .expect("verifier not saved"))
    }

    async fn invalidate_credentials(&self, scope: InvalidationScope) -> OAuthResult<()> {
        match scope {
            InvalidationScope::All => {
                *self.client_info.lock().unwrap() = None;
                *self.tokens.lock().unwrap() = None;
                *self.verifier.lock().unwrap() = None;
            }
            InvalidationScope::Client => *self.client_info.lock().unwrap() = None,
            InvalidationScope::Tokens => *self.tokens.lock().unwrap() = None,
            InvalidationScope::Verifier => *self.verifier.lock().unwrap() = None,
        }
        Ok(())
    }
}

async fn mount_metadata(server: &MockServer, with_registration: bool) {
    let mut body = json!({
        "issuer": server.uri(),
        "authorization_endpoint": format!("{}/authorize", server.uri()),
        "token_endpoint": format!("{}/token", server.uri()),
        "response_types_supported": ["code"],
        "code_challenge_methods_supported": ["S256"]
    });
    if with_registration {
        body["registration_endpoint"] = json!(format!("{}/register", server.uri()));
    }
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn discovery_registration_and_redirect() {
    let server = MockServer::start().await;
    mount_metadata(&server, true).await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "client_id": "client-123",
            "redirect_uris": ["http://localhost:3000/callback"]
        })))
        .mount(&server)
        .await;

    let provider = Arc::new(MemoryProvider::default());
    let flow = OAuthClient::new(provider.clone(), reqwest::Client::new());
    let server_url = Url::parse(&format!("{}/mcp", server.uri())).unwrap();

    let result = flow
        .authenticate(&server_url, AuthenticateOptions::default())
        .await
        .unwrap();
    assert_eq!(result, AuthResult::Redirect);

    let redirect = provider.last_redirect().expect("no redirect captured");
    let query: std::collections::HashMap<_, _> = redirect.query_pairs().into_owned().collect();
    assert_eq!(query["response_type"], "code");
    assert_eq!(query["client_id"], "client-123");
    assert_eq!(query["code_challenge_method"], "S256");
    assert_eq!(query["resource"], server_url.as_str());
    assert!(query.contains_key("code_challenge"));
    assert!(query.contains_key("state"));

    // The verifier that backs the challenge is persisted for finish_auth.
    let verifier = provider.verifier.lock().unwrap().clone().unwrap();
    assert_eq!(
        wiremcp_auth::challenge_s256(&verifier),
        query["code_challenge"]
    );
}

#[tokio::test]
async fn finish_authorization_exchanges_the_code() {
    let server = MockServer::start().await;
    mount_metadata(&server, false).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=code123"))
        .and(body_string_contains("resource="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "R"
        })))
        .mount(&server)
        .await;

    let provider = Arc::new(MemoryProvider::default().with_client("client-123"));
    *provider.verifier.lock().unwrap() = Some("the-verifier-the-flow-saved-previously-ok".into());
    let flow = OAuthClient::new(provider.clone(), reqwest::Client::new());
    let server_url = Url::parse(&format!("{}/mcp", server.uri())).unwrap();

    let tokens = flow
        .finish_authorization(&server_url, "code123")
        .await
        .unwrap();
    assert_eq!(tokens.access_token, "A");

    let stored = provider.tokens.lock().unwrap().clone().unwrap();
    assert_eq!(stored.access_token, "A");
    // The verifier is single-use; it must be gone after the exchange.
    assert!(provider.verifier.lock().unwrap().is_none());
}

#[tokio::test]
async fn refresh_success_short_circuits_to_authorized() {
    let server = MockServer::start().await;
    mount_metadata(&server, false).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=R0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "R1"
        })))
        .mount(&server)
        .await;

    let provider = Arc::new(
        MemoryProvider::default()
            .with_client("client-123")
            .with_tokens(OAuthTokens {
                access_token: "A0".into(),
                token_type: "bearer".into(),
                expires_in: Some(0),
                scope: None,
                refresh_token: Some("R0".into()),
            }),
    );
    let flow = OAuthClient::new(provider.clone(), reqwest::Client::new());
    let server_url = Url::parse(&format!("{}/mcp", server.uri())).unwrap();

    let result = flow
        .authenticate(&server_url, AuthenticateOptions::default())
        .await
        .unwrap();
    assert_eq!(result, AuthResult::Authorized);

    let stored = provider.tokens.lock().unwrap().clone().unwrap();
    assert_eq!(stored.access_token, "A1");
    assert_eq!(stored.refresh_token.as_deref(), Some("R1"));
}

#[tokio::test]
async fn invalid_grant_on_refresh_drops_tokens_and_redirects() {
    let server = MockServer::start().await;
    mount_metadata(&server, false).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .mount(&server)
        .await;

    let provider = Arc::new(
        MemoryProvider::default()
            .with_client("client-123")
            .with_tokens(OAuthTokens {
                access_token: "A0".into(),
                token_type: "bearer".into(),
                expires_in: Some(0),
                scope: None,
                refresh_token: Some("R0".into()),
            }),
    );
    let flow = OAuthClient::new(provider.clone(), reqwest::Client::new());
    let server_url = Url::parse(&format!("{}/mcp", server.uri())).unwrap();

    let result = flow
        .authenticate(&server_url, AuthenticateOptions::default())
        .await
        .unwrap();
    assert_eq!(result, AuthResult::Redirect);

    // Tokens invalidated, registration kept.
    assert!(provider.tokens.lock().unwrap().is_none());
    assert!(provider.client_info.lock().unwrap().is_some());
}

#[tokio::test]
async fn invalid_client_on_refresh_drops_everything_and_reregisters() {
    let server = MockServer::start().await;
    mount_metadata(&server, true).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "registration expired"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "client_id": "client-456",
            "redirect_uris": ["http://localhost:3000/callback"]
        })))
        .mount(&server)
        .await;

    let provider = Arc::new(
        MemoryProvider::default()
            .with_client("client-123")
            .with_tokens(OAuthTokens {
                access_token: "A0".into(),
                token_type: "bearer".into(),
                expires_in: Some(0),
                scope: None,
                refresh_token: Some("R0".into()),
            }),
    );
    let flow = OAuthClient::new(provider.clone(), reqwest::Client::new());
    let server_url = Url::parse(&format!("{}/mcp", server.uri())).unwrap();

    let result = flow
        .authenticate(&server_url, AuthenticateOptions::default())
        .await
        .unwrap();
    assert_eq!(result, AuthResult::Redirect);

    let info = provider.client_info.lock().unwrap().clone().unwrap();
    assert_eq!(info.client.client_id, "client-456");
    assert!(provider.tokens.lock().unwrap().is_none());
}

#[tokio::test]
async fn protected_resource_metadata_steers_discovery() {
    let resource_server = MockServer::start().await;
    let auth_server = MockServer::start().await;
    mount_metadata(&auth_server, true).await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resource": format!("{}/mcp", resource_server.uri()),
            "authorization_servers": [auth_server.uri()]
        })))
        .mount(&resource_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "client_id": "client-789",
            "redirect_uris": ["http://localhost:3000/callback"]
        })))
        .mount(&auth_server)
        .await;

    let provider = Arc::new(MemoryProvider::default());
    let flow = OAuthClient::new(provider.clone(), reqwest::Client::new());
    let server_url = Url::parse(&format!("{}/mcp", resource_server.uri())).unwrap();

    let result = flow
        .authenticate(&server_url, AuthenticateOptions::default())
        .await
        .unwrap();
    assert_eq!(result, AuthResult::Redirect);

    // The authorize URL points at the authorization server the resource
    // named, not at the resource server itself.
    let redirect = provider.last_redirect().unwrap();
    assert!(redirect.as_str().starts_with(&auth_server.uri()));
}
