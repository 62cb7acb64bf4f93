//! Token endpoint (RFC 6749 §3.2).

use std::collections::HashMap;

use axum::extract::{RawForm, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;
use url::Url;

use crate::error::{OAuthError, OAuthResult};
use crate::pkce::verify_challenge_s256;
use crate::resource::{parse_resource_parameter, resource_matches_server};
use crate::types::{OAuthClientInformationFull, OAuthTokens};

use super::memory::now_epoch_seconds;
use super::{AuthServerState, client_key, direct_error, rate_limited};

/// POST handler for the token endpoint.
pub async fn token_handler(
    State(state): State<AuthServerState>,
    headers: HeaderMap,
    RawForm(body): RawForm,
) -> Response {
    if let Err(exceeded) = state.token_limiter.check(&client_key(&headers)).await {
        return rate_limited(&exceeded);
    }
    let params: HashMap<String, String> = url::form_urlencoded::parse(&body)
        .into_owned()
        .collect();
    match handle_token(&state, &headers, &params).await {
        Ok(tokens) => (
            StatusCode::OK,
            [(header::CACHE_CONTROL, "no-store")],
            Json(tokens),
        )
            .into_response(),
        Err(e) => direct_error(&e),
    }
}

async fn handle_token(
    state: &AuthServerState,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> OAuthResult<OAuthTokens> {
    let grant_type = params
        .get("grant_type")
        .ok_or_else(|| OAuthError::InvalidRequest("grant_type is required".to_string()))?;

    let client = authenticate_client(state, headers, params).await?;
    let resource = validate_resource(state, params.get("resource").map(String::as_str))?;

    match grant_type.as_str() {
        "authorization_code" => {
            exchange_authorization_code(state, &client, params, resource.as_ref()).await
        }
        "refresh_token" => exchange_refresh_token(state, &client, params, resource.as_ref()).await,
        other => Err(OAuthError::UnsupportedGrantType(format!(
            "grant_type {other} is not supported"
        ))),
    }
}

async fn authenticate_client(
    state: &AuthServerState,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> OAuthResult<OAuthClientInformationFull> {
    let (client_id, client_secret) = extract_credentials(headers, params)?;
    let client = state
        .provider
        .clients_store()
        .get_client(&client_id)
        .await?
        .ok_or_else(|| OAuthError::InvalidClient(format!("unknown client {client_id}")))?;

    match (&client.client.client_secret, client_secret) {
        (Some(registered), Some(provided)) => {
            if registered != &provided {
                return Err(OAuthError::InvalidClient(
                    "client secret does not match".to_string(),
                ));
            }
            if client.secret_expired_at(now_epoch_seconds()) {
                return Err(OAuthError::InvalidClient(
                    "client secret has expired".to_string(),
                ));
            }
        }
        (Some(_), None) => {
            return Err(OAuthError::InvalidClient(
                "client authentication required".to_string(),
            ));
        }
        // Public client; possession of the PKCE verifier is the proof.
        (None, _) => {}
    }
    Ok(client)
}

fn extract_credentials(
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> OAuthResult<(String, Option<String>)> {
    if let Some(authorization) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        && let Some(encoded) = authorization.strip_prefix("Basic ")
    {
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| OAuthError::InvalidRequest("malformed Basic credentials".to_string()))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| OAuthError::InvalidRequest("malformed Basic credentials".to_string()))?;
        let (id, secret) = decoded.split_once(':').ok_or_else(|| {
            OAuthError::InvalidRequest("malformed Basic credentials".to_string())
        })?;
        return Ok((id.to_string(), Some(secret.to_string())));
    }
    let client_id = params
        .get("client_id")
        .cloned()
        .ok_or_else(|| OAuthError::InvalidClient("client authentication required".to_string()))?;
    Ok((client_id, params.get("client_secret").cloned()))
}

fn validate_resource(state: &AuthServerState, requested: Option<&str>) -> OAuthResult<Option<Url>> {
    let Some(requested) = requested else {
        if state.config.validate_resource_matches_server {
            return Err(OAuthError::InvalidRequest(
                "resource is required".to_string(),
            ));
        }
        return Ok(None);
    };
    let resource = parse_resource_parameter(requested)?;
    if state.config.validate_resource_matches_server
        && !resource_matches_server(&resource, &state.config.server_url)
    {
        return Err(OAuthError::InvalidTarget(format!(
            "this server does not serve resource {resource}"
        )));
    }
    Ok(Some(resource))
}

async fn exchange_authorization_code(
    state: &AuthServerState,
    client: &OAuthClientInformationFull,
    params: &HashMap<String, String>,
    resource: Option<&Url>,
) -> OAuthResult<OAuthTokens> {
    let code = params
        .get("code")
        .ok_or_else(|| OAuthError::InvalidRequest("code is required".to_string()))?;
    let verifier = params
        .get("code_verifier")
        .ok_or_else(|| OAuthError::InvalidRequest("code_verifier is required".to_string()))?;

    let challenge = state
        .provider
        .challenge_for_authorization_code(client, code)
        .await?;
    if !verify_challenge_s256(verifier, &challenge) {
        return Err(OAuthError::InvalidGrant(
            "code_verifier does not match the challenge".to_string(),
        ));
    }

    debug!("exchanging authorization code for client {}", client.client.client_id);
    state
        .provider
        .exchange_authorization_code(
            client,
            code,
            params.get("redirect_uri").map(String::as_str),
            resource,
        )
        .await
}

async fn exchange_refresh_token(
    state: &AuthServerState,
    client: &OAuthClientInformationFull,
    params: &HashMap<String, String>,
    resource: Option<&Url>,
) -> OAuthResult<OAuthTokens> {
    let refresh_token = params
        .get("refresh_token")
        .ok_or_else(|| OAuthError::InvalidRequest("refresh_token is required".to_string()))?;
    let scopes: Vec<String> = params
        .get("scope")
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    state
        .provider
        .exchange_refresh_token(client, refresh_token, &scopes, resource)
        .await
}
