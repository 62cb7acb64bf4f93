//! Authorization endpoint (RFC 6749 §3.1).
//!
//! Validation is two-phase. Before the client and redirect URI are proven,
//! failures answer directly with JSON, never a redirect an attacker could
//! choose. Afterwards, failures 302 back to the redirect URI with `error`,
//! `error_description`, and the caller's `state`.

use std::collections::HashMap;

use axum::extract::{Query, RawForm, State};
use axum::http::HeaderMap;
use axum::response::Response;
use tracing::debug;
use url::Url;

use crate::error::{OAuthError, OAuthResult};
use crate::resource::{parse_resource_parameter, resource_matches_server};
use crate::types::OAuthClientInformationFull;

use super::provider::AuthorizationParams;
use super::{AuthServerState, client_key, direct_error, rate_limited, redirect_with};

/// GET form of the authorization endpoint.
pub async fn authorize_get(
    State(state): State<AuthServerState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    handle_authorize(state, headers, params).await
}

/// POST form of the authorization endpoint.
pub async fn authorize_post(
    State(state): State<AuthServerState>,
    headers: HeaderMap,
    RawForm(body): RawForm,
) -> Response {
    let params: HashMap<String, String> = url::form_urlencoded::parse(&body)
        .into_owned()
        .collect();
    handle_authorize(state, headers, params).await
}

async fn handle_authorize(
    state: AuthServerState,
    headers: HeaderMap,
    params: HashMap<String, String>,
) -> Response {
    if let Err(exceeded) = state.authorize_limiter.check(&client_key(&headers)).await {
        return rate_limited(&exceeded);
    }

    // Phase 1: nothing may redirect until the client and redirect URI are
    // known good.
    let Some(client_id) = params.get("client_id") else {
        return direct_error(&OAuthError::InvalidRequest(
            "client_id is required".to_string(),
        ));
    };
    let client = match state.provider.clients_store().get_client(client_id).await {
        Ok(Some(client)) => client,
        Ok(None) => {
            return direct_error(&OAuthError::InvalidClient(format!(
                "unknown client {client_id}"
            )));
        }
        Err(e) => return direct_error(&e),
    };
    let redirect_uri = match resolve_redirect_uri(&client, params.get("redirect_uri")) {
        Ok(uri) => uri,
        Err(e) => return direct_error(&e),
    };

    // Phase 2: errors travel back on the redirect.
    let state_param = params.get("state").cloned();
    let validated = match validate_request(&state, &client, &params) {
        Ok(validated) => validated,
        Err(e) => return error_redirect(&redirect_uri, &e, state_param.as_deref()),
    };

    let authorization = AuthorizationParams {
        state: state_param.clone(),
        scopes: validated.scopes,
        code_challenge: validated.code_challenge,
        redirect_uri: redirect_uri.clone(),
        resource: validated.resource,
    };
    match state.provider.authorize(&client, &authorization).await {
        Ok(code) => {
            debug!("issued authorization code for client {client_id}");
            let mut pairs = vec![("code", code)];
            if let Some(state_value) = state_param {
                pairs.push(("state", state_value));
            }
            redirect_with(&redirect_uri, &pairs)
        }
        Err(e) => error_redirect(&redirect_uri, &e, state_param.as_deref()),
    }
}

fn resolve_redirect_uri(
    client: &OAuthClientInformationFull,
    requested: Option<&String>,
) -> OAuthResult<String> {
    match requested {
        Some(uri) => {
            if client.metadata.redirect_uris.iter().any(|r| r == uri) {
                Ok(uri.clone())
            } else {
                Err(OAuthError::InvalidRequest(
                    "redirect_uri is not registered for this client".to_string(),
                ))
            }
        }
        None => {
            if client.metadata.redirect_uris.len() == 1 {
                Ok(client.metadata.redirect_uris[0].clone())
            } else {
                Err(OAuthError::InvalidRequest(
                    "redirect_uri is required when multiple URIs are registered".to_string(),
                ))
            }
        }
    }
}

struct ValidatedAuthorization {
    scopes: Vec<String>,
    code_challenge: String,
    resource: Option<Url>,
}

fn validate_request(
    state: &AuthServerState,
    client: &OAuthClientInformationFull,
    params: &HashMap<String, String>,
) -> OAuthResult<ValidatedAuthorization> {
    match params.get("response_type").map(String::as_str) {
        Some("code") => {}
        Some(other) => {
            return Err(OAuthError::UnsupportedResponseType(format!(
                "response_type {other} is not supported"
            )));
        }
        None => {
            return Err(OAuthError::InvalidRequest(
                "response_type is required".to_string(),
            ));
        }
    }

    let code_challenge = params
        .get("code_challenge")
        .cloned()
        .ok_or_else(|| OAuthError::InvalidRequest("code_challenge is required".to_string()))?;
    match params.get("code_challenge_method").map(String::as_str) {
        Some("S256") => {}
        _ => {
            return Err(OAuthError::InvalidRequest(
                "code_challenge_method must be S256".to_string(),
            ));
        }
    }

    let scopes = validate_scopes(client, params.get("scope").map(String::as_str))?;
    let resource = validate_resource(state, params.get("resource").map(String::as_str))?;

    Ok(ValidatedAuthorization {
        scopes,
        code_challenge,
        resource,
    })
}

fn validate_scopes(
    client: &OAuthClientInformationFull,
    requested: Option<&str>,
) -> OAuthResult<Vec<String>> {
    let Some(requested) = requested else {
        return Ok(Vec::new());
    };
    let allowed: Vec<&str> = client
        .metadata
        .scope
        .as_deref()
        .map(|s| s.split_whitespace().collect())
        .unwrap_or_default();
    let scopes: Vec<String> = requested.split_whitespace().map(str::to_string).collect();
    for scope in &scopes {
        if !allowed.contains(&scope.as_str()) {
            return Err(OAuthError::InvalidScope(format!(
                "scope {scope} was not registered by this client"
            )));
        }
    }
    Ok(scopes)
}

fn validate_resource(
    state: &AuthServerState,
    requested: Option<&str>,
) -> OAuthResult<Option<Url>> {
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

fn error_redirect(redirect_uri: &str, error: &OAuthError, state: Option<&str>) -> Response {
    let code = error.error_code().unwrap_or("server_error").to_string();
    let description = error.description();
    let mut pairs = vec![("error", code), ("error_description", description)];
    if let Some(state) = state {
        pairs.push(("state", state.to_string()));
    }
    redirect_with(redirect_uri, &pairs)
}
