//! OAuth error taxonomy.
//!
//! Variants mirror RFC 6749 error codes where one exists; the mapping in
//! both directions (wire body ⇄ variant) lives here so the client flow and
//! the server handlers agree on it.

use thiserror::Error;

use crate::types::OAuthErrorBody;

/// A specialized `Result` type for OAuth operations.
pub type OAuthResult<T> = std::result::Result<T, OAuthError>;

/// Errors produced by the OAuth layer.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum OAuthError {
    /// Authorization failed after exhausting every recovery path.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// RFC 6749 `invalid_request`.
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    /// RFC 6749 `invalid_client`. Invalidates all stored credentials.
    #[error("invalid_client: {0}")]
    InvalidClient(String),

    /// RFC 6749 `invalid_grant`. Invalidates stored tokens.
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    /// RFC 6749 `unauthorized_client`. Invalidates all stored credentials.
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    /// RFC 6749 `access_denied`.
    #[error("access_denied: {0}")]
    AccessDenied(String),

    /// RFC 6749 `unsupported_response_type`.
    #[error("unsupported_response_type: {0}")]
    UnsupportedResponseType(String),

    /// RFC 6749 `unsupported_grant_type`.
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),

    /// RFC 6749 `invalid_scope`.
    #[error("invalid_scope: {0}")]
    InvalidScope(String),

    /// RFC 8707 `invalid_target`: the resource indicator names a resource
    /// this server will not issue tokens for.
    #[error("invalid_target: {0}")]
    InvalidTarget(String),

    /// RFC 6749 `server_error`.
    #[error("server_error: {0}")]
    ServerError(String),

    /// RFC 6749 `temporarily_unavailable`; also used for rate limiting.
    #[error("temporarily_unavailable: {0}")]
    TemporarilyUnavailable(String),

    /// Metadata discovery failed.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Dynamic client registration failed.
    #[error("Registration failed: {0}")]
    Registration(String),

    /// Non-protocol HTTP failure.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response detail, when available
        message: String,
    },

    /// The injected provider failed to load or persist state.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Malformed JSON where a protocol document was expected.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl OAuthError {
    /// The RFC 6749 error code for this variant, when one exists.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::InvalidRequest(_) => Some("invalid_request"),
            Self::InvalidClient(_) => Some("invalid_client"),
            Self::InvalidGrant(_) => Some("invalid_grant"),
            Self::UnauthorizedClient(_) => Some("unauthorized_client"),
            Self::AccessDenied(_) => Some("access_denied"),
            Self::UnsupportedResponseType(_) => Some("unsupported_response_type"),
            Self::UnsupportedGrantType(_) => Some("unsupported_grant_type"),
            Self::InvalidScope(_) => Some("invalid_scope"),
            Self::InvalidTarget(_) => Some("invalid_target"),
            Self::ServerError(_) => Some("server_error"),
            Self::TemporarilyUnavailable(_) => Some("temporarily_unavailable"),
            _ => None,
        }
    }

    /// Description suitable for an `error_description` field.
    pub fn description(&self) -> String {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidGrant(d)
            | Self::UnauthorizedClient(d)
            | Self::AccessDenied(d)
            | Self::UnsupportedResponseType(d)
            | Self::UnsupportedGrantType(d)
            | Self::InvalidScope(d)
            | Self::InvalidTarget(d)
            | Self::ServerError(d)
            | Self::TemporarilyUnavailable(d) => d.clone(),
            other => other.to_string(),
        }
    }

    /// Map an RFC 6749 error body back to a variant.
    pub fn from_error_body(body: OAuthErrorBody) -> Self {
        let detail = body.error_description.unwrap_or_default();
        match body.error.as_str() {
            "invalid_request" => Self::InvalidRequest(detail),
            "invalid_client" => Self::InvalidClient(detail),
            "invalid_grant" => Self::InvalidGrant(detail),
            "unauthorized_client" => Self::UnauthorizedClient(detail),
            "access_denied" => Self::AccessDenied(detail),
            "unsupported_response_type" => Self::UnsupportedResponseType(detail),
            "unsupported_grant_type" => Self::UnsupportedGrantType(detail),
            "invalid_scope" => Self::InvalidScope(detail),
            "invalid_target" => Self::InvalidTarget(detail),
            "temporarily_unavailable" => Self::TemporarilyUnavailable(detail),
            other => Self::ServerError(format!("{other}: {detail}")),
        }
    }

    /// The wire body for an error response from our own endpoints.
    pub fn to_error_body(&self) -> OAuthErrorBody {
        OAuthErrorBody {
            error: self.error_code().unwrap_or("server_error").to_string(),
            error_description: Some(self.description()),
            error_uri: None,
        }
    }

    /// HTTP status an endpoint should answer with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidClient(_) | Self::UnauthorizedClient(_) => 401,
            Self::TemporarilyUnavailable(_) => 429,
            Self::ServerError(_) => 500,
            _ => 400,
        }
    }
}

impl From<reqwest::Error> for OAuthError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http {
            status: error.status().map_or(0, |s| s.as_u16()),
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for OAuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_round_trip() {
        let body = OAuthErrorBody {
            error: "invalid_grant".into(),
            error_description: Some("code already used".into()),
            error_uri: None,
        };
        let err = OAuthError::from_error_body(body);
        assert!(matches!(err, OAuthError::InvalidGrant(_)));
        assert_eq!(err.to_error_body().error, "invalid_grant");
    }

    #[test]
    fn test_invalid_client_is_unauthorized_status() {
        assert_eq!(OAuthError::InvalidClient("bad".into()).http_status(), 401);
        assert_eq!(OAuthError::InvalidRequest("bad".into()).http_status(), 400);
    }
}
