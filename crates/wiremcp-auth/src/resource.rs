//! RFC 8707 resource indicators.
//!
//! The resource parameter names the protected resource a token is intended
//! for. Per RFC 8707 resource URIs MUST NOT contain a fragment; beyond
//! stripping the fragment the URL is left byte-identical, so what the
//! client sends is exactly what the server configured, trailing slash and
//! all.

use url::Url;

use crate::error::{OAuthError, OAuthResult};

/// Derive the `resource` value from a server URL: the same URL with any
/// fragment removed.
pub fn resource_url_from_server_url(server_url: &Url) -> Url {
    let mut resource = server_url.clone();
    resource.set_fragment(None);
    resource
}

/// Parse and validate a `resource` parameter received by a server
/// endpoint: absolute http(s) URL, fragment-free.
pub fn parse_resource_parameter(raw: &str) -> OAuthResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| OAuthError::InvalidRequest(format!("invalid resource URI: {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(OAuthError::InvalidRequest(format!(
                "resource URI must use http or https, got {scheme}"
            )));
        }
    }
    if url.fragment().is_some() {
        return Err(OAuthError::InvalidRequest(
            "resource URI must not contain a fragment".to_string(),
        ));
    }
    Ok(url)
}

/// Check a requested resource against the server's canonical URL.
///
/// Exact match after fragment stripping on both sides; no scheme, case, or
/// path normalization beyond that.
pub fn resource_matches_server(requested: &Url, server_url: &Url) -> bool {
    resource_url_from_server_url(requested) == resource_url_from_server_url(server_url)
}
