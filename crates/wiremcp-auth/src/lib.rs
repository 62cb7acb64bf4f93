//! # wiremcp OAuth 2.1 Layer
//!
//! Both halves of the authorization story for the Streamable HTTP
//! transport:
//!
//! - **Client** ([`OAuthClient`]): discovery (RFC 8414/9728), dynamic
//!   registration (RFC 7591), PKCE authorization code flow (RFC 7636,
//!   S256 only), refresh with error-driven credential invalidation, and
//!   RFC 8707 resource indicators on every token-bearing request.
//! - **Server** ([`server`]): authorization + token endpoint handlers with
//!   two-phase validation, single-use codes, refresh rotation, per-IP rate
//!   limiting, and the `.well-known` discovery documents.
//!
//! Storage is pluggable on both sides: the client persists through an
//! [`OAuthClientProvider`], the server through an
//! [`OAuthServerProvider`](server::OAuthServerProvider).

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod client;
pub mod discovery;
pub mod error;
pub mod pkce;
pub mod resource;
pub mod server;
pub mod types;

pub use client::{
    AuthResult, AuthenticateOptions, OAuthClient, extract_resource_metadata_url,
};
pub use discovery::{
    AuthorizationServerMetadata, ProtectedResourceMetadata, discover_authorization_server,
    discover_protected_resource, protected_resource_metadata_url,
};
pub use error::{OAuthError, OAuthResult};
pub use pkce::{PkceChallenge, challenge_s256, generate_pkce, verify_challenge_s256};
pub use resource::{
    parse_resource_parameter, resource_matches_server, resource_url_from_server_url,
};
pub use types::{
    InvalidationScope, OAuthClientInformation, OAuthClientInformationFull, OAuthClientMetadata,
    OAuthClientProvider, OAuthErrorBody, OAuthTokens,
};
