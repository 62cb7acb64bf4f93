//! # wiremcp Streamable HTTP Client Transport
//!
//! Client side of the Streamable HTTP transport:
//!
//! - POST for client→server messages, with JSON, SSE, or `202` responses
//! - A long-lived GET/SSE channel for unsolicited server→client messages,
//!   reconnected with exponential backoff and `Last-Event-ID` replay
//! - DELETE for explicit session termination
//! - Session-id capture and invalidation per the `mcp-session-id` header
//! - OAuth 2.1 integration: a 401 runs the auth flow from `wiremcp-auth`
//!   and the failed request is replayed once
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wiremcp_http::{StreamableHttpOptions, StreamableHttpTransport};
//!
//! let transport = StreamableHttpTransport::new(
//!     "https://api.example.com/mcp".parse()?,
//!     StreamableHttpOptions::default(),
//! );
//! protocol.connect(Arc::new(transport)).await?;
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod config;
pub mod sse;
pub mod transport;

pub use config::{
    PROTOCOL_VERSION, ReconnectionOptions, StreamableHttpConfig, StreamableHttpOptions,
};
pub use sse::{SseEvent, SseParser};
pub use transport::StreamableHttpTransport;
