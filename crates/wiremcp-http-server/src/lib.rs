//! # wiremcp Streamable HTTP Server Transport
//!
//! Server side of the Streamable HTTP transport: a single axum handler
//! serving POST (client→server messages), GET (the standalone SSE channel,
//! with `Last-Event-ID` replay), and DELETE (session termination).
//!
//! - Stateful or stateless: supply a
//!   [`SessionIdGenerator`](session::SessionIdGenerator) to mint session
//!   ids at initialize, or omit it and let any node serve any request.
//! - Resumable: plug an [`EventStore`](event_store::EventStore) and every
//!   streamed message gets an event id a reconnecting client can resume
//!   from.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wiremcp_http_server::{
//!     StreamableHttpServerOptions, StreamableHttpServerTransport,
//!     session::default_session_id_generator,
//! };
//!
//! let transport = StreamableHttpServerTransport::new(StreamableHttpServerOptions {
//!     session_id_generator: Some(default_session_id_generator()),
//!     ..Default::default()
//! });
//! let app = transport.router();
//! protocol.connect(Arc::new(transport)).await?;
//! axum::serve(listener, app).await?;
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod event_store;
pub mod session;
pub mod transport;

pub use event_store::{EventStore, InMemoryEventStore, StoredEventNotice};
pub use session::{MAX_SESSION_ID_LEN, SessionId, SessionIdGenerator, default_session_id_generator};
pub use transport::{StreamableHttpServerOptions, StreamableHttpServerTransport};
