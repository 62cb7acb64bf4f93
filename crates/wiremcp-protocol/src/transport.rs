//! The transport contract.
//!
//! A [`Transport`] is a bidirectional framed carrier of JSON-RPC messages.
//! Delivery to the owner is pull-based: the protocol engine drives a loop
//! over [`Transport::receive`], where `Ok(Some(_))` is one message,
//! `Err(_)` is a transient carrier error, and `Ok(None)` signals that the
//! transport has closed and will produce nothing further.
//!
//! Ordering guarantee: messages delivered by `receive()` reflect wire order
//! for a given stream; across distinct streams (e.g. concurrent SSE streams
//! over HTTP) no cross-stream ordering is guaranteed.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::jsonrpc::JsonRpcMessage;
use crate::types::RequestId;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Callback invoked when a transport observes a new resumption token for an
/// in-flight delivery.
pub type ResumptionTokenCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Represents errors that can occur during transport operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to send a message.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive or decode a message.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Failed to serialize or deserialize a message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// A non-success HTTP status with no more specific meaning.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response detail, when available
        message: String,
    },

    /// Authorization failed after exhausting the OAuth flow.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The server no longer recognizes the session this transport holds.
    #[error("Session closed by server")]
    SessionClosed,

    /// A 200 response carried a content type the transport cannot consume.
    #[error("Unexpected content type: {0}")]
    UnexpectedContentType(String),

    /// The transport has not been started.
    #[error("Transport not started")]
    NotStarted,

    /// The transport was already started.
    #[error("Transport already started")]
    AlreadyStarted,

    /// The transport is closed.
    #[error("Transport closed")]
    Closed,
}

/// Authentication context attached to a message after server-side token
/// validation.
#[derive(Debug, Clone, Default)]
pub struct AuthInfo {
    /// The bearer token the request carried
    pub token: Option<String>,
    /// Client the token was issued to
    pub client_id: Option<String>,
    /// Scopes granted to the token
    pub scopes: Vec<String>,
    /// Expiry as seconds since the epoch
    pub expires_at: Option<u64>,
}

/// HTTP-level request context attached to a message received over HTTP.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// Request headers, lowercased names
    pub headers: HashMap<String, String>,
}

/// Out-of-band context delivered alongside a received message.
#[derive(Debug, Clone, Default)]
pub struct MessageExtra {
    /// Post-auth identity, server side only
    pub auth_info: Option<AuthInfo>,
    /// HTTP request context, when the carrier is HTTP
    pub request_info: Option<RequestInfo>,
    /// Session the message belongs to
    pub session_id: Option<String>,
}

/// One received message plus its delivery context.
#[derive(Debug, Clone)]
pub struct Received {
    /// The decoded JSON-RPC message
    pub message: JsonRpcMessage,
    /// Delivery context
    pub extra: MessageExtra,
}

impl Received {
    /// Wrap a bare message with empty context.
    pub fn new(message: JsonRpcMessage) -> Self {
        Self {
            message,
            extra: MessageExtra::default(),
        }
    }
}

/// Per-send options.
#[derive(Clone, Default)]
pub struct TransportSendOptions {
    /// Correlates a server-to-client message with the incoming request that
    /// caused it, so stream-routing transports can pick the right stream.
    pub related_request_id: Option<RequestId>,
    /// Resume delivery of a previously interrupted stream at this token
    /// instead of issuing a fresh send.
    pub resumption_token: Option<String>,
    /// Observes resumption tokens as the carrier assigns them.
    pub on_resumption_token: Option<ResumptionTokenCallback>,
    /// Authentication context to attach (server side).
    pub auth_info: Option<AuthInfo>,
}

impl fmt::Debug for TransportSendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSendOptions")
            .field("related_request_id", &self.related_request_id)
            .field("resumption_token", &self.resumption_token)
            .field("on_resumption_token", &self.on_resumption_token.is_some())
            .field("auth_info", &self.auth_info.is_some())
            .finish()
    }
}

/// The core trait for all transport implementations.
///
/// Object safe; methods return boxed futures so the engine can hold an
/// `Arc<dyn Transport>` without generics bleeding upward.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Activates the transport. Idempotence is not required: a second call
    /// fails with [`TransportError::AlreadyStarted`]. The HTTP transport
    /// opens no connection here.
    fn start(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>>;

    /// Delivers one JSON-RPC message. Resolves when the carrier has
    /// accepted the message, not when the peer has processed it.
    fn send(
        &self,
        message: JsonRpcMessage,
        options: TransportSendOptions,
    ) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>>;

    /// Awaits the next inbound message. `Ok(None)` means the transport has
    /// closed; errors are transient and the caller may keep polling.
    fn receive(
        &self,
    ) -> Pin<Box<dyn Future<Output = TransportResult<Option<Received>>> + Send + '_>>;

    /// Releases resources. After close, `receive()` drains anything already
    /// queued and then yields `Ok(None)`.
    fn close(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>>;

    /// The session identifier this transport currently holds, if any.
    fn session_id(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _object_safe(_t: &dyn Transport) {}

    #[test]
    fn test_send_options_default() {
        let options = TransportSendOptions::default();
        assert!(options.related_request_id.is_none());
        assert!(options.resumption_token.is_none());
    }
}
