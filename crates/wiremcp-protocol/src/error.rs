//! Error taxonomy for the protocol engine.

use serde_json::Value;
use thiserror::Error;

use crate::jsonrpc::{JsonRpcError, JsonRpcErrorCode};

/// A specialized `Result` type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the protocol engine and surfaced to request callers.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A JSON-RPC error, either received from the peer or raised locally
    /// with an SDK-specific code.
    #[error("MCP error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i32,
        /// Error message
        message: String,
        /// Additional error data
        data: Option<Value>,
    },

    /// The request was cancelled locally before a response arrived.
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    /// A transport-level failure, not correlatable to a peer error.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A response arrived but did not match the expected result shape.
    #[error("Result validation failed: {0}")]
    Validation(String),

    /// A capability check refused the operation.
    #[error("Capability not supported: {0}")]
    Capability(String),

    /// No transport is attached.
    #[error("Not connected")]
    NotConnected,
}

impl Error {
    /// Peer-visible JSON-RPC error with an explicit code.
    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// The transport closed while the request was in flight (-32000).
    pub fn connection_closed() -> Self {
        JsonRpcErrorCode::ConnectionClosed.into()
    }

    /// The request deadline elapsed (-32001).
    pub fn request_timeout() -> Self {
        JsonRpcErrorCode::RequestTimeout.into()
    }

    /// Invalid method parameters (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::rpc(JsonRpcErrorCode::InvalidParams.code(), message)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self::rpc(
            JsonRpcErrorCode::MethodNotFound.code(),
            format!("Method not found: {method}"),
        )
    }

    /// Local cancellation.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Transport-level failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Result-shape mismatch.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// The JSON-RPC code for this error, if it maps to one.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Convert into the wire-level error object for an error response.
    ///
    /// Non-RPC variants collapse to `InternalError`, which is what a peer
    /// should see for faults it cannot act on.
    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        match self {
            Self::Rpc {
                code,
                message,
                data,
            } => JsonRpcError {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            other => JsonRpcError::new(
                JsonRpcErrorCode::InternalError.code(),
                other.to_string(),
            ),
        }
    }
}

impl From<JsonRpcErrorCode> for Error {
    fn from(code: JsonRpcErrorCode) -> Self {
        Self::rpc(code.code(), code.message())
    }
}

impl From<JsonRpcError> for Error {
    fn from(error: JsonRpcError) -> Self {
        Self::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Validation(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdk_codes() {
        assert_eq!(Error::connection_closed().code(), Some(-32000));
        assert_eq!(Error::request_timeout().code(), Some(-32001));
    }

    #[test]
    fn test_peer_error_round_trip() {
        let wire = JsonRpcError::new(-32601, "Method not found");
        let err: Error = wire.clone().into();
        assert_eq!(err.to_json_rpc_error(), wire);
    }

    #[test]
    fn test_non_rpc_collapses_to_internal() {
        let err = Error::transport("socket reset");
        assert_eq!(err.to_json_rpc_error().code, -32603);
    }
}
