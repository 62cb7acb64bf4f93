//! # JSON-RPC 2.0 Message Model
//!
//! Wire-level JSON-RPC 2.0 types used by the protocol engine and the
//! transports. The model is deliberately schema-agnostic: `params` and
//! `result` are raw [`Value`]s and method catalogs live with the peers,
//! not here.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::types::RequestId;

/// JSON-RPC version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC version marker type
///
/// Serializes as the literal string `"2.0"` and refuses anything else on
/// deserialization, so a malformed message fails at the serde boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "Invalid JSON-RPC version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// JSON-RPC request message (carries both `method` and `id`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Request method name
    pub method: String,
    /// Request parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request identifier
    pub id: RequestId,
}

impl JsonRpcRequest {
    /// Create a new request
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC notification message (`method` without `id`, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Notification method name
    pub method: String,
    /// Notification parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new notification
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }
}

/// Response payload - mutual exclusion of `result` and `error` is enforced
/// by the type, not by convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponsePayload {
    /// Successful response
    Success {
        /// Response result
        result: Value,
    },
    /// Error response
    Error {
        /// Response error
        error: JsonRpcError,
    },
}

/// JSON-RPC response message (`id` plus either `result` or `error`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Response payload
    #[serde(flatten)]
    pub payload: JsonRpcResponsePayload,
    /// Identifier of the request this responds to
    pub id: RequestId,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(result: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Success { result },
            id,
        }
    }

    /// Create an error response
    pub fn error(error: JsonRpcError, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Error { error },
            id,
        }
    }

    /// Get the result if this is a success response
    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            JsonRpcResponsePayload::Success { result } => Some(result),
            JsonRpcResponsePayload::Error { .. } => None,
        }
    }

    /// Get the error if this is an error response
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.payload {
            JsonRpcResponsePayload::Success { result } => Ok(result),
            JsonRpcResponsePayload::Error { error } => Err(error),
        }
    }
}

/// JSON-RPC error object carried inside an error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Short error description
    pub message: String,
    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create a new error object
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach error data
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// Well-known JSON-RPC error codes, including the SDK-specific range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonRpcErrorCode {
    /// Invalid JSON was received (-32700)
    ParseError,
    /// The JSON sent is not a valid request object (-32600)
    InvalidRequest,
    /// The method does not exist or is unavailable (-32601)
    MethodNotFound,
    /// Invalid method parameters (-32602)
    InvalidParams,
    /// Internal JSON-RPC error (-32603)
    InternalError,
    /// The transport closed while the request was in flight (-32000)
    ConnectionClosed,
    /// The request deadline elapsed before a response arrived (-32001)
    RequestTimeout,
}

impl JsonRpcErrorCode {
    /// Get the numeric code
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ConnectionClosed => -32000,
            Self::RequestTimeout => -32001,
        }
    }

    /// Get the standard message for this code
    pub fn message(&self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ConnectionClosed => "Connection closed",
            Self::RequestTimeout => "Request timed out",
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

impl From<JsonRpcErrorCode> for JsonRpcError {
    fn from(code: JsonRpcErrorCode) -> Self {
        JsonRpcError::new(code.code(), code.message())
    }
}

/// Any JSON-RPC message as it appears on the wire.
///
/// Identity rules: a *request* has both `method` and `id`; a *notification*
/// has `method` without `id`; a *response* has `id` with `result` or
/// `error`. The variant order matters for untagged deserialization: the
/// request arm is tried before the notification arm so the presence of `id`
/// wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request expecting a response
    Request(JsonRpcRequest),
    /// Fire-and-forget notification
    Notification(JsonRpcNotification),
    /// Response to a prior request
    Response(JsonRpcResponse),
    /// Batch of messages (JSON array on the wire)
    Batch(Vec<JsonRpcMessage>),
}

impl JsonRpcMessage {
    /// Parse a message (or batch) from a JSON string
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the message to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The method name, for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            _ => None,
        }
    }

    /// The request id, for requests and responses
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Response(r) => Some(&r.id),
            _ => None,
        }
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(request: JsonRpcRequest) -> Self {
        Self::Request(request)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notification: JsonRpcNotification) -> Self {
        Self::Notification(notification)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(response: JsonRpcResponse) -> Self {
        Self::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_version_round_trip() {
        let json = serde_json::to_string(&JsonRpcVersion).unwrap();
        assert_eq!(json, "\"2.0\"");
        let parsed: Result<JsonRpcVersion, _> = serde_json::from_str("\"1.0\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_request_identity() {
        let msg = JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        match msg {
            JsonRpcMessage::Request(r) => {
                assert_eq!(r.method, "ping");
                assert_eq!(r.id, RequestId::Number(1));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_notification_identity() {
        let msg = JsonRpcMessage::parse(
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .unwrap();
        assert!(matches!(msg, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn test_response_identity() {
        let msg =
            JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#).unwrap();
        match msg {
            JsonRpcMessage::Response(r) => {
                assert_eq!(r.id, RequestId::Number(7));
                assert_eq!(r.result(), Some(&json!({"ok": true})));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_error_response() {
        let msg = JsonRpcMessage::parse(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        match msg {
            JsonRpcMessage::Response(r) => {
                let err = r.into_result().unwrap_err();
                assert_eq!(err.code, JsonRpcErrorCode::MethodNotFound.code());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_batch_parsing() {
        let msg = JsonRpcMessage::parse(
            r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"notifications/initialized"}]"#,
        )
        .unwrap();
        match msg {
            JsonRpcMessage::Batch(items) => assert_eq!(items.len(), 2),
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn test_sdk_error_codes() {
        assert_eq!(JsonRpcErrorCode::ConnectionClosed.code(), -32000);
        assert_eq!(JsonRpcErrorCode::RequestTimeout.code(), -32001);
    }

    #[test]
    fn test_string_id_round_trip() {
        let req = JsonRpcRequest::new("tools/list", None, RequestId::String("abc".into()));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["id"], json!("abc"));
    }

    #[test]
    fn test_params_omitted_when_none() {
        let notif = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_string(&notif).unwrap();
        assert!(!json.contains("params"));
    }
}
