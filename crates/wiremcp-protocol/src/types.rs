//! Core protocol types shared across the engine and the transports.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// JSON-RPC request identifier: a string or an integer.
///
/// The engine assigns numeric ids monotonically per instance; string ids
/// only appear on incoming traffic from peers that choose them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String identifier
    String(String),
    /// Numeric identifier
    Number(i64),
}

impl RequestId {
    /// The numeric value, if this is a number id
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(_) => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// Progress token carried in `params._meta.progressToken`.
///
/// Synthesized from the request id when a caller supplies a progress
/// callback; maps 1:1 to an in-flight request for its lifetime.
pub type ProgressToken = RequestId;

/// Method name of the progress notification the engine interprets itself.
pub const NOTIFICATION_PROGRESS: &str = "notifications/progress";

/// Method name of the cancellation notification the engine interprets itself.
pub const NOTIFICATION_CANCELLED: &str = "notifications/cancelled";

/// Method name of the initialize request (session-minting on HTTP).
pub const METHOD_INITIALIZE: &str = "initialize";

/// Method name of the ping request.
pub const METHOD_PING: &str = "ping";

/// Parameters of a `notifications/progress` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotificationParams {
    /// Token identifying the request this progress belongs to
    pub progress_token: ProgressToken,
    /// Work completed so far
    pub progress: f64,
    /// Total work expected, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Human-readable progress message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Progress update delivered to a request's `on_progress` callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Work completed so far
    pub progress: f64,
    /// Total work expected, when known
    pub total: Option<f64>,
    /// Human-readable progress message
    pub message: Option<String>,
}

/// Parameters of a `notifications/cancelled` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledNotificationParams {
    /// Id of the request being cancelled
    pub request_id: RequestId,
    /// Optional reason, for diagnostics only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Insert `progressToken` into `params._meta`, preserving any `_meta`
/// fields the caller already set.
pub fn inject_progress_token(params: Option<Value>, token: &ProgressToken) -> Value {
    let mut map = match params {
        Some(Value::Object(map)) => map,
        // Non-object params cannot carry _meta; replace wholesale.
        _ => Map::new(),
    };
    let meta = map
        .entry("_meta")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(meta_map) = meta {
        meta_map.insert(
            "progressToken".to_string(),
            serde_json::to_value(token).unwrap_or(Value::Null),
        );
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_id_serde() {
        let id: RequestId = serde_json::from_str("42").unwrap();
        assert_eq!(id, RequestId::Number(42));
        let id: RequestId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id, RequestId::String("abc".into()));
    }

    #[test]
    fn test_inject_progress_token_preserves_meta() {
        let params = json!({"name": "demo", "_meta": {"traceId": "t-1"}});
        let out = inject_progress_token(Some(params), &RequestId::Number(3));
        assert_eq!(out["_meta"]["traceId"], json!("t-1"));
        assert_eq!(out["_meta"]["progressToken"], json!(3));
        assert_eq!(out["name"], json!("demo"));
    }

    #[test]
    fn test_inject_progress_token_without_params() {
        let out = inject_progress_token(None, &RequestId::Number(0));
        assert_eq!(out, json!({"_meta": {"progressToken": 0}}));
    }

    #[test]
    fn test_cancelled_params_wire_shape() {
        let params = CancelledNotificationParams {
            request_id: RequestId::Number(9),
            reason: Some("client abort".into()),
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value, json!({"requestId": 9, "reason": "client abort"}));
    }

    #[test]
    fn test_progress_params_parse() {
        let params: ProgressNotificationParams =
            serde_json::from_value(json!({"progressToken": 1, "progress": 0.5, "total": 1.0}))
                .unwrap();
        assert_eq!(params.progress_token, RequestId::Number(1));
        assert_eq!(params.total, Some(1.0));
        assert!(params.message.is_none());
    }
}
