//! # wiremcp Protocol Core
//!
//! Transport-agnostic request/response/notification engine for the Model
//! Context Protocol, plus the foundational abstractions every transport
//! implementation depends on.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Messages**: the JSON-RPC 2.0 model ([`JsonRpcMessage`] and friends)
//! - **Engine**: [`Protocol`] — id assignment, response correlation,
//!   deadlines with progress reset, bidirectional cancellation, debounced
//!   notifications, handler dispatch
//! - **Transport contract**: [`Transport`], [`TransportSendOptions`],
//!   [`TransportError`]
//! - **Notifier**: [`EventNotifier`], a typed synchronous fan-out observer
//! - **Capabilities**: declaration types and the [`CapabilityPolicy`] hooks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wiremcp_protocol::{Protocol, ProtocolOptions, RequestOptions};
//!
//! let protocol = Protocol::new(ProtocolOptions::default());
//! protocol.connect(Arc::new(transport)).await?;
//! let result: serde_json::Value = protocol
//!     .request("ping", None, RequestOptions::default())
//!     .await?;
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod capabilities;
pub mod error;
pub mod jsonrpc;
pub mod notifier;
pub mod protocol;
pub mod transport;
pub mod types;

pub use capabilities::{
    CapabilityPolicy, ClientCapabilities, ListChangedCapability, PermissivePolicy,
    ResourcesCapability, RootsCapability, ServerCapabilities,
};
pub use error::{Error, Result};
pub use jsonrpc::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, JsonRpcResponsePayload, JsonRpcVersion,
};
pub use notifier::{EventNotifier, NotifierSubscription};
pub use protocol::{
    DEFAULT_REQUEST_TIMEOUT, NotificationOptions, Protocol, ProtocolOptions, RequestHandlerExtra,
    RequestOptions,
};
pub use transport::{
    AuthInfo, MessageExtra, Received, RequestInfo, ResumptionTokenCallback, Transport,
    TransportError, TransportResult, TransportSendOptions,
};
pub use types::{
    CancelledNotificationParams, METHOD_INITIALIZE, METHOD_PING, NOTIFICATION_CANCELLED,
    NOTIFICATION_PROGRESS, Progress, ProgressNotificationParams, ProgressToken, RequestId,
};
