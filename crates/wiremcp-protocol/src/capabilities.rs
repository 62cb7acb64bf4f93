//! Capability declarations and gating.
//!
//! Peers advertise capability sets during initialization. The engine itself
//! is capability-agnostic: it consults a [`CapabilityPolicy`] at each
//! send/register point, and concrete client/server roles supply a policy
//! that knows which peer advertised what.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;

/// Capabilities a client may advertise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Experimental, non-standard capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
    /// Support for server-initiated sampling requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
    /// Support for filesystem roots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
}

/// Roots capability detail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootsCapability {
    /// Whether the client emits `notifications/roots/list_changed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Capabilities a server may advertise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// Experimental, non-standard capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
    /// Log message notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
    /// Tool listing and invocation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChangedCapability>,
    /// Prompt templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChangedCapability>,
    /// Resource listing and reads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    /// Argument completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<Value>,
}

/// Capability detail for list-bearing features.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChangedCapability {
    /// Whether list-changed notifications are emitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Resources capability detail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    /// Whether resource subscriptions are supported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    /// Whether list-changed notifications are emitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Gating hooks consulted by the engine when strict capability enforcement
/// is enabled.
///
/// The defaults allow everything; a client or server role overrides the
/// methods it can actually check against negotiated capabilities and
/// returns [`Error::Capability`](crate::Error::Capability) on violation.
pub trait CapabilityPolicy: Send + Sync {
    /// May this side send a request with the given method?
    fn assert_capability_for_method(&self, _method: &str) -> Result<()> {
        Ok(())
    }

    /// May this side emit a notification with the given method?
    fn assert_notification_capability(&self, _method: &str) -> Result<()> {
        Ok(())
    }

    /// May this side register a request handler for the given method?
    fn assert_request_handler_capability(&self, _method: &str) -> Result<()> {
        Ok(())
    }
}

/// The default permissive policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissivePolicy;

impl CapabilityPolicy for PermissivePolicy {}
