//! Client transport configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use wiremcp_auth::OAuthClientProvider;

/// Protocol revision sent in the `mcp-protocol-version` header.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Backoff policy for reconnecting the GET/SSE channel.
///
/// The delay before retry `n` (0-indexed) is
/// `min(max_reconnection_delay, initial_reconnection_delay * grow_factor^n)`.
#[derive(Debug, Clone)]
pub struct ReconnectionOptions {
    /// Delay before the first reconnect attempt
    pub initial_reconnection_delay: Duration,
    /// Upper bound on any reconnect delay
    pub max_reconnection_delay: Duration,
    /// Exponential growth factor
    pub reconnection_delay_grow_factor: f64,
    /// Reconnect attempts after the initial failure before giving up
    pub max_retries: u32,
}

impl Default for ReconnectionOptions {
    fn default() -> Self {
        Self {
            initial_reconnection_delay: Duration::from_millis(1000),
            max_reconnection_delay: Duration::from_millis(30_000),
            reconnection_delay_grow_factor: 1.5,
            max_retries: 2,
        }
    }
}

impl ReconnectionOptions {
    /// The delay before retry `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let grown = self.initial_reconnection_delay.as_millis() as f64
            * self.reconnection_delay_grow_factor.powi(attempt as i32);
        let capped = grown.min(self.max_reconnection_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Streamable HTTP client transport options.
#[derive(Clone, Default)]
pub struct StreamableHttpOptions {
    /// OAuth provider; when set, 401 responses trigger the auth flow and a
    /// single retry.
    pub auth_provider: Option<Arc<dyn OAuthClientProvider>>,
    /// Extra headers merged into every HTTP request. The map is re-read per
    /// request, so later mutations via
    /// [`StreamableHttpTransport::set_header`](crate::StreamableHttpTransport::set_header)
    /// are observed.
    pub headers: HashMap<String, String>,
    /// HTTP client used for ALL traffic, OAuth discovery included. A
    /// default client is built when absent.
    pub http_client: Option<reqwest::Client>,
    /// GET-channel reconnection policy.
    pub reconnection: ReconnectionOptions,
    /// Resume an existing session instead of starting fresh.
    pub session_id: Option<String>,
    /// Value for the `mcp-protocol-version` header.
    pub protocol_version: Option<String>,
}

impl std::fmt::Debug for StreamableHttpOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpOptions")
            .field("auth_provider", &self.auth_provider.is_some())
            .field("headers", &self.headers)
            .field("http_client", &self.http_client.is_some())
            .field("reconnection", &self.reconnection)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl StreamableHttpOptions {
    /// Options with every default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an OAuth provider.
    pub fn with_auth_provider(mut self, provider: Arc<dyn OAuthClientProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    /// Use a caller-supplied HTTP client.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Set the reconnection policy.
    pub fn with_reconnection(mut self, reconnection: ReconnectionOptions) -> Self {
        self.reconnection = reconnection;
        self
    }
}

/// The endpoint a transport talks to plus its options.
#[derive(Debug, Clone)]
pub struct StreamableHttpConfig {
    /// Base URL all three methods target
    pub url: Url,
    /// Transport options
    pub options: StreamableHttpOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_formula() {
        let options = ReconnectionOptions::default();
        assert_eq!(options.delay(0), Duration::from_millis(1000));
        assert_eq!(options.delay(1), Duration::from_millis(1500));
        assert_eq!(options.delay(2), Duration::from_millis(2250));
        // Far attempts saturate at the cap.
        assert_eq!(options.delay(30), Duration::from_millis(30_000));
    }

    #[test]
    fn test_defaults_match_contract() {
        let options = ReconnectionOptions::default();
        assert_eq!(options.initial_reconnection_delay, Duration::from_millis(1000));
        assert_eq!(options.max_reconnection_delay, Duration::from_millis(30_000));
        assert_eq!(options.max_retries, 2);
    }
}
