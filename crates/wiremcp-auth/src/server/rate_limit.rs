//! Rate limiting for the authorization and token endpoints.
//!
//! Sliding-window limiter keyed by caller identity (normally the client
//! IP). Both endpoints default to 100 requests per 15 minutes per key.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Limit configuration for one endpoint.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests inside the window
    pub requests: u32,
    /// Window duration
    pub window: Duration,
    /// Disable to turn the limiter into a pass-through
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window: Duration::from_secs(15 * 60),
            enabled: true,
        }
    }
}

/// Returned when a request is over the limit.
#[derive(Debug, Clone)]
pub struct RateLimitExceeded {
    /// How long until the oldest counted request leaves the window
    pub retry_after: Duration,
}

#[derive(Debug, Default)]
struct WindowState {
    hits: HashMap<String, VecDeque<Instant>>,
}

/// Sliding-window rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Arc<RwLock<WindowState>>,
}

impl RateLimiter {
    /// Create a limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(WindowState::default())),
        }
    }

    /// Record a request for `key` and decide whether it is allowed.
    pub async fn check(&self, key: &str) -> Result<(), RateLimitExceeded> {
        if !self.config.enabled {
            return Ok(());
        }
        let now = Instant::now();
        let mut state = self.state.write().await;
        let hits = state.hits.entry(key.to_string()).or_default();

        while let Some(oldest) = hits.front() {
            if now.duration_since(*oldest) >= self.config.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() >= self.config.requests as usize {
            let retry_after = hits
                .front()
                .map(|oldest| self.config.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.config.window);
            return Err(RateLimitExceeded { retry_after });
        }

        hits.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_up_to_the_limit() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests: 3,
            window: Duration::from_secs(60),
            enabled: true,
        });

        for _ in 0..3 {
            assert!(limiter.check("1.2.3.4").await.is_ok());
        }
        let exceeded = limiter.check("1.2.3.4").await.unwrap_err();
        assert!(exceeded.retry_after <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests: 1,
            window: Duration::from_secs(60),
            enabled: true,
        });

        assert!(limiter.check("1.2.3.4").await.is_ok());
        assert!(limiter.check("1.2.3.4").await.is_err());
        assert!(limiter.check("5.6.7.8").await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_limiter_passes_everything() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests: 1,
            window: Duration::from_secs(60),
            enabled: false,
        });

        for _ in 0..10 {
            assert!(limiter.check("1.2.3.4").await.is_ok());
        }
    }
}
