//! Session identifiers.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Maximum allowed session ID length.
///
/// Bounds what the server will accept from a client-echoed header, so an
/// adversarial header cannot balloon session storage.
pub const MAX_SESSION_ID_LEN: usize = 256;

/// Identifier of one logical client-server association over HTTP.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Create a fresh random session ID, `mcp-` prefixed for easy
    /// identification in logs.
    pub fn generate() -> Self {
        Self(format!("mcp-{}", Uuid::new_v4().simple()))
    }

    /// Accept a session ID from the wire, rejecting oversized values.
    pub fn try_from_str(s: &str) -> Option<Self> {
        if s.is_empty() || s.len() > MAX_SESSION_ID_LEN {
            return None;
        }
        Some(Self(s.to_string()))
    }

    /// The ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the ID and return the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mints a session ID at initialize time. When the server has none, it runs
/// stateless: no ID is issued and any node can serve any request.
pub type SessionIdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// The default generator, backed by [`SessionId::generate`].
pub fn default_session_id_generator() -> SessionIdGenerator {
    Arc::new(|| SessionId::generate().into_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique_and_prefixed() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("mcp-"));
    }

    #[test]
    fn test_oversized_ids_rejected() {
        assert!(SessionId::try_from_str(&"x".repeat(MAX_SESSION_ID_LEN)).is_some());
        assert!(SessionId::try_from_str(&"x".repeat(MAX_SESSION_ID_LEN + 1)).is_none());
        assert!(SessionId::try_from_str("").is_none());
    }
}
