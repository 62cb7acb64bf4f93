//! PKCE (RFC 7636), S256 method only.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A PKCE verifier/challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// The code verifier; stored by the client until the code exchange.
    pub verifier: String,
    /// The S256 challenge sent with the authorization request.
    pub challenge: String,
}

/// Generate a fresh verifier and its S256 challenge.
///
/// The verifier is 64 hex characters (256 bits of entropy), inside the
/// 43-128 character window RFC 7636 §4.1 requires and drawn entirely from
/// the unreserved set.
pub fn generate_pkce() -> PkceChallenge {
    let verifier = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let challenge = challenge_s256(&verifier);
    PkceChallenge {
        verifier,
        challenge,
    }
}

/// Compute `BASE64URL-ENCODE(SHA256(verifier))` without padding.
pub fn challenge_s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Check a verifier against a stored challenge.
pub fn verify_challenge_s256(verifier: &str, challenge: &str) -> bool {
    challenge_s256(verifier) == challenge
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        // The worked example from RFC 7636 Appendix B.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            challenge_s256(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_generated_verifier_shape() {
        let pkce = generate_pkce();
        assert_eq!(pkce.verifier.len(), 64);
        assert!(pkce.verifier.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(verify_challenge_s256(&pkce.verifier, &pkce.challenge));
    }

    #[test]
    fn test_wrong_verifier_rejected() {
        let pkce = generate_pkce();
        assert!(!verify_challenge_s256("not-the-verifier-but-long-enough-0000000000", &pkce.challenge));
    }

    #[test]
    fn test_verifiers_are_unique() {
        assert_ne!(generate_pkce().verifier, generate_pkce().verifier);
    }
}
