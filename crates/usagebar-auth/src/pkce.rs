//! PKCE (RFC 7636) and anti-CSRF state generation.
//!
//! Each login attempt gets fresh [`PkceMaterial`]: a 32-byte code verifier,
//! its S256 challenge, and a 16-byte state token. The material is consumed
//! by the attempt and never reused.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{AuthError, Result};

/// Length of the PKCE code verifier in bytes (before base64 encoding).
const VERIFIER_BYTES: usize = 32;

/// Length of the state token in bytes (before base64 encoding).
const STATE_BYTES: usize = 16;

/// Single-use PKCE verifier/challenge pair plus the CSRF state.
///
/// Deliberately not `Clone`: one value per attempt.
pub struct PkceMaterial {
    /// base64url(32 random bytes), 43 characters.
    pub code_verifier: String,
    /// base64url(SHA-256(code_verifier)), 43 characters.
    pub code_challenge: String,
    /// base64url(16 random bytes), 22 characters.
    pub state: String,
}

impl PkceMaterial {
    /// Generate fresh material from the system CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Random`] if the CSPRNG fails.
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();

        let mut verifier = [0u8; VERIFIER_BYTES];
        rng.fill(&mut verifier).map_err(|_| AuthError::Random)?;
        let code_verifier = URL_SAFE_NO_PAD.encode(verifier);

        let mut state = [0u8; STATE_BYTES];
        rng.fill(&mut state).map_err(|_| AuthError::Random)?;

        Ok(Self {
            code_challenge: code_challenge(&code_verifier),
            code_verifier,
            state: URL_SAFE_NO_PAD.encode(state),
        })
    }
}

impl std::fmt::Debug for PkceMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceMaterial")
            .field("code_verifier", &"<redacted>")
            .field("code_challenge", &self.code_challenge)
            .field("state", &"<redacted>")
            .finish()
    }
}

/// Derive the S256 code challenge: `BASE64URL(SHA256(verifier))`.
pub fn code_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn is_base64url(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn lengths_and_alphabet() {
        let pkce = PkceMaterial::generate().unwrap();
        assert_eq!(pkce.code_verifier.len(), 43);
        assert_eq!(pkce.code_challenge.len(), 43);
        assert_eq!(pkce.state.len(), 22);
        assert!(is_base64url(&pkce.code_verifier));
        assert!(is_base64url(&pkce.code_challenge));
        assert!(is_base64url(&pkce.state));
    }

    #[test]
    fn challenge_matches_rfc7636_vector() {
        // RFC 7636 Appendix B.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn challenge_always_derives_from_verifier() {
        for _ in 0..100 {
            let pkce = PkceMaterial::generate().unwrap();
            assert_eq!(pkce.code_challenge, code_challenge(&pkce.code_verifier));
        }
    }

    #[test]
    fn no_repeats_across_ten_thousand_generations() {
        let mut verifiers = HashSet::new();
        let mut states = HashSet::new();
        for _ in 0..10_000 {
            let pkce = PkceMaterial::generate().unwrap();
            assert!(verifiers.insert(pkce.code_verifier));
            assert!(states.insert(pkce.state));
        }
    }

    #[test]
    fn debug_redacts_secrets() {
        let pkce = PkceMaterial::generate().unwrap();
        let rendered = format!("{pkce:?}");
        assert!(!rendered.contains(&pkce.code_verifier));
        assert!(!rendered.contains(&pkce.state));
        assert!(rendered.contains(&pkce.code_challenge));
    }
}
