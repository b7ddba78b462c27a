//! Proof Key for Code Exchange (RFC 7636).
//!
//! A verifier is a high-entropy string over the unreserved URL charset; the
//! challenge sent to the authorization endpoint is
//! `BASE64URL-NOPAD(SHA256(verifier))` with method `S256`.
//!
//! Verifiers exist only in memory for the duration of one login attempt.
//! [`PkcePair`]'s `Debug` output redacts them.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{AuthError, Result};

/// RFC 7636 unreserved characters: `A-Z a-z 0-9 - . _ ~`.
pub const VERIFIER_CHARSET: &[u8; 66] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

pub const MIN_VERIFIER_LEN: usize = 43;
pub const MAX_VERIFIER_LEN: usize = 128;
pub const DEFAULT_VERIFIER_LEN: usize = MAX_VERIFIER_LEN;

/// Only the `S256` method is ever sent.
pub const CHALLENGE_METHOD: &str = "S256";

/// Largest multiple of the charset size that fits in a byte. Random bytes at
/// or above it are rejected so every character is equally likely.
const ACCEPT_BELOW: u8 = (256 / VERIFIER_CHARSET.len() * VERIFIER_CHARSET.len()) as u8;

/// Generate a random verifier of exactly `len` characters.
///
/// # Errors
///
/// Returns [`AuthError::Authentication`] if the system CSPRNG fails.
pub fn generate_verifier(len: usize) -> Result<String> {
    let rng = SystemRandom::new();
    let mut verifier = String::with_capacity(len);
    let mut buf = [0u8; 64];

    while verifier.len() < len {
        rng.fill(&mut buf).map_err(|_| {
            AuthError::authentication("failed to generate PKCE verifier: CSPRNG error")
        })?;

        for &byte in buf.iter().filter(|&&b| b < ACCEPT_BELOW) {
            if verifier.len() == len {
                break;
            }
            verifier.push(VERIFIER_CHARSET[usize::from(byte) % VERIFIER_CHARSET.len()] as char);
        }
    }

    Ok(verifier)
}

/// `BASE64URL-NOPAD(SHA256(verifier))`.
pub fn challenge_for(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

/// A verifier and its derived challenge for one authorization attempt.
pub struct PkcePair {
    verifier: String,
    challenge: String,
}

impl PkcePair {
    pub fn generate(len: usize) -> Result<Self> {
        let verifier = generate_verifier(len)?;
        let challenge = challenge_for(&verifier);
        Ok(Self {
            verifier,
            challenge,
        })
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn method(&self) -> &'static str {
        CHALLENGE_METHOD
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_has_requested_length() {
        for len in [1, 43, 64, 128, 500] {
            assert_eq!(generate_verifier(len).unwrap().len(), len);
        }
    }

    #[test]
    fn verifier_uses_unreserved_charset() {
        let verifier = generate_verifier(DEFAULT_VERIFIER_LEN).unwrap();
        for c in verifier.bytes() {
            assert!(VERIFIER_CHARSET.contains(&c), "unexpected character {:?}", c as char);
        }
    }

    #[test]
    fn challenge_matches_rfc7636_vector() {
        // RFC 7636 Appendix B.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            challenge_for(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn challenge_is_deterministic() {
        let verifier = generate_verifier(64).unwrap();
        assert_eq!(challenge_for(&verifier), challenge_for(&verifier));
    }

    #[test]
    fn distinct_verifiers_give_distinct_challenges() {
        let a = PkcePair::generate(DEFAULT_VERIFIER_LEN).unwrap();
        let b = PkcePair::generate(DEFAULT_VERIFIER_LEN).unwrap();
        assert_ne!(a.verifier(), b.verifier());
        assert_ne!(a.challenge(), b.challenge());
        assert_eq!(a.method(), "S256");
    }

    #[test]
    fn challenge_is_unpadded_base64url() {
        let challenge = challenge_for("anything");
        assert_eq!(challenge.len(), 43);
        assert!(!challenge.contains('='));
        assert!(!challenge.contains('+'));
        assert!(!challenge.contains('/'));
    }

    #[test]
    fn debug_redacts_verifier() {
        let pair = PkcePair::generate(MIN_VERIFIER_LEN).unwrap();
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains(pair.verifier()));
        assert!(rendered.contains("<redacted>"));
    }
}
