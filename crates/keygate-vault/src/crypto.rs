//! AES-256-GCM sealing for vault entries, built on `ring`.
//!
//! Each value is sealed under the vault master key with a fresh random
//! 96-bit nonce. The entry's `namespace` and `key` are bound in as
//! additional authenticated data, so a ciphertext copied onto another row
//! fails to open instead of silently yielding the wrong secret.
//!
//! Master keys come either from [`generate_key`] or from a passphrase via
//! PBKDF2-HMAC-SHA256 ([`derive_key_from_password`] and
//! [`derive_key_with_salt`]).

use std::num::NonZeroU32;

use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, SealingKey, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, VaultError};

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the PBKDF2 salt in bytes.
pub const SALT_LEN: usize = 32;

/// PBKDF2 iteration count (OWASP 2023 guidance for HMAC-SHA256).
const PBKDF2_ITERATIONS: NonZeroU32 = match NonZeroU32::new(600_000) {
    Some(n) => n,
    None => panic!("iteration count must be non-zero"),
};

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// Nonce sequence that yields exactly one nonce, then errors.
///
/// A fresh random nonce is drawn per seal, so every bound key is used once.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() != KEY_LEN {
        return Err(VaultError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sealing
// ---------------------------------------------------------------------------

/// Seal `plaintext` under `key`, authenticating `aad` alongside it.
///
/// Returns `(nonce, ciphertext)`; the ciphertext carries the 128-bit GCM tag.
///
/// # Errors
///
/// [`VaultError::InvalidKeyLength`] for a key that is not 32 bytes,
/// [`VaultError::EncryptionFailed`] when `ring` reports a failure.
pub fn seal(plaintext: &[u8], aad: &[u8], key: &[u8]) -> Result<([u8; NONCE_LEN_BYTES], Vec<u8>)> {
    check_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN_BYTES];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to generate random nonce".into(),
        })?;

    let unbound = UnboundKey::new(AEAD_ALG, key).map_err(|_| VaultError::EncryptionFailed {
        reason: "failed to create AES-256-GCM key".into(),
    })?;
    let mut sealing_key = SealingKey::new(unbound, SingleNonce(Some(nonce_bytes)));

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::from(aad), &mut in_out)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "seal_in_place failed".into(),
        })?;

    tracing::trace!(ciphertext_len = in_out.len(), "sealed vault entry");
    Ok((nonce_bytes, in_out))
}

/// Open a ciphertext produced by [`seal`] with the same `aad` and `key`.
///
/// # Errors
///
/// [`VaultError::DecryptionFailed`] if the key is wrong, the ciphertext was
/// tampered with, or `aad` differs from the one used at seal time.
pub fn open(nonce: &[u8; NONCE_LEN_BYTES], ciphertext: &[u8], aad: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;

    let unbound = UnboundKey::new(AEAD_ALG, key).map_err(|_| VaultError::DecryptionFailed {
        reason: "failed to create AES-256-GCM key".into(),
    })?;
    let mut opening_key = aead::OpeningKey::new(unbound, SingleNonce(Some(*nonce)));

    let mut in_out = ciphertext.to_vec();
    let plaintext = opening_key
        .open_in_place(Aad::from(aad), &mut in_out)
        .map_err(|_| VaultError::DecryptionFailed {
            reason: "authentication failed: wrong key, corrupted data or moved entry".into(),
        })?;

    Ok(plaintext.to_vec())
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Generate a fresh random 256-bit master key.
pub fn generate_key() -> Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| VaultError::Internal("failed to generate master key".into()))?;
    Ok(key)
}

/// Derive a master key from `password` with a freshly generated salt.
///
/// The caller must persist the returned salt to re-derive the key later.
pub fn derive_key_from_password(password: &[u8]) -> Result<([u8; SALT_LEN], [u8; KEY_LEN])> {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| VaultError::KeyDerivationFailed {
            reason: "failed to generate random salt".into(),
        })?;

    let key = derive_key_with_salt(password, &salt);
    tracing::debug!("derived vault master key via PBKDF2");
    Ok((salt, key))
}

/// Deterministically derive a master key from `password` and a known `salt`.
pub fn derive_key_with_salt(password: &[u8], salt: &[u8]) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    pbkdf2::derive(PBKDF2_ALG, PBKDF2_ITERATIONS, salt, password, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_with_same_aad() {
        let key = generate_key().unwrap();
        let (nonce, ciphertext) = seal(b"gho_secret", b"session\0access_token", &key).unwrap();
        let plaintext = open(&nonce, &ciphertext, b"session\0access_token", &key).unwrap();
        assert_eq!(plaintext, b"gho_secret");
    }

    #[test]
    fn open_with_other_aad_fails() {
        let key = generate_key().unwrap();
        let (nonce, ciphertext) = seal(b"gho_secret", b"session\0access_token", &key).unwrap();
        let result = open(&nonce, &ciphertext, b"session\0refresh_token", &key);
        assert!(matches!(result, Err(VaultError::DecryptionFailed { .. })));
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let key1 = generate_key().unwrap();
        let key2 = generate_key().unwrap();
        let (nonce, ciphertext) = seal(b"data", b"", &key1).unwrap();
        assert!(open(&nonce, &ciphertext, b"", &key2).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = generate_key().unwrap();
        let (nonce, mut ciphertext) = seal(b"data", b"", &key).unwrap();
        ciphertext[0] ^= 0x01;
        assert!(open(&nonce, &ciphertext, b"", &key).is_err());
    }

    #[test]
    fn short_key_rejected() {
        let result = seal(b"data", b"", &[0u8; 16]);
        assert!(matches!(
            result,
            Err(VaultError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn pbkdf2_is_deterministic_for_a_salt() {
        let (salt, key) = derive_key_from_password(b"correct horse").unwrap();
        assert_eq!(derive_key_with_salt(b"correct horse", &salt), key);
        assert_ne!(derive_key_with_salt(b"wrong horse", &salt), key);
    }
}
