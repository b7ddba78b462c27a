//! Vault error types.
//!
//! Every public API in this crate returns [`VaultError`]. Variants carry
//! enough context for callers to decide how to react without inspecting
//! opaque strings.

/// Unified error type for the Keygate vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Crypto errors ------------------------------------------------------
    /// Encryption failed (e.g. ring internal error, RNG failure).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Decryption failed (wrong key, corrupted ciphertext, swapped row).
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    /// Key derivation failed (e.g. salt generation).
    #[error("key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    /// The master key does not have the length AES-256 requires.
    #[error("master key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    // -- Store errors -------------------------------------------------------
    /// The `secrets` table could not be created.
    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },

    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Unexpected failure outside the SQL and AEAD paths (e.g. CSPRNG).
    #[error("internal vault error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_key_length_display() {
        let err = VaultError::InvalidKeyLength {
            expected: 32,
            actual: 16,
        };
        assert_eq!(err.to_string(), "master key must be 32 bytes, got 16");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VaultError>();
    }
}
