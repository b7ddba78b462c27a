//! Encrypted key/value vault for Keygate.
//!
//! Credentials handled by `keygate-auth` are persisted here. Every value is
//! sealed with AES-256-GCM under a 256-bit master key before it reaches
//! SQLite, and each ciphertext is bound to its `(namespace, key)` slot.
//!
//! # Modules
//!
//! - [`crypto`]: AES-256-GCM sealing, master key generation, PBKDF2.
//! - [`store`]: SQLite-backed [`Vault`] with namespaced entries.
//! - [`error`]: Unified error type.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use keygate_vault::{crypto, Vault};
//!
//! # fn example() -> keygate_vault::Result<()> {
//! let (_salt, master_key) = crypto::derive_key_from_password(b"my-secret")?;
//! let vault = Vault::open("data/vault.db", &master_key)?;
//!
//! vault.put("default", "access_token", "eyJhbGciOi...")?;
//! let token = vault.get("default", "access_token")?;
//! assert!(token.is_some());
//! # Ok(())
//! # }
//! ```

pub mod crypto;
pub mod error;
pub mod store;

pub use error::{Result, VaultError};
pub use store::Vault;
