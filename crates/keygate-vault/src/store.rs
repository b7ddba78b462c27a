//! SQLite-backed encrypted key/value store.
//!
//! The [`Vault`] wraps a `rusqlite::Connection` and a master key. Values are
//! sealed with AES-256-GCM before they touch SQLite and opened on read; the
//! row's `(namespace, key)` pair is authenticated with the ciphertext.
//!
//! # Schema
//!
//! ```text
//! secrets(namespace TEXT, key TEXT, value BLOB, nonce BLOB, updated_at INTEGER)
//! PRIMARY KEY (namespace, key)
//! ```
//!
//! Migrations run automatically when the vault is opened.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::crypto;
use crate::error::{Result, VaultError};

/// Encrypted key/value vault backed by SQLite.
///
/// ```rust,no_run
/// # fn example() -> keygate_vault::Result<()> {
/// let master_key = keygate_vault::crypto::generate_key()?;
/// let vault = keygate_vault::Vault::open("data/vault.db", &master_key)?;
///
/// vault.put("session", "access_token", "gho_...")?;
/// assert_eq!(vault.get("session", "access_token")?.as_deref(), Some("gho_..."));
/// # Ok(())
/// # }
/// ```
pub struct Vault {
    conn: Connection,
    master_key: Vec<u8>,
}

impl Vault {
    /// Open (or create) a vault database at `path` with the given `master_key`.
    ///
    /// # Errors
    ///
    /// [`VaultError::InvalidKeyLength`] for a key that is not 32 bytes,
    /// [`VaultError::Database`] if the file cannot be opened, or
    /// [`VaultError::MigrationFailed`] if schema setup fails.
    pub fn open(path: impl AsRef<std::path::Path>, master_key: &[u8]) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening vault database");

        Self::check_master_key(master_key)?;
        let conn = Connection::open(path)?;
        Self::configure_connection(&conn, true)?;

        let vault = Self {
            conn,
            master_key: master_key.to_vec(),
        };
        vault.run_migrations()?;

        tracing::info!("vault database ready");
        Ok(vault)
    }

    /// Open an in-memory vault (tests and ephemeral sessions).
    pub fn open_in_memory(master_key: &[u8]) -> Result<Self> {
        Self::check_master_key(master_key)?;
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn, false)?;

        let vault = Self {
            conn,
            master_key: master_key.to_vec(),
        };
        vault.run_migrations()?;
        Ok(vault)
    }

    fn check_master_key(master_key: &[u8]) -> Result<()> {
        if master_key.len() != crypto::KEY_LEN {
            return Err(VaultError::InvalidKeyLength {
                expected: crypto::KEY_LEN,
                actual: master_key.len(),
            });
        }
        Ok(())
    }

    fn configure_connection(conn: &Connection, on_disk: bool) -> Result<()> {
        if on_disk {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        tracing::debug!("running vault schema migrations");

        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS secrets (
                namespace  TEXT NOT NULL,
                key        TEXT NOT NULL,
                value      BLOB NOT NULL,
                nonce      BLOB NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );",
            )
            .map_err(|e| VaultError::MigrationFailed {
                reason: e.to_string(),
            })?;

        Ok(())
    }

    // -- Entry CRUD ---------------------------------------------------------

    /// Read and decrypt the value stored under `namespace`/`key`.
    ///
    /// Returns `Ok(None)` when no such entry exists.
    pub fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let row = self
            .conn
            .query_row(
                "SELECT value, nonce FROM secrets WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()?;

        let Some((ciphertext, nonce)) = row else {
            return Ok(None);
        };

        if nonce.len() != crypto::NONCE_LEN_BYTES {
            return Err(VaultError::DecryptionFailed {
                reason: format!(
                    "stored nonce is {} bytes, expected {}",
                    nonce.len(),
                    crypto::NONCE_LEN_BYTES
                ),
            });
        }
        let mut nonce_bytes = [0u8; crypto::NONCE_LEN_BYTES];
        nonce_bytes.copy_from_slice(&nonce);

        let plaintext = crypto::open(
            &nonce_bytes,
            &ciphertext,
            &entry_aad(namespace, key),
            &self.master_key,
        )?;

        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|_| VaultError::DecryptionFailed {
                reason: "decrypted value is not valid UTF-8".into(),
            })
    }

    /// Encrypt and store `value`, replacing any previous value for the key.
    pub fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let (nonce, ciphertext) = crypto::seal(
            value.as_bytes(),
            &entry_aad(namespace, key),
            &self.master_key,
        )?;

        self.conn.execute(
            "INSERT INTO secrets (namespace, key, value, nonce, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(namespace, key) DO UPDATE SET
                value = excluded.value,
                nonce = excluded.nonce,
                updated_at = excluded.updated_at",
            params![
                namespace,
                key,
                ciphertext,
                nonce.as_slice(),
                Utc::now().timestamp_millis()
            ],
        )?;

        tracing::debug!(namespace, key, "stored vault entry");
        Ok(())
    }

    /// Delete the entry for `namespace`/`key`.
    ///
    /// Returns whether an entry existed. Deleting a missing key is not an
    /// error.
    pub fn remove(&self, namespace: &str, key: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM secrets WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;

        tracing::debug!(namespace, key, removed = rows > 0, "removed vault entry");
        Ok(rows > 0)
    }

    /// List the keys present in `namespace`, sorted.
    pub fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM secrets WHERE namespace = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![namespace], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Delete every entry in `namespace`, returning how many were removed.
    pub fn purge_namespace(&self, namespace: &str) -> Result<usize> {
        let rows = self
            .conn
            .execute("DELETE FROM secrets WHERE namespace = ?1", params![namespace])?;
        tracing::info!(namespace, removed = rows, "purged vault namespace");
        Ok(rows)
    }
}

/// Additional authenticated data binding a ciphertext to its row.
fn entry_aad(namespace: &str, key: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(namespace.len() + key.len() + 1);
    aad.extend_from_slice(namespace.as_bytes());
    aad.push(0);
    aad.extend_from_slice(key.as_bytes());
    aad
}
