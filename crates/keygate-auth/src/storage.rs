//! Secure key/value storage backends.
//!
//! [`SecureStorage`] is the seam between the engine and whatever keeps
//! secrets at rest. [`VaultStorage`] is the production backend: an
//! AES-256-GCM encrypted SQLite vault from `keygate-vault`, scoped to one
//! namespace. [`MemoryStorage`] keeps everything in process and is meant for
//! tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use keygate_vault::Vault;
use tokio::sync::RwLock;

use crate::error::{AuthError, Result};

#[async_trait]
pub trait SecureStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// [`SecureStorage`] backed by an encrypted [`Vault`].
///
/// `rusqlite::Connection` is `!Sync`, so the vault sits behind a mutex and
/// every call runs on the blocking pool.
#[derive(Clone)]
pub struct VaultStorage {
    vault: Arc<Mutex<Vault>>,
    namespace: String,
}

impl VaultStorage {
    pub fn new(vault: Vault, namespace: impl Into<String>) -> Self {
        Self::shared(Arc::new(Mutex::new(vault)), namespace)
    }

    /// Share one vault between several namespaces.
    pub fn shared(vault: Arc<Mutex<Vault>>, namespace: impl Into<String>) -> Self {
        Self {
            vault,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn with_vault<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Vault, &str) -> keygate_vault::Result<T> + Send + 'static,
    {
        let vault = Arc::clone(&self.vault);
        let namespace = self.namespace.clone();
        tokio::task::spawn_blocking(move || {
            let guard = vault
                .lock()
                .map_err(|_| AuthError::storage("vault mutex poisoned"))?;
            op(&*guard, &namespace).map_err(AuthError::from)
        })
        .await
        .map_err(|e| AuthError::storage(format!("vault task failed: {e}")))?
    }
}

#[async_trait]
impl SecureStorage for VaultStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_vault(move |vault, ns| vault.get(ns, &key)).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_vault(move |vault, ns| vault.put(ns, &key, &value)).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_vault(move |vault, ns| vault.remove(ns, &key).map(|_| ()))
            .await
    }
}

/// In-process [`SecureStorage`]. Nothing survives the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SecureStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault_storage(namespace: &str) -> VaultStorage {
        let vault = Vault::open_in_memory(&[7u8; 32]).unwrap();
        VaultStorage::new(vault, namespace)
    }

    #[tokio::test]
    async fn vault_storage_round_trip() {
        let storage = vault_storage("session-a");
        assert_eq!(storage.get("access_token").await.unwrap(), None);

        storage.put("access_token", "at_1").await.unwrap();
        assert_eq!(storage.get("access_token").await.unwrap().as_deref(), Some("at_1"));

        storage.put("access_token", "at_2").await.unwrap();
        assert_eq!(storage.get("access_token").await.unwrap().as_deref(), Some("at_2"));

        storage.remove("access_token").await.unwrap();
        storage.remove("access_token").await.unwrap();
        assert_eq!(storage.get("access_token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn shared_vault_isolates_namespaces() {
        let vault = Arc::new(Mutex::new(Vault::open_in_memory(&[1u8; 32]).unwrap()));
        let a = VaultStorage::shared(Arc::clone(&vault), "a");
        let b = VaultStorage::shared(vault, "b");

        a.put("user", "alice").await.unwrap();
        assert_eq!(b.get("user").await.unwrap(), None);
        assert_eq!(a.namespace(), "a");
    }

    #[tokio::test]
    async fn memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        storage.put("k", "v").await.unwrap();
        assert_eq!(storage.len().await, 1);
        assert_eq!(storage.get("k").await.unwrap().as_deref(), Some("v"));
        storage.remove("k").await.unwrap();
        assert!(storage.is_empty().await);
    }
}
