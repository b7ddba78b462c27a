//! Credential store: the fixed key set one session persists.
//!
//! | Key | Value |
//! |---|---|
//! | `access_token` | raw token |
//! | `refresh_token` | raw token |
//! | `id_token` | raw token |
//! | `user` | JSON-serialized [`User`] |
//! | `token_expiry` | epoch milliseconds |

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{AuthError, Result};
use crate::storage::SecureStorage;
use crate::token::TokenSet;
use crate::user::User;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const ID_TOKEN_KEY: &str = "id_token";
pub const USER_KEY: &str = "user";
pub const TOKEN_EXPIRY_KEY: &str = "token_expiry";

/// Every key [`CredentialStore::clear_all`] deletes.
pub const ALL_KEYS: [&str; 5] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    ID_TOKEN_KEY,
    USER_KEY,
    TOKEN_EXPIRY_KEY,
];

/// The raw value of every key in [`ALL_KEYS`] at one point in time.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSnapshot {
    entries: Vec<(&'static str, Option<String>)>,
}

impl CredentialSnapshot {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, v)| v.is_none())
    }
}

impl std::fmt::Debug for CredentialSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let present: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, v)| v.is_some())
            .map(|(k, _)| *k)
            .collect();
        f.debug_struct("CredentialSnapshot").field("present", &present).finish()
    }
}

#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn SecureStorage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    pub async fn read(&self, key: &str) -> Result<Option<String>> {
        self.storage.get(key).await
    }

    pub async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.storage.put(key, value).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.storage.remove(key).await
    }

    /// Delete every key in [`ALL_KEYS`], attempting all of them even when one
    /// fails. Failures are logged and the failed keys returned.
    pub async fn clear_all(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        for key in ALL_KEYS {
            if let Err(e) = self.storage.remove(key).await {
                tracing::warn!(key, error = %e, "failed to delete credential");
                failed.push(key);
            }
        }
        if failed.is_empty() {
            tracing::debug!("credential store cleared");
        }
        failed
    }

    pub async fn snapshot(&self) -> Result<CredentialSnapshot> {
        let mut entries = Vec::with_capacity(ALL_KEYS.len());
        for key in ALL_KEYS {
            entries.push((key, self.read(key).await?));
        }
        Ok(CredentialSnapshot { entries })
    }

    /// Put every key back to its value in `snapshot`, deleting keys that were
    /// absent. All keys are attempted; the first failure is returned.
    pub async fn restore(&self, snapshot: &CredentialSnapshot) -> Result<()> {
        let mut first_error = None;
        for (key, value) in &snapshot.entries {
            if let Err(e) = self.write_or_delete(key, value.as_deref()).await {
                tracing::warn!(key, error = %e, "failed to restore credential");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Reassemble the persisted token set, if an access token is stored.
    ///
    /// An unreadable `token_expiry` is treated as already expired.
    pub async fn load_tokens(&self) -> Result<Option<TokenSet>> {
        let Some(access_token) = self.read(ACCESS_TOKEN_KEY).await? else {
            return Ok(None);
        };

        let expires_at = match self.read(TOKEN_EXPIRY_KEY).await? {
            None => None,
            Some(raw) => Some(
                raw.trim()
                    .parse::<i64>()
                    .ok()
                    .and_then(DateTime::from_timestamp_millis)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            ),
        };

        Ok(Some(TokenSet {
            refresh_token: self.read(REFRESH_TOKEN_KEY).await?,
            id_token: self.read(ID_TOKEN_KEY).await?,
            expires_at,
            ..TokenSet::new(access_token)
        }))
    }

    /// Persist a token set. Optional fields that are absent are deleted so no
    /// stale value from an earlier set survives.
    ///
    /// `token_expiry` is written last. An unlocked reader racing this call can
    /// see the new token with the old expiry, never an old token with the new
    /// expiry.
    pub async fn save_tokens(&self, tokens: &TokenSet) -> Result<()> {
        self.write(ACCESS_TOKEN_KEY, &tokens.access_token).await?;
        self.write_or_delete(REFRESH_TOKEN_KEY, tokens.refresh_token.as_deref())
            .await?;
        self.write_or_delete(ID_TOKEN_KEY, tokens.id_token.as_deref())
            .await?;
        let expiry = tokens.expires_at.map(|at| at.timestamp_millis().to_string());
        self.write_or_delete(TOKEN_EXPIRY_KEY, expiry.as_deref())
            .await
    }

    /// The cached profile. A corrupt entry reads as absent.
    pub async fn load_user(&self) -> Result<Option<User>> {
        let Some(raw) = self.read(USER_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable cached user");
                Ok(None)
            }
        }
    }

    pub async fn save_user(&self, user: &User) -> Result<()> {
        let json = serde_json::to_string(user)
            .map_err(|e| AuthError::storage(format!("cannot serialize user: {e}")))?;
        self.write(USER_KEY, &json).await
    }

    async fn write_or_delete(&self, key: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) => self.write(key, value).await,
            None => self.delete(key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use chrono::TimeZone;

    /// Storage whose `remove` fails for one key.
    struct FlakyStorage {
        inner: MemoryStorage,
        broken_key: &'static str,
    }

    #[async_trait]
    impl SecureStorage for FlakyStorage {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: &str) -> Result<()> {
            self.inner.put(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<()> {
            if key == self.broken_key {
                return Err(AuthError::storage("keychain locked"));
            }
            self.inner.remove(key).await
        }
    }

    fn full_token_set() -> TokenSet {
        TokenSet {
            refresh_token: Some("rt".into()),
            id_token: Some("idt".into()),
            expires_at: Some(Utc.timestamp_millis_opt(1_900_000_000_123).unwrap()),
            ..TokenSet::new("at")
        }
    }

    #[tokio::test]
    async fn tokens_round_trip_with_millisecond_expiry() {
        let storage = MemoryStorage::new();
        let store = CredentialStore::new(Arc::new(storage.clone()));
        store.save_tokens(&full_token_set()).await.unwrap();

        assert_eq!(
            storage.get(TOKEN_EXPIRY_KEY).await.unwrap().as_deref(),
            Some("1900000000123")
        );

        let loaded = store.load_tokens().await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "at");
        assert_eq!(loaded.refresh_token.as_deref(), Some("rt"));
        assert_eq!(loaded.id_token.as_deref(), Some("idt"));
        assert_eq!(loaded.expires_at, full_token_set().expires_at);
    }

    #[tokio::test]
    async fn saving_a_smaller_set_removes_stale_fields() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        store.save_tokens(&full_token_set()).await.unwrap();
        store.save_tokens(&TokenSet::new("at_2")).await.unwrap();

        let loaded = store.load_tokens().await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "at_2");
        assert!(loaded.refresh_token.is_none());
        assert!(loaded.expires_at.is_none());
    }

    #[tokio::test]
    async fn garbage_expiry_reads_as_expired() {
        let storage = MemoryStorage::new();
        storage.put(ACCESS_TOKEN_KEY, "at").await.unwrap();
        storage.put(TOKEN_EXPIRY_KEY, "soon").await.unwrap();

        let store = CredentialStore::new(Arc::new(storage));
        let loaded = store.load_tokens().await.unwrap().unwrap();
        assert!(loaded.is_expired(chrono::Duration::zero()));
    }

    #[tokio::test]
    async fn clear_all_attempts_every_key() {
        let inner = MemoryStorage::new();
        for key in ALL_KEYS {
            inner.put(key, "x").await.unwrap();
        }
        let store = CredentialStore::new(Arc::new(FlakyStorage {
            inner: inner.clone(),
            broken_key: REFRESH_TOKEN_KEY,
        }));

        let failed = store.clear_all().await;

        assert_eq!(failed, vec![REFRESH_TOKEN_KEY]);
        assert_eq!(inner.len().await, 1);
        assert!(inner.get(TOKEN_EXPIRY_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_user_reads_as_none() {
        let storage = MemoryStorage::new();
        storage.put(USER_KEY, "{not json").await.unwrap();
        let store = CredentialStore::new(Arc::new(storage));
        assert!(store.load_user().await.unwrap().is_none());

        let user = User::new("u-1");
        store.save_user(&user).await.unwrap();
        assert_eq!(store.load_user().await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn restore_puts_back_values_and_absences() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        store.save_tokens(&TokenSet::new("old-at")).await.unwrap();
        let before = store.snapshot().await.unwrap();
        assert_eq!(before.get(ACCESS_TOKEN_KEY), Some("old-at"));

        store.save_tokens(&full_token_set()).await.unwrap();
        store.save_user(&User::new("u-2")).await.unwrap();
        store.restore(&before).await.unwrap();

        assert_eq!(store.snapshot().await.unwrap(), before);
        assert!(store.read(REFRESH_TOKEN_KEY).await.unwrap().is_none());
        assert!(store.read(USER_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_debug_hides_values() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        assert!(store.snapshot().await.unwrap().is_empty());

        store.save_tokens(&TokenSet::new("secret-at")).await.unwrap();
        let rendered = format!("{:?}", store.snapshot().await.unwrap());
        assert!(rendered.contains("access_token"));
        assert!(!rendered.contains("secret-at"));
    }
}
