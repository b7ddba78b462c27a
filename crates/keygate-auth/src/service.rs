//! The auth service: token lifecycle for one logical session.
//!
//! [`AuthService`] is the only writer of its credential namespace. Every
//! operation that writes credentials (login, logout, refresh, and the profile
//! confirmation done while restoring a session) runs under one exclusive lock
//! owned by the instance. Helpers that assume the lock is held take the guard
//! as an argument.
//!
//! Concurrent refreshes collapse. Every successful write of a new token set
//! bumps a generation counter while the lock is held. Callers read the
//! counter before they look at stored tokens, and a caller that finds it
//! moved once it gets the lock returns the stored set instead of spending the
//! refresh token again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::agent::{AuthorizationAgent, AuthorizationOutcome, AuthorizationRequest};
use crate::client::OAuthClient;
use crate::config::{AuthConfig, RevocationStyle};
use crate::context::RequestContext;
use crate::credentials::{ALL_KEYS, CredentialStore};
use crate::error::{AuthError, CODE_CANCELLED, CODE_STORAGE, Result};
use crate::introspection::{IntrospectionResult, TokenTypeHint};
use crate::pkce::PkcePair;
use crate::roles::RoleSet;
use crate::storage::SecureStorage;
use crate::token::TokenSet;
use crate::user::User;

const USER_AGENT: &str = concat!("keygate/", env!("CARGO_PKG_VERSION"));

/// Why a refresh did not produce a token set.
#[derive(Debug)]
enum RefreshFailure {
    MissingTokens,
    MissingRefreshToken,
    Inactive,
    Rejected(AuthError),
    Transport(AuthError),
    Storage(AuthError),
    Cancelled,
}

impl RefreshFailure {
    fn from_call(err: AuthError) -> Self {
        if err.code() == Some(CODE_CANCELLED) {
            Self::Cancelled
        } else if matches!(err, AuthError::Authentication { .. }) {
            Self::Rejected(err)
        } else {
            Self::Transport(err)
        }
    }

    /// Caller cancellation says nothing about the refresh token itself.
    fn invalidates_session(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl From<RefreshFailure> for AuthError {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::MissingTokens => AuthError::token("no stored access token").with_code("no_tokens"),
            RefreshFailure::MissingRefreshToken => {
                AuthError::token("no refresh token available").with_code("no_refresh_token")
            }
            RefreshFailure::Inactive => AuthError::token("refresh token is no longer active").with_code("inactive"),
            RefreshFailure::Rejected(err) => {
                let code = err.code().unwrap_or("rejected").to_string();
                AuthError::token(format!("refresh rejected: {}", err.message())).with_code(code)
            }
            RefreshFailure::Transport(err) => {
                let code = err.code().unwrap_or("network").to_string();
                AuthError::token(format!("refresh failed: {}", err.message())).with_code(code)
            }
            RefreshFailure::Storage(err) => {
                AuthError::token(format!("refresh could not be persisted: {}", err.message())).with_code(CODE_STORAGE)
            }
            RefreshFailure::Cancelled => AuthError::token("refresh cancelled").with_code(CODE_CANCELLED),
        }
    }
}

pub struct AuthService {
    config: AuthConfig,
    client: OAuthClient,
    credentials: CredentialStore,
    agent: Arc<dyn AuthorizationAgent>,
    lock: Mutex<()>,
    generation: AtomicU64,
    user: RwLock<Option<User>>,
    expiry_buffer: chrono::Duration,
}

impl AuthService {
    /// Validate `config` and build a service around `storage` and `agent`.
    ///
    /// # Errors
    ///
    /// [`AuthError::Configuration`] carrying every violation, joined by `"; "`.
    pub fn new(
        config: AuthConfig,
        storage: Arc<dyn SecureStorage>,
        agent: Arc<dyn AuthorizationAgent>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AuthError::configuration(format!("cannot build HTTP client: {e}")))?;
        Self::with_http_client(config, storage, agent, http)
    }

    /// Like [`new`](Self::new) with a caller-supplied HTTP client.
    pub fn with_http_client(
        config: AuthConfig,
        storage: Arc<dyn SecureStorage>,
        agent: Arc<dyn AuthorizationAgent>,
        http: reqwest::Client,
    ) -> Result<Self> {
        config.ensure_valid()?;
        let client = OAuthClient::new(&config, http)?;

        tracing::debug!(
            client_id = %config.client_id,
            issuer = %config.issuer,
            namespace = %config.namespace,
            "auth service created"
        );

        Ok(Self {
            expiry_buffer: config.expiry_buffer(),
            config,
            client,
            credentials: CredentialStore::new(storage),
            agent,
            lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            user: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    // -- Login / logout -----------------------------------------------------

    /// Run the authorization code flow and persist the result.
    ///
    /// Tokens and profile are written only once the exchange and the userinfo
    /// fetch have both succeeded; any earlier failure leaves storage as it
    /// was. A write that fails partway puts the previous credentials back.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Authentication`] with code `cancelled` if the user
    ///   aborted, `state_mismatch` on a CSRF check failure, or "no access
    ///   token" if the exchange returned none.
    /// - [`AuthError::Network`] if the exchange or userinfo call failed.
    /// - [`AuthError::Token`] with code `storage` if persisting failed.
    pub async fn login(&self, ctx: &RequestContext) -> Result<User> {
        let guard = self.lock.lock().await;

        let pkce = PkcePair::generate(self.config.verifier_length)?;
        let state = Uuid::now_v7().to_string();
        let url = self.client.authorization_url(&state, pkce.challenge());

        tracing::info!(client_id = %self.config.client_id, "starting authorization code flow");

        let outcome = self
            .agent
            .authorize(AuthorizationRequest {
                url,
                redirect_uri: self.config.redirect_uri.clone(),
                state: state.clone(),
            })
            .await?;

        let tokens = match outcome {
            AuthorizationOutcome::Cancelled => {
                tracing::info!("login cancelled by user");
                return Err(AuthError::cancelled());
            }
            AuthorizationOutcome::Code { code, state: returned } => {
                verify_state(&state, returned.as_deref())?;
                self.client.exchange_code(&code, pkce.verifier(), ctx).await?
            }
            AuthorizationOutcome::Token { tokens, state: returned } => {
                verify_state(&state, returned.as_deref())?;
                tokens
            }
        };

        let user = self.client.user_info(&tokens.access_token, ctx).await?;

        let prior = self
            .credentials
            .snapshot()
            .await
            .map_err(|e| AuthError::storage(format!("cannot read current credentials: {}", e.message())))?;

        if let Err(e) = self.persist_login(&guard, &tokens, &user).await {
            tracing::error!(error = %e, "persisting login failed, restoring previous credentials");
            if let Err(restore) = self.credentials.restore(&prior).await {
                tracing::error!(error = %restore, "cannot restore previous credentials, clearing");
                self.credentials.clear_all().await;
                self.cache_user(&guard, None);
            }
            return Err(AuthError::storage(format!("cannot persist login: {}", e.message())));
        }
        self.bump_generation(&guard);
        self.cache_user(&guard, Some(user.clone()));

        tracing::info!(subject = %user.id, "login completed");
        Ok(user)
    }

    /// Revoke server-side (best effort) and clear every credential.
    ///
    /// Revocation failures are logged and ignored.
    ///
    /// # Errors
    ///
    /// [`AuthError::Token`] with code `storage` only if no credential key
    /// could be deleted at all.
    pub async fn logout(&self, ctx: &RequestContext) -> Result<()> {
        let guard = self.lock.lock().await;

        match self.credentials.load_tokens().await {
            Ok(Some(tokens)) => self.revoke_best_effort(&tokens, ctx).await,
            Ok(None) => tracing::debug!("logout without stored tokens"),
            Err(e) => tracing::warn!(error = %e, "cannot read tokens for revocation"),
        }

        self.clear_locked(&guard).await?;
        tracing::info!("logged out");
        Ok(())
    }

    /// Drop every stored credential without contacting the issuer.
    ///
    /// # Errors
    ///
    /// Same as [`logout`](Self::logout).
    pub async fn forget(&self) -> Result<()> {
        let guard = self.lock.lock().await;
        self.clear_locked(&guard).await?;
        tracing::info!("local credentials forgotten");
        Ok(())
    }

    async fn clear_locked(&self, guard: &MutexGuard<'_, ()>) -> Result<()> {
        let failed = self.credentials.clear_all().await;
        self.cache_user(guard, None);

        if failed.len() == ALL_KEYS.len() {
            return Err(AuthError::storage("credential store could not be cleared"));
        }
        Ok(())
    }

    async fn revoke_best_effort(&self, tokens: &TokenSet, ctx: &RequestContext) {
        let mut calls = Vec::with_capacity(2);
        match self.config.revocation {
            RevocationStyle::Revoke => {
                if let Some(refresh) = &tokens.refresh_token {
                    calls.push((refresh.as_str(), TokenTypeHint::RefreshToken));
                }
                calls.push((tokens.access_token.as_str(), TokenTypeHint::AccessToken));
            }
            RevocationStyle::Logout => calls.push((tokens.access_token.as_str(), TokenTypeHint::AccessToken)),
        }

        for (token, hint) in calls {
            if let Err(e) = self.client.revoke(token, hint, ctx).await {
                tracing::warn!(hint = hint.as_str(), error = %e, "revocation failed, continuing logout");
            }
        }
    }

    // -- Tokens -------------------------------------------------------------

    /// A currently usable access token, refreshed if needed.
    ///
    /// Returns `None` when nothing is stored or the refresh failed. A token
    /// inside the expiry buffer is still handed out when no refresh token
    /// exists and it has not actually expired.
    pub async fn get_access_token(&self, ctx: &RequestContext) -> Option<String> {
        let seen = self.generation();
        let tokens = match self.credentials.load_tokens().await {
            Ok(Some(tokens)) => tokens,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read stored access token");
                return None;
            }
        };

        if !tokens.is_expired(self.expiry_buffer) {
            return Some(tokens.access_token);
        }
        if tokens.refresh_token.is_none() && !tokens.is_expired(chrono::Duration::zero()) {
            return Some(tokens.access_token);
        }

        match self.refresh_after(seen, ctx).await {
            Ok(fresh) => Some(fresh.access_token),
            Err(e) => {
                tracing::info!(error = %e, "no usable access token");
                None
            }
        }
    }

    /// Exchange the stored refresh token for a new token set.
    ///
    /// Any failure other than caller cancellation clears the credential
    /// store before returning.
    ///
    /// # Errors
    ///
    /// Always [`AuthError::Token`]; the code names the cause (`no_tokens`,
    /// `no_refresh_token`, `inactive`, the server's OAuth error code,
    /// `timeout`, `storage`, `cancelled`, ...).
    pub async fn refresh_access_token(&self, ctx: &RequestContext) -> Result<TokenSet> {
        self.refresh_after(self.generation(), ctx).await
    }

    /// Refresh unless another caller stored a new token set after `seen` was
    /// read, in which case that set is returned.
    async fn refresh_after(&self, seen: u64, ctx: &RequestContext) -> Result<TokenSet> {
        let guard = self.lock.lock().await;
        match self.refresh_locked(&guard, seen, ctx).await {
            Ok(tokens) => Ok(tokens),
            Err(failure) => {
                if failure.invalidates_session() {
                    tracing::warn!(reason = ?failure, "refresh failed, invalidating session");
                    self.credentials.clear_all().await;
                    self.cache_user(&guard, None);
                }
                Err(failure.into())
            }
        }
    }

    async fn refresh_locked(
        &self,
        guard: &MutexGuard<'_, ()>,
        seen: u64,
        ctx: &RequestContext,
    ) -> std::result::Result<TokenSet, RefreshFailure> {
        let current = self
            .credentials
            .load_tokens()
            .await
            .map_err(RefreshFailure::Storage)?
            .ok_or(RefreshFailure::MissingTokens)?;

        if self.generation() != seen {
            tracing::debug!("token already refreshed by a concurrent caller");
            return Ok(current);
        }

        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or(RefreshFailure::MissingRefreshToken)?;

        if self.config.introspect_before_refresh {
            let status = self
                .client
                .introspect(&refresh_token, Some(TokenTypeHint::RefreshToken), ctx)
                .await
                .map_err(RefreshFailure::from_call)?;
            if !status.active {
                return Err(RefreshFailure::Inactive);
            }
        }

        let fresh = self
            .client
            .refresh(&refresh_token, ctx)
            .await
            .map_err(RefreshFailure::from_call)?
            .carry_forward(&current);

        self.credentials
            .save_tokens(&fresh)
            .await
            .map_err(RefreshFailure::Storage)?;
        self.bump_generation(guard);

        tracing::info!(expires_at = ?fresh.expires_at, "access token refreshed");
        Ok(fresh)
    }

    /// Authoritative check: introspect the stored access token.
    ///
    /// Never writes to storage.
    pub async fn is_authenticated(&self, ctx: &RequestContext) -> Result<bool> {
        let Some(tokens) = self.credentials.load_tokens().await? else {
            return Ok(false);
        };
        let result = self
            .client
            .introspect(&tokens.access_token, Some(TokenTypeHint::AccessToken), ctx)
            .await?;
        Ok(result.active)
    }

    /// RFC 7662 introspection of an arbitrary token.
    pub async fn introspect_token(
        &self,
        token: &str,
        hint: Option<TokenTypeHint>,
        ctx: &RequestContext,
    ) -> Result<IntrospectionResult> {
        self.client.introspect(token, hint, ctx).await
    }

    // -- Session restore ----------------------------------------------------

    /// Re-establish the session from stored credentials.
    ///
    /// `Ok(None)` means there is no usable session; stored credentials have
    /// been cleared if a refresh was attempted and failed. An introspection
    /// transport failure is returned as an error and leaves storage alone.
    pub async fn restore_session(&self, ctx: &RequestContext) -> Result<Option<User>> {
        let seen = self.generation();
        let Some(tokens) = self.credentials.load_tokens().await? else {
            tracing::debug!("no stored session");
            return Ok(None);
        };

        // Only a token that has actually expired skips introspection.
        if !tokens.is_expired(chrono::Duration::zero()) {
            let status = self
                .client
                .introspect(&tokens.access_token, Some(TokenTypeHint::AccessToken), ctx)
                .await?;
            if status.active {
                return self.confirm_user(&tokens.access_token, Some(&status), ctx).await.map(Some);
            }
            tracing::info!("stored access token is inactive, refreshing");
        } else {
            tracing::debug!("stored access token expired locally, refreshing");
        }

        match self.refresh_after(seen, ctx).await {
            Ok(fresh) => self.confirm_user(&fresh.access_token, None, ctx).await.map(Some),
            Err(e) if e.code() == Some(CODE_CANCELLED) => Err(e),
            Err(e) => {
                tracing::info!(error = %e, "session could not be restored");
                Ok(None)
            }
        }
    }

    /// Fetch the profile for `access_token`, falling back to the cached one,
    /// merge any roles from introspection, then persist and cache it.
    async fn confirm_user(
        &self,
        access_token: &str,
        introspection: Option<&IntrospectionResult>,
        ctx: &RequestContext,
    ) -> Result<User> {
        let mut user = match self.client.user_info(access_token, ctx).await {
            Ok(user) => user,
            Err(e) if e.code() == Some(CODE_CANCELLED) => return Err(e),
            Err(e) => match self.credentials.load_user().await.ok().flatten() {
                Some(cached) => {
                    tracing::warn!(error = %e, "userinfo failed, using cached profile");
                    cached
                }
                None => return Err(e),
            },
        };

        if let Some(claim) = introspection.and_then(IntrospectionResult::roles_claim) {
            user = user.with_role_claim(claim);
        }

        let guard = self.lock.lock().await;
        let still_current = matches!(
            self.credentials.load_tokens().await,
            Ok(Some(ref stored)) if stored.access_token == access_token
        );
        if !still_current {
            return Err(AuthError::token("session changed while it was being restored").with_code("superseded"));
        }
        if let Err(e) = self.credentials.save_user(&user).await {
            tracing::warn!(error = %e, "cannot cache user profile");
        }
        self.cache_user(&guard, Some(user.clone()));

        tracing::info!(subject = %user.id, "session confirmed");
        Ok(user)
    }

    // -- User and roles -----------------------------------------------------

    /// The profile held in memory for the current session.
    pub fn current_user(&self) -> Option<User> {
        self.user.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The current profile, from memory or else from storage. Storage errors
    /// read as "no user".
    pub async fn get_user(&self) -> Option<User> {
        if let Some(user) = self.current_user() {
            return Some(user);
        }
        match self.credentials.load_user().await {
            Ok(user) => user,
            Err(e) => {
                tracing::debug!(error = %e, "cannot read cached user");
                None
            }
        }
    }

    pub fn roles(&self) -> RoleSet {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(User::role_set)
            .unwrap_or_default()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles().has_role(role)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        self.roles().has_any_role(roles)
    }

    pub fn has_all_roles<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        self.roles().has_all_roles(roles)
    }

    async fn persist_login(&self, _guard: &MutexGuard<'_, ()>, tokens: &TokenSet, user: &User) -> Result<()> {
        self.credentials.save_tokens(tokens).await?;
        self.credentials.save_user(user).await
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self, _guard: &MutexGuard<'_, ()>) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn cache_user(&self, _guard: &MutexGuard<'_, ()>, user: Option<User>) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = user;
    }
}

fn verify_state(expected: &str, returned: Option<&str>) -> Result<()> {
    if returned == Some(expected) {
        return Ok(());
    }
    tracing::warn!(returned = returned.unwrap_or("<none>"), "authorization state mismatch");
    Err(AuthError::authentication("state parameter does not match the request").with_code("state_mismatch"))
}
