//! The session state machine observed by the UI layer.
//!
//! A [`Session`] wraps one [`AuthService`] and owns the [`SessionState`]. The
//! state is published on a `tokio::sync::watch` channel: observers call
//! [`Session::subscribe`] and always see the latest state. Transitions made by
//! `initialize`, `login`, `logout` and `refresh` are serialized, so an
//! observer never sees two flows interleave their `Loading` phases.
//!
//! ```text
//!  Unknown ──initialize──▶ Loading ──▶ Authenticated | Unauthenticated | Error
//!  any     ──login───────▶ Loading ──▶ Authenticated | Error
//!  any     ──logout──────▶ Loading ──▶ Unauthenticated
//! ```
//!
//! Sessions are constructed and disposed explicitly by the caller; there is
//! no process-wide instance.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};

use crate::context::RequestContext;
use crate::error::{AuthError, Result};
use crate::service::AuthService;
use crate::user::User;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SessionState {
    #[default]
    Unknown,
    Loading,
    Authenticated(User),
    Unauthenticated,
    Error(AuthError),
}

impl SessionState {
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&AuthError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// Short label for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Loading => "loading",
            Self::Authenticated(_) => "authenticated",
            Self::Unauthenticated => "unauthenticated",
            Self::Error(_) => "error",
        }
    }
}

pub struct Session {
    service: Arc<AuthService>,
    state: watch::Sender<SessionState>,
    transitions: Mutex<()>,
}

impl Session {
    pub fn new(service: Arc<AuthService>) -> Self {
        let (state, _) = watch::channel(SessionState::Unknown);
        Self {
            service,
            state,
            transitions: Mutex::new(()),
        }
    }

    pub fn service(&self) -> &Arc<AuthService> {
        &self.service
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every subsequent transition. The channel
    /// closes when the session is disposed.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user().cloned()
    }

    pub fn error(&self) -> Option<AuthError> {
        self.state.borrow().error().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    /// Restore the session from stored credentials.
    pub async fn initialize(&self, ctx: &RequestContext) -> Result<Option<User>> {
        let _transition = self.transitions.lock().await;
        self.transition(SessionState::Loading);

        match self.service.restore_session(ctx).await {
            Ok(Some(user)) => {
                self.transition(SessionState::Authenticated(user.clone()));
                Ok(Some(user))
            }
            Ok(None) => {
                self.transition(SessionState::Unauthenticated);
                Ok(None)
            }
            Err(e) => {
                self.transition(SessionState::Error(e.clone()));
                Err(e)
            }
        }
    }

    /// Re-run the initialization check against the issuer.
    pub async fn validate_session(&self, ctx: &RequestContext) -> Result<Option<User>> {
        self.initialize(ctx).await
    }

    pub async fn refresh(&self, ctx: &RequestContext) -> Result<Option<User>> {
        self.initialize(ctx).await
    }

    /// Interactive login. On failure the state stays `Error` until the
    /// caller acts.
    pub async fn login(&self, ctx: &RequestContext) -> Result<User> {
        let _transition = self.transitions.lock().await;
        self.transition(SessionState::Loading);

        match self.service.login(ctx).await {
            Ok(user) => {
                self.transition(SessionState::Authenticated(user.clone()));
                Ok(user)
            }
            Err(e) => {
                self.transition(SessionState::Error(e.clone()));
                Err(e)
            }
        }
    }

    /// Log out. The session ends `Unauthenticated` whatever the outcome.
    pub async fn logout(&self, ctx: &RequestContext) -> Result<()> {
        let _transition = self.transitions.lock().await;
        self.transition(SessionState::Loading);
        let result = self.service.logout(ctx).await;
        self.transition(SessionState::Unauthenticated);
        result
    }

    /// Drop stored credentials without revoking them. Ends `Unauthenticated`
    /// like [`logout`](Self::logout).
    pub async fn forget(&self) -> Result<()> {
        let _transition = self.transitions.lock().await;
        let result = self.service.forget().await;
        self.transition(SessionState::Unauthenticated);
        result
    }

    /// A usable access token. Losing the token while `Authenticated` moves
    /// the session to `Unauthenticated`.
    pub async fn get_access_token(&self, ctx: &RequestContext) -> Option<String> {
        let token = self.service.get_access_token(ctx).await;
        if token.is_none() {
            let demoted = self.state.send_if_modified(|state| {
                if state.is_authenticated() {
                    *state = SessionState::Unauthenticated;
                    true
                } else {
                    false
                }
            });
            if demoted {
                tracing::info!("access token lost, session is now unauthenticated");
            }
        }
        token
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.service.has_role(role)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        self.service.has_any_role(roles)
    }

    pub fn has_all_roles<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        self.service.has_all_roles(roles)
    }

    /// Tear the session down. Subscribers see their channel close; stored
    /// credentials are left in place for the next session.
    pub fn dispose(self) {
        tracing::debug!(state = self.state.borrow().name(), "session disposed");
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        tracing::debug!(
            from = previous.name(),
            to = self.state.borrow().name(),
            "session state changed"
        );
    }
}
