//! The external authorization step.
//!
//! Login has to send the user somewhere the engine cannot see: a system
//! browser, an embedded webview, a test double. [`AuthorizationAgent`] is that
//! seam. The engine hands it an [`AuthorizationRequest`] and gets back either
//! what the redirect carried or a cancellation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use url::Url;

use crate::callback::{CallbackListener, CallbackParams};
use crate::error::{AuthError, CODE_TIMEOUT, Result};
use crate::token::TokenSet;

/// What the agent must present to the user.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Fully built `/authorize` URL.
    pub url: Url,
    pub redirect_uri: String,
    /// The CSRF `state` embedded in `url`.
    pub state: String,
}

/// What came back through the redirect.
#[derive(Debug, Clone)]
pub enum AuthorizationOutcome {
    /// `response_type=code`.
    Code { code: String, state: Option<String> },
    /// `response_type=token`; the tokens arrived with the redirect.
    Token { tokens: TokenSet, state: Option<String> },
    /// The user closed the window or denied consent.
    Cancelled,
}

#[async_trait]
pub trait AuthorizationAgent: Send + Sync {
    /// Drive the user through `request.url` and wait for the redirect.
    ///
    /// Implementations return [`AuthorizationOutcome::Cancelled`] for a user
    /// abort, never an error.
    async fn authorize(&self, request: AuthorizationRequest) -> Result<AuthorizationOutcome>;
}

type UrlHandler = Arc<dyn Fn(&Url) + Send + Sync>;

/// Agent that waits on a loopback HTTP listener bound to the redirect URI.
///
/// Opening the URL is left to the handler set with [`LoopbackAgent::on_url`];
/// without one the URL is only logged.
#[derive(Clone)]
pub struct LoopbackAgent {
    timeout: Duration,
    on_url: Option<UrlHandler>,
}

impl LoopbackAgent {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
            on_url: None,
        }
    }

    /// How long to wait for the redirect before giving up.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Called with the authorization URL once the listener is bound.
    #[must_use]
    pub fn on_url(mut self, handler: impl Fn(&Url) + Send + Sync + 'static) -> Self {
        self.on_url = Some(Arc::new(handler));
        self
    }
}

impl Default for LoopbackAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthorizationAgent for LoopbackAgent {
    async fn authorize(&self, request: AuthorizationRequest) -> Result<AuthorizationOutcome> {
        let listener = CallbackListener::bind(&request.redirect_uri).await?;

        match &self.on_url {
            Some(handler) => handler(&request.url),
            None => tracing::info!(url = %request.url, "open this URL to sign in"),
        }

        let params = match tokio::time::timeout(self.timeout, listener.accept()).await {
            Ok(params) => params?,
            Err(_) => {
                return Err(AuthError::authentication(format!(
                    "no authorization redirect within {}s",
                    self.timeout.as_secs()
                ))
                .with_code(CODE_TIMEOUT));
            }
        };

        outcome_from_params(params)
    }
}

/// Interpret redirect parameters.
pub fn outcome_from_params(params: CallbackParams) -> Result<AuthorizationOutcome> {
    if let Some(error) = params.error {
        if error == "access_denied" {
            tracing::info!("user declined authorization");
            return Ok(AuthorizationOutcome::Cancelled);
        }
        let reason = params.error_description.unwrap_or_else(|| error.clone());
        return Err(AuthError::authentication(reason).with_code(error));
    }

    if let Some(code) = params.code.filter(|c| !c.is_empty()) {
        return Ok(AuthorizationOutcome::Code {
            code,
            state: params.state,
        });
    }

    if let Some(access_token) = params.access_token.filter(|t| !t.is_empty()) {
        let tokens = TokenSet {
            refresh_token: params.refresh_token,
            id_token: params.id_token,
            token_type: params.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at: params
                .expires_in
                .and_then(chrono::Duration::try_seconds)
                .and_then(|ttl| Utc::now().checked_add_signed(ttl)),
            scope: params.scope,
            ..TokenSet::new(access_token)
        };
        return Ok(AuthorizationOutcome::Token {
            tokens,
            state: params.state,
        });
    }

    Err(AuthError::authentication("redirect carried neither a code nor a token"))
}
