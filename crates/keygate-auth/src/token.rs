//! Token sets and token endpoint responses.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default margin before `expires_at` at which a token counts as expired.
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::minutes(5);

/// Credentials issued by a successful login or refresh.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: String,
    /// Absolute expiry. `None` means the token never expires locally and only
    /// introspection can reject it.
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            id_token: None,
            token_type: "Bearer".to_string(),
            expires_at: None,
            scope: None,
        }
    }

    /// `now >= expires_at - buffer`; always `false` without an expiry.
    pub fn is_expired(&self, buffer: Duration) -> bool {
        self.is_expired_at(Utc::now(), buffer)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at
                .checked_sub_signed(buffer)
                .is_none_or(|threshold| now >= threshold),
            None => false,
        }
    }

    /// Fill fields the server omitted on refresh from the previous set.
    #[must_use]
    pub fn carry_forward(mut self, previous: &TokenSet) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = previous.refresh_token.clone();
        }
        if self.id_token.is_none() {
            self.id_token = previous.id_token.clone();
        }
        self
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Raw JSON body of a successful token endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    /// Convert into a [`TokenSet`], computing `expires_at` from `expires_in`.
    ///
    /// Returns `None` when the server omitted the access token.
    pub(crate) fn into_token_set(self, now: DateTime<Utc>) -> Option<TokenSet> {
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        Some(TokenSet {
            access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            id_token: self.id_token.filter(|t| !t.is_empty()),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at: self
                .expires_in
                .and_then(Duration::try_seconds)
                .and_then(|ttl| now.checked_add_signed(ttl)),
            scope: self.scope,
        })
    }
}

/// Raw error body from the token endpoint (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
pub(crate) struct TokenErrorResponse {
    pub(crate) error: String,
    pub(crate) error_description: Option<String>,
}
