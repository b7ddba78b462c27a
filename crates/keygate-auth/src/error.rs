//! Error types for the auth engine crate.
//!
//! Every public operation surfaces failures through [`AuthError`]. The four
//! variants mirror the four failure domains a consumer has to react to
//! differently: bad configuration, a failed or aborted login, an unusable
//! token, and a transport problem. Each carries a human-readable message and
//! an optional machine-readable code.
//!
//! `AuthError` is `Clone` so that a failure can be both returned to the caller
//! and parked in [`SessionState::Error`](crate::session::SessionState::Error).

/// Unified error type for the Keygate auth engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The client configuration is invalid. Raised at construction time.
    #[error("invalid configuration: {message}")]
    Configuration {
        message: String,
        code: Option<String>,
    },

    /// Login failed or was cancelled by the user.
    #[error("authentication failed: {message}")]
    Authentication {
        message: String,
        code: Option<String>,
    },

    /// A token could not be refreshed, validated or persisted.
    #[error("token error: {message}")]
    Token {
        message: String,
        code: Option<String>,
    },

    /// A non-2xx response or transport failure talking to the issuer.
    #[error("network error: {message}")]
    Network {
        message: String,
        code: Option<String>,
        /// HTTP status when the server answered at all.
        status: Option<u16>,
    },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Machine-readable code attached to user-aborted logins.
pub const CODE_CANCELLED: &str = "cancelled";

/// Machine-readable code attached to timed-out network calls.
pub const CODE_TIMEOUT: &str = "timeout";

/// Machine-readable code attached to credential storage failures.
pub const CODE_STORAGE: &str = "storage";

impl AuthError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            code: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            code: None,
        }
    }

    pub fn token(message: impl Into<String>) -> Self {
        Self::Token {
            message: message.into(),
            code: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            code: None,
            status: None,
        }
    }

    /// The user aborted the external authorization step.
    pub fn cancelled() -> Self {
        Self::authentication("cancelled").with_code(CODE_CANCELLED)
    }

    /// A credential storage operation failed.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::token(message).with_code(CODE_STORAGE)
    }

    /// Attach (or replace) the machine-readable code.
    #[must_use]
    pub fn with_code(mut self, new_code: impl Into<String>) -> Self {
        let new_code = Some(new_code.into());
        match &mut self {
            Self::Configuration { code, .. }
            | Self::Authentication { code, .. }
            | Self::Token { code, .. }
            | Self::Network { code, .. } => *code = new_code,
        }
        self
    }

    /// Attach an HTTP status. No-op for non-network errors.
    #[must_use]
    pub fn with_status(mut self, new_status: u16) -> Self {
        if let Self::Network { status, .. } = &mut self {
            *status = Some(new_status);
        }
        self
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Configuration { message, .. }
            | Self::Authentication { message, .. }
            | Self::Token { message, .. }
            | Self::Network { message, .. } => message,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Configuration { code, .. }
            | Self::Authentication { code, .. }
            | Self::Token { code, .. }
            | Self::Network { code, .. } => code.as_deref(),
        }
    }

    /// HTTP status for [`AuthError::Network`] failures, if the server replied.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Network { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether this is the distinct user-cancelled login failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Authentication { .. }) && self.code() == Some(CODE_CANCELLED)
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        let mut mapped = Self::network(err.to_string());
        if err.is_timeout() {
            mapped = mapped.with_code(CODE_TIMEOUT);
        }
        if let Some(status) = err.status() {
            mapped = mapped.with_status(status.as_u16());
        }
        mapped
    }
}

impl From<keygate_vault::VaultError> for AuthError {
    fn from(err: keygate_vault::VaultError) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<url::ParseError> for AuthError {
    fn from(err: url::ParseError) -> Self {
        Self::configuration(format!("invalid url: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_distinct_authentication_error() {
        let err = AuthError::cancelled();
        assert!(err.is_cancelled());
        assert_eq!(err.message(), "cancelled");
        assert_eq!(err.to_string(), "authentication failed: cancelled");

        let other = AuthError::network("cancelled").with_code(CODE_CANCELLED);
        assert!(!other.is_cancelled());
    }

    #[test]
    fn with_code_and_status() {
        let err = AuthError::network("HTTP 503")
            .with_code("unavailable")
            .with_status(503);
        assert_eq!(err.code(), Some("unavailable"));
        assert_eq!(err.status(), Some(503));

        let token = AuthError::token("rejected").with_status(400);
        assert_eq!(token.status(), None);
    }

    #[test]
    fn vault_errors_become_storage_token_errors() {
        let err: AuthError = keygate_vault::VaultError::Internal("disk gone".into()).into();
        assert!(matches!(err, AuthError::Token { .. }));
        assert_eq!(err.code(), Some(CODE_STORAGE));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AuthError>();
    }
}
