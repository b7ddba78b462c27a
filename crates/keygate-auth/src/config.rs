//! Client configuration and its validator.
//!
//! [`AuthConfig`] is plain data: it can be built in code or loaded from a
//! TOML file. It is checked exactly once, by
//! [`AuthService::new`](crate::service::AuthService::new), which refuses to
//! construct a service while [`AuthConfig::validate`] reports violations.
//!
//! ```toml
//! client_id = "desktop-app"
//! redirect_uri = "http://127.0.0.1:8400/callback"
//! issuer = "https://id.example.com/oauth2"
//! scopes = ["openid", "profile"]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};
use crate::pkce::{DEFAULT_VERIFIER_LEN, MAX_VERIFIER_LEN, MIN_VERIFIER_LEN};

/// Allowed values of the `response_type` authorization parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Code,
    Token,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Token => "token",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code" => Some(Self::Code),
            "token" => Some(Self::Token),
            _ => None,
        }
    }
}

/// Which best-effort call `logout` makes against the issuer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationStyle {
    /// RFC 7009 token revocation at `/revoke`.
    #[default]
    Revoke,
    /// Provider session logout at `/logout`.
    Logout,
}

/// OAuth client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// The OAuth client ID.
    pub client_id: String,

    /// Client secret for confidential clients. Public clients rely on PKCE.
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Redirect URI registered with the authorization server.
    pub redirect_uri: String,

    /// `code` or `token`.
    #[serde(default = "default_response_type")]
    pub response_type: String,

    /// Issuer base URL; endpoints are derived from it by fixed suffixes.
    pub issuer: Url,

    /// Scopes requested at authorization time.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Tokens within this many seconds of expiry are treated as expired.
    #[serde(default = "default_expiry_buffer_secs")]
    pub expiry_buffer_secs: u64,

    /// Length of generated PKCE verifiers (43..=128).
    #[serde(default = "default_verifier_length")]
    pub verifier_length: usize,

    /// Introspect the refresh token before spending it.
    #[serde(default = "default_true")]
    pub introspect_before_refresh: bool,

    #[serde(default)]
    pub revocation: RevocationStyle,

    /// Timeout applied to network calls when the caller supplies none.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// Credential store namespace owned by this session.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_response_type() -> String {
    ResponseType::Code.as_str().to_string()
}

fn default_expiry_buffer_secs() -> u64 {
    300
}

fn default_verifier_length() -> usize {
    DEFAULT_VERIFIER_LEN
}

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "default".to_string()
}

impl AuthConfig {
    /// Create a configuration with defaults for every optional field.
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>, issuer: Url) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            response_type: default_response_type(),
            issuer,
            scopes: Vec::new(),
            expiry_buffer_secs: default_expiry_buffer_secs(),
            verifier_length: default_verifier_length(),
            introspect_before_refresh: true,
            revocation: RevocationStyle::default(),
            request_timeout_secs: None,
            namespace: default_namespace(),
        }
    }

    /// Parse a configuration from TOML text.
    ///
    /// Only syntax and types are checked here; semantic validation happens
    /// when the service is constructed.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AuthError::configuration(format!("failed to parse config: {e}")))
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuthError::configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), "loaded auth config");
        Self::from_toml_str(&content)
    }

    /// Return every violation in this configuration, in a stable order.
    ///
    /// An empty list means the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.client_id.trim().is_empty() {
            violations.push("client_id must not be empty".to_string());
        }

        if self.redirect_uri.trim().is_empty() {
            violations.push("redirect_uri must not be empty".to_string());
        } else if !has_scheme(&self.redirect_uri) {
            violations.push(format!(
                "redirect_uri '{}' must include a scheme (e.g. https:// or myapp:/)",
                self.redirect_uri
            ));
        }

        if ResponseType::parse(&self.response_type).is_none() {
            violations.push(format!(
                "response_type '{}' must be one of: code, token",
                self.response_type
            ));
        }

        if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&self.verifier_length) {
            violations.push(format!(
                "verifier_length {} must be between {MIN_VERIFIER_LEN} and {MAX_VERIFIER_LEN}",
                self.verifier_length
            ));
        }

        if self.namespace.trim().is_empty() {
            violations.push("namespace must not be empty".to_string());
        }

        violations
    }

    /// Validate, failing with all violations joined into one message.
    pub fn ensure_valid(&self) -> Result<()> {
        let violations = self.validate();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(AuthError::configuration(violations.join("; ")))
        }
    }

    /// The parsed response type. Falls back to `code` for invalid configs,
    /// which never reach a constructed service.
    pub fn response_type(&self) -> ResponseType {
        ResponseType::parse(&self.response_type).unwrap_or(ResponseType::Code)
    }

    pub fn expiry_buffer(&self) -> chrono::Duration {
        i64::try_from(self.expiry_buffer_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Derive the issuer endpoints.
    pub fn endpoints(&self) -> Result<Endpoints> {
        Endpoints::from_issuer(&self.issuer, self.revocation)
    }
}

/// RFC 3986 scheme: ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) followed by ':'.
fn has_scheme(uri: &str) -> bool {
    let Some((scheme, _)) = uri.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Issuer endpoints derived from the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorize: Url,
    pub token: Url,
    pub userinfo: Url,
    pub introspect: Url,
    /// `/revoke` or `/logout` depending on [`RevocationStyle`].
    pub revocation: Url,
}

impl Endpoints {
    pub fn from_issuer(issuer: &Url, style: RevocationStyle) -> Result<Self> {
        let base = issuer.as_str().trim_end_matches('/');
        let join = |suffix: &str| -> Result<Url> { Ok(Url::parse(&format!("{base}/{suffix}"))?) };

        Ok(Self {
            authorize: join("authorize")?,
            token: join("token")?,
            userinfo: join("userinfo")?,
            introspect: join("introspect")?,
            revocation: match style {
                RevocationStyle::Revoke => join("revoke")?,
                RevocationStyle::Logout => join("logout")?,
            },
        })
    }
}
