//! HTTP side of the engine: the issuer's OAuth 2.0 endpoints.
//!
//! [`OAuthClient`] is stateless apart from its configuration and a shared
//! `reqwest::Client`. It never touches storage; persisting what it returns is
//! the job of [`AuthService`](crate::service::AuthService).
//!
//! | Call | Endpoint | RFC |
//! |---|---|---|
//! | [`authorization_url`](OAuthClient::authorization_url) | `/authorize` | 6749, 7636 |
//! | [`exchange_code`](OAuthClient::exchange_code) | `/token` | 6749 4.1.3 |
//! | [`refresh`](OAuthClient::refresh) | `/token` | 6749 6 |
//! | [`introspect`](OAuthClient::introspect) | `/introspect` | 7662 |
//! | [`user_info`](OAuthClient::user_info) | `/userinfo` | OIDC Core 5.3 |
//! | [`revoke`](OAuthClient::revoke) | `/revoke` or `/logout` | 7009 |

use std::time::Duration;

use chrono::Utc;
use url::Url;

use crate::config::{AuthConfig, Endpoints, RevocationStyle};
use crate::context::RequestContext;
use crate::error::{AuthError, Result};
use crate::introspection::{IntrospectionResult, TokenTypeHint};
use crate::pkce::CHALLENGE_METHOD;
use crate::token::{TokenErrorResponse, TokenResponse, TokenSet};
use crate::user::User;

pub struct OAuthClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    response_type: &'static str,
    scopes: Vec<String>,
    revocation: RevocationStyle,
    default_timeout: Option<Duration>,
}

impl OAuthClient {
    pub fn new(config: &AuthConfig, http: reqwest::Client) -> Result<Self> {
        Ok(Self {
            http,
            endpoints: config.endpoints()?,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            response_type: config.response_type().as_str(),
            scopes: config.scopes.clone(),
            revocation: config.revocation,
            default_timeout: config.request_timeout(),
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Build the URL the user agent must visit.
    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Url {
        let mut url = self.endpoints.authorize.clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("client_id", &self.client_id);
            params.append_pair("redirect_uri", &self.redirect_uri);
            params.append_pair("response_type", self.response_type);
            params.append_pair("code_challenge", code_challenge);
            params.append_pair("code_challenge_method", CHALLENGE_METHOD);
            params.append_pair("state", state);
            if !self.scopes.is_empty() {
                params.append_pair("scope", &self.scopes.join(" "));
            }
        }
        url
    }

    /// Exchange an authorization code plus PKCE verifier for tokens.
    ///
    /// # Errors
    ///
    /// [`AuthError::Authentication`] if the server rejects the grant or omits
    /// the access token ("no access token"); [`AuthError::Network`] on
    /// transport failure.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str, ctx: &RequestContext) -> Result<TokenSet> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret));
        }

        tracing::debug!(token_url = %self.endpoints.token, "exchanging authorization code");
        self.post_token("token exchange", &params, ctx).await
    }

    /// Spend a refresh token at the token endpoint.
    pub async fn refresh(&self, refresh_token: &str, ctx: &RequestContext) -> Result<TokenSet> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret));
        }

        tracing::debug!(token_url = %self.endpoints.token, "refreshing access token");
        self.post_token("token refresh", &params, ctx).await
    }

    /// RFC 7662 introspection.
    pub async fn introspect(
        &self,
        token: &str,
        hint: Option<TokenTypeHint>,
        ctx: &RequestContext,
    ) -> Result<IntrospectionResult> {
        let mut params = vec![("token", token), ("client_id", self.client_id.as_str())];
        if let Some(hint) = hint {
            params.push(("token_type_hint", hint.as_str()));
        }
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret));
        }

        ctx.run("introspection", self.default_timeout, async {
            let response = self
                .http
                .post(self.endpoints.introspect.clone())
                .form(&params)
                .send()
                .await?;
            let response = ensure_success("introspection", response).await?;
            let result: IntrospectionResult = response.json().await?;
            tracing::debug!(active = result.active, "token introspected");
            Ok(result)
        })
        .await
    }

    /// Fetch the profile of the user owning `access_token`.
    pub async fn user_info(&self, access_token: &str, ctx: &RequestContext) -> Result<User> {
        ctx.run("userinfo", self.default_timeout, async {
            let response = self
                .http
                .get(self.endpoints.userinfo.clone())
                .bearer_auth(access_token)
                .send()
                .await?;
            let response = ensure_success("userinfo", response).await?;
            let profile: serde_json::Value = response.json().await?;
            User::from_profile(profile).ok_or_else(|| {
                AuthError::network("userinfo response has no subject identifier")
                    .with_code("invalid_profile")
            })
        })
        .await
    }

    /// Best-effort server-side invalidation of `token`.
    pub async fn revoke(&self, token: &str, hint: TokenTypeHint, ctx: &RequestContext) -> Result<()> {
        let mut params = vec![("token", token), ("client_id", self.client_id.as_str())];
        if self.revocation == RevocationStyle::Revoke {
            params.push(("token_type_hint", hint.as_str()));
        }
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret));
        }

        ctx.run("revocation", self.default_timeout, async {
            let mut request = self.http.post(self.endpoints.revocation.clone()).form(&params);
            if self.revocation == RevocationStyle::Logout {
                request = request.bearer_auth(token);
            }
            let response = request.send().await?;
            ensure_success("revocation", response).await?;
            tracing::debug!(hint = hint.as_str(), "token revoked");
            Ok(())
        })
        .await
    }

    async fn post_token(&self, operation: &str, params: &[(&str, &str)], ctx: &RequestContext) -> Result<TokenSet> {
        ctx.run(operation, self.default_timeout, async {
            let response = self
                .http
                .post(self.endpoints.token.clone())
                .form(params)
                .send()
                .await?;
            Self::parse_token_response(response).await
        })
        .await
    }

    async fn parse_token_response(response: reqwest::Response) -> Result<TokenSet> {
        let status = response.status();

        if status.is_success() {
            let body: TokenResponse = response.json().await?;
            return body
                .into_token_set(Utc::now())
                .ok_or_else(|| AuthError::authentication("no access token").with_code("no_access_token"));
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(error) => {
                let reason = error.error_description.unwrap_or_else(|| error.error.clone());
                Err(AuthError::authentication(reason).with_code(error.error))
            }
            Err(_) => Err(AuthError::authentication(format!("HTTP {status}: {body}"))),
        }
    }
}

/// Map non-2xx responses to [`AuthError::Network`] carrying the status.
async fn ensure_success(operation: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AuthError::network(format!("{operation} failed: HTTP {status}: {body}")).with_status(status.as_u16()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkce::challenge_for;
    use std::collections::HashMap;

    fn test_config() -> AuthConfig {
        let mut config = AuthConfig::new(
            "test-client-id",
            "http://127.0.0.1:8400/callback",
            Url::parse("https://auth.example.com/realms/main").unwrap(),
        );
        config.scopes = vec!["openid".to_string(), "profile".to_string()];
        config
    }

    #[test]
    fn authorization_url_includes_all_params() {
        let client = OAuthClient::new(&test_config(), reqwest::Client::new()).unwrap();
        let challenge = challenge_for("test-verifier");
        let url = client.authorization_url("random-state", &challenge);

        assert_eq!(url.path(), "/realms/main/authorize");
        let params: HashMap<_, _> = url.query_pairs().collect();
        assert_eq!(params["client_id"], "test-client-id");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8400/callback");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["code_challenge"], challenge.as_str());
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["state"], "random-state");
        assert_eq!(params["scope"], "openid profile");
    }

    #[test]
    fn authorization_url_without_scopes() {
        let mut config = test_config();
        config.scopes.clear();
        config.response_type = "token".into();
        let client = OAuthClient::new(&config, reqwest::Client::new()).unwrap();
        let url = client.authorization_url("s", "c");

        let params: HashMap<_, _> = url.query_pairs().collect();
        assert!(!params.contains_key("scope"));
        assert_eq!(params["response_type"], "token");
    }

    #[test]
    fn oauth_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OAuthClient>();
    }
}
