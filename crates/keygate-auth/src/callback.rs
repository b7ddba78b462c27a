//! Loopback HTTP listener for the OAuth redirect.
//!
//! The authorization server redirects the browser to the configured
//! `redirect_uri`, e.g. `http://127.0.0.1:8400/callback?code=xxx&state=yyy`.
//! [`CallbackListener`] binds that address before the browser is opened,
//! answers the first request on the redirect path, and hands back the query
//! parameters. Requests to any other path (favicons, probes) get a 404 and
//! are otherwise ignored.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use crate::error::{AuthError, Result};

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Signed in</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #f5f5f5;
            color: #333;
        }
        .card { text-align: center; padding: 3rem; background: white; border-radius: 12px; }
        h1 { margin-bottom: 0.5rem; }
    </style>
</head>
<body>
    <div class="card">
        <h1>You're signed in</h1>
        <p>You can close this tab and return to the application.</p>
    </div>
</body>
</html>"#;

const DENIED_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Sign-in not completed</title></head>
<body>
    <h1>Sign-in was not completed</h1>
    <p>You can close this tab and return to the application.</p>
</body>
</html>"#;

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    /// Present only for `response_type=token` providers that deliver tokens
    /// in the query.
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

impl CallbackParams {
    /// Parse a raw query string (`a=1&b=2`), percent-decoding values.
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "code" => params.code = Some(value),
                "state" => params.state = Some(value),
                "error" => params.error = Some(value),
                "error_description" => params.error_description = Some(value),
                "access_token" => params.access_token = Some(value),
                "refresh_token" => params.refresh_token = Some(value),
                "id_token" => params.id_token = Some(value),
                "token_type" => params.token_type = Some(value),
                "expires_in" => params.expires_in = value.parse().ok(),
                "scope" => params.scope = Some(value),
                _ => {}
            }
        }
        params
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A bound loopback listener waiting for a single redirect.
pub struct CallbackListener {
    listener: TcpListener,
    path: String,
}

impl CallbackListener {
    /// Bind the host and port named by `redirect_uri`.
    ///
    /// # Errors
    ///
    /// [`AuthError::Configuration`] if the URI is not an `http` loopback
    /// address; [`AuthError::Authentication`] if the port cannot be bound.
    pub async fn bind(redirect_uri: &str) -> Result<Self> {
        let url = Url::parse(redirect_uri)?;
        if url.scheme() != "http" {
            return Err(AuthError::configuration(format!(
                "loopback callback needs an http redirect_uri, got {}",
                url.scheme()
            )));
        }
        let host = match url.host_str() {
            Some("localhost") | None => "127.0.0.1",
            Some(host) => host,
        };
        let port = url.port_or_known_default().unwrap_or(80);
        let addr = format!("{host}:{port}");

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AuthError::authentication(format!("cannot bind callback listener on {addr}: {e}")))?;

        tracing::info!(addr = %addr, path = url.path(), "callback listener bound");

        Ok(Self {
            listener,
            path: url.path().to_string(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| AuthError::authentication(format!("callback listener has no address: {e}")))
    }

    /// Wait for the redirect and answer it. Consumes the listener, which
    /// closes the port on return.
    pub async fn accept(self) -> Result<CallbackParams> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(|e| AuthError::authentication(format!("callback accept failed: {e}")))?;
            tracing::debug!(peer = %peer, "accepted callback connection");

            match self.serve(stream).await {
                Ok(Some(params)) => {
                    tracing::info!(error = params.error.as_deref(), "authorization redirect received");
                    return Ok(params);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(peer = %peer, error = %e, "callback connection failed, still waiting"),
            }
        }
    }

    /// Handle one connection. `None` means the request was not the redirect.
    async fn serve(&self, mut stream: TcpStream) -> std::io::Result<Option<CallbackParams>> {
        // Redirects are small GET requests.
        let mut buf = [0u8; 8192];
        let n = stream.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..n]);

        let Some(target) = request_target(&request) else {
            write_response(&mut stream, "400 Bad Request", "").await?;
            return Ok(None);
        };
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        if path != self.path {
            write_response(&mut stream, "404 Not Found", "").await?;
            return Ok(None);
        }

        let params = CallbackParams::from_query(query);
        let body = if params.is_error() { DENIED_HTML } else { SUCCESS_HTML };
        write_response(&mut stream, "200 OK", body).await?;
        Ok(Some(params))
    }
}

/// The target of `GET /path?query HTTP/1.1`.
fn request_target(request: &str) -> Option<&str> {
    let mut parts = request.lines().next()?.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    (method == "GET").then_some(target)
}

async fn write_response(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_code_and_state() {
        let params = CallbackParams::from_query("code=abc123&state=xyz789&session_state=s");
        assert_eq!(params.code.as_deref(), Some("abc123"));
        assert_eq!(params.state.as_deref(), Some("xyz789"));
        assert!(!params.is_error());
    }

    #[test]
    fn percent_and_plus_decoding() {
        let params = CallbackParams::from_query("code=abc%20def&state=foo+bar%2B1");
        assert_eq!(params.code.as_deref(), Some("abc def"));
        assert_eq!(params.state.as_deref(), Some("foo bar+1"));
    }

    #[test]
    fn parses_error_redirect() {
        let params = CallbackParams::from_query("error=access_denied&error_description=User+denied&state=s");
        assert!(params.is_error());
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("User denied"));
    }

    #[test]
    fn parses_token_response_params() {
        let params = CallbackParams::from_query("access_token=at&token_type=Bearer&expires_in=3600&state=s");
        assert_eq!(params.access_token.as_deref(), Some("at"));
        assert_eq!(params.expires_in, Some(3600));
        assert!(params.code.is_none());
    }

    #[test]
    fn request_target_requires_get() {
        assert_eq!(request_target("GET /cb?code=1 HTTP/1.1\r\n\r\n"), Some("/cb?code=1"));
        assert_eq!(request_target("POST /cb HTTP/1.1\r\n\r\n"), None);
        assert_eq!(request_target(""), None);
        assert_eq!(request_target("NOTHTTP"), None);
    }

    #[tokio::test]
    async fn rejects_non_http_redirect() {
        let err = CallbackListener::bind("com.example.app:/cb").await.err().unwrap();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    async fn send(port: u16, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = format!("GET {target} HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn receives_redirect_and_skips_other_paths() {
        let listener = CallbackListener::bind("http://127.0.0.1:0/callback").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = tokio::spawn(async move {
            let favicon = send(port, "/favicon.ico").await;
            assert!(favicon.contains("404 Not Found"));

            let redirect = send(port, "/callback?code=test_code_42&state=test_state_99").await;
            assert!(redirect.contains("200 OK"));
            assert!(redirect.contains("signed in"));
        });

        let params = listener.accept().await.unwrap();
        client.await.unwrap();

        assert_eq!(params.code.as_deref(), Some("test_code_42"));
        assert_eq!(params.state.as_deref(), Some("test_state_99"));
    }

    #[tokio::test]
    async fn reset_connection_does_not_end_the_wait() {
        let listener = CallbackListener::bind("http://127.0.0.1:0/callback").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = tokio::spawn(async move {
            let preconnect = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            preconnect.set_linger(Some(std::time::Duration::ZERO)).unwrap();
            drop(preconnect);

            send(port, "/callback?code=after_reset&state=s").await
        });

        let params = listener.accept().await.unwrap();
        assert!(client.await.unwrap().contains("200 OK"));
        assert_eq!(params.code.as_deref(), Some("after_reset"));
    }
}
