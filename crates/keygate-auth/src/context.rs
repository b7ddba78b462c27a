//! Per-call timeout and cancellation.
//!
//! Every network call made by the engine runs under a [`RequestContext`].
//! When the deadline passes or the token is cancelled, the in-flight request
//! future is dropped and a [`AuthError::Network`] with code `timeout` or
//! `cancelled` is returned. Storage is only written after all network steps of
//! an operation have completed, so an interrupted call never leaves a partial
//! write behind.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{AuthError, CODE_CANCELLED, CODE_TIMEOUT, Result};

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound each network call made under this context.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abort network calls when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `fut` under this context. `fallback` applies when the caller
    /// supplied no timeout.
    pub(crate) async fn run<T, F>(&self, operation: &str, fallback: Option<Duration>, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guarded = async {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(
                    AuthError::network(format!("{operation} cancelled")).with_code(CODE_CANCELLED),
                ),
                result = fut => result,
            }
        };

        match self.timeout.or(fallback) {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(operation, timeout_ms = millis(limit), "network call timed out");
                    Err(AuthError::network(format!("{operation} timed out after {limit:?}"))
                        .with_code(CODE_TIMEOUT))
                }
            },
            None => guarded.await,
        }
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_result() {
        let ctx = RequestContext::new();
        let value = ctx.run("op", None, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn times_out() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(10));
        let err = ctx
            .run("introspection", None, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_TIMEOUT));
        assert!(matches!(err, AuthError::Network { .. }));
    }

    #[tokio::test]
    async fn fallback_timeout_applies_without_caller_timeout() {
        let ctx = RequestContext::new();
        let err = ctx
            .run("userinfo", Some(Duration::from_millis(10)), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_TIMEOUT));
    }

    #[tokio::test]
    async fn cancellation_wins() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new().with_cancellation(token.clone());
        token.cancel();

        let err = ctx
            .run("token exchange", None, async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_CANCELLED));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
