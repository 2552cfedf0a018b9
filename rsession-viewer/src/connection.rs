//! Connecting to the host, with retry.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rsession_core::{ChannelRegistry, ConnectionInfo, Session, SessionConfig, SessionError};

/// How often and how long to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Pause between attempts.
    pub retry_interval: Duration,
    /// Bound on one attempt, handshake included.
    pub attempt_timeout: Duration,
    /// `None` keeps trying until cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

/// Connect to `address`, retrying per `policy`.
///
/// Returns `Ok(None)` when cancelled first. A version mismatch is not
/// retried, since the next attempt would fail the same way.
pub async fn connect_with_retry(
    address: &ConnectionInfo,
    config: &SessionConfig,
    policy: ReconnectPolicy,
    cancel: &CancellationToken,
) -> Result<Option<Session>, SessionError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        info!(%address, attempt, "connecting to host");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            r = tokio::time::timeout(
                policy.attempt_timeout,
                Session::connect(address, ChannelRegistry::viewer_defaults(), config.clone()),
            ) => r,
        };

        let err = match result {
            Ok(Ok(session)) => return Ok(Some(session)),
            Ok(Err(e @ SessionError::VersionMismatch { .. })) => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => SessionError::Timeout(policy.attempt_timeout),
        };

        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            warn!(attempt, "giving up: {err}");
            return Err(err);
        }
        warn!(attempt, retry_in = ?policy.retry_interval, "connection failed: {err}");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            _ = tokio::time::sleep(policy.retry_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn closed_port() -> ConnectionInfo {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        ConnectionInfo::new("127.0.0.1", port)
    }

    fn quick(max_attempts: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy {
            retry_interval: Duration::from_millis(20),
            attempt_timeout: Duration::from_millis(500),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let address = closed_port().await;
        let started = std::time::Instant::now();
        let config = SessionConfig::default();
        let err = connect_with_retry(&address, &config, quick(Some(3)), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_establishment_failure());
        // Two pauses between three attempts.
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        let address = closed_port().await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                connect_with_retry(&address, &SessionConfig::default(), quick(None), &cancel).await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        assert!(task.await.unwrap().unwrap().is_none());
    }
}
