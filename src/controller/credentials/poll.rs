//! Bounded, cancellable wait for a minted service account token

use super::provision::ProvisionedIdentity;
use super::remote::{RemoteCluster, RemoteClusterError};
use super::CredentialError;
use crate::controller::backoff::FibonacciBackoff;
use crate::observability;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Timing of the token poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPollSettings {
    /// Hard ceiling on the whole wait
    pub timeout: Duration,
    /// Gap before the second poll
    pub min_interval: Duration,
    /// Largest gap between polls
    pub max_interval: Duration,
}

impl TokenPollSettings {
    #[must_use]
    pub fn from_config(config: &crate::config::ControllerConfig) -> Self {
        Self {
            timeout: config.token_poll_timeout(),
            min_interval: Duration::from_millis(config.token_poll_min_interval_ms),
            max_interval: Duration::from_millis(config.token_poll_max_interval_ms),
        }
    }
}

impl Default for TokenPollSettings {
    fn default() -> Self {
        Self::from_config(&crate::config::ControllerConfig::default())
    }
}

/// Poll the token Secret of `identity` until the platform has minted a token
///
/// Fails with `Timeout` once `settings.timeout` elapses and with `Cancelled` as soon as
/// `cancel` fires. Credential rejections end the wait immediately; other read failures are
/// retried until the deadline.
pub async fn wait_for_token(
    remote: &dyn RemoteCluster,
    identity: &ProvisionedIdentity,
    settings: &TokenPollSettings,
    cancel: &CancellationToken,
) -> Result<String, CredentialError> {
    let started = Instant::now();
    let mut backoff = FibonacciBackoff::new(settings.min_interval, settings.max_interval);

    let polling = async {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match remote.read_token(identity).await {
                Ok(Some(token)) => return Ok(token),
                Ok(None) => {
                    debug!(
                        identity.token_secret = identity.token_secret.as_str(),
                        attempt, "token.not_minted_yet"
                    );
                }
                Err(e @ (RemoteClusterError::Unauthorized(_) | RemoteClusterError::Forbidden(_))) => {
                    return Err(CredentialError::Remote(e));
                }
                Err(e) => {
                    warn!(
                        identity.token_secret = identity.token_secret.as_str(),
                        attempt,
                        error = %e,
                        "token.read_failed"
                    );
                }
            }
            tokio::time::sleep(backoff.next_backoff()).await;
        }
    };

    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CredentialError::Cancelled),
        outcome = tokio::time::timeout(settings.timeout, polling) => match outcome {
            Ok(result) => result,
            Err(_) => Err(CredentialError::Timeout {
                token_secret: identity.token_secret.clone(),
                waited: settings.timeout,
            }),
        },
    };

    observability::metrics::observe_token_poll_duration(started.elapsed().as_secs_f64());
    result
}
