//! Coordination client: establishes a session, retrying until it succeeds.

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use clusterboot_types::{BootstrapError, RetryPolicy, config::CoordinationConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::service::Connector;

/// Establishes sessions against a configured set of hosts.
///
/// Each attempt is bounded by `connect_timeout`. Failed attempts are logged
/// and retried according to the client's [`RetryPolicy`], which by default
/// retries forever at a fixed interval.
pub struct CoordinationClient<C> {
    connector: C,
    hosts: Vec<String>,
    connect_timeout: Duration,
    policy: RetryPolicy,
}

impl<C: Connector> CoordinationClient<C> {
    /// Creates a client that retries forever every `connect_retry_delay`.
    pub fn new(connector: C, config: &CoordinationConfig) -> Self {
        Self {
            connector,
            hosts: config.hosts.clone(),
            connect_timeout: config.connect_timeout,
            policy: RetryPolicy::unbounded(config.connect_retry_delay),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Connects, retrying until a session is established.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Cancelled`] if `cancel` fires, or
    /// [`BootstrapError::CoordinationUnavailable`] if a bounded policy runs
    /// out of attempts.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<C::Session, BootstrapError> {
        let attempts = AtomicU32::new(0);

        self.policy
            .retry(
                cancel,
                || {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        let connecting = self.connector.connect(&self.hosts);
                        match tokio::time::timeout(self.connect_timeout, connecting).await {
                            Ok(Ok(session)) => {
                                info!(
                                    attempt,
                                    hosts = ?self.hosts,
                                    "Coordination session established"
                                );
                                Ok(session)
                            },
                            Ok(Err(e)) => Err(BootstrapError::CoordinationUnavailable {
                                message: e.to_string(),
                            }),
                            Err(_) => Err(BootstrapError::CoordinationUnavailable {
                                message: format!(
                                    "connect timed out after {}ms",
                                    self.connect_timeout.as_millis()
                                ),
                            }),
                        }
                    }
                },
                |e| matches!(e, BootstrapError::CoordinationUnavailable { .. }),
                |e, delay| {
                    warn!(
                        attempt = attempts.load(Ordering::SeqCst),
                        error = %e,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Coordination service unavailable, retrying"
                    );
                },
            )
            .await
            .inspect_err(|e| {
                if !matches!(e, BootstrapError::Cancelled) {
                    warn!(
                        attempts = attempts.load(Ordering::SeqCst),
                        error = %e,
                        "Giving up on coordination service"
                    );
                }
            })
    }
}
