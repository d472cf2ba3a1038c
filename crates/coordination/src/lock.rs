//! The bootstrap lock: a named, session-bound distributed mutex.

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use clusterboot_types::{BootstrapError, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::CoordinationError,
    service::{LockHandle, Session},
};

/// The lock that serializes the bootstrap decision across nodes.
///
/// Each attempt waits at most `timeout`. Timed-out attempts are retried up to
/// the policy's limit; once exhausted, acquisition fails with
/// [`BootstrapError::BootstrapFailure`]. Any other coordination error ends
/// acquisition immediately so the caller can re-establish its session.
#[derive(Debug, Clone)]
pub struct BootstrapLock {
    path: String,
    timeout: Duration,
    policy: RetryPolicy,
}

impl BootstrapLock {
    /// Creates a lock at `path`.
    pub fn new(path: impl Into<String>, timeout: Duration, policy: RetryPolicy) -> Self {
        Self { path: path.into(), timeout, policy }
    }

    /// The lock path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Acquires the lock, retrying timed-out attempts.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::BootstrapFailure`] when every attempt timed out.
    /// - [`BootstrapError::SessionLost`] or
    ///   [`BootstrapError::CoordinationUnavailable`] on other service errors.
    /// - [`BootstrapError::Cancelled`] if `cancel` fires while waiting.
    pub async fn acquire<S>(
        &self,
        session: &S,
        cancel: &CancellationToken,
    ) -> Result<LockHandle, BootstrapError>
    where
        S: Session + ?Sized,
    {
        let attempts = AtomicU32::new(0);

        let acquired = self
            .policy
            .retry(
                cancel,
                || {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!(lock = %self.path, attempt, "Requesting bootstrap lock");
                    async move {
                        match session.acquire_lock(&self.path, self.timeout).await {
                            Ok(handle) => {
                                info!(lock = %self.path, attempt, "Acquired bootstrap lock");
                                Ok(handle)
                            },
                            Err(e) if e.is_timeout() => Err(BootstrapError::LockTimeout {
                                path: self.path.clone(),
                                attempt,
                            }),
                            Err(e) => Err(e.into()),
                        }
                    }
                },
                |e| matches!(e, BootstrapError::LockTimeout { .. }),
                |e, _| warn!(error = %e, "Bootstrap lock attempt timed out"),
            )
            .await;

        match acquired {
            Err(BootstrapError::LockTimeout { path, attempt }) => {
                warn!(lock = %path, attempts = attempt, "Bootstrap lock attempts exhausted");
                Err(BootstrapError::BootstrapFailure { path, attempts: attempt })
            },
            other => other,
        }
    }

    /// Releases a held lock.
    ///
    /// A release on an expired session is not an error: the service already
    /// dropped the lock along with the session.
    pub async fn release<S>(&self, session: &S, handle: LockHandle) -> Result<(), CoordinationError>
    where
        S: Session + ?Sized,
    {
        match session.release_lock(handle).await {
            Ok(()) => {
                info!(lock = %self.path, "Released bootstrap lock");
                Ok(())
            },
            Err(e) if e.is_session_loss() => {
                warn!(lock = %self.path, error = %e, "Session gone before lock release");
                Ok(())
            },
            Err(e) => Err(e),
        }
    }
}
