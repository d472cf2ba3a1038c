//! Health monitor: polls the engine until it reports primary status.

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use clusterboot_types::{BootstrapError, RetryPolicy, config::NodeConfig};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::ReplicationEngine;

/// Polls engine status at a fixed interval.
///
/// Any status other than primary is transient. Without a `max_wait` the
/// monitor polls until primary or cancellation; with one it gives up with
/// [`BootstrapError::HealthCheckFailure`].
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    policy: RetryPolicy,
    max_wait: Option<Duration>,
}

impl HealthMonitor {
    /// Creates a monitor polling every `interval`.
    #[must_use]
    pub fn new(interval: Duration, max_wait: Option<Duration>) -> Self {
        Self { policy: RetryPolicy::unbounded(interval), max_wait }
    }

    /// Creates a monitor from node settings.
    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Self {
        Self { policy: config.health_policy(), max_wait: config.max_primary_wait }
    }

    /// Polls until the engine reports primary status and returns the number
    /// of status queries made.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::HealthCheckFailure`] once `max_wait` has elapsed.
    /// - [`BootstrapError::Cancelled`] if `cancel` fires.
    pub async fn wait_for_primary<E>(
        &self,
        engine: &E,
        cancel: &CancellationToken,
    ) -> Result<u32, BootstrapError>
    where
        E: ReplicationEngine + ?Sized,
    {
        let started = Instant::now();
        let polls = AtomicU32::new(0);

        self.policy
            .retry(
                cancel,
                || {
                    let poll = polls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        let status = engine.status().await;
                        if status.is_primary() {
                            info!(
                                polls = poll,
                                waited_ms = elapsed_ms(started),
                                "Engine reports primary status"
                            );
                            return Ok(poll);
                        }
                        debug!(polls = poll, status = %status, "Engine not primary yet");
                        Err(BootstrapError::HealthCheckFailure {
                            waited_ms: elapsed_ms(started),
                            last_status: status.to_string(),
                        })
                    }
                },
                |_| self.max_wait.is_none_or(|max_wait| started.elapsed() < max_wait),
                |_, _| {},
            )
            .await
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use async_trait::async_trait;
    use clusterboot_types::{Decision, EngineStatus, ErrorKind};

    use super::*;

    /// Replays a fixed status sequence, repeating the last entry.
    struct Scripted {
        statuses: Mutex<VecDeque<EngineStatus>>,
        queries: Mutex<u32>,
    }

    impl Scripted {
        fn new(statuses: &[EngineStatus]) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                queries: Mutex::new(0),
            }
        }

        fn queries(&self) -> u32 {
            *self.queries.lock().unwrap()
        }
    }

    #[async_trait]
    impl ReplicationEngine for Scripted {
        async fn start(&self, _decision: &Decision) -> Result<(), BootstrapError> {
            Ok(())
        }

        async fn status(&self) -> EngineStatus {
            *self.queries.lock().unwrap() += 1;
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                statuses.pop_front().unwrap()
            } else {
                statuses.front().copied().unwrap_or(EngineStatus::Disconnected)
            }
        }

        async fn wait(&self) -> std::io::Result<Option<i32>> {
            Ok(Some(0))
        }

        async fn stop(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_after_sixth_query() {
        let mut statuses = vec![EngineStatus::NonPrimary; 5];
        statuses.push(EngineStatus::Primary);
        let engine = Scripted::new(&statuses);
        let monitor = HealthMonitor::new(Duration::from_secs(2), None);

        let start = Instant::now();
        let polls = monitor.wait_for_primary(&engine, &CancellationToken::new()).await.unwrap();

        assert_eq!(polls, 6);
        assert_eq!(engine.queries(), 6);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_is_transient() {
        let engine = Scripted::new(&[
            EngineStatus::Disconnected,
            EngineStatus::Disconnected,
            EngineStatus::Primary,
        ]);
        let monitor = HealthMonitor::new(Duration::from_secs(2), None);
        assert_eq!(monitor.wait_for_primary(&engine, &CancellationToken::new()).await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_wait_fails_with_last_status() {
        let engine = Scripted::new(&[EngineStatus::NonPrimary]);
        let monitor = HealthMonitor::new(Duration::from_secs(2), Some(Duration::from_secs(10)));

        let err = monitor.wait_for_primary(&engine, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HealthCheckFailure);
        assert!(err.to_string().contains("last status: Non-Primary"), "{err}");
        // Polls at t = 0, 2, 4, 6, 8, 10.
        assert_eq!(engine.queries(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let engine = Scripted::new(&[EngineStatus::NonPrimary]);
        let monitor = HealthMonitor::new(Duration::from_secs(2), None);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let err = monitor.wait_for_primary(&engine, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(engine.queries(), 3);
    }
}
