//! Shared test utilities for clusterboot crates.
//!
//! - [`TestDir`] - Scratch directory for config and ready files
//! - [`wait_for_state`] - Wait for a node to reach a startup state
//! - [`test_node_config`] - Node configuration with the scenario timings
//! - [`strategies`] - Proptest generators for node addresses and start orders

#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod test_dir;
pub use test_dir::{CONFIG_FILE_NAME, TestDir};

mod states;
pub use states::wait_for_state;

mod config;
pub use config::{
    TEST_CONNECT_RETRY_DELAY, TEST_HEALTH_POLL_INTERVAL, TEST_LOCK_TIMEOUT,
    TEST_MAX_LOCK_ATTEMPTS, test_node_config,
};

pub mod strategies;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use clusterboot_types::ClusterState;
    use tokio::sync::watch;

    use super::*;

    #[test]
    fn test_write_config_lands_in_scratch_dir() {
        let dir = TestDir::new();
        let path = dir.write_config("max_lock_attempts = 2\n");
        assert_eq!(path, dir.join(CONFIG_FILE_NAME));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "max_lock_attempts = 2\n");
    }

    #[test]
    fn test_ready_file_is_not_precreated() {
        let dir = TestDir::new();
        let ready = dir.ready_file();
        assert!(ready.starts_with(dir.path()));
        assert!(!ready.exists());
        assert!(!dir.join("run").exists());
    }

    #[test]
    fn test_dir_removed_on_drop() {
        let path = {
            let dir = TestDir::new();
            dir.write_config("");
            dir.path().to_path_buf()
        };
        assert!(!path.exists(), "scratch directory should be removed on drop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state_sees_current_value() {
        let (_tx, mut rx) = watch::channel(ClusterState::AwaitingLock);
        assert!(wait_for_state(&mut rx, ClusterState::AwaitingLock, Duration::ZERO).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state_follows_transitions() {
        let (tx, mut rx) = watch::channel(ClusterState::Connecting);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            tx.send_replace(ClusterState::AwaitingLock);
            tokio::time::sleep(Duration::from_secs(3)).await;
            tx.send_replace(ClusterState::Deciding);
            tx
        });

        let start = tokio::time::Instant::now();
        assert!(wait_for_state(&mut rx, ClusterState::Deciding, Duration::from_secs(10)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state_times_out() {
        let (_tx, mut rx) = watch::channel(ClusterState::Connecting);
        let start = tokio::time::Instant::now();
        assert!(!wait_for_state(&mut rx, ClusterState::Primary, Duration::from_secs(30)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_wait_for_state_fails_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(ClusterState::Connecting);
        drop(tx);
        assert!(!wait_for_state(&mut rx, ClusterState::Primary, Duration::from_secs(1)).await);
    }

    #[test]
    fn test_node_config_uses_scenario_timings() {
        let config = test_node_config();
        assert_eq!(config.lock_timeout, TEST_LOCK_TIMEOUT);
        assert_eq!(config.max_lock_attempts, TEST_MAX_LOCK_ATTEMPTS);
        assert_eq!(config.coordination.connect_retry_delay, TEST_CONNECT_RETRY_DELAY);
        assert_eq!(config.health_poll_interval, TEST_HEALTH_POLL_INTERVAL);
        assert!(config.max_primary_wait.is_none());
        assert!(config.validate().is_ok());
    }
}
