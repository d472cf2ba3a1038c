//! Test configuration helpers.
//!
//! Centralizes the timings that scenario tests assert against, so elapsed
//! virtual time can be derived from one place.

use std::time::Duration;

use clusterboot_types::config::{CoordinationConfig, NodeConfig};

/// Per-attempt lock wait used by scenario tests.
pub const TEST_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Lock attempts before a bootstrap failure.
pub const TEST_MAX_LOCK_ATTEMPTS: u32 = 5;

/// Delay between failed connection attempts.
pub const TEST_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Interval between engine status queries.
pub const TEST_HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Returns a node configuration for tests against the in-memory coordinator.
///
/// Uses the production timings above; tests run them on a paused tokio clock.
/// The cluster name and paths are shared by every node built from it, so
/// nodes in one test contend for the same lock.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_node_config() -> NodeConfig {
    let coordination = CoordinationConfig::builder()
        .hosts(vec!["memory".to_string()])
        .connect_retry_delay(TEST_CONNECT_RETRY_DELAY)
        .build()
        .expect("valid test coordination config");

    NodeConfig::builder()
        .coordination(coordination)
        .cluster_name("test-cluster")
        .lock_timeout(TEST_LOCK_TIMEOUT)
        .max_lock_attempts(TEST_MAX_LOCK_ATTEMPTS)
        .health_poll_interval(TEST_HEALTH_POLL_INTERVAL)
        .build()
        .expect("valid test node config")
}
