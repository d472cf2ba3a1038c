//! Helpers for following a node's startup state from tests.

use std::time::Duration;

use clusterboot_types::ClusterState;
use tokio::sync::watch;

/// Waits until `states` reports `target`, for at most `within`.
///
/// The current value counts, so a node already in `target` returns at once.
/// On a paused clock the bound costs no real time. Returns `false` on timeout
/// or if the node was dropped first.
pub async fn wait_for_state(
    states: &mut watch::Receiver<ClusterState>,
    target: ClusterState,
    within: Duration,
) -> bool {
    matches!(
        tokio::time::timeout(within, states.wait_for(|state| *state == target)).await,
        Ok(Ok(_))
    )
}
