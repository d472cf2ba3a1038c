//! Observable per-node startup state.

use clusterboot_types::ClusterState;
use tokio::sync::watch;
use tracing::{error, info};

/// Tracks the node's [`ClusterState`] and publishes every transition.
///
/// Only transitions allowed by [`ClusterState::can_transition_to`] are
/// applied; anything else is logged and ignored.
#[derive(Debug)]
pub struct StateTracker {
    tx: watch::Sender<ClusterState>,
}

impl StateTracker {
    /// Starts in [`ClusterState::Connecting`].
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ClusterState::Connecting);
        Self { tx }
    }

    /// The current state.
    #[must_use]
    pub fn current(&self) -> ClusterState {
        *self.tx.borrow()
    }

    /// Receiver that observes every subsequent transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ClusterState> {
        self.tx.subscribe()
    }

    /// Moves to `next`. Returns whether the transition was applied.
    pub fn transition(&self, next: ClusterState) -> bool {
        let current = self.current();
        if !current.can_transition_to(next) {
            error!(from = %current, to = %next, "Rejected illegal state transition");
            return false;
        }
        self.tx.send_replace(next);
        info!(from = %current, to = %next, "State transition");
        true
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
