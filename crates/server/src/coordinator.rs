//! Bootstrap decision engine.
//!
//! Decides, exactly once per cluster, which starting node initializes a new
//! cluster. The decision is serialized by the bootstrap lock: a node takes
//! the lock, reads the membership registry, commits to a role, writes its own
//! registry entry, and releases the lock. The first node to be granted the
//! lock sees an empty registry and bootstraps; every later node sees the
//! earlier members and joins them.

use chrono::Utc;
use clusterboot_coordination::{BootstrapLock, MembershipRegistry, RegistrySnapshot, Session};
use clusterboot_types::{
    BootstrapError, ClusterState, Decision, NodeAddress, NodeIdentity, RegistryEntry, Role,
    ServerId, config::NodeConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::state::StateTracker;

/// Determines a node's role from a registry snapshot taken under the lock.
///
/// An empty registry means no cluster exists yet, so this node bootstraps
/// with no peers. Otherwise it joins every registered node. The server ID is
/// the snapshot size plus one.
#[must_use]
pub fn decide_role(address: &NodeAddress, snapshot: &RegistrySnapshot) -> Decision {
    let role = if snapshot.is_empty() { Role::Bootstrap } else { Role::Joiner };
    let server_id = ServerId::from_registry_size(snapshot.len());
    Decision {
        identity: NodeIdentity::new(address.clone(), server_id, role),
        peers: snapshot.addresses(),
    }
}

/// Runs the lock → read → decide → register → release critical section.
#[derive(Debug, Clone)]
pub struct BootstrapCoordinator {
    lock: BootstrapLock,
    registry: MembershipRegistry,
}

impl BootstrapCoordinator {
    /// Creates a coordinator for the configured lock and registry paths.
    #[must_use]
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            lock: BootstrapLock::new(
                config.lock_path.clone(),
                config.lock_timeout,
                config.lock_policy(),
            ),
            registry: MembershipRegistry::new(config.registry_path.clone()),
        }
    }

    /// The membership registry this coordinator writes to.
    #[must_use]
    pub fn registry(&self) -> &MembershipRegistry {
        &self.registry
    }

    /// Decides this node's role and registers it.
    ///
    /// Expects `state` to be in [`ClusterState::AwaitingLock`] and moves it to
    /// [`ClusterState::Deciding`] once the lock is granted. The lock is always
    /// released before returning.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::BootstrapFailure`] when the lock could not be
    ///   acquired within the configured attempts. Nothing was registered.
    /// - [`BootstrapError::SessionLost`] or
    ///   [`BootstrapError::CoordinationUnavailable`] when the service failed
    ///   before the decision committed. The caller should start over with a
    ///   fresh session.
    /// - [`BootstrapError::Cancelled`] if `cancel` fired while waiting.
    pub async fn decide<S>(
        &self,
        session: &S,
        address: &NodeAddress,
        state: &StateTracker,
        cancel: &CancellationToken,
    ) -> Result<Decision, BootstrapError>
    where
        S: Session + ?Sized,
    {
        let handle = self.lock.acquire(session, cancel).await?;
        state.transition(ClusterState::Deciding);

        let outcome = self.decide_locked(session, address).await;

        if let Err(e) = self.lock.release(session, handle).await {
            warn!(lock = %self.lock.path(), error = %e, "Failed to release bootstrap lock");
            // An unreleased lock blocks other nodes until this session ends.
            return Err(e.into());
        }
        outcome
    }

    async fn decide_locked<S>(
        &self,
        session: &S,
        address: &NodeAddress,
    ) -> Result<Decision, BootstrapError>
    where
        S: Session + ?Sized,
    {
        let snapshot = self.registry.snapshot(session).await?;

        if snapshot.contains(address) {
            // A previous incarnation of this node still holds its entry; it
            // disappears when that session expires.
            return Err(BootstrapError::CoordinationUnavailable {
                message: format!(
                    "registry {} still holds an entry for {address}",
                    self.registry.path()
                ),
            });
        }

        let decision = decide_role(address, &snapshot);
        let identity = &decision.identity;
        let peers: Vec<&str> = decision.peers.iter().map(NodeAddress::as_str).collect();

        if !session.is_alive() {
            return Err(BootstrapError::SessionLost {
                message: "session expired before the decision was registered".to_string(),
            });
        }
        let entry = RegistryEntry::for_identity(identity, Utc::now());
        self.registry.register(session, &entry).await?;

        match identity.role() {
            Role::Bootstrap => info!(
                address = %identity.address(),
                server_id = %identity.server_id(),
                decision = "bootstrap",
                "Bootstrap decision: registry empty, initializing new cluster"
            ),
            Role::Joiner => info!(
                address = %identity.address(),
                server_id = %identity.server_id(),
                peers = ?peers,
                decision = "join",
                "Bootstrap decision: joining existing members"
            ),
        }
        Ok(decision)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use clusterboot_coordination::{Connector, CoordinationEvent, InMemoryCoordinator};
    use clusterboot_types::ErrorKind;

    use super::*;

    fn config() -> NodeConfig {
        NodeConfig::builder()
            .lock_timeout(Duration::from_secs(10))
            .max_lock_attempts(5)
            .build()
            .expect("valid config")
    }

    fn awaiting_lock() -> StateTracker {
        let state = StateTracker::new();
        state.transition(ClusterState::AwaitingLock);
        state
    }

    fn node1() -> NodeAddress {
        NodeAddress::new("10.0.0.1")
    }

    fn entry(addr: &str, order: u64) -> RegistryEntry {
        RegistryEntry {
            address: NodeAddress::new(addr),
            join_order: order,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_decide_role_empty_registry_bootstraps() {
        let decision = decide_role(&NodeAddress::new("10.0.0.1"), &RegistrySnapshot::default());
        assert_eq!(decision.identity.role(), Role::Bootstrap);
        assert_eq!(decision.identity.server_id().value(), 1);
        assert!(decision.peers.is_empty());
    }

    #[test]
    fn test_decide_role_populated_registry_joins() {
        let snapshot = RegistrySnapshot::new(vec![entry("10.0.0.2", 2), entry("10.0.0.1", 1)]);
        let decision = decide_role(&NodeAddress::new("10.0.0.3"), &snapshot);
        assert_eq!(decision.identity.role(), Role::Joiner);
        assert_eq!(decision.identity.server_id().value(), 3);
        assert_eq!(decision.peers, vec![node1(), NodeAddress::new("10.0.0.2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decide_registers_while_holding_lock() {
        let coordinator = InMemoryCoordinator::new();
        let session = coordinator.connect(&[]).await.unwrap();
        let config = config();
        let state = awaiting_lock();

        let decision = BootstrapCoordinator::new(&config)
            .decide(&session, &node1(), &state, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(decision.identity.role(), Role::Bootstrap);
        assert_eq!(state.current(), ClusterState::Deciding);
        assert_eq!(coordinator.children(&config.registry_path), vec!["10.0.0.1"]);
        assert_eq!(coordinator.lock_holder(&config.lock_path), None);

        let id = session.id();
        let events = coordinator.events();
        let granted = events.iter().position(|e| {
            matches!(e, CoordinationEvent::LockGranted { session, .. } if *session == id)
        });
        let created = events.iter().position(|e| {
            matches!(e, CoordinationEvent::EphemeralCreated { session, .. } if *session == id)
        });
        let released = events.iter().position(|e| {
            matches!(e, CoordinationEvent::LockReleased { session, .. } if *session == id)
        });
        let (granted, created, released) = (granted.unwrap(), created.unwrap(), released.unwrap());
        assert!(granted < created && created < released, "events: {events:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_exhaustion_registers_nothing() {
        let coordinator = InMemoryCoordinator::new();
        let config = config();
        let holder = coordinator.connect(&[]).await.unwrap();
        let _held = holder.acquire_lock(&config.lock_path, Duration::from_secs(1)).await.unwrap();

        let session = coordinator.connect(&[]).await.unwrap();
        let state = awaiting_lock();
        let err = BootstrapCoordinator::new(&config)
            .decide(&session, &node1(), &state, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BootstrapFailure);
        assert_eq!(state.current(), ClusterState::AwaitingLock);
        assert!(coordinator.children(&config.registry_path).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_own_entry_is_transient_and_releases_lock() {
        let coordinator = InMemoryCoordinator::new();
        let config = config();
        let previous = coordinator.connect(&[]).await.unwrap();
        BootstrapCoordinator::new(&config)
            .registry()
            .register(&previous, &entry("10.0.0.1", 1))
            .await
            .unwrap();

        let session = coordinator.connect(&[]).await.unwrap();
        let err = BootstrapCoordinator::new(&config)
            .decide(&session, &node1(), &awaiting_lock(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(coordinator.lock_holder(&config.lock_path), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_reports_session_lost() {
        let coordinator = InMemoryCoordinator::new();
        let session = coordinator.connect(&[]).await.unwrap();
        coordinator.expire_session(session.id());

        let err = BootstrapCoordinator::new(&config())
            .decide(&session, &node1(), &awaiting_lock(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionLost);
    }
}
