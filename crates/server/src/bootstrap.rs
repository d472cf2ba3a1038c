//! Node startup lifecycle.
//!
//! Drives one node from `Connecting` to `Primary`:
//! - Establish a coordination session (retrying forever)
//! - Decide bootstrap vs join under the bootstrap lock and register
//! - Launch the replication engine in the decided mode
//! - Poll the engine until it reports primary status
//!
//! A session lost before the decision commits restarts the sequence from
//! `Connecting` with a fresh session, backing off exponentially between
//! restarts. Once the engine is launched the role is final, so a later
//! session loss is only logged.

use std::{
    path::Path,
    sync::atomic::{AtomicU32, Ordering},
};

use clusterboot_coordination::{Connector, CoordinationClient, Session};
use clusterboot_types::{
    BootstrapError, ClusterState, Decision, NodeAddress, StartupFailure, config::NodeConfig,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    coordinator::BootstrapCoordinator, engine::ReplicationEngine, health::HealthMonitor,
    state::StateTracker,
};

/// A node that reached primary status.
pub struct StartedNode<S> {
    /// The committed decision.
    pub decision: Decision,
    /// The session that owns this node's registry entry. Dropping or closing
    /// it removes the entry.
    pub session: S,
}

/// How supervision of a running engine ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionOutcome {
    /// The engine exited on its own with this exit code (`None` if killed by
    /// a signal).
    EngineExited(Option<i32>),
    /// Shutdown was requested and the engine was stopped.
    Shutdown,
}

/// Startup sequence for one node.
pub struct NodeBootstrap<C: Connector, E> {
    config: NodeConfig,
    address: NodeAddress,
    client: CoordinationClient<C>,
    coordinator: BootstrapCoordinator,
    health: HealthMonitor,
    engine: E,
    state: StateTracker,
}

impl<C, E> NodeBootstrap<C, E>
where
    C: Connector,
    E: ReplicationEngine,
{
    /// Wires the startup sequence for `address`.
    pub fn new(config: NodeConfig, address: NodeAddress, connector: C, engine: E) -> Self {
        let client = CoordinationClient::new(connector, &config.coordination)
            .with_policy(config.connect_policy());
        let coordinator = BootstrapCoordinator::new(&config);
        let health = HealthMonitor::from_config(&config);
        Self { config, address, client, coordinator, health, engine, state: StateTracker::new() }
    }

    /// The address this node registers.
    #[must_use]
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// The current startup state.
    #[must_use]
    pub fn state(&self) -> ClusterState {
        self.state.current()
    }

    /// Follows state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ClusterState> {
        self.state.subscribe()
    }

    /// Runs the startup sequence until the engine reports primary status.
    ///
    /// # Errors
    ///
    /// Returns a [`StartupFailure`] carrying the last state reached and the
    /// fatal error. If the engine was launched, it is stopped first.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
    ) -> Result<StartedNode<C::Session>, StartupFailure> {
        info!(address = %self.address, cluster = %self.config.cluster_name, "Starting node");

        let (session, decision) = self.establish(cancel).await.map_err(|e| self.fail(e))?;

        if let Err(e) = self.launch(&decision, cancel).await {
            let failure = self.fail(e);
            session.close().await;
            return Err(failure);
        }

        if !session.is_alive() {
            warn!(
                address = %self.address,
                "Coordination session lost after launch; registry entry will expire"
            );
        }
        info!(
            address = %self.address,
            server_id = %decision.identity.server_id(),
            role = %decision.identity.role().as_str(),
            "Node is primary"
        );

        if let Some(path) = &self.config.ready_file
            && let Err(e) = write_ready_file(path, &decision).await
        {
            error!(path = %path.display(), error = %e, "Failed to write ready file");
        }

        Ok(StartedNode { decision, session })
    }

    /// Starts the engine in the decided mode and waits for primary status.
    async fn launch(
        &self,
        decision: &Decision,
        cancel: &CancellationToken,
    ) -> Result<(), BootstrapError> {
        self.state.transition(ClusterState::for_role(decision.identity.role()));
        self.state.transition(ClusterState::Starting);
        self.engine.start(decision).await?;
        self.state.transition(ClusterState::WaitingPrimary);

        if let Err(e) = self.health.wait_for_primary(&self.engine, cancel).await {
            self.engine.stop().await;
            return Err(e);
        }
        self.state.transition(ClusterState::Primary);
        Ok(())
    }

    /// Connects and decides, starting over with a fresh session whenever the
    /// coordination service fails before the decision commits.
    async fn establish(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(C::Session, Decision), BootstrapError> {
        let restarts = AtomicU32::new(0);

        self.config
            .restart_policy()
            .retry(
                cancel,
                || async move {
                    let session = self.client.connect(cancel).await?;
                    self.state.transition(ClusterState::AwaitingLock);

                    let decided =
                        self.coordinator.decide(&session, &self.address, &self.state, cancel).await;
                    match decided {
                        Ok(decision) => Ok((session, decision)),
                        Err(e) => {
                            session.close().await;
                            if e.is_transient() {
                                self.state.transition(ClusterState::Connecting);
                            }
                            Err(e)
                        },
                    }
                },
                BootstrapError::is_transient,
                |e, delay| {
                    warn!(
                        error = %e,
                        kind = %e.kind(),
                        restarts = restarts.fetch_add(1, Ordering::SeqCst) + 1,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Coordination failed before decision; reconnecting"
                    );
                },
            )
            .await
    }

    /// Supervises the running engine until it exits or `cancel` fires.
    pub async fn supervise(&self, cancel: &CancellationToken) -> SupervisionOutcome {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("Shutdown requested; stopping replication engine");
                self.engine.stop().await;
                SupervisionOutcome::Shutdown
            },
            exited = self.engine.wait() => match exited {
                Ok(code) => SupervisionOutcome::EngineExited(code),
                Err(e) => {
                    error!(error = %e, "Lost track of replication engine");
                    SupervisionOutcome::EngineExited(None)
                },
            },
        }
    }

    /// Records a fatal error, moving to `Failed` where that edge exists.
    fn fail(&self, error: BootstrapError) -> StartupFailure {
        let last_state = self.state.current();
        let cancelled = matches!(error, BootstrapError::Cancelled);
        if !cancelled && last_state.can_transition_to(ClusterState::Failed) {
            self.state.transition(ClusterState::Failed);
        }
        StartupFailure::new(last_state, error)
    }
}

/// Writes the readiness marker consumed by external probes.
async fn write_ready_file(path: &Path, decision: &Decision) -> std::io::Result<()> {
    let identity = &decision.identity;
    let contents = format!(
        "address={}\nserver_id={}\nrole={}\n",
        identity.address(),
        identity.server_id(),
        identity.role().as_str()
    );
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    info!(path = %path.display(), "Wrote ready file");
    Ok(())
}
