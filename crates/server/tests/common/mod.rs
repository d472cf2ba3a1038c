//! Test harness for node startup scenarios.
//!
//! Nodes run against a shared [`InMemoryCoordinator`] and a [`ScriptedEngine`]
//! whose status answers are fixed up front. Tests run on a paused tokio clock,
//! so lock timeouts and poll intervals cost no real time.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use clusterboot_coordination::{Connector, InMemoryCoordinator, InMemorySession, Session};
use clusterboot_server::{NodeBootstrap, ReplicationEngine};
use clusterboot_test_utils::test_node_config;
use clusterboot_types::{
    BootstrapError, Decision, EngineStatus, NodeAddress, config::NodeConfig,
    error::EngineStartFailureSnafu,
};
use parking_lot::Mutex;
use tokio::sync::watch;

/// Node type used throughout the scenario tests.
pub type TestNode = NodeBootstrap<InMemoryCoordinator, ScriptedEngine>;

#[derive(Debug)]
struct Script {
    statuses: VecDeque<EngineStatus>,
    fallback: EngineStatus,
    fail_start: bool,
    starts: Vec<Decision>,
    status_queries: u32,
    stops: u32,
}

/// Replication engine stand-in.
///
/// Status queries replay a scripted sequence and then repeat a fallback.
/// Cloning yields another handle to the same engine.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    script: Arc<Mutex<Script>>,
    exit: Arc<watch::Sender<Option<Option<i32>>>>,
}

impl ScriptedEngine {
    /// An engine that reports primary status on the first query.
    pub fn primary() -> Self {
        Self::with_statuses(&[], EngineStatus::Primary)
    }

    /// An engine answering `statuses` in order, then `fallback` forever.
    pub fn with_statuses(statuses: &[EngineStatus], fallback: EngineStatus) -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            script: Arc::new(Mutex::new(Script {
                statuses: statuses.iter().copied().collect(),
                fallback,
                fail_start: false,
                starts: Vec::new(),
                status_queries: 0,
                stops: 0,
            })),
            exit: Arc::new(exit),
        }
    }

    /// An engine that exits as soon as it is launched.
    pub fn failing_start() -> Self {
        let engine = Self::primary();
        engine.script.lock().fail_start = true;
        engine
    }

    /// Every decision the engine was launched with.
    pub fn starts(&self) -> Vec<Decision> {
        self.script.lock().starts.clone()
    }

    /// Number of status queries answered.
    pub fn status_queries(&self) -> u32 {
        self.script.lock().status_queries
    }

    /// Number of stop requests.
    pub fn stops(&self) -> u32 {
        self.script.lock().stops
    }

    /// Makes the running engine exit with `code`.
    pub fn exit_with(&self, code: Option<i32>) {
        self.exit.send_replace(Some(code));
    }
}

#[async_trait]
impl ReplicationEngine for ScriptedEngine {
    async fn start(&self, decision: &Decision) -> Result<(), BootstrapError> {
        let mut script = self.script.lock();
        if script.fail_start {
            return Err(EngineStartFailureSnafu { message: "mysqld exited with status 1" }.build());
        }
        script.starts.push(decision.clone());
        Ok(())
    }

    async fn status(&self) -> EngineStatus {
        let mut script = self.script.lock();
        script.status_queries += 1;
        let fallback = script.fallback;
        script.statuses.pop_front().unwrap_or(fallback)
    }

    async fn wait(&self) -> std::io::Result<Option<i32>> {
        let mut exit = self.exit.subscribe();
        let code = exit.wait_for(Option::is_some).await.map_err(std::io::Error::other)?;
        Ok((*code).flatten())
    }

    async fn stop(&self) {
        self.script.lock().stops += 1;
        self.exit.send_replace(Some(None));
    }
}

/// Node address `10.0.0.<host>`.
pub fn addr(host: u8) -> NodeAddress {
    NodeAddress::new(format!("10.0.0.{host}"))
}

/// Builds a node with the default test configuration.
pub fn node(coordinator: &InMemoryCoordinator, host: u8, engine: ScriptedEngine) -> TestNode {
    node_with_config(test_node_config(), coordinator, addr(host), engine)
}

/// Builds a node with an explicit configuration and address.
pub fn node_with_config(
    config: NodeConfig,
    coordinator: &InMemoryCoordinator,
    address: NodeAddress,
    engine: ScriptedEngine,
) -> TestNode {
    NodeBootstrap::new(config, address, coordinator.clone(), engine)
}

/// Holds the bootstrap lock from a separate session until dropped.
pub struct LockHolder {
    pub session: InMemorySession,
}

impl LockHolder {
    /// Opens a session and takes the default test lock.
    pub async fn acquire(coordinator: &InMemoryCoordinator) -> Self {
        let session = coordinator.connect(&[]).await.unwrap();
        let _handle = session
            .acquire_lock(&test_node_config().lock_path, Duration::from_secs(1))
            .await
            .unwrap();
        Self { session }
    }
}

/// Addresses currently in the test registry, sorted.
pub fn registered(coordinator: &InMemoryCoordinator) -> Vec<String> {
    coordinator.children(&test_node_config().registry_path)
}
