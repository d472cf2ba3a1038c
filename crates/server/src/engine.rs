//! Replication engine adapter.
//!
//! Launches the engine in the decided mode and queries its cluster status.
//! [`MariaDbEngine`] drives a MariaDB server with the Galera provider:
//! `mysqld` for the server and the `mysql` client for status queries.

use std::{io, process::Stdio};

use async_trait::async_trait;
use clusterboot_types::{
    BootstrapError, Decision, EngineStatus, Role,
    config::{EngineConfig, Secret},
    error::EngineStartFailureSnafu,
};
use tokio::{
    process::{Child, Command},
    sync::Mutex,
};
use tracing::{debug, info, warn};

/// Control surface of the replication engine.
#[async_trait]
pub trait ReplicationEngine: Send + Sync {
    /// Launches the engine for `decision` and returns once it is running.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::EngineStartFailure`] if the engine cannot be
    /// spawned or exits right away.
    async fn start(&self, decision: &Decision) -> Result<(), BootstrapError>;

    /// Queries the engine's cluster status. A failed query reports
    /// [`EngineStatus::Disconnected`].
    async fn status(&self) -> EngineStatus;

    /// Waits for the launched engine to exit and returns its exit code, if
    /// it exited normally.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::ErrorKind::NotFound`] error if no engine is
    /// running, or the error from waiting on the process.
    async fn wait(&self) -> std::io::Result<Option<i32>>;

    /// Stops the engine if it is running.
    async fn stop(&self);
}

/// Builds the `mysqld` argument list for a decision.
///
/// The bootstrap node starts a new cluster with an empty peer list; joiners
/// list every earlier member.
#[must_use]
pub fn server_args(config: &EngineConfig, cluster_name: &str, decision: &Decision) -> Vec<String> {
    let identity = &decision.identity;
    let peers: Vec<&str> = decision.peers.iter().map(|p| p.as_str()).collect();

    let mut args = vec![
        format!("--user={}", config.user),
        format!("--wsrep-cluster-name={cluster_name}"),
        format!("--server-id={}", identity.server_id()),
        "--wsrep_on=ON".to_string(),
    ];
    if identity.role() == Role::Bootstrap {
        args.push("--wsrep-new-cluster".to_string());
    }
    args.extend([
        "--binlog_format=ROW".to_string(),
        format!("--wsrep_gtid_domain_id={}", config.gtid_domain_id),
        format!("--wsrep_sst_method={}", config.sst_method),
        format!("--wsrep_cluster_address=gcomm://{}", peers.join(",")),
        format!("--wsrep_provider={}", config.provider.display()),
    ]);
    args.extend(config.extra_args.iter().cloned());
    args
}

/// Extracts the cluster status from `SHOW STATUS LIKE "wsrep_cluster_status"\G`
/// output.
#[must_use]
pub fn parse_wsrep_status(output: &str) -> EngineStatus {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Value:"))
        .map_or(EngineStatus::Disconnected, |value| EngineStatus::from_wsrep_value(value.trim()))
}

const STATUS_QUERY: &str = "SHOW STATUS LIKE \"wsrep_cluster_status\"\\G";

/// MariaDB with the Galera replication provider.
pub struct MariaDbEngine {
    config: EngineConfig,
    cluster_name: String,
    root_password: Option<Secret>,
    child: Mutex<Option<Child>>,
}

impl MariaDbEngine {
    /// Creates an adapter. The root password falls back to
    /// `MYSQL_ROOT_PASSWORD` when not configured.
    #[must_use]
    pub fn new(config: EngineConfig, cluster_name: impl Into<String>) -> Self {
        let root_password = config
            .root_password
            .clone()
            .or_else(|| std::env::var("MYSQL_ROOT_PASSWORD").ok().map(Secret::new));
        Self { config, cluster_name: cluster_name.into(), root_password, child: Mutex::new(None) }
    }

    fn status_command(&self) -> Command {
        let mut command = Command::new(&self.config.client_binary);
        command.arg("-uroot");
        if let Some(password) = &self.root_password {
            command.arg(format!("-p{}", password.expose()));
        }
        command
            .args(["-e", STATUS_QUERY])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl ReplicationEngine for MariaDbEngine {
    async fn start(&self, decision: &Decision) -> Result<(), BootstrapError> {
        let binary = self.config.binary.display().to_string();
        let args = server_args(&self.config, &self.cluster_name, decision);
        info!(binary = %binary, args = ?args, "Launching replication engine");

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineStartFailureSnafu { message: format!("failed to spawn {binary}: {e}") }
                    .build()
            })?;

        match tokio::time::timeout(self.config.launch_grace, child.wait()).await {
            Ok(Ok(status)) => {
                return Err(EngineStartFailureSnafu {
                    message: format!("{binary} exited immediately with {status}"),
                }
                .build());
            },
            Ok(Err(e)) => {
                return Err(EngineStartFailureSnafu {
                    message: format!("failed to observe {binary}: {e}"),
                }
                .build());
            },
            Err(_) => {},
        }

        info!(pid = child.id(), "Replication engine running");
        *self.child.lock().await = Some(child);
        Ok(())
    }

    async fn status(&self) -> EngineStatus {
        let query = self.status_command().output();
        match tokio::time::timeout(self.config.status_timeout, query).await {
            Ok(Ok(output)) if output.status.success() => {
                parse_wsrep_status(&String::from_utf8_lossy(&output.stdout))
            },
            Ok(Ok(output)) => {
                debug!(code = ?output.status.code(), "Status query failed");
                EngineStatus::Disconnected
            },
            Ok(Err(e)) => {
                debug!(error = %e, "Status query could not run");
                EngineStatus::Disconnected
            },
            Err(_) => {
                debug!(
                    timeout_ms = self.config.status_timeout.as_millis() as u64,
                    "Status query timed out"
                );
                EngineStatus::Disconnected
            },
        }
    }

    async fn wait(&self) -> std::io::Result<Option<i32>> {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotFound, "engine is not running"));
        };
        let status = child.wait().await?;
        *guard = None;
        info!(%status, "Replication engine exited");
        Ok(status.code())
    }

    async fn stop(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        match child.kill().await {
            Ok(()) => info!("Replication engine stopped"),
            Err(e) => warn!(error = %e, "Failed to stop replication engine"),
        }
    }
}
