//! etcd coordination backend.
//!
//! A session is an etcd lease kept alive by a background task. Locks use the
//! etcd lock service bound to that lease, and ephemeral entries are keys put
//! with the lease attached, so both vanish when the lease expires.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use clusterboot_types::config::CoordinationConfig;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, GetOptions, LeaseKeepAliveStream, LeaseKeeper,
    LockOptions, PutOptions, Txn, TxnOp,
};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tonic::Code;
use tracing::{debug, info, warn};

use crate::{
    error::{CoordinationError, EtcdSnafu, Result},
    service::{ChildNode, Connector, LockHandle, Session},
};

/// Opens lease-backed sessions against an etcd cluster.
#[derive(Debug, Clone)]
pub struct EtcdConnector {
    session_ttl: Duration,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl EtcdConnector {
    /// Creates a connector from coordination settings.
    #[must_use]
    pub fn new(config: &CoordinationConfig) -> Self {
        Self {
            session_ttl: config.session_ttl,
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
        }
    }
}

#[async_trait]
impl Connector for EtcdConnector {
    type Session = EtcdSession;

    async fn connect(&self, hosts: &[String]) -> Result<EtcdSession> {
        // No channel-wide deadline: lock requests wait up to the caller's lock
        // timeout, which may exceed `request_timeout`.
        let options = ConnectOptions::new().with_connect_timeout(self.connect_timeout);
        let mut client = Client::connect(hosts, Some(options)).await.context(EtcdSnafu)?;

        let ttl = i64::try_from(self.session_ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        let granting = client.lease_grant(ttl, None);
        let lease_id = match tokio::time::timeout(self.request_timeout, granting).await {
            Ok(granted) => granted.context(EtcdSnafu)?.id(),
            Err(_) => return Err(timeout_error("lease grant", self.request_timeout)),
        };
        let opening = client.lease_keep_alive(lease_id);
        let (keeper, stream) = match tokio::time::timeout(self.request_timeout, opening).await {
            Ok(opened) => opened.context(EtcdSnafu)?,
            Err(_) => return Err(timeout_error("lease keep-alive", self.request_timeout)),
        };

        let alive = Arc::new(AtomicBool::new(true));
        let keepalive_cancel = CancellationToken::new();
        let interval = (self.session_ttl / 3).max(Duration::from_millis(500));
        tokio::spawn(keep_alive(
            keeper,
            stream,
            interval,
            self.request_timeout,
            Arc::clone(&alive),
            keepalive_cancel.clone(),
            lease_id,
        ));

        info!(lease_id, ttl_secs = ttl, "Opened etcd session");
        Ok(EtcdSession {
            client,
            lease_id,
            alive,
            keepalive_cancel,
            request_timeout: self.request_timeout,
        })
    }
}

/// Refreshes the session lease until cancelled or the lease is lost.
async fn keep_alive(
    mut keeper: LeaseKeeper,
    mut stream: LeaseKeepAliveStream,
    interval: Duration,
    request_timeout: Duration,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
    lease_id: i64,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {},
        }

        if let Err(e) = keeper.keep_alive().await {
            warn!(lease_id, error = %e, "Lease keep-alive request failed");
            alive.store(false, Ordering::SeqCst);
            return;
        }
        match tokio::time::timeout(request_timeout, stream.message()).await {
            Ok(Ok(Some(response))) if response.ttl() > 0 => {
                debug!(lease_id, ttl = response.ttl(), "Lease refreshed");
            },
            Ok(Ok(Some(_))) => {
                warn!(lease_id, "Session lease expired");
                alive.store(false, Ordering::SeqCst);
                return;
            },
            Ok(Ok(None)) => {
                warn!(lease_id, "Lease keep-alive stream closed");
                alive.store(false, Ordering::SeqCst);
                return;
            },
            Ok(Err(e)) => {
                warn!(lease_id, error = %e, "Lease keep-alive stream failed");
                alive.store(false, Ordering::SeqCst);
                return;
            },
            Err(_) => {
                warn!(lease_id, "Lease keep-alive response timed out");
                alive.store(false, Ordering::SeqCst);
                return;
            },
        }
    }
}

/// A lease-backed etcd session.
pub struct EtcdSession {
    client: Client,
    lease_id: i64,
    alive: Arc<AtomicBool>,
    keepalive_cancel: CancellationToken,
    request_timeout: Duration,
}

impl EtcdSession {
    fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(CoordinationError::SessionExpired {
                message: format!("lease {:x} is no longer kept alive", self.lease_id),
            })
        }
    }

    /// Maps a client error for `operation`, marking the session dead when the
    /// lease is gone.
    fn classify(
        &self,
        source: etcd_client::Error,
        operation: &str,
        timeout: Duration,
    ) -> CoordinationError {
        let err = classify_error(source, operation, timeout);
        if err.is_session_loss() {
            self.alive.store(false, Ordering::SeqCst);
            return err;
        }
        if !self.is_alive() {
            return CoordinationError::SessionExpired { message: err.to_string() };
        }
        err
    }
}

#[async_trait]
impl Session for EtcdSession {
    async fn acquire_lock(&self, path: &str, timeout: Duration) -> Result<LockHandle> {
        self.ensure_alive()?;
        let mut client = self.client.clone();
        let options = LockOptions::new().with_lease(self.lease_id);
        let operation = format!("lock {path}");
        match tokio::time::timeout(timeout, client.lock(path, Some(options))).await {
            Ok(Ok(response)) => Ok(LockHandle::new(path, response.key().to_vec())),
            Ok(Err(e)) => Err(self.classify(e, &operation, timeout)),
            Err(_) => Err(timeout_error(&operation, timeout)),
        }
    }

    async fn release_lock(&self, handle: LockHandle) -> Result<()> {
        self.ensure_alive()?;
        let mut client = self.client.clone();
        let operation = format!("unlock {}", handle.path());
        match tokio::time::timeout(self.request_timeout, client.unlock(handle.key())).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(self.classify(e, &operation, self.request_timeout)),
            Err(_) => Err(timeout_error(&operation, self.request_timeout)),
        }
    }

    async fn list_children(&self, path: &str) -> Result<Vec<ChildNode>> {
        self.ensure_alive()?;
        let prefix = children_prefix(path);
        let operation = format!("list {path}");
        let mut client = self.client.clone();
        let request = client.get(prefix.as_str(), Some(GetOptions::new().with_prefix()));
        let response = match tokio::time::timeout(self.request_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(self.classify(e, &operation, self.request_timeout)),
            Err(_) => return Err(timeout_error(&operation, self.request_timeout)),
        };

        Ok(response
            .kvs()
            .iter()
            .filter_map(|kv| {
                let name = direct_child_name(&prefix, kv.key())?;
                Some(ChildNode { name, data: kv.value().to_vec() })
            })
            .collect())
    }

    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<()> {
        self.ensure_alive()?;
        let txn = Txn::new()
            .when(vec![Compare::create_revision(path, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                path,
                data,
                Some(PutOptions::new().with_lease(self.lease_id)),
            )]);
        let operation = format!("create {path}");
        let mut client = self.client.clone();
        let response = match tokio::time::timeout(self.request_timeout, client.txn(txn)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(self.classify(e, &operation, self.request_timeout)),
            Err(_) => return Err(timeout_error(&operation, self.request_timeout)),
        };
        create_outcome(response.succeeded(), path)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.keepalive_cancel.cancel();
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut client = self.client.clone();
        match tokio::time::timeout(self.request_timeout, client.lease_revoke(self.lease_id)).await
        {
            Ok(Ok(_)) => info!(lease_id = self.lease_id, "Closed etcd session"),
            Ok(Err(e)) => warn!(lease_id = self.lease_id, error = %e, "Lease revoke failed"),
            Err(_) => warn!(lease_id = self.lease_id, "Lease revoke timed out"),
        }
    }
}

impl Drop for EtcdSession {
    fn drop(&mut self) {
        // The lease expires on its own once keep-alives stop.
        self.keepalive_cancel.cancel();
    }
}

/// Key prefix under which the children of `path` live.
fn children_prefix(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

/// Name of `key` if it is a direct child of `prefix`. Deeper descendants and
/// the prefix key itself are not children.
fn direct_child_name(prefix: &str, key: &[u8]) -> Option<String> {
    let name = key.strip_prefix(prefix.as_bytes())?;
    if name.is_empty() || name.contains(&b'/') {
        return None;
    }
    Some(String::from_utf8_lossy(name).into_owned())
}

/// Result of the create-if-absent transaction for `path`.
fn create_outcome(succeeded: bool, path: &str) -> Result<()> {
    if succeeded { Ok(()) } else { Err(CoordinationError::NodeExists { path: path.to_string() }) }
}

fn timeout_error(operation: &str, timeout: Duration) -> CoordinationError {
    CoordinationError::Timeout {
        operation: operation.to_string(),
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

/// Whether a gRPC status reports an elapsed deadline, either from the server
/// or from the client channel's own timeout.
fn is_deadline(status: &tonic::Status) -> bool {
    match status.code() {
        Code::DeadlineExceeded => true,
        Code::Cancelled => status.message().contains("Timeout expired"),
        _ => false,
    }
}

/// Maps an etcd client error for `operation`, which was bounded by `timeout`.
///
/// Elapsed deadlines become [`CoordinationError::Timeout`] and a missing lease
/// becomes [`CoordinationError::SessionExpired`].
fn classify_error(
    source: etcd_client::Error,
    operation: &str,
    timeout: Duration,
) -> CoordinationError {
    if let etcd_client::Error::GRpcStatus(status) = &source {
        if is_deadline(status) {
            return timeout_error(operation, timeout);
        }
        if status.message().contains("lease not found") {
            return CoordinationError::SessionExpired { message: status.message().to_string() };
        }
    }
    CoordinationError::Etcd { source }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use clusterboot_types::{BootstrapError, ErrorKind, RetryPolicy};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::lock::BootstrapLock;

    const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn test_children_prefix_normalizes_trailing_slash() {
        assert_eq!(children_prefix("/mariadb/nodes"), "/mariadb/nodes/");
        assert_eq!(children_prefix("/mariadb/nodes/"), "/mariadb/nodes/");
    }

    #[test]
    fn test_direct_child_name_skips_self_and_descendants() {
        let prefix = children_prefix("/mariadb/nodes");
        assert_eq!(
            direct_child_name(&prefix, b"/mariadb/nodes/10.0.0.1").as_deref(),
            Some("10.0.0.1")
        );
        assert_eq!(direct_child_name(&prefix, b"/mariadb/nodes/"), None);
        assert_eq!(direct_child_name(&prefix, b"/mariadb/nodes/10.0.0.1/extra"), None);
        assert_eq!(direct_child_name(&prefix, b"/mariadb/nodesX/10.0.0.1"), None);
        assert_eq!(direct_child_name(&prefix, b"/mariadb/bootstrap"), None);
    }

    #[test]
    fn test_create_outcome_reports_taken_path() {
        assert!(create_outcome(true, "/mariadb/nodes/10.0.0.1").is_ok());
        let err = create_outcome(false, "/mariadb/nodes/10.0.0.1").unwrap_err();
        assert!(matches!(err, CoordinationError::NodeExists { .. }));
        assert!(err.to_string().contains("/mariadb/nodes/10.0.0.1"));
    }

    #[test]
    fn test_server_deadline_is_timeout() {
        let source = etcd_client::Error::GRpcStatus(tonic::Status::deadline_exceeded(
            "context deadline exceeded",
        ));
        let err = classify_error(source, "lock /mariadb/bootstrap", LOCK_TIMEOUT);
        assert!(err.is_timeout(), "{err}");
        assert!(err.to_string().contains("timed out after 10000ms"), "{err}");
    }

    #[test]
    fn test_channel_timeout_is_timeout() {
        let source =
            etcd_client::Error::GRpcStatus(tonic::Status::cancelled("Timeout expired"));
        let err = classify_error(source, "lock /mariadb/bootstrap", LOCK_TIMEOUT);
        assert!(err.is_timeout(), "{err}");
    }

    #[test]
    fn test_missing_lease_is_session_loss() {
        let source = etcd_client::Error::GRpcStatus(tonic::Status::not_found(
            "etcdserver: requested lease not found",
        ));
        let err = classify_error(source, "lock /mariadb/bootstrap", LOCK_TIMEOUT);
        assert!(err.is_session_loss(), "{err}");
    }

    #[test]
    fn test_other_errors_stay_etcd() {
        let err = classify_error(
            etcd_client::Error::GRpcStatus(tonic::Status::cancelled("client went away")),
            "list /mariadb/nodes",
            LOCK_TIMEOUT,
        );
        assert!(matches!(err, CoordinationError::Etcd { .. }), "{err}");

        let err = classify_error(
            etcd_client::Error::InvalidArgs("empty key".to_string()),
            "list /mariadb/nodes",
            LOCK_TIMEOUT,
        );
        assert!(matches!(err, CoordinationError::Etcd { .. }), "{err}");
    }

    /// Answers every lock request with a server deadline after `delay`.
    struct DeadlineSession {
        delay: Duration,
        requests: parking_lot::Mutex<u32>,
    }

    #[async_trait]
    impl Session for DeadlineSession {
        async fn acquire_lock(&self, path: &str, timeout: Duration) -> Result<LockHandle> {
            *self.requests.lock() += 1;
            tokio::time::sleep(self.delay).await;
            let source = etcd_client::Error::GRpcStatus(tonic::Status::deadline_exceeded(
                "context deadline exceeded",
            ));
            Err(classify_error(source, &format!("lock {path}"), timeout))
        }

        async fn release_lock(&self, _handle: LockHandle) -> Result<()> {
            Ok(())
        }

        async fn list_children(&self, _path: &str) -> Result<Vec<ChildNode>> {
            Ok(Vec::new())
        }

        async fn create_ephemeral(&self, _path: &str, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        fn is_alive(&self) -> bool {
            true
        }

        async fn close(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_deadlines_exhaust_into_bootstrap_failure() {
        let session = DeadlineSession {
            delay: Duration::from_secs(5),
            requests: parking_lot::Mutex::new(0),
        };
        let lock = BootstrapLock::new(
            "/mariadb/bootstrap",
            LOCK_TIMEOUT,
            RetryPolicy::bounded(5, Duration::ZERO),
        );

        let start = tokio::time::Instant::now();
        let err = lock.acquire(&session, &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BootstrapFailure);
        assert!(matches!(err, BootstrapError::BootstrapFailure { attempts: 5, .. }), "{err}");
        assert_eq!(*session.requests.lock(), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(25));
    }
}
