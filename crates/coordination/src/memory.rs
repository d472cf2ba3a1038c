//! In-memory coordination backend.
//!
//! Implements the full session contract inside one process: FIFO lock
//! grants, ephemeral entries removed on session expiry, and injectable
//! connection failures. Used by tests and by `--coordination-backend memory`
//! for single-node runs.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{
    error::{CoordinationError, Result},
    service::{ChildNode, Connector, LockHandle, Session},
};

/// Identifier of an in-memory session.
pub type SessionId = u64;

/// Observable backend events, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinationEvent {
    /// A session was established.
    SessionOpened {
        /// Session identifier.
        session: SessionId,
    },
    /// A session ended and its state was removed.
    SessionClosed {
        /// Session identifier.
        session: SessionId,
    },
    /// A lock was granted.
    LockGranted {
        /// New holder.
        session: SessionId,
        /// Lock path.
        path: String,
    },
    /// A lock was released by its holder.
    LockReleased {
        /// Previous holder.
        session: SessionId,
        /// Lock path.
        path: String,
    },
    /// An ephemeral entry was created.
    EphemeralCreated {
        /// Owning session.
        session: SessionId,
        /// Entry path.
        path: String,
    },
}

#[derive(Debug)]
struct Waiter {
    token: u64,
    session: SessionId,
    grant: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct LockState {
    holder: Option<(u64, SessionId)>,
    waiters: VecDeque<Waiter>,
}

#[derive(Debug)]
struct StoredNode {
    data: Vec<u8>,
    owner: SessionId,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    live: HashSet<SessionId>,
    nodes: BTreeMap<String, StoredNode>,
    locks: HashMap<String, LockState>,
    failing_connects: u32,
    unreachable: bool,
    connect_attempts: u32,
    events: Vec<CoordinationEvent>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_live(&self, session: SessionId) -> Result<()> {
        if self.live.contains(&session) {
            Ok(())
        } else {
            Err(CoordinationError::SessionExpired { message: format!("session {session} expired") })
        }
    }

    /// Hands the lock at `path` to the first waiter still listening.
    fn grant_next(&mut self, path: &str) {
        let Some(lock) = self.locks.get_mut(path) else {
            return;
        };
        lock.holder = None;
        while let Some(waiter) = lock.waiters.pop_front() {
            if waiter.grant.send(()).is_ok() {
                lock.holder = Some((waiter.token, waiter.session));
                self.events.push(CoordinationEvent::LockGranted {
                    session: waiter.session,
                    path: path.to_string(),
                });
                return;
            }
        }
    }

    fn expire(&mut self, session: SessionId) {
        if !self.live.remove(&session) {
            return;
        }
        self.nodes.retain(|_, node| node.owner != session);

        let held: Vec<String> = self
            .locks
            .iter()
            .filter(|(_, lock)| lock.holder.is_some_and(|(_, holder)| holder == session))
            .map(|(path, _)| path.clone())
            .collect();
        for lock in self.locks.values_mut() {
            lock.waiters.retain(|w| w.session != session);
        }
        for path in held {
            self.grant_next(&path);
        }

        self.events.push(CoordinationEvent::SessionClosed { session });
        debug!(session, "In-memory session expired");
    }
}

/// Shared in-memory coordination service.
///
/// Cloning yields another handle to the same service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCoordinator {
    state: Arc<Mutex<State>>,
}

impl InMemoryCoordinator {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` connection attempts fail immediately.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().failing_connects = count;
    }

    /// While set, connection attempts never complete.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Number of connection attempts so far.
    #[must_use]
    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }

    /// Ends a session as if its lease ran out.
    pub fn expire_session(&self, session: SessionId) {
        self.state.lock().expire(session);
    }

    /// Number of sessions currently live.
    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Current holder of the lock at `path`.
    #[must_use]
    pub fn lock_holder(&self, path: &str) -> Option<SessionId> {
        self.state.lock().locks.get(path).and_then(|lock| lock.holder.map(|(_, s)| s))
    }

    /// Number of sessions queued for the lock at `path`.
    #[must_use]
    pub fn lock_waiters(&self, path: &str) -> usize {
        self.state.lock().locks.get(path).map_or(0, |lock| lock.waiters.len())
    }

    /// Names of the direct children of `path`, sorted.
    #[must_use]
    pub fn children(&self, path: &str) -> Vec<String> {
        let state = self.state.lock();
        direct_children(&state.nodes, path).into_iter().map(|child| child.name).collect()
    }

    /// Stored value at `path`.
    #[must_use]
    pub fn entry(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().nodes.get(path).map(|node| node.data.clone())
    }

    /// Every event recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<CoordinationEvent> {
        self.state.lock().events.clone()
    }
}

fn direct_children(nodes: &BTreeMap<String, StoredNode>, path: &str) -> Vec<ChildNode> {
    let prefix = format!("{}/", path.trim_end_matches('/'));
    nodes
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .filter_map(|(key, node)| {
            let name = &key[prefix.len()..];
            (!name.is_empty() && !name.contains('/'))
                .then(|| ChildNode { name: name.to_string(), data: node.data.clone() })
        })
        .collect()
}

#[async_trait]
impl Connector for InMemoryCoordinator {
    type Session = InMemorySession;

    async fn connect(&self, _hosts: &[String]) -> Result<InMemorySession> {
        let unreachable = {
            let mut state = self.state.lock();
            state.connect_attempts = state.connect_attempts.saturating_add(1);
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(CoordinationError::Unavailable {
                    message: "connection refused".to_string(),
                });
            }
            state.unreachable
        };
        if unreachable {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock();
        let id = state.next_id();
        state.live.insert(id);
        state.events.push(CoordinationEvent::SessionOpened { session: id });
        Ok(InMemorySession { id, state: Arc::clone(&self.state) })
    }
}

/// A session with an [`InMemoryCoordinator`]. Dropping it ends the session.
#[derive(Debug)]
pub struct InMemorySession {
    id: SessionId,
    state: Arc<Mutex<State>>,
}

impl InMemorySession {
    /// This session's identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }
}

fn lock_handle(path: &str, token: u64) -> LockHandle {
    LockHandle::new(path, token.to_be_bytes().to_vec())
}

#[async_trait]
impl Session for InMemorySession {
    async fn acquire_lock(&self, path: &str, timeout: Duration) -> Result<LockHandle> {
        let (token, granted) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.ensure_live(self.id)?;
            let token = state.next_id();
            let lock = state.locks.entry(path.to_string()).or_default();
            if lock.holder.is_none() && lock.waiters.is_empty() {
                lock.holder = Some((token, self.id));
                state.events.push(CoordinationEvent::LockGranted {
                    session: self.id,
                    path: path.to_string(),
                });
                return Ok(lock_handle(path, token));
            }
            let (grant, granted) = oneshot::channel();
            lock.waiters.push_back(Waiter { token, session: self.id, grant });
            (token, granted)
        };

        match tokio::time::timeout(timeout, granted).await {
            Ok(Ok(())) => Ok(lock_handle(path, token)),
            Ok(Err(_)) => Err(CoordinationError::SessionExpired {
                message: format!("session {} expired while waiting for {path}", self.id),
            }),
            Err(_) => {
                let mut state = self.state.lock();
                if let Some(lock) = state.locks.get_mut(path) {
                    // A grant can race the deadline; the grant wins.
                    if lock.holder.is_some_and(|(holder, _)| holder == token) {
                        return Ok(lock_handle(path, token));
                    }
                    lock.waiters.retain(|w| w.token != token);
                }
                Err(CoordinationError::Timeout {
                    operation: format!("lock {path}"),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            },
        }
    }

    async fn release_lock(&self, handle: LockHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_live(self.id)?;
        let token = <[u8; 8]>::try_from(handle.key()).map(u64::from_be_bytes).ok();
        let held = state
            .locks
            .get(handle.path())
            .and_then(|lock| lock.holder)
            .is_some_and(|(holder, session)| Some(holder) == token && session == self.id);
        if !held {
            return Err(CoordinationError::LockNotHeld { path: handle.path().to_string() });
        }
        state.events.push(CoordinationEvent::LockReleased {
            session: self.id,
            path: handle.path().to_string(),
        });
        state.grant_next(handle.path());
        Ok(())
    }

    async fn list_children(&self, path: &str) -> Result<Vec<ChildNode>> {
        let state = self.state.lock();
        state.ensure_live(self.id)?;
        Ok(direct_children(&state.nodes, path))
    }

    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_live(self.id)?;
        if state.nodes.contains_key(path) {
            return Err(CoordinationError::NodeExists { path: path.to_string() });
        }
        state.nodes.insert(path.to_string(), StoredNode { data: data.to_vec(), owner: self.id });
        state
            .events
            .push(CoordinationEvent::EphemeralCreated { session: self.id, path: path.to_string() });
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.state.lock().live.contains(&self.id)
    }

    async fn close(&self) {
        self.state.lock().expire(self.id);
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.state.lock().expire(self.id);
    }
}
