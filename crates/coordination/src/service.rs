//! The coordination service seam.
//!
//! A [`Connector`] opens [`Session`]s; a session owns locks and ephemeral
//! entries, and the service removes both when the session ends. Backends:
//! [`crate::etcd`] for production and [`crate::memory`] for tests and
//! single-process runs.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A child entry under a registry path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildNode {
    /// Last path segment (the registry key).
    pub name: String,
    /// Stored value.
    pub data: Vec<u8>,
}

/// Proof that a session holds a named lock.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a held lock must be released"]
pub struct LockHandle {
    path: String,
    key: Vec<u8>,
}

impl LockHandle {
    /// Creates a handle for `path` identified by a backend-specific `key`.
    pub fn new(path: impl Into<String>, key: Vec<u8>) -> Self {
        Self { path: path.into(), key }
    }

    /// The lock path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The backend ownership key.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

/// Opens sessions to a coordination service.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The session type produced by this connector.
    type Session: Session + 'static;

    /// Makes one attempt to establish a session with any of `hosts`.
    ///
    /// Retrying is the caller's concern; see [`crate::CoordinationClient`].
    async fn connect(&self, hosts: &[String]) -> Result<Self::Session>;
}

/// A live session with the coordination service.
#[async_trait]
pub trait Session: Send + Sync {
    /// Waits up to `timeout` for exclusive ownership of the lock at `path`.
    ///
    /// Ownership is bound to this session and is released automatically if
    /// the session ends.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoordinationError::Timeout`] if the lock was not
    /// granted within `timeout`.
    async fn acquire_lock(&self, path: &str, timeout: Duration) -> Result<LockHandle>;

    /// Releases a lock acquired by this session.
    async fn release_lock(&self, handle: LockHandle) -> Result<()>;

    /// Lists the direct children of `path`.
    async fn list_children(&self, path: &str) -> Result<Vec<ChildNode>>;

    /// Creates an entry at `path` that lives as long as this session.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoordinationError::NodeExists`] if `path` is taken.
    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Whether the session is still valid as far as this client knows.
    fn is_alive(&self) -> bool;

    /// Ends the session, removing its locks and ephemeral entries.
    async fn close(&self);
}
