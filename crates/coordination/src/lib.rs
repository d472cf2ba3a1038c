//! Coordination layer for clusterboot.
//!
//! Provides the pieces a node uses to agree on the cluster's first member:
//! - [`CoordinationClient`]: session establishment with retry
//! - [`BootstrapLock`]: the session-bound mutex around the decision
//! - [`MembershipRegistry`]: ephemeral per-node entries keyed by address
//! - Backends: [`EtcdConnector`] and [`InMemoryCoordinator`]

#![deny(unsafe_code)]

pub mod client;
pub mod error;
pub mod etcd;
pub mod lock;
pub mod memory;
pub mod registry;
pub mod service;

pub use client::CoordinationClient;
pub use error::{CoordinationError, Result};
pub use etcd::{EtcdConnector, EtcdSession};
pub use lock::BootstrapLock;
pub use memory::{CoordinationEvent, InMemoryCoordinator, InMemorySession, SessionId};
pub use registry::{MembershipRegistry, RegistrySnapshot};
pub use service::{ChildNode, Connector, LockHandle, Session};
