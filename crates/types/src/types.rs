//! Domain types for cluster bootstrap coordination.
//!
//! These types describe a node's identity, its registry record, the replication
//! engine's reported status, and the per-node startup state machine.

use std::{fmt, net::IpAddr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identity
// ============================================================================

/// Network address a node advertises to its peers.
///
/// This is the address other replication engines use in their peer list, so
/// it is kept as the exact string the node registered with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(String);

impl NodeAddress {
    /// Creates an address from its string form.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<IpAddr> for NodeAddress {
    fn from(ip: IpAddr) -> Self {
        Self(ip.to_string())
    }
}

impl From<&str> for NodeAddress {
    fn from(addr: &str) -> Self {
        Self(addr.to_string())
    }
}

/// Replication engine server identifier.
///
/// Assigned at decision time from the size of the membership registry
/// snapshot, so the first node to decide receives `1`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ServerId(u32);

impl ServerId {
    /// Creates a server ID from its raw value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Derives the server ID for a node that observed `registered` existing members.
    #[must_use]
    pub fn from_registry_size(registered: usize) -> Self {
        let size = u32::try_from(registered).unwrap_or(u32::MAX);
        Self(size.saturating_add(1))
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role a node commits to during the bootstrap decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Initializes a brand-new cluster with no peers.
    Bootstrap,
    /// Joins a cluster that is already initializing or running.
    Joiner,
}

impl Role {
    /// Returns the role name used in logs and the ready file.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::Joiner => "joiner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity a node commits to once it has decided its role.
///
/// Created exactly once per decision; there are no setters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    address: NodeAddress,
    server_id: ServerId,
    role: Role,
}

impl NodeIdentity {
    /// Creates a node identity.
    #[must_use]
    pub fn new(address: NodeAddress, server_id: ServerId, role: Role) -> Self {
        Self { address, server_id, role }
    }

    /// The address this node registered under.
    #[must_use]
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// The engine server ID assigned at decision time.
    #[must_use]
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// The committed role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }
}

// ============================================================================
// Membership registry
// ============================================================================

/// A node's record in the membership registry.
///
/// Keyed by address; the coordination service removes it when the owning
/// session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Address of the registered node (the registry key).
    pub address: NodeAddress,
    /// Position in which the node joined (equals its server ID).
    pub join_order: u64,
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
}

impl RegistryEntry {
    /// Builds the entry a node writes for itself after deciding.
    #[must_use]
    pub fn for_identity(identity: &NodeIdentity, timestamp: DateTime<Utc>) -> Self {
        Self {
            address: identity.address().clone(),
            join_order: u64::from(identity.server_id().value()),
            timestamp,
        }
    }
}

/// Outcome of the bootstrap decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// The identity this node committed to.
    pub identity: NodeIdentity,
    /// Addresses of nodes registered before this one. Empty for bootstrap.
    pub peers: Vec<NodeAddress>,
}

// ============================================================================
// Engine status
// ============================================================================

/// Cluster status reported by the replication engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineStatus {
    /// The engine holds a quorum-consistent view and can serve traffic.
    Primary,
    /// The engine is running but not part of a primary component.
    NonPrimary,
    /// The engine could not be queried.
    Disconnected,
}

impl EngineStatus {
    /// Interprets a `wsrep_cluster_status` value.
    ///
    /// Only the exact value `Primary` counts as primary.
    #[must_use]
    pub fn from_wsrep_value(value: &str) -> Self {
        match value.trim() {
            "Primary" => Self::Primary,
            "" => Self::Disconnected,
            _ => Self::NonPrimary,
        }
    }

    /// Returns true for [`EngineStatus::Primary`].
    #[must_use]
    pub const fn is_primary(self) -> bool {
        matches!(self, Self::Primary)
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("Primary"),
            Self::NonPrimary => f.write_str("Non-Primary"),
            Self::Disconnected => f.write_str("Disconnected"),
        }
    }
}

// ============================================================================
// Startup state machine
// ============================================================================

/// Per-node startup state.
///
/// ```text
/// Connecting → AwaitingLock → Deciding → {Bootstrapping | Joining}
///            → Starting → WaitingPrimary → Primary
/// ```
///
/// `Failed` is reachable from `AwaitingLock`, `Starting`, and (only when a
/// maximum primary wait is configured) `WaitingPrimary`. A lost session while
/// waiting for or holding the lock returns to `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterState {
    /// Establishing a coordination session.
    Connecting,
    /// Waiting for the bootstrap lock.
    AwaitingLock,
    /// Holding the lock and reading the registry.
    Deciding,
    /// Committed to initializing a new cluster.
    Bootstrapping,
    /// Committed to joining an existing cluster.
    Joining,
    /// Launching the replication engine.
    Starting,
    /// Engine launched; polling for primary status.
    WaitingPrimary,
    /// Engine reported primary status. Terminal success.
    Primary,
    /// A fatal error occurred. Terminal failure.
    Failed,
}

impl ClusterState {
    /// Returns the state name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::AwaitingLock => "awaiting_lock",
            Self::Deciding => "deciding",
            Self::Bootstrapping => "bootstrapping",
            Self::Joining => "joining",
            Self::Starting => "starting",
            Self::WaitingPrimary => "waiting_primary",
            Self::Primary => "primary",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Primary | Self::Failed)
    }

    /// Whether `next` is a legal successor of this state.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::AwaitingLock)
                | (Self::AwaitingLock, Self::Deciding | Self::Failed | Self::Connecting)
                | (Self::Deciding, Self::Bootstrapping | Self::Joining | Self::Connecting)
                | (Self::Bootstrapping | Self::Joining, Self::Starting)
                | (Self::Starting, Self::WaitingPrimary | Self::Failed)
                | (Self::WaitingPrimary, Self::Primary | Self::Failed)
        )
    }

    /// The state entered after committing to `role`.
    #[must_use]
    pub const fn for_role(role: Role) -> Self {
        match role {
            Role::Bootstrap => Self::Bootstrapping,
            Role::Joiner => Self::Joining,
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
