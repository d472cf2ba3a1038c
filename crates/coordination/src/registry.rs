//! Membership registry: ephemeral per-node entries under a parent path.

use chrono::{DateTime, Utc};
use clusterboot_types::{NodeAddress, RegistryEntry};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::{debug, warn};

use crate::{
    error::{CodecSnafu, CoordinationError},
    service::Session,
};

/// Stored value of a registry entry. The address is the entry's key.
#[derive(Debug, Serialize, Deserialize)]
struct RegistryRecord {
    join_order: u64,
    timestamp: DateTime<Utc>,
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    entries: Vec<RegistryEntry>,
}

impl RegistrySnapshot {
    /// Builds a snapshot ordered by join order, then address.
    #[must_use]
    pub fn new(mut entries: Vec<RegistryEntry>) -> Self {
        entries.sort_by(|a, b| {
            a.join_order.cmp(&b.join_order).then_with(|| a.address.cmp(&b.address))
        });
        Self { entries }
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no node is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered entries in join order.
    #[must_use]
    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    /// Registered addresses in join order.
    #[must_use]
    pub fn addresses(&self) -> Vec<NodeAddress> {
        self.entries.iter().map(|e| e.address.clone()).collect()
    }

    /// Whether `address` is registered.
    #[must_use]
    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.entries.iter().any(|e| &e.address == address)
    }
}

/// The set of nodes that have committed to a role, stored as ephemeral
/// entries keyed by address under `path`.
#[derive(Debug, Clone)]
pub struct MembershipRegistry {
    path: String,
}

impl MembershipRegistry {
    /// Creates a registry rooted at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let trimmed = path.trim_end_matches('/').to_string();
        Self { path: trimmed }
    }

    /// The registry parent path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Full path of the entry for `address`.
    #[must_use]
    pub fn entry_path(&self, address: &NodeAddress) -> String {
        format!("{}/{}", self.path, address)
    }

    /// Reads every entry currently registered.
    ///
    /// Entries whose value cannot be decoded still count as members: the
    /// address is the key, and the value is informational.
    pub async fn snapshot<S>(&self, session: &S) -> Result<RegistrySnapshot, CoordinationError>
    where
        S: Session + ?Sized,
    {
        let children = session.list_children(&self.path).await?;
        let entries = children
            .into_iter()
            .map(|child| {
                let address = NodeAddress::new(child.name);
                match serde_json::from_slice::<RegistryRecord>(&child.data) {
                    Ok(record) => RegistryEntry {
                        address,
                        join_order: record.join_order,
                        timestamp: record.timestamp,
                    },
                    Err(e) => {
                        warn!(%address, error = %e, "Undecodable registry entry");
                        RegistryEntry {
                            address,
                            join_order: 0,
                            timestamp: DateTime::<Utc>::UNIX_EPOCH,
                        }
                    },
                }
            })
            .collect();
        let snapshot = RegistrySnapshot::new(entries);
        debug!(registry = %self.path, members = snapshot.len(), "Read registry snapshot");
        Ok(snapshot)
    }

    /// Writes this node's entry. Fails if an entry for the address exists.
    pub async fn register<S>(
        &self,
        session: &S,
        entry: &RegistryEntry,
    ) -> Result<(), CoordinationError>
    where
        S: Session + ?Sized,
    {
        let path = self.entry_path(&entry.address);
        let record = RegistryRecord { join_order: entry.join_order, timestamp: entry.timestamp };
        let data = serde_json::to_vec(&record).context(CodecSnafu { path: path.clone() })?;
        session.create_ephemeral(&path, &data).await?;
        debug!(%path, join_order = entry.join_order, "Registered node");
        Ok(())
    }
}
