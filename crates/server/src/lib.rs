//! clusterboot node library.
//!
//! Starts one node of a replicated database cluster: discovers its address,
//! decides under a distributed lock whether to bootstrap a new cluster or
//! join the existing members, launches the replication engine in that mode,
//! and waits for it to report primary status.

#![deny(unsafe_code)]

pub mod address;
pub mod bootstrap;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod health;
pub mod shutdown;
pub mod state;

pub use bootstrap::{NodeBootstrap, StartedNode, SupervisionOutcome};
pub use coordinator::{BootstrapCoordinator, decide_role};
pub use engine::{MariaDbEngine, ReplicationEngine};
pub use health::HealthMonitor;
pub use state::StateTracker;
