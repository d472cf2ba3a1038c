//! Proptest strategies for cluster startup scenarios.
//!
//! # Usage
//!
//! ```no_run
//! use clusterboot_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(nodes in strategies::arb_cluster_start(5)) {
//!         // start each node after its delay
//!     }
//! }
//! ```

use std::time::Duration;

use clusterboot_types::NodeAddress;
use proptest::prelude::*;

/// Generates an arbitrary IPv4 node address in `10.0.0.0/16`, host part never zero.
pub fn arb_node_address() -> impl Strategy<Value = NodeAddress> {
    (0u8..=255, 1u8..=254).prop_map(|(c, d)| NodeAddress::new(format!("10.0.{c}.{d}")))
}

/// Generates 1 to `max_nodes` distinct node addresses.
pub fn arb_node_addresses(max_nodes: usize) -> impl Strategy<Value = Vec<NodeAddress>> {
    prop::collection::btree_set(1u8..=254, 1..=max_nodes.max(1)).prop_map(|hosts| {
        hosts.into_iter().map(|d| NodeAddress::new(format!("10.0.0.{d}"))).collect()
    })
}

/// Generates a start delay between 0 and 3 seconds in millisecond steps.
pub fn arb_start_delay() -> impl Strategy<Value = Duration> {
    (0u64..=3_000).prop_map(Duration::from_millis)
}

/// Generates a cluster start: distinct nodes, each with its own start delay.
///
/// Equal delays are likely, which exercises simultaneous lock requests.
pub fn arb_cluster_start(max_nodes: usize) -> impl Strategy<Value = Vec<(NodeAddress, Duration)>> {
    arb_node_addresses(max_nodes).prop_flat_map(|addresses| {
        let len = addresses.len();
        (Just(addresses), prop::collection::vec(arb_start_delay(), len))
            .prop_map(|(addresses, delays)| addresses.into_iter().zip(delays).collect())
    })
}
