//! Property tests over node start interleavings.
//!
//! However node starts are interleaved, exactly one node bootstraps, server
//! IDs are distinct and dense, and each node's peers are exactly the members
//! registered before it.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]

mod common;

use std::{collections::HashSet, time::Duration};

use clusterboot_coordination::InMemoryCoordinator;
use clusterboot_test_utils::{strategies::arb_cluster_start, test_node_config};
use clusterboot_types::{Decision, NodeAddress, Role};
use common::{ScriptedEngine, node_with_config, registered};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

/// Starts every node after its delay and returns the decisions in start order.
fn start_cluster(nodes: &[(NodeAddress, Duration)]) -> Vec<Decision> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap();

    runtime.block_on(async {
        let coordinator = InMemoryCoordinator::new();
        let mut tasks = Vec::new();
        for (address, delay) in nodes.iter().cloned() {
            let node = node_with_config(
                test_node_config(),
                &coordinator,
                address,
                ScriptedEngine::primary(),
            );
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                node.run(&CancellationToken::new()).await
            }));
        }

        let mut started = Vec::new();
        for task in tasks {
            started.push(task.await.unwrap().unwrap());
        }
        assert_eq!(registered(&coordinator).len(), nodes.len());
        started.into_iter().map(|s| s.decision).collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_exactly_one_bootstrap(nodes in arb_cluster_start(6)) {
        let decisions = start_cluster(&nodes);

        let bootstraps =
            decisions.iter().filter(|d| d.identity.role() == Role::Bootstrap).count();
        prop_assert_eq!(bootstraps, 1);

        let mut ids: Vec<u32> = decisions.iter().map(|d| d.identity.server_id().value()).collect();
        ids.sort_unstable();
        let expected: Vec<u32> = (1..=u32::try_from(nodes.len()).unwrap()).collect();
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn prop_peers_are_earlier_members(nodes in arb_cluster_start(6)) {
        let decisions = start_cluster(&nodes);

        for decision in &decisions {
            let id = decision.identity.server_id().value();
            let earlier: HashSet<_> = decisions
                .iter()
                .filter(|other| other.identity.server_id().value() < id)
                .map(|other| other.identity.address().clone())
                .collect();
            let peers: HashSet<_> = decision.peers.iter().cloned().collect();
            prop_assert_eq!(peers.len(), decision.peers.len(), "peer list has duplicates");
            prop_assert_eq!(peers, earlier);
            prop_assert!(!decision.peers.contains(decision.identity.address()));
        }
    }

    #[test]
    fn prop_earliest_starter_bootstraps(nodes in arb_cluster_start(6)) {
        let earliest = nodes.iter().map(|(_, delay)| *delay).min().unwrap();
        let first: Vec<_> = nodes.iter().filter(|(_, delay)| *delay == earliest).collect();
        prop_assume!(first.len() == 1);

        let decisions = start_cluster(&nodes);
        let bootstrap = decisions
            .iter()
            .find(|d| d.identity.role() == Role::Bootstrap)
            .map(|d| d.identity.address().clone());
        prop_assert_eq!(bootstrap.as_ref(), Some(&first[0].0));
    }
}
