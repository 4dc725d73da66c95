// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of ravenlink.
//
// ravenlink is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// ravenlink is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with ravenlink.  If not,
// see <http://www.gnu.org/licenses/>.

//! # Choosing nodes
//!
//! The [NodeSelector] owns the executor's current [Topology] & answers one question: for this
//! request, which nodes should we try, and in what order?
//!
//! The topology is held as an `Arc` snapshot. Readers clone the `Arc` out under a short-lived
//! lock & work with their copy for the remainder of the request, so a refresh that lands while a
//! request is in flight changes nothing for that request. The lock is never held across an
//! `.await`.
//!
//! The first candidate is:
//!
//! - for writes, the preferred node: initially the first [Member](ServerRole::Member) the server
//!   lists (the leader), later whichever node last answered when the preferred node didn't
//! - for reads, per the configured [ReadBalance]
//!
//! Every other node follows as a failover candidate: members before rebels before everyone else,
//! then fewest recorded failures, then topology order.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, PoisonError, RwLock,
};

use dashmap::DashMap;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info};

use ravenlink_shared::{
    node::{ServerNode, ServerRole},
    topology::Topology,
};

/// How to spread read requests across the database group
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ReadBalance {
    /// Send reads to the preferred node, like writes
    #[default]
    None,
    /// Rotate among the [Member](ServerRole::Member) nodes
    RoundRobin,
    /// Pick a [Member](ServerRole::Member) node at random
    Random,
}

struct Snapshot {
    topology: Arc<Topology>,
    preferred: usize,
}

fn first_member(topology: &Topology) -> usize {
    topology.members().map(|(i, _)| i).next().unwrap_or(0)
}

fn role_rank(role: ServerRole) -> u8 {
    match role {
        ServerRole::Member => 0,
        ServerRole::Rebel => 1,
        ServerRole::Promotable | ServerRole::Watcher => 2,
    }
}

pub struct NodeSelector {
    snapshot: RwLock<Snapshot>,
    read_balance: ReadBalance,
    round_robin: AtomicUsize,
    failures: DashMap<ServerNode, u32>,
}

impl NodeSelector {
    pub fn new(topology: Topology, read_balance: ReadBalance) -> NodeSelector {
        let preferred = first_member(&topology);
        NodeSelector {
            snapshot: RwLock::new(Snapshot {
                topology: Arc::new(topology),
                preferred,
            }),
            read_balance,
            round_robin: AtomicUsize::new(0),
            failures: DashMap::new(),
        }
    }
    /// Order the nodes of the current topology for one request
    ///
    /// The result is never empty.
    pub fn candidates(&self, is_read_request: bool) -> Vec<ServerNode> {
        let (topology, preferred) = self.current();
        let nodes = topology.nodes();

        let first = if is_read_request {
            self.read_target(&topology, preferred)
        } else {
            preferred
        };

        let mut rest = (0..nodes.len()).filter(|i| *i != first).collect::<Vec<_>>();
        rest.sort_by_key(|&i| (role_rank(nodes[i].role()), self.failures(&nodes[i]), i));

        std::iter::once(first)
            .chain(rest)
            .map(|i| nodes[i].clone())
            .collect()
    }
    /// The number of failures recorded against `node` since it last succeeded
    pub fn failures(&self, node: &ServerNode) -> u32 {
        self.failures.get(node).map(|n| *n).unwrap_or(0)
    }
    /// The node writes will go to first
    pub fn preferred(&self) -> ServerNode {
        let (topology, preferred) = self.current();
        topology.nodes()[preferred].clone()
    }
    pub fn record_failure(&self, node: &ServerNode) -> u32 {
        let mut count = self.failures.entry(node.clone()).or_insert(0);
        *count += 1;
        *count
    }
    /// Make `node` the preferred node
    ///
    /// Only a failover should move the preferred node; a read that the balancing policy sent
    /// elsewhere says nothing about where writes belong.
    pub fn promote(&self, node: &ServerNode) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(position) = snapshot.topology.position(node) {
            if position != snapshot.preferred {
                info!("{} is now the preferred node", node.url());
                snapshot.preferred = position;
            }
        }
    }
    /// Clear `node`'s failures
    pub fn record_success(&self, node: &ServerNode) {
        self.failures.remove(node);
    }
    pub fn topology(&self) -> Arc<Topology> {
        self.current().0
    }
    /// Adopt `topology` if it's newer than ours; return true if we did
    pub fn try_update(&self, topology: Topology) -> bool {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        if !topology.is_newer_than(&snapshot.topology) {
            debug!(
                "Ignoring topology {} (we have {})",
                topology.etag(),
                snapshot.topology.etag()
            );
            return false;
        }
        debug!(
            "Replacing topology {} with {} ({} nodes)",
            snapshot.topology.etag(),
            topology.etag(),
            topology.nodes().len()
        );
        self.failures
            .retain(|node, _| topology.position(node).is_some());
        snapshot.preferred = first_member(&topology);
        snapshot.topology = Arc::new(topology);
        true
    }
    fn current(&self) -> (Arc<Topology>, usize) {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        (snapshot.topology.clone(), snapshot.preferred)
    }
    fn read_target(&self, topology: &Topology, preferred: usize) -> usize {
        let members = topology.members().map(|(i, _)| i).collect::<Vec<_>>();
        if members.is_empty() {
            return preferred;
        }
        match self.read_balance {
            ReadBalance::None => preferred,
            ReadBalance::RoundRobin => {
                members[self.round_robin.fetch_add(1, Ordering::Relaxed) % members.len()]
            }
            ReadBalance::Random => members[rand::thread_rng().gen_range(0..members.len())],
        }
    }
}

impl std::fmt::Debug for NodeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (topology, preferred) = self.current();
        f.debug_struct("NodeSelector")
            .field("etag", &topology.etag())
            .field("nodes", &topology.nodes().len())
            .field("preferred", &preferred)
            .field("read_balance", &self.read_balance)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use ravenlink_shared::{topology::TopologyEtag, DatabaseName};
    use url::Url;

    fn node(port: u16, tag: &str, role: ServerRole) -> ServerNode {
        ServerNode::new(
            Url::parse(&format!("http://127.0.0.1:{port}")).unwrap(),
            DatabaseName::new("db1").unwrap(),
            tag,
            role,
        )
        .unwrap()
    }

    fn topology(etag: i64) -> Topology {
        Topology::new(
            TopologyEtag::new(etag),
            vec![
                node(8081, "A", ServerRole::Promotable),
                node(8082, "B", ServerRole::Member),
                node(8083, "C", ServerRole::Rebel),
                node(8084, "D", ServerRole::Member),
            ],
        )
        .unwrap()
    }

    fn tags(nodes: &[ServerNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.cluster_tag()).collect()
    }

    #[test]
    fn failover_order() {
        let selector = NodeSelector::new(topology(1), ReadBalance::None);
        // The first member is preferred; then member, rebel, promotable
        assert_eq!(tags(&selector.candidates(false)), vec!["B", "D", "C", "A"]);
        assert_eq!(tags(&selector.candidates(true)), vec!["B", "D", "C", "A"]);

        let d = node(8084, "D", ServerRole::Member);
        assert_eq!(selector.record_failure(&d), 1);
        assert_eq!(selector.record_failure(&d), 2);
        // Role outranks failures
        assert_eq!(tags(&selector.candidates(false)), vec!["B", "D", "C", "A"]);

        let c = node(8083, "C", ServerRole::Rebel);
        selector.record_success(&c);
        assert_eq!(selector.preferred().cluster_tag(), "B");
        selector.promote(&c);
        assert_eq!(selector.preferred().cluster_tag(), "C");
        assert_eq!(tags(&selector.candidates(false)), vec!["C", "B", "D", "A"]);

        selector.record_success(&d);
        assert_eq!(selector.failures(&d), 0);
        selector.promote(&d);
        assert_eq!(selector.preferred().cluster_tag(), "D");
    }

    #[test]
    fn balanced_reads_leave_writes_with_the_leader() {
        let topology = Topology::new(
            TopologyEtag::new(1),
            vec![
                node(8081, "A", ServerRole::Member),
                node(8082, "B", ServerRole::Member),
            ],
        )
        .unwrap();
        let selector = NodeSelector::new(topology, ReadBalance::RoundRobin);
        for _ in 0..3 {
            let target = selector.candidates(true)[0].clone();
            selector.record_success(&target);
        }
        assert_eq!(selector.preferred().cluster_tag(), "A");
        assert_eq!(selector.candidates(false)[0].cluster_tag(), "A");
    }

    #[test]
    fn failures_break_ties() {
        let topology = Topology::new(
            TopologyEtag::new(1),
            vec![
                node(8081, "A", ServerRole::Member),
                node(8082, "B", ServerRole::Member),
                node(8083, "C", ServerRole::Member),
            ],
        )
        .unwrap();
        let selector = NodeSelector::new(topology, ReadBalance::None);
        selector.record_failure(&node(8082, "B", ServerRole::Member));
        assert_eq!(tags(&selector.candidates(false)), vec!["A", "C", "B"]);
    }

    #[test]
    fn read_balancing() {
        let selector = NodeSelector::new(topology(1), ReadBalance::RoundRobin);
        let firsts = (0..4)
            .map(|_| selector.candidates(true)[0].cluster_tag().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(firsts, vec!["B", "D", "B", "D"]);
        // Writes ignore the read policy
        assert_eq!(selector.candidates(false)[0].cluster_tag(), "B");

        let selector = NodeSelector::new(topology(1), ReadBalance::Random);
        for _ in 0..32 {
            let candidates = selector.candidates(true);
            assert_eq!(candidates.len(), 4);
            assert!(["B", "D"].contains(&candidates[0].cluster_tag()));
        }
    }

    #[test]
    fn updates() {
        let selector = NodeSelector::new(topology(5), ReadBalance::None);
        let before = selector.topology();
        assert!(!selector.try_update(topology(5)));
        assert!(!selector.try_update(topology(4)));

        let smaller = Topology::new(
            TopologyEtag::new(6),
            vec![node(8084, "D", ServerRole::Member)],
        )
        .unwrap();
        assert!(selector.try_update(smaller));
        // Outstanding snapshots are unaffected
        assert_eq!(before.nodes().len(), 4);
        assert_eq!(selector.topology().nodes().len(), 1);
        assert_eq!(tags(&selector.candidates(true)), vec!["D"]);
    }
}
