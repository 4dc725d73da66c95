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

//! # Cluster topology
//!
//! The client's view of which [ServerNode]s serve a given database. A [Topology] is versioned by
//! a server-issued [TopologyEtag]; when we learn of a topology with a higher etag, we replace ours
//! wholesale.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};

use crate::node::{ServerNode, ServerRole};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("A topology must name at least one node"))]
    NoNodes { backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Version token for a [Topology]
///
/// The server hands these out as 64-bit integers; all that matters to us is the ordering.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct TopologyEtag(i64);

impl TopologyEtag {
    /// The etag of a topology we made up ourselves (from configuration); any topology we get from
    /// the server supersedes it.
    pub const INITIAL: TopologyEtag = TopologyEtag(i64::MIN);

    pub fn new(n: i64) -> TopologyEtag {
        TopologyEtag(n)
    }
}

impl Display for TopologyEtag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The serialized form of a [Topology]; validated on the way into the real thing
#[derive(Deserialize, Serialize)]
struct RawTopology {
    #[serde(rename = "Etag")]
    etag: TopologyEtag,
    #[serde(rename = "Nodes")]
    nodes: Vec<ServerNode>,
}

/// An ordered, non-empty collection of [ServerNode]s together with its version
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "RawTopology", into = "RawTopology")]
pub struct Topology {
    etag: TopologyEtag,
    nodes: Vec<ServerNode>,
}

impl Topology {
    pub fn new(etag: TopologyEtag, nodes: Vec<ServerNode>) -> Result<Topology> {
        ensure!(!nodes.is_empty(), NoNodesSnafu);
        Ok(Topology { etag, nodes })
    }
    pub fn etag(&self) -> TopologyEtag {
        self.etag
    }
    /// True if `self` ought to replace `other`
    pub fn is_newer_than(&self, other: &Topology) -> bool {
        self.etag > other.etag
    }
    /// Iterate over all nodes in the [Member](ServerRole::Member) role, with their positions
    pub fn members(&self) -> impl Iterator<Item = (usize, &ServerNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.role() == ServerRole::Member)
    }
    /// Never empty
    pub fn nodes(&self) -> &[ServerNode] {
        &self.nodes
    }
    pub fn position(&self, node: &ServerNode) -> Option<usize> {
        self.nodes.iter().position(|n| n == node)
    }
}

impl TryFrom<RawTopology> for Topology {
    type Error = Error;

    fn try_from(raw: RawTopology) -> std::result::Result<Self, Self::Error> {
        Topology::new(raw.etag, raw.nodes)
    }
}

impl From<Topology> for RawTopology {
    fn from(value: Topology) -> Self {
        RawTopology {
            etag: value.etag,
            nodes: value.nodes,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::DatabaseName;

    #[test]
    fn empty_topologies_are_rejected() {
        assert!(matches!(
            Topology::new(TopologyEtag::new(1), vec![]),
            Err(Error::NoNodes { .. })
        ));
        assert!(serde_json::from_str::<Topology>(r#"{"Etag": 3, "Nodes": []}"#).is_err());
        assert!(serde_json::from_str::<Topology>(r#"{"Etag": 3}"#).is_err());
    }

    #[test]
    fn de() {
        let topology: Topology = serde_json::from_str(
            r#"{
                 "Etag": 17,
                 "Nodes": [
                   {"Url": "http://10.0.0.1:8080", "Database": "db1", "ClusterTag": "A", "ServerRole": "Member"},
                   {"Url": "http://10.0.0.2:8080", "Database": "db1", "ClusterTag": "B", "ServerRole": "Promotable"},
                   {"Url": "http://10.0.0.3:8080", "Database": "db1", "ClusterTag": "C", "ServerRole": "Member"}
                 ]
               }"#,
        )
        .unwrap();
        assert_eq!(topology.etag(), TopologyEtag::new(17));
        assert_eq!(topology.nodes().len(), 3);
        assert_eq!(
            topology
                .nodes()
                .iter()
                .map(|n| n.cluster_tag())
                .collect::<Vec<_>>(),
            vec!["A", "B", "C"]
        );
        assert_eq!(
            topology.members().map(|(i, _)| i).collect::<Vec<_>>(),
            vec![0, 2]
        );
        assert_eq!(topology.nodes()[1].role(), ServerRole::Promotable);
        assert_eq!(&**topology.nodes()[2].database(), "db1");
    }

    #[test]
    fn ordering() {
        let node =
            ServerNode::from_url("http://127.0.0.1:8080", DatabaseName::new("db").unwrap())
                .unwrap();
        let initial = Topology::new(TopologyEtag::INITIAL, vec![node.clone()]).unwrap();
        let zero = Topology::new(TopologyEtag::new(0), vec![node]).unwrap();
        assert!(zero.is_newer_than(&initial));
        assert!(!initial.is_newer_than(&zero));
        assert!(!zero.is_newer_than(&zero));
    }
}
