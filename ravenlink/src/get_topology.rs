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

//! Fetch the cluster's current view of the database group.

use bytes::Bytes;
use http::{Method, Request};

use ravenlink_shared::{node::ServerNode, topology::Topology};

use crate::command::{empty_body, parse_json, request_to, Command, CommandBase, Result};

/// `GET /topology?name={db}`
///
/// The database is whichever one the target node is serving. The result is never cached: a stale
/// topology is worse than an extra round-trip.
#[derive(Debug)]
pub struct GetDatabaseTopologyCommand {
    base: CommandBase<Topology>,
}

impl GetDatabaseTopologyCommand {
    pub fn new() -> GetDatabaseTopologyCommand {
        GetDatabaseTopologyCommand {
            base: CommandBase::new_read(),
        }
    }
}

impl Default for GetDatabaseTopologyCommand {
    fn default() -> Self {
        GetDatabaseTopologyCommand::new()
    }
}

impl Command for GetDatabaseTopologyCommand {
    type Output = Topology;

    fn name(&self) -> &'static str {
        "GetDatabaseTopology"
    }
    fn base(&self) -> &CommandBase<Topology> {
        &self.base
    }
    fn base_mut(&mut self) -> &mut CommandBase<Topology> {
        &mut self.base
    }
    fn can_cache(&self) -> bool {
        false
    }
    fn create_request(&self, node: &ServerNode) -> Result<Request<Bytes>> {
        let mut url = node.server_endpoint(&["topology"]);
        url.query_pairs_mut().append_pair("name", node.database());
        empty_body(self.name(), request_to(Method::GET, &url))
    }
    fn set_response(&mut self, body: &[u8], _from_cache: bool) -> Result<()> {
        // `Topology` refuses to deserialize with no nodes
        let topology: Topology = parse_json(self.name(), body)?;
        self.base.set_result(topology);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use ravenlink_shared::{node::ServerRole, topology::TopologyEtag, DatabaseName};

    use crate::command::Error;

    #[test]
    fn request() {
        let node = ServerNode::from_url(
            "http://127.0.0.1:8080",
            DatabaseName::new("my db").unwrap(),
        )
        .unwrap();
        let req = GetDatabaseTopologyCommand::new()
            .create_request(&node)
            .unwrap();
        assert_eq!(
            req.uri().to_string(),
            "http://127.0.0.1:8080/topology?name=my+db"
        );
    }

    #[test]
    fn responses() {
        let mut cmd = GetDatabaseTopologyCommand::new();
        cmd.set_response(
            br#"{"Etag": 4, "Nodes": [{"Url": "http://127.0.0.1:8080", "Database": "db1", "ClusterTag": "A", "ServerRole": "Member"}]}"#,
            false,
        )
        .unwrap();
        let topology = cmd.result().value().unwrap();
        assert_eq!(topology.etag(), TopologyEtag::new(4));
        assert_eq!(topology.nodes().len(), 1);
        assert_eq!(topology.nodes()[0].cluster_tag(), "A");
        assert_eq!(topology.nodes()[0].role(), ServerRole::Member);

        let mut cmd = GetDatabaseTopologyCommand::new();
        assert!(matches!(
            cmd.set_response(br#"{"Etag": 5, "Nodes": []}"#, false),
            Err(Error::InvalidResponse { .. })
        ));
        assert!(!cmd.result().is_set());
        assert!(matches!(
            cmd.set_response(b"", false),
            Err(Error::InvalidResponse { .. })
        ));
    }
}
