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

//! List the databases hosted by the cluster.

use bytes::Bytes;
use http::{Method, Request};
use serde::Deserialize;

use ravenlink_shared::node::ServerNode;

use crate::command::{empty_body, parse_json, request_to, Command, CommandBase, Result};

#[derive(Deserialize)]
struct DatabaseNames {
    #[serde(rename = "Databases")]
    databases: Vec<String>,
}

/// `GET /databases?start={start}&pageSize={page_size}&namesOnly=true`
#[derive(Debug)]
pub struct GetDatabaseNamesCommand {
    base: CommandBase<Vec<String>>,
    start: usize,
    page_size: usize,
}

impl GetDatabaseNamesCommand {
    pub fn new(start: usize, page_size: usize) -> GetDatabaseNamesCommand {
        GetDatabaseNamesCommand {
            base: CommandBase::new_read(),
            start,
            page_size,
        }
    }
}

impl Command for GetDatabaseNamesCommand {
    type Output = Vec<String>;

    fn name(&self) -> &'static str {
        "GetDatabaseNames"
    }
    fn base(&self) -> &CommandBase<Vec<String>> {
        &self.base
    }
    fn base_mut(&mut self) -> &mut CommandBase<Vec<String>> {
        &mut self.base
    }
    fn create_request(&self, node: &ServerNode) -> Result<Request<Bytes>> {
        let mut url = node.server_endpoint(&["databases"]);
        url.query_pairs_mut()
            .append_pair("start", &self.start.to_string())
            .append_pair("pageSize", &self.page_size.to_string())
            .append_pair("namesOnly", "true");
        empty_body(self.name(), request_to(Method::GET, &url))
    }
    fn set_response(&mut self, body: &[u8], _from_cache: bool) -> Result<()> {
        let names: DatabaseNames = parse_json(self.name(), body)?;
        self.base.set_result(names.databases);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use ravenlink_shared::DatabaseName;

    use crate::command::{Error, Outcome};

    #[test]
    fn request() {
        let node = ServerNode::from_url(
            "http://127.0.0.1:8080",
            DatabaseName::new("db1").unwrap(),
        )
        .unwrap();
        let cmd = GetDatabaseNamesCommand::new(0, 20);
        let req = cmd.create_request(&node).unwrap();
        assert_eq!(req.method(), Method::GET);
        assert_eq!(
            req.uri().to_string(),
            "http://127.0.0.1:8080/databases?start=0&pageSize=20&namesOnly=true"
        );
        assert!(req.body().is_empty());
        assert!(cmd.is_read_request());
        assert!(cmd.can_cache());
    }

    #[test]
    fn responses() {
        let mut cmd = GetDatabaseNamesCommand::new(0, 20);
        cmd.set_response(br#"{"Databases": ["alpha", "beta"]}"#, false)
            .unwrap();
        assert_eq!(
            cmd.result(),
            &Outcome::Present(vec!["alpha".to_owned(), "beta".to_owned()])
        );

        for bad in [
            &b""[..],
            br#"{}"#,
            br#"{"Databases": "alpha"}"#,
            br#"{"Databases": [1, 2]}"#,
            b"not json",
        ] {
            let mut cmd = GetDatabaseNamesCommand::new(0, 20);
            assert!(matches!(
                cmd.set_response(bad, false),
                Err(Error::InvalidResponse { .. })
            ));
            assert_eq!(cmd.result(), &Outcome::Unset);
        }
    }
}
