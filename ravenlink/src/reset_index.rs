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

//! Ask the cluster to rebuild an index from scratch.

use bytes::Bytes;
use http::{Method, Request};
use snafu::prelude::*;

use ravenlink_shared::{node::ServerNode, IndexName};

use crate::command::{
    empty_body, request_to, Command, CommandBase, ResponseType, Result, ValidationSnafu,
};

/// The server's own verb for resetting an index
fn reset() -> Method {
    Method::from_bytes(b"RESET").unwrap(/* known good */)
}

/// `RESET /databases/{db}/indexes?name={name}`
#[derive(Debug)]
pub struct ResetIndexCommand {
    base: CommandBase<()>,
    index: IndexName,
}

impl ResetIndexCommand {
    pub fn new(index: &str) -> Result<ResetIndexCommand> {
        Ok(ResetIndexCommand::for_index(
            IndexName::new(index).context(ValidationSnafu)?,
        ))
    }
    pub fn for_index(index: IndexName) -> ResetIndexCommand {
        ResetIndexCommand {
            base: CommandBase::new_write(),
            index,
        }
    }
}

impl Command for ResetIndexCommand {
    type Output = ();

    fn name(&self) -> &'static str {
        "ResetIndex"
    }
    fn base(&self) -> &CommandBase<()> {
        &self.base
    }
    fn base_mut(&mut self) -> &mut CommandBase<()> {
        &mut self.base
    }
    fn response_type(&self) -> ResponseType {
        ResponseType::Empty
    }
    fn create_request(&self, node: &ServerNode) -> Result<Request<Bytes>> {
        let mut url = node.database_endpoint(&["indexes"]);
        url.query_pairs_mut().append_pair("name", &self.index);
        empty_body(self.name(), request_to(reset(), &url))
    }
    fn set_response(&mut self, _body: &[u8], _from_cache: bool) -> Result<()> {
        self.base.set_result(());
        Ok(())
    }
}
