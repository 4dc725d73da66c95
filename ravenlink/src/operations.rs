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

//! # Maintenance operations
//!
//! An operation is a reusable description of some administrative action; each time it's sent, it
//! builds a fresh [Command](command::Command) (commands are good for one call only). Hand one to
//! [RequestExecutor::send](crate::executor::RequestExecutor::send).

use snafu::prelude::*;

use ravenlink_shared::IndexName;

use crate::{
    command::{self, ValidationSnafu},
    database_names::GetDatabaseNamesCommand,
    reset_index::ResetIndexCommand,
};

pub trait MaintenanceOperation {
    type Command: command::Command;
    fn command(&self) -> Self::Command;
}

/// Page through the names of the databases hosted by the cluster
#[derive(Clone, Copy, Debug)]
pub struct GetDatabaseNamesOperation {
    start: usize,
    page_size: usize,
}

impl GetDatabaseNamesOperation {
    pub fn new(start: usize, page_size: usize) -> GetDatabaseNamesOperation {
        GetDatabaseNamesOperation { start, page_size }
    }
}

impl MaintenanceOperation for GetDatabaseNamesOperation {
    type Command = GetDatabaseNamesCommand;
    fn command(&self) -> Self::Command {
        GetDatabaseNamesCommand::new(self.start, self.page_size)
    }
}

#[derive(Clone, Debug)]
pub struct ResetIndexOperation {
    index: IndexName,
}

impl ResetIndexOperation {
    pub fn new(index: &str) -> command::Result<ResetIndexOperation> {
        Ok(ResetIndexOperation {
            index: IndexName::new(index).context(ValidationSnafu)?,
        })
    }
}

impl MaintenanceOperation for ResetIndexOperation {
    type Command = ResetIndexCommand;
    fn command(&self) -> Self::Command {
        ResetIndexCommand::for_index(self.index.clone())
    }
}
