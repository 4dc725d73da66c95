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

//! # ravenlink
//!
//! Command execution & conditional caching for clients of a document-database cluster.
//!
//! Build a [RequestExecutor](executor::RequestExecutor) from an
//! [ExecutorConfig](config::ExecutorConfig), then hand it [Command](command::Command)s (or
//! [MaintenanceOperation](operations::MaintenanceOperation)s). The executor picks the node, adds
//! conditional-request headers from its cache, enforces timeouts & fails over; the command builds
//! the request & interprets the response.
pub mod cache;
pub mod command;
pub mod config;
pub mod database_names;
pub mod executor;
pub mod get_topology;
pub mod head_document;
pub mod node_selector;
pub mod operations;
pub mod reset_index;
pub mod stream_document;
pub mod transport;
