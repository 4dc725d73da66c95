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

//! Fixtures shared by the integration tests.
//!
//! Each test builds its own fixture; nothing here is global. Set `RAVENLINK_TEST_LOG` to an
//! `EnvFilter` directive (e.g. `ravenlink=debug`) to see the executor's logging.
#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use url::Url;
use wiremock::MockServer;

use ravenlink::{config::ExecutorConfig, executor::RequestExecutor, transport::Transport};
use ravenlink_shared::{service::BoxError, service::ResponseBody, DatabaseName};

/// Nothing listens here, so connecting fails fast
pub const UNREACHABLE: &str = "http://127.0.0.1:9";

pub const DATABASE: &str = "db1";

pub fn init_logging() {
    if let Ok(directives) = std::env::var("RAVENLINK_TEST_LOG") {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(directives))
            .with_test_writer()
            .try_init();
    }
}

/// An executor configuration addressing `urls`, with a short timeout & no background refreshes
pub fn config(urls: &[&str]) -> ExecutorConfig {
    ExecutorConfig::new(
        urls.iter().map(|url| Url::parse(url).unwrap()).collect(),
        DatabaseName::new(DATABASE).unwrap(),
    )
    .with_request_timeout(Duration::from_secs(2))
    .with_refresh_on_failover(false)
    .with_user_agent("ravenlink integration tests/0.0.1")
}

/// An executor that talks HTTP to `urls`
pub fn executor(urls: &[&str]) -> RequestExecutor {
    init_logging();
    RequestExecutor::new(&config(urls)).unwrap()
}

/// A mock cluster node
pub struct Node {
    pub server: MockServer,
}

impl Node {
    pub async fn start() -> Node {
        Node {
            server: MockServer::start().await,
        }
    }
    pub fn uri(&self) -> String {
        self.server.uri()
    }
    /// The JSON this node would use to describe itself in a topology
    pub fn describe(&self, tag: &str, role: &str) -> serde_json::Value {
        serde_json::json!({
            "Url": self.uri(),
            "Database": DATABASE,
            "ClusterTag": tag,
            "ServerRole": role,
        })
    }
}

/// A [Transport] that counts requests & answers every one with an empty 200
#[derive(Default)]
pub struct CountingTransport {
    pub requests: AtomicUsize,
}

impl CountingTransport {
    pub fn count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for CountingTransport {
    async fn send(&self, _request: Request<Bytes>) -> Result<Response<ResponseBody>, BoxError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(Response::builder()
            .status(200)
            .body(ResponseBody::default())?)
    }
}

pub fn counting_executor() -> (RequestExecutor, Arc<CountingTransport>) {
    init_logging();
    let transport = Arc::new(CountingTransport::default());
    let executor =
        RequestExecutor::with_transport(&config(&["http://127.0.0.1:8080"]), transport.clone())
            .unwrap();
    (executor, transport)
}
