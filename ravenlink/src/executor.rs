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

//! # The request executor
//!
//! [RequestExecutor] runs [Command]s against the cluster. For each command it:
//!
//! 1. asks the [NodeSelector] for an ordering of the current topology's nodes
//! 2. builds the request for the first candidate, adding `If-None-Match` if the
//!    [ConditionalCache] has something for it
//! 3. sends it & interprets the response, all under the configured request timeout
//! 4. on a transport failure, moves on to the next candidate
//!
//! Each node is tried at most once per round. If every node fails, the executor may (per
//! `num-attempts` in the backoff configuration) back off & go around again; once out of rounds it
//! fails with [Error::AllNodesFailed], listing every attempt.
//!
//! Only transport-level failures are retried. An invalid response is the server breaking the
//! command's contract, and a different node isn't going to fix that; nor will it fix an argument
//! the command rejected at construction.
//!
//! Statuses the executor hands to the command are 2xx, 304 & 404. A 304 for which we hold a cache
//! entry is answered from the entry without reading the response body. 502, 503 & 504 are treated
//! as the node being unavailable; anything else is [Error::Status].

use std::{fmt::Write, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{header::IF_NONE_MATCH, HeaderValue, Method, Request, StatusCode};
use snafu::{prelude::*, Backtrace};
use tap::Pipe;
use tokio_util::sync::CancellationToken;
use tower::{
    retry::backoff::{Backoff, ExponentialBackoffMaker, MakeBackoff},
    util::rng::HasherRng,
};
use tracing::{debug, info, warn};
use url::Url;

use ravenlink_shared::{
    node::{ServerNode, ServerRole},
    service::BoxError,
    topology::{Topology, TopologyEtag},
    DatabaseName,
};

use crate::{
    cache::{CacheEntry, ConditionalCache, Fingerprint},
    command::{self, Command, Outcome, ResponseDisposition},
    config::ExecutorConfig,
    get_topology::GetDatabaseTopologyCommand,
    node_selector::NodeSelector,
    operations::MaintenanceOperation,
    transport::{self, CallContext, HttpTransport, Transport},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One failed attempt to run a command against a node
#[derive(Debug)]
pub struct NodeFailure {
    pub url: Url,
    pub error: Error,
}

fn summarize(attempts: &[NodeFailure]) -> String {
    attempts
        .iter()
        .fold(String::new(), |mut acc, attempt| {
            if !acc.is_empty() {
                acc.push_str("; ");
            }
            let _ = write!(acc, "{}: {}", attempt.url, attempt.error);
            acc
        })
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("All {} attempts failed: {}", attempts.len(), summarize(attempts)))]
    AllNodesFailed { attempts: Vec<NodeFailure> },
    #[snafu(display("Invalid backoff configuration: {source}"))]
    Backoff {
        source: tower::retry::backoff::InvalidBackoff,
        backtrace: Backtrace,
    },
    #[snafu(display("The operation was cancelled"))]
    Cancelled { backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Command { source: command::Error },
    #[snafu(display("An executor needs a database to address"))]
    NoDatabase { backtrace: Backtrace },
    #[snafu(display("Invalid node URL: {source}"))]
    Node {
        source: ravenlink_shared::node::Error,
    },
    #[snafu(display("{url} is unavailable ({status})"))]
    NodeUnavailable {
        url: Url,
        status: StatusCode,
        backtrace: Backtrace,
    },
    #[snafu(display("{url} answered with unexpected status {status}: {body}"))]
    Status {
        url: Url,
        status: StatusCode,
        body: String,
        backtrace: Backtrace,
    },
    #[snafu(display("The request to {url} timed-out after {timeout:?}"))]
    Timeout {
        url: Url,
        timeout: Duration,
        backtrace: Backtrace,
    },
    #[snafu(display("Invalid topology: {source}"))]
    Topology {
        source: ravenlink_shared::topology::Error,
    },
    #[snafu(display("{url} returned no topology for this database"))]
    TopologyMissing { url: Url, backtrace: Backtrace },
    #[snafu(display("While sending a request to {url}, {source}"))]
    Transport {
        url: Url,
        source: BoxError,
    },
    #[snafu(display("Failed to build the HTTP transport: {source}"))]
    TransportSetup { source: transport::Error },
}

impl Error {
    /// True if this failure is about reaching the node, rather than what it said
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::NodeUnavailable { .. }
                | Error::Timeout { .. }
                | Error::Transport { .. }
                | Error::Command {
                    source: command::Error::Body { .. }
                }
        )
    }
    pub fn is_invalid_response(&self) -> bool {
        matches!(
            self,
            Error::Command {
                source: command::Error::InvalidResponse { .. }
            }
        )
    }
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Command {
                source: command::Error::Validation { .. }
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        RequestExecutor                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

struct Inner {
    database: DatabaseName,
    selector: NodeSelector,
    cache: ConditionalCache,
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
    backoff: ExponentialBackoffMaker<HasherRng>,
    extra_rounds: usize,
    refresh_on_failover: bool,
}

/// Runs [Command]s against a database hosted by the cluster
///
/// Cloning is cheap; clones share the topology, the cache & the transport.
#[derive(Clone)]
pub struct RequestExecutor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("database", &self.inner.database)
            .field("selector", &self.inner.selector)
            .field("cache entries", &self.inner.cache.len())
            .finish()
    }
}

impl RequestExecutor {
    /// Build an executor that talks HTTP via [HttpTransport]
    pub fn new(config: &ExecutorConfig) -> Result<RequestExecutor> {
        let transport = HttpTransport::new(config.user_agent()).context(TransportSetupSnafu)?;
        RequestExecutor::with_transport(config, Arc::new(transport))
    }
    /// Build an executor that sends requests via `transport`
    pub fn with_transport(
        config: &ExecutorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<RequestExecutor> {
        let database = config.database().context(NoDatabaseSnafu)?.clone();
        // Until we hear otherwise, every configured URL is a member
        let nodes = config
            .urls()
            .iter()
            .map(|url| ServerNode::new(url.clone(), database.clone(), "?", ServerRole::Member))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context(NodeSnafu)?;
        let topology = Topology::new(TopologyEtag::INITIAL, nodes).context(TopologySnafu)?;
        let backoff = ExponentialBackoffMaker::new(
            *config.backoff().lower(),
            *config.backoff().upper(),
            config.backoff().jitter(),
            HasherRng::new(),
        )
        .context(BackoffSnafu)?;
        RequestExecutor {
            inner: Arc::new(Inner {
                database,
                selector: NodeSelector::new(topology, config.read_balance()),
                cache: ConditionalCache::new(),
                transport,
                request_timeout: config.request_timeout(),
                backoff,
                extra_rounds: config.backoff().num_attempts(),
                refresh_on_failover: config.refresh_on_failover(),
            }),
        }
        .pipe(Ok)
    }
    pub fn cache(&self) -> &ConditionalCache {
        &self.inner.cache
    }
    pub fn database(&self) -> &DatabaseName {
        &self.inner.database
    }
    /// Run `command`, failing over among nodes as needed
    ///
    /// On success, the command's result is set (possibly to [Outcome::Absent]).
    pub async fn execute<C: Command>(&self, command: &mut C) -> Result<ResponseDisposition> {
        self.inner.execute(command).await
    }
    /// As [execute](RequestExecutor::execute), but give up as soon as `token` is cancelled
    ///
    /// Cancellation drops whatever request is in flight; nothing is written to the cache on
    /// behalf of a cancelled command.
    pub async fn execute_with_cancellation<C: Command>(
        &self,
        command: &mut C,
        token: &CancellationToken,
    ) -> Result<ResponseDisposition> {
        let name = command.name();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("{name} cancelled");
                CancelledSnafu.fail()
            }
            result = self.inner.execute(command) => result,
        }
    }
    /// Build the command for `operation`, run it, & return its result
    pub async fn send<O: MaintenanceOperation>(
        &self,
        operation: &O,
    ) -> Result<Outcome<<O::Command as Command>::Output>> {
        let mut command = operation.command();
        self.inner.execute(&mut command).await?;
        Ok(command.take_result())
    }
    pub fn topology(&self) -> Arc<Topology> {
        self.inner.selector.topology()
    }
    /// Ask the cluster for its current topology & adopt it if it's newer than ours
    ///
    /// Returns true if the topology changed.
    pub async fn update_topology(&self) -> Result<bool> {
        let mut command = GetDatabaseTopologyCommand::new();
        self.inner.execute(&mut command).await?;
        match command.take_result() {
            Outcome::Present(topology) => Ok(self.inner.selector.try_update(topology)),
            _ => TopologyMissingSnafu {
                url: self.inner.selector.preferred().url().clone(),
            }
            .fail(),
        }
    }
}

impl Inner {
    async fn execute<C: Command>(
        self: &Arc<Self>,
        command: &mut C,
    ) -> Result<ResponseDisposition> {
        let candidates = self.selector.candidates(command.is_read_request());
        let mut backoff = self.backoff.clone().make_backoff();
        let mut attempts = Vec::new();

        for round in 0..=self.extra_rounds {
            if round > 0 {
                warn!(
                    "{}: every node failed; starting round {} of {}",
                    command.name(),
                    round + 1,
                    self.extra_rounds + 1
                );
                backoff.next_backoff().await;
            }
            for (i, node) in candidates.iter().enumerate() {
                match self.execute_on_node(command, node).await {
                    Ok(disposition) => {
                        self.selector.record_success(node);
                        if round > 0 || i > 0 {
                            self.selector.promote(node);
                            if self.refresh_on_failover {
                                self.spawn_refresh(node.clone());
                            }
                        }
                        return Ok(disposition);
                    }
                    Err(err) if err.is_transport() => {
                        let failures = self.selector.record_failure(node);
                        warn!(
                            "{} failed against {} ({} failures): {}",
                            command.name(),
                            node.url(),
                            failures,
                            err
                        );
                        attempts.push(NodeFailure {
                            url: node.url().clone(),
                            error: err,
                        });
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        AllNodesFailedSnafu { attempts }.fail()
    }
    /// Run `command` against `node` exactly once
    async fn execute_on_node<C: Command>(
        &self,
        command: &mut C,
        node: &ServerNode,
    ) -> Result<ResponseDisposition> {
        let mut request = command.create_request(node).context(CommandSnafu)?;
        let fingerprint = Fingerprint::of(&request);
        request.extensions_mut().insert(CallContext {
            command: command.name(),
            node_tag: node.cluster_tag().to_owned(),
        });

        let cached = (command.can_cache() && request.method() == Method::GET)
            .then(|| self.cache.get(&fingerprint))
            .flatten()
            .and_then(|entry| {
                // Change vectors came to us as header values, so this shouldn't fail; if it does,
                // just make the request unconditional.
                HeaderValue::from_str(&entry.change_vector().to_quoted())
                    .ok()
                    .map(|value| {
                        request.headers_mut().insert(IF_NONE_MATCH, value);
                        entry
                    })
            });

        debug!(
            "Dispatching {} to {} ({})",
            command.name(),
            node.url(),
            if cached.is_some() {
                "conditional"
            } else {
                "unconditional"
            }
        );

        let timeout = self.request_timeout;
        tokio::time::timeout(
            timeout,
            self.round_trip(command, node, request, &fingerprint, cached),
        )
        .await
        .map_err(|_| {
            TimeoutSnafu {
                url: node.url().clone(),
                timeout,
            }
            .build()
        })?
    }
    async fn round_trip<C: Command>(
        &self,
        command: &mut C,
        node: &ServerNode,
        request: Request<Bytes>,
        fingerprint: &Fingerprint,
        cached: Option<Arc<CacheEntry>>,
    ) -> Result<ResponseDisposition> {
        let mut response = self
            .transport
            .send(request)
            .await
            .context(TransportSnafu {
                url: node.url().clone(),
            })?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            if let Some(entry) = cached {
                debug!("{}: {} not modified", command.name(), fingerprint);
                command
                    .set_response(entry.payload(), true)
                    .context(CommandSnafu)?;
                return Ok(ResponseDisposition::Automatic);
            }
        }

        if status.is_success()
            || status == StatusCode::NOT_MODIFIED
            || status == StatusCode::NOT_FOUND
        {
            if status == StatusCode::NOT_FOUND
                && command.can_cache()
                && self.cache.invalidate(fingerprint).is_some()
            {
                debug!("{}: dropped the cache entry for {}", command.name(), fingerprint);
            }
            return command
                .process_response(&self.cache, &mut response, fingerprint)
                .await
                .context(CommandSnafu);
        }

        ensure!(
            !matches!(
                status,
                StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
            ),
            NodeUnavailableSnafu {
                url: node.url().clone(),
                status
            }
        );

        // Best effort; the status is the news
        let body = response
            .into_body()
            .bytes()
            .await
            .map(|body| String::from_utf8_lossy(&body).into_owned())
            .unwrap_or_default();
        StatusSnafu {
            url: node.url().clone(),
            status,
            body,
        }
        .fail()
    }
    /// Refresh the topology from `node` in the background
    fn spawn_refresh(self: &Arc<Self>, node: ServerNode) {
        let this = self.clone();
        tokio::spawn(async move {
            match this.refresh_from(&node).await {
                Ok(true) => info!("Adopted a new topology from {}", node.url()),
                Ok(false) => debug!("{} had nothing newer for us", node.url()),
                Err(err) => warn!("Failed to refresh the topology from {}: {}", node.url(), err),
            }
        });
    }
    async fn refresh_from(&self, node: &ServerNode) -> Result<bool> {
        let mut command = GetDatabaseTopologyCommand::new();
        self.execute_on_node(&mut command, node).await?;
        match command.take_result() {
            Outcome::Present(topology) => Ok(self.selector.try_update(topology)),
            _ => TopologyMissingSnafu {
                url: node.url().clone(),
            }
            .fail(),
        }
    }
}
