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

//! # Putting requests on the wire
//!
//! The executor only ever needs to send one request & get back one response, so it's written in
//! terms of the narrow [Transport] trait. The production implementation, [HttpTransport], is a
//! [tower] stack built on [reqwest::Client]; tests are free to substitute something simpler.

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use http::{
    header::{IF_NONE_MATCH, USER_AGENT},
    HeaderValue, Request, Response, StatusCode,
};
use pin_project::pin_project;
use snafu::{Backtrace, ResultExt, Snafu};
use tap::Pipe;
use tower::{Layer, Service, ServiceBuilder, ServiceExt};
use tower_http::set_header::{SetRequestHeader, SetRequestHeaderLayer};
use tracing::{debug, warn, Level};

use ravenlink_shared::service::{
    BoxError, ReqwestService, ReqwestServiceLayer, ResponseBody, StreamingResponse,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to create an HTTP client: {source}"))]
    ReqwestClient {
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("{user_agent} is not a legal User-Agent: {source}"))]
    UserAgent {
        user_agent: String,
        source: http::header::InvalidHeaderValue,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Transport                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Send one request, get back one response
///
/// Any HTTP status counts as a response; `Err` is reserved for failures to get one at all
/// (connection refused, reset, TLS trouble & so forth).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: Request<Bytes>,
    ) -> std::result::Result<Response<ResponseBody>, BoxError>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          CallTracing                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Which command is making a request, & of which node
///
/// The executor attaches one of these to each request's extensions; [CallTracingLayer] picks it
/// up. Requests without one are still traced, just with less to say.
#[derive(Clone, Debug)]
pub struct CallContext {
    pub command: &'static str,
    pub node_tag: String,
}

/// A [Future] that traces one round-trip to a node
///
/// [Future]: std::future::Future
#[pin_project]
pub struct TracedCall<InnerFut> {
    command: &'static str,
    node_tag: String,
    started: Instant,
    span: tracing::Span,
    #[pin]
    inner: InnerFut,
}

impl<InnerFut> TracedCall<InnerFut> {
    fn new<ReqBody, S>(service: &mut S, request: http::Request<ReqBody>) -> TracedCall<S::Future>
    where
        S: Service<http::Request<ReqBody>, Future = InnerFut>,
    {
        let (command, node_tag) = request
            .extensions()
            .get::<CallContext>()
            .map(|ctx| (ctx.command, ctx.node_tag.clone()))
            .unwrap_or_else(|| ("(unknown)", request.uri().host().unwrap_or("?").to_owned()));
        let conditional = request.headers().contains_key(IF_NONE_MATCH);
        let span = tracing::span!(
            Level::DEBUG,
            "ravenlink-node-call",
            command,
            node = %node_tag,
            method = %request.method(),
            conditional
        );
        span.in_scope(|| debug!("{} {}", request.method(), request.uri()));
        TracedCall {
            command,
            node_tag,
            started: Instant::now(),
            span,
            inner: service.call(request),
        }
    }
}

impl<RspBody, E, InnerFut> std::future::Future for TracedCall<InnerFut>
where
    InnerFut: std::future::Future<Output = std::result::Result<http::Response<RspBody>, E>>,
    E: std::error::Error,
{
    type Output = std::result::Result<http::Response<RspBody>, E>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let this = self.project();
        let _guard = this.span.enter();
        let result = std::task::ready!(this.inner.poll(cx));
        let elapsed = this.started.elapsed();
        match &result {
            Ok(rsp) if rsp.status() == StatusCode::NOT_MODIFIED => debug!(
                "{} on node {}: not modified ({:?})",
                this.command, this.node_tag, elapsed
            ),
            Ok(rsp) => debug!(
                "{} on node {}: {} ({:?})",
                this.command,
                this.node_tag,
                rsp.status(),
                elapsed
            ),
            // The executor decides whether this is worth more than a warning
            Err(err) => warn!(
                "{} on node {} failed after {:?}: {}",
                this.command, this.node_tag, elapsed, err
            ),
        }
        std::task::Poll::Ready(result)
    }
}

#[derive(Clone, Debug)]
pub struct CallTracing<S> {
    inner: S,
}

impl<S, ReqBody, RspBody> Service<http::Request<ReqBody>> for CallTracing<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<RspBody>>,
    S::Error: std::error::Error,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = TracedCall<S::Future>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        TracedCall::new(&mut self.inner, request)
    }
}

#[derive(Clone, Debug)]
pub struct CallTracingLayer;

impl<S> Layer<S> for CallTracingLayer {
    type Service = CallTracing<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CallTracing { inner }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         HttpTransport                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

type ClientStack = SetRequestHeader<
    CallTracing<ReqwestService<reqwest::Client, StreamingResponse>>,
    HeaderValue,
>;

/// [Transport] over a [reqwest::Client]
///
/// The stack, from the outside in:
///
/// ```text
///               requests
///                  |
///                  v
/// +------   Set User-Agent header   ------+
/// | +----       call tracing        ----+ |
/// | | +--       Reqwest layer       --+ | |
/// | | |                               | | |
/// | | |             node              | | |
/// | | |                               | | |
/// | | +->       Reqwest layer       <-+ | |
/// | +--->       call tracing        <---+ |
/// +----->   Set User-Agent header   <-----+
///                  |
///                  v
///              responses
/// ```
///
/// There's deliberately no retry layer: failing over to another node is the executor's business.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: ClientStack,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<HttpTransport> {
        reqwest::Client::builder()
            .build()
            .context(ReqwestClientSnafu)?
            .pipe(|client| HttpTransport::with_client(user_agent, client))
    }
    pub fn with_client(user_agent: &str, client: reqwest::Client) -> Result<HttpTransport> {
        let user_agent = HeaderValue::from_str(user_agent).context(UserAgentSnafu {
            user_agent: user_agent.to_owned(),
        })?;
        HttpTransport {
            client: ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::overriding(USER_AGENT, user_agent))
                .layer(CallTracingLayer)
                .layer(ReqwestServiceLayer::new(StreamingResponse))
                .service(client),
        }
        .pipe(Ok)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: Request<Bytes>,
    ) -> std::result::Result<Response<ResponseBody>, BoxError> {
        self.client
            .clone()
            .oneshot(request)
            .await
            .map_err(BoxError::from)
    }
}
