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

//! Client-Side tower Services
//!
//! # Introduction
//!
//! We'd like to stack [tower] & [tower-http] middleware on top of our HTTP client: set the
//! user agent on every outgoing request, trace every call, and so forth. The problem is that
//! [tower-http] is written in terms of the [http] crate's request & response types, while the
//! canonical HTTP client in Rust, [reqwest], uses its own.
//!
//! `reqwest::Client` *does* implement [Service](tower::Service), though, so this module provides a
//! [tower] service that wraps a [reqwest] client and does nothing but translate between [reqwest]
//! requests & responses and [http] requests & responses. Anything [tower]-shaped can then be
//! layered on top of it.
//!
//! [tower-http]: https://docs.rs/tower-http/latest/tower_http/
//!
//! # Response Bodies
//!
//! Most of what the cluster sends back are small JSON documents that we want to read in full, but
//! some responses are large and are better consumed incrementally. [ResponseBody] models both;
//! the [StreamingResponse] translation hands the [reqwest] body back as a stream and lets the
//! consumer decide whether to buffer it.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{
    future::{self, BoxFuture},
    stream::{self, BoxStream},
    FutureExt, Stream, StreamExt, TryStreamExt,
};
use serde::Deserialize;
use snafu::{Backtrace, IntoError, OptionExt, ResultExt, Snafu};

use std::{
    error::Error as StdError,
    ops::Deref,
    task::{Context, Poll},
    time::Duration,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to convert an http::Request to a reqwest::Request: {source}"))]
    Conversion {
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("[{min:?}, {max:?}] is not a valid Duration range"))]
    DurationRange {
        min: std::time::Duration,
        max: std::time::Duration,
        backtrace: Backtrace,
    },
    #[snafu(display("{value} is not a valid Jitter value"))]
    Jitter { value: f64, backtrace: Backtrace },
    #[snafu(display("The wrapped service speaking reqwest errored-out on poll_ready: {source:?}"))]
    PollReady {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[snafu(display("The reqwest service reported an error: {source}"))]
    Reqwest {
        // Would be nice to *not* erase this
        source: Box<dyn StdError + Send + Sync>,
    },
    #[snafu(display("When building an http response, {source}"))]
    Response {
        source: http::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("The response builder yielded no extensions"))]
    ResponseExtensions { backtrace: Backtrace },
    #[snafu(display("While reading the response body, {source}"))]
    Stream {
        source: Box<dyn StdError + Send + Sync>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

pub type BoxError = Box<dyn StdError + Send + Sync>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          ResponseBody                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An HTTP response body that is either already in memory, or still arriving
pub enum ResponseBody {
    Full(Bytes),
    Streaming(BoxStream<'static, StdResult<Bytes, BoxError>>),
}

impl ResponseBody {
    pub fn streaming<S, E>(stream: S) -> ResponseBody
    where
        S: Stream<Item = StdResult<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        ResponseBody::Streaming(stream.map_err(Into::into).boxed())
    }
    /// Read the entire body into memory
    pub async fn bytes(self) -> Result<Bytes> {
        match self {
            ResponseBody::Full(bytes) => Ok(bytes),
            ResponseBody::Streaming(stream) => stream
                .try_fold(BytesMut::new(), |mut acc, chunk| {
                    acc.extend_from_slice(&chunk);
                    future::ready(Ok(acc))
                })
                .await
                .map(BytesMut::freeze)
                .context(StreamSnafu),
        }
    }
    /// View the body as a stream of chunks, regardless of how it arrived
    pub fn into_stream(self) -> BoxStream<'static, StdResult<Bytes, BoxError>> {
        match self {
            ResponseBody::Full(bytes) => stream::once(future::ready(Ok(bytes))).boxed(),
            ResponseBody::Streaming(stream) => stream,
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Full(bytes) => write!(f, "ResponseBody::Full({} bytes)", bytes.len()),
            ResponseBody::Streaming(_) => write!(f, "ResponseBody::Streaming"),
        }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::Full(Bytes::new())
    }
}

impl From<Bytes> for ResponseBody {
    fn from(value: Bytes) -> Self {
        ResponseBody::Full(value)
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        ResponseBody::Full(Bytes::from_static(value.as_bytes()))
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        ResponseBody::Full(Bytes::from(value))
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(value: Vec<u8>) -> Self {
        ResponseBody::Full(Bytes::from(value))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         ReqwestService                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Implementing this trait signals the ability to fallibly convert a given HTTP response type into
/// an http [http::Response] with a given response body type.
#[async_trait]
pub trait FromResponse: Clone {
    type InnerResponse;
    type ResponseBody;
    async fn try_into_response(
        // Note that the receiver is `self` (instead of `&self`)-- this is to keep the resulting
        // future from taking a reference on the trait object. Adjust for that by demanding that
        // implementors also implement `Clone`
        self,
        _: Self::InnerResponse,
    ) -> Result<http::Response<Self::ResponseBody>>;
}

/// Wrap a [tower] [Service](tower::Service) that deals in [reqwest] requests & responses so as to
/// produce one that works in terms of [http] requests & responses
#[derive(Clone, Debug)]
pub struct ReqwestService<S, R>
where
    S: tower::Service<reqwest::Request>,
    // make sure their associated types match-up right off the bat:
    R: FromResponse<InnerResponse = S::Response>,
{
    inner: S,
    from_response: R,
}

/// [ReqwestService] is a [tower] [Service](tower::Service)
// We still restrict the body type to types `B: Into<reqwest::Body>`
impl<S, ReqBody, R> tower::Service<http::Request<ReqBody>> for ReqwestService<S, R>
where
    ReqBody: Into<reqwest::Body>,
    // Since an `R` instance will be moved into a Future, it can't have any references that would
    // limit its lifetime.
    R: FromResponse<InnerResponse = S::Response> + Send + 'static,
    R::ResponseBody: 'static,
    S: tower::Service<reqwest::Request>,
    S::Error: StdError + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Response = http::Response<R::ResponseBody>;
    type Error = Error;
    // An earlier iteration of this type hand-rolled a state machine so as to be able to *name*
    // the future; boxing it costs us an allocation per request, which is noise next to a network
    // round-trip.
    type Future = BoxFuture<'static, Result<Self::Response>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<StdResult<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map(|res| res.map_err(|err| PollReadySnafu.into_error(Box::new(err))))
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let from_response = self.from_response.clone();
        let inner_fut = reqwest::Request::try_from(req).map(|r| self.inner.call(r));
        async move {
            let rsp = inner_fut
                .context(ConversionSnafu)?
                .await
                .map_err(|err| ReqwestSnafu.into_error(Box::new(err)))?;
            from_response.try_into_response(rsp).await
        }
        .boxed()
    }
}

// Finally, give ourselves a `Layer` implementation for convenience
pub struct ReqwestServiceLayer<R: FromResponse> {
    from_response: R,
}

impl<R: FromResponse> ReqwestServiceLayer<R> {
    pub fn new(from_response: R) -> ReqwestServiceLayer<R> {
        Self { from_response }
    }
}

impl<S, R> tower::Layer<S> for ReqwestServiceLayer<R>
where
    S: tower::Service<reqwest::Request, Response = reqwest::Response>,
    R: FromResponse<InnerResponse = S::Response> + Clone,
{
    type Service = ReqwestService<S, R>;

    fn layer(&self, inner: S) -> Self::Service {
        ReqwestService {
            inner,
            from_response: self.from_response.clone(),
        }
    }
}

/// Convert a `reqwest::Response` into an `http::Response<ResponseBody>` without reading the body
#[derive(Clone, Debug)]
pub struct StreamingResponse;

#[async_trait]
impl FromResponse for StreamingResponse {
    type InnerResponse = reqwest::Response;
    type ResponseBody = ResponseBody;
    async fn try_into_response(
        self,
        rsp: Self::InnerResponse,
    ) -> Result<http::Response<Self::ResponseBody>> {
        let mut builder = rsp.headers().iter().fold(
            http::Response::builder()
                .status(rsp.status())
                .version(rsp.version()),
            |builder, (name, value)| builder.header(name, value),
        );
        let extensions = builder.extensions_mut().context(ResponseExtensionsSnafu)?;
        *extensions = rsp.extensions().clone();
        builder
            .body(ResponseBody::streaming(rsp.bytes_stream()))
            .context(ResponseSnafu)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      exponential backoffs                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Deserialize)]
struct RawDurationRange {
    min: Duration,
    max: Duration,
}

/// A pair of [Duration]s that carries with it the guarantee that the first is less than or equal to
/// the second, and that the second is non-zero
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[serde(try_from = "RawDurationRange")]
pub struct DurationRange {
    min: Duration,
    max: Duration,
}

impl DurationRange {
    pub fn new(min: Duration, max: Duration) -> Result<DurationRange> {
        if min > max || max == Duration::from_millis(0) {
            DurationRangeSnafu { min, max }.fail()
        } else {
            Ok(DurationRange { min, max })
        }
    }
    pub fn lower(&self) -> &Duration {
        &self.min
    }
    pub fn upper(&self) -> &Duration {
        &self.max
    }
}

impl TryFrom<RawDurationRange> for DurationRange {
    type Error = Error;

    fn try_from(value: RawDurationRange) -> StdResult<Self, Self::Error> {
        DurationRange::new(value.min, value.max)
    }
}

/// A refinement of [f64] that asserts that it is also in the range [0, 100), as well as being
/// neither infinite nor NaN.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(try_from = "f64")]
pub struct Jitter(f64);

impl std::fmt::Display for Jitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{Jitter {}%}}", self.0)
    }
}

impl TryFrom<f64> for Jitter {
    type Error = Error;

    fn try_from(value: f64) -> std::result::Result<Self, Self::Error> {
        if !value.is_finite() || !(0.0..100.0).contains(&value) {
            JitterSnafu { value }.fail()
        } else {
            Ok(Jitter(value))
        }
    }
}

impl Deref for Jitter {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<f64> for Jitter {
    fn as_ref(&self) -> &f64 {
        self.deref()
    }
}

/// Parameters for an exponential backoff policy
#[derive(Clone, Debug, Deserialize)]
pub struct ExponentialBackoffParameters {
    durations: DurationRange,
    jitter: Jitter,
    #[serde(rename = "num-attempts")]
    num_attempts: usize,
}

impl ExponentialBackoffParameters {
    pub fn new(
        durations: DurationRange,
        jitter: Jitter,
        num_attempts: usize,
    ) -> ExponentialBackoffParameters {
        ExponentialBackoffParameters {
            durations,
            jitter,
            num_attempts,
        }
    }
    pub fn jitter(&self) -> f64 {
        *self.jitter.as_ref()
    }
    pub fn lower(&self) -> &Duration {
        self.durations.lower()
    }
    pub fn num_attempts(&self) -> usize {
        self.num_attempts
    }
    pub fn upper(&self) -> &Duration {
        self.durations.upper()
    }
}

impl Default for ExponentialBackoffParameters {
    fn default() -> Self {
        ExponentialBackoffParameters {
            durations: DurationRange::new(Duration::from_secs(1), Duration::from_secs(3)).unwrap(/* known good */),
            jitter: Jitter::try_from(10.0).unwrap(/* known good */),
            num_attempts: 3,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_parameters() {
        assert!(DurationRange::new(Duration::from_secs(3), Duration::from_secs(1)).is_err());
        assert!(DurationRange::new(Duration::ZERO, Duration::ZERO).is_err());
        assert!(Jitter::try_from(100.0).is_err());
        assert!(Jitter::try_from(f64::NAN).is_err());
        assert_eq!(*Jitter::try_from(12.5).unwrap(), 12.5);

        let params: ExponentialBackoffParameters = serde_json::from_str(
            r#"{"durations": {"min": {"secs": 0, "nanos": 5000000}, "max": {"secs": 1, "nanos": 0}},
                "jitter": 5.0,
                "num-attempts": 2}"#,
        )
        .unwrap();
        assert_eq!(params.lower(), &Duration::from_millis(5));
        assert_eq!(params.upper(), &Duration::from_secs(1));
        assert_eq!(params.num_attempts(), 2);

        assert!(serde_json::from_str::<ExponentialBackoffParameters>(
            r#"{"durations": {"min": {"secs": 2, "nanos": 0}, "max": {"secs": 1, "nanos": 0}},
                "jitter": 5.0,
                "num-attempts": 2}"#,
        )
        .is_err());
    }

    #[tokio::test]
    async fn response_bodies() {
        let body = ResponseBody::streaming(stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"{\"Data")),
            Ok(Bytes::from_static(b"bases\": []}")),
        ]));
        assert_eq!(
            body.bytes().await.unwrap(),
            Bytes::from_static(b"{\"Databases\": []}")
        );

        let body = ResponseBody::streaming(stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]));
        assert!(matches!(body.bytes().await, Err(Error::Stream { .. })));

        let chunks = ResponseBody::from("abc")
            .into_stream()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(chunks, vec![Bytes::from_static(b"abc")]);
        assert!(ResponseBody::default().bytes().await.unwrap().is_empty());
    }
}
