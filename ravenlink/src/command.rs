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

//! # Commands
//!
//! A [Command] is one typed operation against the cluster. It knows how to turn itself into an
//! HTTP request aimed at a given [ServerNode], and how to make sense of what comes back. The
//! [RequestExecutor](crate::executor::RequestExecutor) supplies everything else: node selection,
//! conditional caching, timeouts & failover.
//!
//! A command instance is used for exactly one call. Its result lives in a [CommandBase] slot that
//! starts [Outcome::Unset] and ends up either [Outcome::Absent] (the server said 404) or
//! [Outcome::Present].
//!
//! Interpretation happens in two stages:
//!
//! 1. [Command::process_response] looks at the status & headers before anything else and may
//!    short-circuit (404, 304, empty responses); the default implementation covers most commands.
//! 2. [Command::set_response] decodes a payload, whether it came off the wire or out of the
//!    [ConditionalCache].

use std::mem;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header::ETAG, HeaderMap, Method, Request, StatusCode};
use serde::de::DeserializeOwned;
use snafu::{prelude::*, Backtrace};
use tracing::debug;
use url::Url;

use ravenlink_shared::{node::ServerNode, service::ResponseBody, ChangeVector};

use crate::cache::{CacheEntry, ConditionalCache, Fingerprint};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to read the response body: {source}"))]
    Body {
        source: ravenlink_shared::service::Error,
    },
    #[snafu(display("{command} received an invalid response: {reason}"))]
    InvalidResponse {
        command: &'static str,
        reason: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to build the {command} request: {source}"))]
    Request {
        command: &'static str,
        source: http::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Invalid argument: {source}"))]
    Validation { source: ravenlink_shared::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       command state                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The three states of a command's result
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome<T> {
    /// The command hasn't (successfully) completed
    Unset,
    /// The server told us the resource doesn't exist
    Absent,
    Present(T),
}

impl<T> Default for Outcome<T> {
    fn default() -> Self {
        Outcome::Unset
    }
}

impl<T> Outcome<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Outcome::Absent)
    }
    pub fn is_set(&self) -> bool {
        !matches!(self, Outcome::Unset)
    }
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Present(value) => Some(value),
            _ => None,
        }
    }
    pub fn into_value(self) -> Option<T> {
        match self {
            Outcome::Present(value) => Some(value),
            _ => None,
        }
    }
}

/// Bookkeeping common to every command
#[derive(Debug)]
pub struct CommandBase<T> {
    is_read_request: bool,
    outcome: Outcome<T>,
}

impl<T> CommandBase<T> {
    pub fn new_read() -> CommandBase<T> {
        CommandBase {
            is_read_request: true,
            outcome: Outcome::Unset,
        }
    }
    pub fn new_write() -> CommandBase<T> {
        CommandBase {
            is_read_request: false,
            outcome: Outcome::Unset,
        }
    }
    pub fn is_absent(&self) -> bool {
        self.outcome.is_absent()
    }
    pub fn is_read_request(&self) -> bool {
        self.is_read_request
    }
    pub fn outcome(&self) -> &Outcome<T> {
        &self.outcome
    }
    pub fn set_absent(&mut self) {
        self.outcome = Outcome::Absent;
    }
    pub fn set_result(&mut self, value: T) {
        self.outcome = Outcome::Present(value);
    }
    pub fn take_outcome(&mut self) -> Outcome<T> {
        mem::take(&mut self.outcome)
    }
}

/// How a command wants its response body handled
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseType {
    /// Ignore any body
    Empty,
    /// Decode the body as JSON
    Object,
    /// Hand the body to the command as-is
    Raw,
}

/// Who is responsible for the response once the command has looked at it
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ResponseDisposition {
    /// The executor may release the response as soon as the result is populated
    #[default]
    Automatic,
    /// The command has taken ownership of the body; the caller releases it
    Manually,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Command                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One typed operation against the cluster
///
/// Implementors compose a [CommandBase] and supply [create_request](Command::create_request) &
/// [set_response](Command::set_response); everything else has a default. Argument validation
/// belongs in the implementor's constructor, so that an invalid command can't be built at all.
#[async_trait]
pub trait Command: Send {
    type Output: Send;

    /// A short name for this command, for logging & error messages
    fn name(&self) -> &'static str;
    fn base(&self) -> &CommandBase<Self::Output>;
    fn base_mut(&mut self) -> &mut CommandBase<Self::Output>;

    /// Build the wire request for `node`
    fn create_request(&self, node: &ServerNode) -> Result<Request<Bytes>>;
    /// Decode `body` into this command's result
    ///
    /// `from_cache` is true when `body` is a payload remembered from an earlier response rather
    /// than something just read off the wire. On error, the result must be left unset.
    fn set_response(&mut self, body: &[u8], from_cache: bool) -> Result<()>;

    fn response_type(&self) -> ResponseType {
        ResponseType::Object
    }
    fn is_read_request(&self) -> bool {
        self.base().is_read_request()
    }
    fn can_cache(&self) -> bool {
        self.is_read_request() && self.response_type() == ResponseType::Object
    }
    fn result(&self) -> &Outcome<Self::Output> {
        self.base().outcome()
    }
    fn take_result(&mut self) -> Outcome<Self::Output> {
        self.base_mut().take_outcome()
    }

    /// Interpret a response the executor considers successful (2xx, 304 or 404)
    async fn process_response(
        &mut self,
        cache: &ConditionalCache,
        response: &mut http::Response<ResponseBody>,
        fingerprint: &Fingerprint,
    ) -> Result<ResponseDisposition> {
        match response.status() {
            StatusCode::NOT_FOUND => {
                self.base_mut().set_absent();
                return Ok(ResponseDisposition::Automatic);
            }
            // The executor answers 304s out of the cache itself; if we see one here, there was
            // nothing to answer it with.
            StatusCode::NOT_MODIFIED => {
                return InvalidResponseSnafu {
                    command: self.name(),
                    reason: "304 Not Modified, with no cached value to reuse".to_owned(),
                }
                .fail();
            }
            _ => (),
        }

        // Whatever body came with the response is left for the executor to drop
        if self.response_type() == ResponseType::Empty {
            self.set_response(&[], false)?;
            return Ok(ResponseDisposition::Automatic);
        }

        // Check the ETag first: once `set_response` succeeds, the result is set
        let change_vector = if self.can_cache() {
            etag_header(self.name(), response.headers())?
        } else {
            None
        };
        let body = take_body(response).await?;
        self.set_response(&body, false)?;

        if let Some(change_vector) = change_vector {
            debug!(
                "{}: caching {} bytes for {} at {}",
                self.name(),
                body.len(),
                fingerprint,
                change_vector
            );
            cache.store(CacheEntry::new(fingerprint.clone(), change_vector, body));
        }

        Ok(ResponseDisposition::Automatic)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     helpers for implementors                                   //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Start building a request for `url`
pub(crate) fn request_to(method: Method, url: &Url) -> http::request::Builder {
    Request::builder().method(method).uri(url.as_str())
}

/// Finish a request with an empty body
pub(crate) fn empty_body(
    command: &'static str,
    builder: http::request::Builder,
) -> Result<Request<Bytes>> {
    builder.body(Bytes::new()).context(RequestSnafu { command })
}

/// Read the entire response body, leaving an empty one in its place
pub(crate) async fn take_body(response: &mut http::Response<ResponseBody>) -> Result<Bytes> {
    mem::take(response.body_mut())
        .bytes()
        .await
        .context(BodySnafu)
}

/// Decode a JSON payload that is required to be present
pub(crate) fn parse_json<T: DeserializeOwned>(command: &'static str, body: &[u8]) -> Result<T> {
    ensure!(
        !body.is_empty(),
        InvalidResponseSnafu {
            command,
            reason: "empty response body".to_owned(),
        }
    );
    serde_json::from_slice(body).map_err(|err| {
        InvalidResponseSnafu {
            command,
            reason: err.to_string(),
        }
        .build()
    })
}

/// Pull a change vector out of the `ETag` header, if there is one
pub(crate) fn etag_header(command: &'static str, headers: &HeaderMap) -> Result<Option<ChangeVector>> {
    headers
        .get(ETAG)
        .map(|value| {
            value
                .to_str()
                .map_err(|err| err.to_string())
                .and_then(|text| ChangeVector::from_etag(text).map_err(|err| err.to_string()))
                .map_err(|reason| {
                    InvalidResponseSnafu {
                        command,
                        reason: format!("bad ETag header: {reason}"),
                    }
                    .build()
                })
        })
        .transpose()
}

/// As [etag_header], but a missing header is an invalid response
pub(crate) fn required_etag_header(
    command: &'static str,
    headers: &HeaderMap,
) -> Result<ChangeVector> {
    etag_header(command, headers)?.context(InvalidResponseSnafu {
        command,
        reason: "response is missing the ETag header".to_owned(),
    })
}
