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

//! # Streaming a document
//!
//! [StreamDocumentCommand] fetches a document without buffering it: the command takes the body
//! out of the response and hands it to the caller as a [DocumentStream], reporting
//! [ResponseDisposition::Manually]. Dropping the stream releases the connection.

use std::mem;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use http::{Method, Request, StatusCode};
use snafu::prelude::*;

use ravenlink_shared::{
    node::ServerNode,
    service::{BoxError, ResponseBody},
    ChangeVector, DocumentId,
};

use crate::{
    cache::{ConditionalCache, Fingerprint},
    command::{
        empty_body, etag_header, request_to, BodySnafu, Command, CommandBase,
        InvalidResponseSnafu, ResponseDisposition, ResponseType, Result, ValidationSnafu,
    },
};

/// A document body still on its way from the server
#[derive(Debug)]
pub struct DocumentStream {
    change_vector: Option<ChangeVector>,
    body: ResponseBody,
}

impl DocumentStream {
    /// The document's change vector, if the server sent one
    pub fn change_vector(&self) -> Option<&ChangeVector> {
        self.change_vector.as_ref()
    }
    /// Read the rest of the document into memory
    pub async fn bytes(self) -> Result<Bytes> {
        self.body.bytes().await.context(BodySnafu)
    }
    pub fn into_stream(self) -> BoxStream<'static, std::result::Result<Bytes, BoxError>> {
        self.body.into_stream()
    }
}

/// `GET /databases/{db}/docs?id={id}`, without buffering the response
#[derive(Debug)]
pub struct StreamDocumentCommand {
    base: CommandBase<DocumentStream>,
    id: DocumentId,
}

impl StreamDocumentCommand {
    pub fn new(id: &str) -> Result<StreamDocumentCommand> {
        Ok(StreamDocumentCommand {
            base: CommandBase::new_read(),
            id: DocumentId::new(id).context(ValidationSnafu)?,
        })
    }
}

#[async_trait]
impl Command for StreamDocumentCommand {
    type Output = DocumentStream;

    fn name(&self) -> &'static str {
        "StreamDocument"
    }
    fn base(&self) -> &CommandBase<DocumentStream> {
        &self.base
    }
    fn base_mut(&mut self) -> &mut CommandBase<DocumentStream> {
        &mut self.base
    }
    fn response_type(&self) -> ResponseType {
        ResponseType::Raw
    }
    fn create_request(&self, node: &ServerNode) -> Result<Request<Bytes>> {
        let mut url = node.database_endpoint(&["docs"]);
        url.query_pairs_mut().append_pair("id", &self.id);
        empty_body(self.name(), request_to(Method::GET, &url))
    }
    /// Used when the whole document is already in hand
    fn set_response(&mut self, body: &[u8], _from_cache: bool) -> Result<()> {
        self.base.set_result(DocumentStream {
            change_vector: None,
            body: ResponseBody::from(Bytes::copy_from_slice(body)),
        });
        Ok(())
    }
    async fn process_response(
        &mut self,
        _cache: &ConditionalCache,
        response: &mut http::Response<ResponseBody>,
        _fingerprint: &Fingerprint,
    ) -> Result<ResponseDisposition> {
        match response.status() {
            StatusCode::NOT_FOUND => {
                self.base.set_absent();
                Ok(ResponseDisposition::Automatic)
            }
            StatusCode::NOT_MODIFIED => InvalidResponseSnafu {
                command: self.name(),
                reason: "304 Not Modified to an unconditional request".to_owned(),
            }
            .fail(),
            _ => {
                let change_vector = etag_header(self.name(), response.headers())?;
                self.base.set_result(DocumentStream {
                    change_vector,
                    body: mem::take(response.body_mut()),
                });
                Ok(ResponseDisposition::Manually)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use futures::stream;
    use http::header::ETAG;

    use crate::command::Outcome;

    #[tokio::test]
    async fn takes_ownership_of_the_body() {
        let cache = ConditionalCache::new();
        let fingerprint = Fingerprint::of(
            &Request::builder()
                .uri("http://127.0.0.1:8080/databases/db1/docs?id=a")
                .body(())
                .unwrap(),
        );

        let mut cmd = StreamDocumentCommand::new("users/1").unwrap();
        let mut rsp = http::Response::builder()
            .status(200)
            .header(ETAG, "\"A:9\"")
            .body(ResponseBody::streaming(stream::iter(vec![
                Ok::<_, std::io::Error>(Bytes::from_static(b"{\"Name\": ")),
                Ok(Bytes::from_static(b"\"Ayende\"}")),
            ])))
            .unwrap();
        assert_eq!(
            cmd.process_response(&cache, &mut rsp, &fingerprint)
                .await
                .unwrap(),
            ResponseDisposition::Manually
        );
        assert!(cache.is_empty());

        let doc = cmd.take_result().into_value().unwrap();
        assert_eq!(&**doc.change_vector().unwrap(), "A:9");
        assert_eq!(
            doc.bytes().await.unwrap(),
            Bytes::from_static(b"{\"Name\": \"Ayende\"}")
        );

        let mut cmd = StreamDocumentCommand::new("users/2").unwrap();
        let mut rsp = http::Response::builder()
            .status(404)
            .body(ResponseBody::default())
            .unwrap();
        assert_eq!(
            cmd.process_response(&cache, &mut rsp, &fingerprint)
                .await
                .unwrap(),
            ResponseDisposition::Automatic
        );
        assert!(matches!(cmd.result(), Outcome::Absent));
    }
}
