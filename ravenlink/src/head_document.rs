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

//! # Checking a document's existence & version
//!
//! [HeadDocumentCommand] asks a node for the current [ChangeVector] of a document without
//! transferring the document itself. The caller may pass the change vector they already have; if
//! the document hasn't changed the server answers `304` and we hand the caller's change vector
//! back. Everything of interest is in the status line & headers, so this command overrides
//! [Command::process_response] wholesale.

use async_trait::async_trait;
use bytes::Bytes;
use http::{header::IF_NONE_MATCH, Method, Request, StatusCode};
use snafu::prelude::*;

use ravenlink_shared::{node::ServerNode, service::ResponseBody, ChangeVector, DocumentId};

use crate::{
    cache::{ConditionalCache, Fingerprint},
    command::{
        empty_body, request_to, required_etag_header, take_body, Command, CommandBase,
        InvalidResponseSnafu, ResponseDisposition, ResponseType, Result, ValidationSnafu,
    },
};

/// `HEAD /databases/{db}/docs?id={id}`
#[derive(Debug)]
pub struct HeadDocumentCommand {
    base: CommandBase<ChangeVector>,
    id: DocumentId,
    change_vector: Option<ChangeVector>,
}

impl HeadDocumentCommand {
    pub fn new(id: &str, change_vector: Option<ChangeVector>) -> Result<HeadDocumentCommand> {
        Ok(HeadDocumentCommand {
            base: CommandBase::new_read(),
            id: DocumentId::new(id).context(ValidationSnafu)?,
            change_vector,
        })
    }
}

#[async_trait]
impl Command for HeadDocumentCommand {
    type Output = ChangeVector;

    fn name(&self) -> &'static str {
        "HeadDocument"
    }
    fn base(&self) -> &CommandBase<ChangeVector> {
        &self.base
    }
    fn base_mut(&mut self) -> &mut CommandBase<ChangeVector> {
        &mut self.base
    }
    fn response_type(&self) -> ResponseType {
        ResponseType::Empty
    }
    fn create_request(&self, node: &ServerNode) -> Result<Request<Bytes>> {
        let mut url = node.database_endpoint(&["docs"]);
        url.query_pairs_mut().append_pair("id", &self.id);
        let builder = request_to(Method::HEAD, &url);
        let builder = match &self.change_vector {
            Some(change_vector) => builder.header(IF_NONE_MATCH, &**change_vector),
            None => builder,
        };
        empty_body(self.name(), builder)
    }
    fn set_response(&mut self, body: &[u8], _from_cache: bool) -> Result<()> {
        ensure!(
            body.is_empty(),
            InvalidResponseSnafu {
                command: self.name(),
                reason: "HEAD response carried a body".to_owned(),
            }
        );
        Ok(())
    }
    async fn process_response(
        &mut self,
        _cache: &ConditionalCache,
        response: &mut http::Response<ResponseBody>,
        _fingerprint: &Fingerprint,
    ) -> Result<ResponseDisposition> {
        match response.status() {
            StatusCode::NOT_MODIFIED => {
                let change_vector = self.change_vector.clone().context(InvalidResponseSnafu {
                    command: self.name(),
                    reason: "304 Not Modified to a request that named no change vector".to_owned(),
                })?;
                self.base.set_result(change_vector);
            }
            StatusCode::NOT_FOUND => self.base.set_absent(),
            _ => {
                let body = take_body(response).await?;
                self.set_response(&body, false)?;
                let change_vector = required_etag_header(self.name(), response.headers())?;
                self.base.set_result(change_vector);
            }
        }
        Ok(ResponseDisposition::Automatic)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use http::header::ETAG;
    use ravenlink_shared::DatabaseName;

    use crate::command::{Error, Outcome};

    fn node() -> ServerNode {
        ServerNode::from_url("http://127.0.0.1:8080", DatabaseName::new("db1").unwrap()).unwrap()
    }

    fn fingerprint() -> Fingerprint {
        Fingerprint::of(&Request::builder().uri("http://127.0.0.1:8080/").body(()).unwrap())
    }

    #[test]
    fn validation() {
        assert!(matches!(
            HeadDocumentCommand::new("", None),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn request() {
        let cmd = HeadDocumentCommand::new("users/1 A", None).unwrap();
        let req = cmd.create_request(&node()).unwrap();
        assert_eq!(req.method(), Method::HEAD);
        assert_eq!(
            req.uri().to_string(),
            "http://127.0.0.1:8080/databases/db1/docs?id=users%2F1+A"
        );
        assert!(req.headers().get(IF_NONE_MATCH).is_none());
        assert!(!cmd.can_cache());

        let cmd =
            HeadDocumentCommand::new("users/1", Some(ChangeVector::new("A:5-x").unwrap())).unwrap();
        let req = cmd.create_request(&node()).unwrap();
        assert_eq!(req.headers().get(IF_NONE_MATCH).unwrap(), "A:5-x");
    }

    #[tokio::test]
    async fn responses() {
        let cache = ConditionalCache::new();

        // Not modified: hand back the caller's change vector
        let mut cmd =
            HeadDocumentCommand::new("users/1", Some(ChangeVector::new("A:5-x").unwrap())).unwrap();
        let mut rsp = http::Response::builder()
            .status(304)
            .body(ResponseBody::default())
            .unwrap();
        cmd.process_response(&cache, &mut rsp, &fingerprint())
            .await
            .unwrap();
        assert_eq!(&**cmd.result().value().unwrap(), "A:5-x");

        // ...unless the caller didn't give us one
        let mut cmd = HeadDocumentCommand::new("users/1", None).unwrap();
        let mut rsp = http::Response::builder()
            .status(304)
            .body(ResponseBody::default())
            .unwrap();
        assert!(matches!(
            cmd.process_response(&cache, &mut rsp, &fingerprint()).await,
            Err(Error::InvalidResponse { .. })
        ));

        let mut cmd = HeadDocumentCommand::new("users/1", None).unwrap();
        let mut rsp = http::Response::builder()
            .status(404)
            .body(ResponseBody::default())
            .unwrap();
        cmd.process_response(&cache, &mut rsp, &fingerprint())
            .await
            .unwrap();
        assert_eq!(cmd.result(), &Outcome::Absent);

        let mut cmd = HeadDocumentCommand::new("users/1", None).unwrap();
        let mut rsp = http::Response::builder()
            .status(200)
            .header(ETAG, "\"A:6-y\"")
            .body(ResponseBody::default())
            .unwrap();
        cmd.process_response(&cache, &mut rsp, &fingerprint())
            .await
            .unwrap();
        assert_eq!(&**cmd.result().value().unwrap(), "A:6-y");

        // A success without an ETag violates the contract
        let mut cmd = HeadDocumentCommand::new("users/1", None).unwrap();
        let mut rsp = http::Response::builder()
            .status(200)
            .body(ResponseBody::default())
            .unwrap();
        assert!(matches!(
            cmd.process_response(&cache, &mut rsp, &fingerprint()).await,
            Err(Error::InvalidResponse { .. })
        ));
        assert_eq!(cmd.result(), &Outcome::Unset);

        // So does a body
        let mut cmd = HeadDocumentCommand::new("users/1", None).unwrap();
        let mut rsp = http::Response::builder()
            .status(200)
            .header(ETAG, "\"A:6-y\"")
            .body(ResponseBody::from("surprise"))
            .unwrap();
        assert!(cmd
            .process_response(&cache, &mut rsp, &fingerprint())
            .await
            .is_err());
        assert!(cache.is_empty());
    }
}
