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

//! # ravenlink-shared
//!
//! Types shared across the [ravenlink] crates: the refined identifiers we send over the wire, the
//! cluster model ([ServerNode](node::ServerNode), [Topology](topology::Topology)), and the
//! client-side [tower] plumbing in [service].
//!
//! [ravenlink]: ../ravenlink/index.html

use serde::{Deserialize, Deserializer, Serialize};
use snafu::{Backtrace, prelude::*};

use std::{fmt::Display, ops::Deref, str::FromStr};

pub mod facet;
pub mod node;
pub mod service;
pub mod topology;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{what} cannot be empty"))]
    Empty {
        what: &'static str,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

fn mk_serde_de_err<'de, D: serde::Deserializer<'de>>(err: impl std::error::Error) -> D::Error {
    <D::Error as serde::de::Error>::custom(format!("{}", err))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Identifiers                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

// Every identifier we hand to the server is, at minimum, a non-empty string. Rather than check for
// that at each use site, refine `String` once per identifier & let the type system carry the
// guarantee. It's all boilerplate, hence the macro.
macro_rules! define_identifier {
    ($(#[$meta:meta])* $type_name:ident, $what:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        #[serde(transparent)]
        pub struct $type_name(String);

        impl $type_name {
            pub fn new(s: &str) -> Result<$type_name> {
                if s.is_empty() {
                    EmptySnafu { what: $what }.fail()
                } else {
                    Ok($type_name(s.to_owned()))
                }
            }
        }

        impl AsRef<str> for $type_name {
            fn as_ref(&self) -> &str {
                self.deref()
            }
        }

        impl Deref for $type_name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $type_name {
            type Err = Error;

            fn from_str(s: &str) -> StdResult<Self, Self::Err> {
                $type_name::new(s)
            }
        }

        impl From<$type_name> for String {
            fn from(value: $type_name) -> Self {
                value.0
            }
        }

        impl TryFrom<String> for $type_name {
            type Error = Error;

            fn try_from(text: String) -> StdResult<Self, Self::Error> {
                if text.is_empty() {
                    EmptySnafu { what: $what }.fail()
                } else {
                    Ok($type_name(text))
                }
            }
        }

        // Implement `Deserialize` by hand to fail if the serialized value is empty
        impl<'de> Deserialize<'de> for $type_name {
            fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                $type_name::try_from(s).map_err(mk_serde_de_err::<'de, D>)
            }
        }
    };
}

define_identifier! {
    /// The name of a database hosted by the cluster
    DatabaseName, "database name"
}

define_identifier! {
    /// A document identifier, such as "users/1-A"
    DocumentId, "document id"
}

define_identifier! {
    /// The name of an index defined on a database
    IndexName, "index name"
}

define_identifier! {
    /// An opaque, server-issued token naming the version of a resource
    ///
    /// The server hands these out in the `ETag` response header, sometimes wrapped in
    /// double-quotes; [ChangeVector::from_etag] strips them.
    ChangeVector, "change vector"
}

impl ChangeVector {
    /// Interpret the value of an `ETag` header as a [ChangeVector]
    pub fn from_etag(etag: &str) -> Result<ChangeVector> {
        let trimmed = etag.strip_prefix('"').unwrap_or(etag);
        let trimmed = trimmed.strip_suffix('"').unwrap_or(trimmed);
        ChangeVector::new(trimmed)
    }
    /// Format this change vector as the value of an `If-None-Match` header; the server expects it
    /// quoted
    pub fn to_quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identifiers() {
        assert!(DatabaseName::new("").is_err());
        assert!(DocumentId::new("").is_err());
        assert!(IndexName::new("").is_err());
        assert!(ChangeVector::new("").is_err());
        assert_eq!(
            &*DocumentId::new("users/1-A").unwrap(),
            "users/1-A"
        );
        assert!(serde_json::from_str::<IndexName>("\"\"").is_err());
        assert_eq!(
            serde_json::from_str::<IndexName>("\"Orders/ByCompany\"").unwrap(),
            IndexName::new("Orders/ByCompany").unwrap()
        );
        assert!(matches!(
            "".parse::<DatabaseName>(),
            Err(Error::Empty { what: "database name", .. })
        ));
    }

    #[test]
    fn change_vectors() {
        let cv = ChangeVector::from_etag("\"A:1-abc\"").unwrap();
        assert_eq!(&*cv, "A:1-abc");
        assert_eq!(cv.to_quoted(), "\"A:1-abc\"");
        assert_eq!(&*ChangeVector::from_etag("A:2-def").unwrap(), "A:2-def");
        assert!(ChangeVector::from_etag("\"\"").is_err());
    }
}
