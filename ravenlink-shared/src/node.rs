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

//! # Cluster nodes
//!
//! A [ServerNode] names one member of the cluster as seen from a particular database: the base
//! URL at which the member may be reached, the database, the member's cluster tag (a short
//! string like "A") and its [ServerRole].

use std::{
    fmt::Display,
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize};
use snafu::{prelude::*, Backtrace};
use url::Url;

use crate::DatabaseName;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{url} can't be used as the base URL of a server node"))]
    NotABase { url: Url, backtrace: Backtrace },
    #[snafu(display("Failed to parse {text} as a node URL: {source}"))]
    NodeUrl {
        text: String,
        source: url::ParseError,
        backtrace: Backtrace,
    },
    #[snafu(display("{text} is not a recognized server role"))]
    Role { text: String, backtrace: Backtrace },
    #[snafu(display("Server nodes must be reached over http or https; got {scheme}"))]
    Scheme { scheme: String, backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           ServerRole                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The role a cluster member plays with respect to a database
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum ServerRole {
    /// A full member of the database group
    #[serde(rename = "Member", alias = "MEMBER")]
    Member,
    /// Catching up; not yet a full member
    #[serde(rename = "Promotable", alias = "PROMOTABLE")]
    Promotable,
    /// A member that has lost contact with the rest of the cluster
    #[serde(rename = "Rebel", alias = "REBEL")]
    Rebel,
    #[serde(rename = "Watcher", alias = "WATCHER")]
    Watcher,
}

impl Display for ServerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ServerRole::Member => "Member",
                ServerRole::Promotable => "Promotable",
                ServerRole::Rebel => "Rebel",
                ServerRole::Watcher => "Watcher",
            }
        )
    }
}

impl FromStr for ServerRole {
    type Err = Error;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "member" => Ok(ServerRole::Member),
            "promotable" => Ok(ServerRole::Promotable),
            "rebel" => Ok(ServerRole::Rebel),
            "watcher" => Ok(ServerRole::Watcher),
            _ => RoleSnafu { text: s.to_owned() }.fail(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           ServerNode                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn check_base(url: Url) -> Result<Url> {
    ensure!(
        url.scheme() == "http" || url.scheme() == "https",
        SchemeSnafu {
            scheme: url.scheme().to_owned()
        }
    );
    ensure!(!url.cannot_be_a_base(), NotABaseSnafu { url });
    Ok(url)
}

/// One addressable member of the cluster, as seen from a given database
///
/// Two [ServerNode]s are the same node if they share a URL & database; the cluster tag & role are
/// just along for the ride.
#[derive(Clone, Debug, Serialize)]
pub struct ServerNode {
    #[serde(rename = "Url")]
    url: Url,
    #[serde(rename = "Database")]
    database: DatabaseName,
    #[serde(rename = "ClusterTag")]
    cluster_tag: String,
    #[serde(rename = "ServerRole")]
    role: ServerRole,
}

impl ServerNode {
    pub fn new(
        url: Url,
        database: DatabaseName,
        cluster_tag: impl Into<String>,
        role: ServerRole,
    ) -> Result<ServerNode> {
        Ok(ServerNode {
            url: check_base(url)?,
            database,
            cluster_tag: cluster_tag.into(),
            role,
        })
    }
    /// Build a node from nothing more than a URL; this is how we seed the topology from
    /// configuration, before we've heard from the cluster
    pub fn from_url(url: &str, database: DatabaseName) -> Result<ServerNode> {
        let url = Url::parse(url).context(NodeUrlSnafu {
            text: url.to_owned(),
        })?;
        ServerNode::new(url, database, "?", ServerRole::Member)
    }
    pub fn cluster_tag(&self) -> &str {
        &self.cluster_tag
    }
    pub fn database(&self) -> &DatabaseName {
        &self.database
    }
    /// Produce the URL `{node}/databases/{database}/{segments...}`
    pub fn database_endpoint(&self, segments: &[&str]) -> Url {
        let database: &str = &self.database;
        self.endpoint(
            ["databases", database]
                .into_iter()
                .chain(segments.iter().copied()),
        )
    }
    pub fn role(&self) -> ServerRole {
        self.role
    }
    /// Produce the URL `{node}/{segments...}`
    pub fn server_endpoint(&self, segments: &[&str]) -> Url {
        self.endpoint(segments.iter().copied())
    }
    pub fn url(&self) -> &Url {
        &self.url
    }
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.url.clone();
        // Can't fail; we checked `cannot_be_a_base()` on construction.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

impl Display for ServerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, tag {}, {})",
            self.url, self.database, self.cluster_tag, self.role
        )
    }
}

impl PartialEq for ServerNode {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url && self.database == other.database
    }
}

impl Eq for ServerNode {}

impl Hash for ServerNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
        self.database.hash(state);
    }
}

#[derive(Deserialize)]
struct RawServerNode {
    #[serde(rename = "Url")]
    url: Url,
    #[serde(rename = "Database")]
    database: DatabaseName,
    #[serde(rename = "ClusterTag")]
    cluster_tag: String,
    #[serde(rename = "ServerRole")]
    role: ServerRole,
}

// Implement `Deserialize` by hand so that we get the same checks on the URL as `new()`
impl<'de> Deserialize<'de> for ServerNode {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawServerNode::deserialize(deserializer)?;
        ServerNode::new(raw.url, raw.database, raw.cluster_tag, raw.role)
            .map_err(|err| <D::Error as serde::de::Error>::custom(format!("{}", err)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn endpoints() {
        let node =
            ServerNode::from_url("http://127.0.0.1:8080", DatabaseName::new("db1").unwrap())
                .unwrap();
        assert_eq!(
            node.database_endpoint(&["docs"]).as_str(),
            "http://127.0.0.1:8080/databases/db1/docs"
        );
        assert_eq!(
            node.server_endpoint(&["databases"]).as_str(),
            "http://127.0.0.1:8080/databases"
        );

        // Database names are path-encoded
        let node = ServerNode::from_url(
            "https://a.example.com/",
            DatabaseName::new("my db").unwrap(),
        )
        .unwrap();
        assert_eq!(
            node.database_endpoint(&["indexes"]).as_str(),
            "https://a.example.com/databases/my%20db/indexes"
        );

        assert!(ServerNode::from_url("mailto:me@example.com", DatabaseName::new("x").unwrap())
            .is_err());
        assert!(ServerNode::from_url("ftp://example.com", DatabaseName::new("x").unwrap())
            .is_err());
    }

    #[test]
    fn identity() {
        let db = DatabaseName::new("db1").unwrap();
        let url = Url::parse("http://127.0.0.1:8080").unwrap();
        let a = ServerNode::new(url.clone(), db.clone(), "A", ServerRole::Member).unwrap();
        let b = ServerNode::new(url.clone(), db.clone(), "B", ServerRole::Rebel).unwrap();
        let c = ServerNode::new(url, DatabaseName::new("db2").unwrap(), "A", ServerRole::Member)
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn de() {
        let node: ServerNode = serde_json::from_str(
            r#"{"Url":"http://127.0.0.1:8080","Database":"db1","ClusterTag":"A","ServerRole":"Member"}"#,
        )
        .unwrap();
        assert_eq!(node.cluster_tag(), "A");
        assert_eq!(node.role(), ServerRole::Member);
        assert_eq!(&**node.database(), "db1");

        assert!(serde_json::from_str::<ServerNode>(
            r#"{"Url":"http://127.0.0.1:8080","Database":"","ClusterTag":"A","ServerRole":"Member"}"#
        )
        .is_err());
        assert!(serde_json::from_str::<ServerNode>(
            r#"{"Url":"http://127.0.0.1:8080","Database":"db1","ClusterTag":"A","ServerRole":"Leader"}"#
        )
        .is_err());
        assert_eq!("REBEL".parse::<ServerRole>().unwrap(), ServerRole::Rebel);
    }
}
