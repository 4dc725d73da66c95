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

//! # Executor configuration
//!
//! [ExecutorConfig] may be built in code, or read from a TOML document like:
//!
//! ```toml
//! version = "1"
//! urls = ["http://10.0.0.1:8080", "http://10.0.0.2:8080"]
//! database = "orders"
//! read-balance = "round-robin"
//! request-timeout = { secs = 5, nanos = 0 }
//!
//! [client-exponential-backoff]
//! jitter = 10.0
//! num-attempts = 1
//! durations = { min = { secs = 0, nanos = 100000000 }, max = { secs = 1, nanos = 0 } }
//! ```
//!
//! Any key may be omitted, although an executor can't be built without at least one URL & a
//! database.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use snafu::{prelude::*, Backtrace, IntoError};
use url::Url;

use ravenlink_shared::{
    service::{DurationRange, ExponentialBackoffParameters, Jitter},
    DatabaseName,
};

use crate::node_selector::ReadBalance;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to read configuration file {pth:?}: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to parse configuration: {source}"))]
    ConfigParse {
        source: toml::de::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         ExecutorConfig                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// [RequestExecutor](crate::executor::RequestExecutor) configuration, version one
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// The nodes we know of before we've heard from the cluster
    urls: Vec<Url>,
    database: Option<DatabaseName>,
    /// How long a single request (including reading its response) may take
    #[serde(rename = "request-timeout")]
    request_timeout: Duration,
    #[serde(rename = "read-balance")]
    read_balance: ReadBalance,
    #[serde(rename = "user-agent")]
    user_agent: String,
    /// Re-fetch the topology after a request has had to fail over to another node
    #[serde(rename = "refresh-on-failover")]
    refresh_on_failover: bool,
    /// Backoff between failover rounds; `num-attempts` is the number of rounds after the first
    #[serde(rename = "client-exponential-backoff")]
    client_exponential_backoff: ExponentialBackoffParameters,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            urls: Vec::new(),
            database: None,
            request_timeout: Duration::from_secs(30),
            read_balance: ReadBalance::None,
            user_agent: format!("ravenlink/{}", env!("CARGO_PKG_VERSION")),
            refresh_on_failover: true,
            client_exponential_backoff: ExponentialBackoffParameters::new(
                DurationRange::new(Duration::from_millis(100), Duration::from_secs(1)).unwrap(/* known good */),
                Jitter::try_from(10.0).unwrap(/* known good */),
                0,
            ),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ExecutorConfig),
}

impl ExecutorConfig {
    pub fn new(urls: Vec<Url>, database: DatabaseName) -> ExecutorConfig {
        ExecutorConfig {
            urls,
            database: Some(database),
            ..Default::default()
        }
    }
    /// Read configuration from the TOML file at `pth`
    pub fn from_path(pth: &Path) -> Result<ExecutorConfig> {
        std::fs::read_to_string(pth)
            .map_err(|err| {
                ConfigNotFoundSnafu {
                    pth: pth.to_path_buf(),
                }
                .into_error(err)
            })
            .and_then(|text| ExecutorConfig::from_toml(&text))
    }
    pub fn from_toml(text: &str) -> Result<ExecutorConfig> {
        match toml::from_str::<Configuration>(text).context(ConfigParseSnafu)? {
            Configuration::V1(cfg) => Ok(cfg),
        }
    }
    pub fn with_backoff(mut self, backoff: ExponentialBackoffParameters) -> ExecutorConfig {
        self.client_exponential_backoff = backoff;
        self
    }
    pub fn with_read_balance(mut self, read_balance: ReadBalance) -> ExecutorConfig {
        self.read_balance = read_balance;
        self
    }
    pub fn with_refresh_on_failover(mut self, refresh_on_failover: bool) -> ExecutorConfig {
        self.refresh_on_failover = refresh_on_failover;
        self
    }
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> ExecutorConfig {
        self.request_timeout = request_timeout;
        self
    }
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> ExecutorConfig {
        self.user_agent = user_agent.into();
        self
    }
    pub fn backoff(&self) -> &ExponentialBackoffParameters {
        &self.client_exponential_backoff
    }
    pub fn database(&self) -> Option<&DatabaseName> {
        self.database.as_ref()
    }
    pub fn read_balance(&self) -> ReadBalance {
        self.read_balance
    }
    pub fn refresh_on_failover(&self) -> bool {
        self.refresh_on_failover
    }
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
    pub fn urls(&self) -> &[Url] {
        &self.urls
    }
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse() {
        let cfg = ExecutorConfig::from_toml(
            r#"
version = "1"
urls = ["http://10.0.0.1:8080", "http://10.0.0.2:8080"]
database = "orders"
read-balance = "round-robin"
refresh-on-failover = false
request-timeout = { secs = 5, nanos = 0 }

[client-exponential-backoff]
jitter = 5.0
num-attempts = 2
durations = { min = { secs = 0, nanos = 100000000 }, max = { secs = 1, nanos = 0 } }
"#,
        )
        .unwrap();
        assert_eq!(cfg.urls().len(), 2);
        assert_eq!(cfg.urls()[1].as_str(), "http://10.0.0.2:8080/");
        assert_eq!(&**cfg.database().unwrap(), "orders");
        assert_eq!(cfg.read_balance(), ReadBalance::RoundRobin);
        assert!(!cfg.refresh_on_failover());
        assert_eq!(cfg.request_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.backoff().num_attempts(), 2);
        assert_eq!(cfg.backoff().lower(), &Duration::from_millis(100));
        assert!(cfg.user_agent().starts_with("ravenlink/"));
    }

    #[test]
    fn defaults() {
        let cfg = ExecutorConfig::from_toml(r#"version = "1""#).unwrap();
        assert!(cfg.urls().is_empty());
        assert!(cfg.database().is_none());
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.read_balance(), ReadBalance::None);
        assert!(cfg.refresh_on_failover());
        assert_eq!(cfg.backoff().num_attempts(), 0);
    }

    #[test]
    fn rejects() {
        // No version
        assert!(ExecutorConfig::from_toml(r#"database = "orders""#).is_err());
        // Unknown version
        assert!(ExecutorConfig::from_toml(r#"version = "2""#).is_err());
        // Empty database name
        assert!(ExecutorConfig::from_toml("version = \"1\"\ndatabase = \"\"").is_err());
        assert!(ExecutorConfig::from_toml("version = \"1\"\nread-balance = \"fastest\"").is_err());
        assert!(matches!(
            ExecutorConfig::from_path(Path::new("/no/such/ravenlink.toml")),
            Err(Error::ConfigNotFound { .. })
        ));
    }
}
