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

//! # The conditional cache
//!
//! Responses to cacheable commands are remembered here, keyed by a [Fingerprint] of the request
//! that produced them, along with the [ChangeVector] the server attached. The next time the same
//! request goes out, the executor asks the server "has this changed since `<change vector>`?" by
//! way of `If-None-Match`; a `304 Not Modified` lets us reuse the payload we already have.
//!
//! The cache is shared by every clone of the executor & every concurrent request. Entries are
//! immutable once stored: a refresh replaces the entry as a whole, so a reader holding an
//! `Arc<CacheEntry>` never observes a half-written payload. Writes to the same fingerprint are
//! last-writer-wins.

use std::{fmt::Display, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use http::Request;

use ravenlink_shared::ChangeVector;

/// The cache key for a request: `"{METHOD} {url}"`
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of<B>(request: &Request<B>) -> Fingerprint {
        Fingerprint(format!("{} {}", request.method(), request.uri()))
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One remembered response
#[derive(Clone, Debug)]
pub struct CacheEntry {
    fingerprint: Fingerprint,
    change_vector: ChangeVector,
    payload: Bytes,
    fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(fingerprint: Fingerprint, change_vector: ChangeVector, payload: Bytes) -> CacheEntry {
        CacheEntry {
            fingerprint,
            change_vector,
            payload,
            fetched_at: Utc::now(),
        }
    }
    pub fn change_vector(&self) -> &ChangeVector {
        &self.change_vector
    }
    pub fn fetched_at(&self) -> &DateTime<Utc> {
        &self.fetched_at
    }
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// A concurrent map from [Fingerprint] to [CacheEntry]
///
/// Cloning is cheap; all clones share the same entries.
#[derive(Clone, Debug, Default)]
pub struct ConditionalCache {
    entries: Arc<DashMap<Fingerprint, Arc<CacheEntry>>>,
}

impl ConditionalCache {
    pub fn new() -> ConditionalCache {
        ConditionalCache::default()
    }
    pub fn clear(&self) {
        self.entries.clear()
    }
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<CacheEntry>> {
        self.entries
            .get(fingerprint)
            .map(|entry| entry.value().clone())
    }
    /// Drop the entry for `fingerprint`, returning it if there was one
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> Option<Arc<CacheEntry>> {
        self.entries.remove(fingerprint).map(|(_, entry)| entry)
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    /// Store `entry`, replacing (and returning) any prior entry for the same fingerprint
    pub fn store(&self, entry: CacheEntry) -> Option<Arc<CacheEntry>> {
        self.entries
            .insert(entry.fingerprint.clone(), Arc::new(entry))
    }
}
