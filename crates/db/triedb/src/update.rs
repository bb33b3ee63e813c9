// Copyright 2022-2026 Triedb Developers.
// This file is part of Triedb.

// Triedb is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Triedb is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Triedb.  If not, see <http://www.gnu.org/licenses/>.

//! Upsert requests.

use std::sync::Arc;

use parity_bytes::Bytes;

use crate::node::Node;

/// One keyed operation of an upsert batch.
///
/// `value: Some(..)` inserts or replaces (an empty value is a present
/// value); `value: None` with no other payload erases the key. `next`
/// carries operations applied beneath this key, so a whole section of the
/// trie can be updated under a common prefix in one batch. `incarnation`
/// discards whatever sub-trie existed at the key before the rest of the
/// operation applies.
pub struct Update {
    pub key: Bytes,
    pub value: Option<Bytes>,
    pub incarnation: bool,
    pub next: Vec<Update>,
    /// Version tag for auto-expiring tries; the upsert version otherwise.
    pub version: Option<u64>,
    /// Structural replacement used by sub-trie copy: the existing sub-trie
    /// at `key` is replaced by this node, child offsets reused as-is.
    pub(crate) graft: Option<Arc<Node>>,
}

impl Update {
    pub fn with_version(mut self, version: u64) -> Update {
        self.version = Some(version);
        self
    }
}

/// Insert or replace `key → value`.
pub fn make_update(key: &[u8], value: &[u8]) -> Update {
    Update {
        key: key.to_vec(),
        value: Some(value.to_vec()),
        incarnation: false,
        next: Vec::new(),
        version: None,
        graft: None,
    }
}

/// Erase `key`. Erasing an absent key is a no-op.
pub fn make_erase(key: &[u8]) -> Update {
    Update {
        key: key.to_vec(),
        value: None,
        incarnation: false,
        next: Vec::new(),
        version: None,
        graft: None,
    }
}

/// Apply `next` beneath `key`, marking `key` itself with an empty value.
pub fn make_prefix_update(key: &[u8], next: Vec<Update>) -> Update {
    Update {
        key: key.to_vec(),
        value: Some(Vec::new()),
        incarnation: false,
        next,
        version: None,
        graft: None,
    }
}

/// Replace the entire sub-trie at `key` with the contents described by
/// `next`, discarding whatever was there.
pub fn make_incarnation(key: &[u8], next: Vec<Update>) -> Update {
    Update {
        key: key.to_vec(),
        value: Some(Vec::new()),
        incarnation: true,
        next,
        version: None,
        graft: None,
    }
}

pub(crate) fn make_graft(key: &[u8], node: Arc<Node>) -> Update {
    Update {
        key: key.to_vec(),
        value: None,
        incarnation: false,
        next: Vec::new(),
        version: None,
        graft: Some(node),
    }
}
