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

//! Versioned Merkle Patricia Trie storage engine.
//!
//! Byte keys map to byte values in a radix-16 trie whose nodes carry
//! cryptographic digests; the root digest authenticates the whole set. One
//! version of the trie exists per committed batch, many versions coexist on
//! disk inside a bounded retention window, and old versions are reclaimed
//! as new ones are written. The trie does not interpret keys; digests come
//! from an injected state machine.

#[macro_use]
extern crate log;

pub mod aux;
pub mod cache;
pub mod compute;
pub mod db;
pub mod error;
pub mod nibbles;
pub mod node;
pub mod node_writer;
pub mod state_machine;
pub mod traverse;
pub mod trie;
pub mod update;

pub use aux::{PoolCacheLoader, UpdateAux, UpsertFlags};
pub use cache::{BeginLoad, NodeCache, AVERAGE_NODE_SIZE};
pub use compute::{finalize_root, Compute, EmptyCompute, MerkleCompute, EMPTY_TRIE_ROOT};
pub use db::{Db, DbConfig, ReadOnlyDb, ReadOnlyDbConfig};
pub use error::DbError;
pub use nibbles::{concat, NibbleSlice, Nibbles};
pub use node::{Child, Data, Node, INVALID_BRANCH, MAX_DATA_LEN, NO_EXPIRY};
pub use state_machine::{
    auto_expire, plain_variable_length, MerkleAfterPrefix, StateMachine, StateMachineAlways,
    StateMachineAlwaysEmpty, StateMachineAlwaysMerkle, StateMachineConfig,
};
pub use traverse::{traverse_blocking, TraverseMachine};
pub use trie::NodeLoader;
pub use update::{make_erase, make_incarnation, make_prefix_update, make_update, Update};
