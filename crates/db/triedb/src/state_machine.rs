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

//! Per-depth trie policy.
//!
//! The trie driver notifies the state machine as it walks down and up; the
//! machine decides which digest to compute, whether nodes at the current
//! depth are worth caching, whether the sub-trie takes part in compaction,
//! whether keys auto-expire with the history window, and whether keys are
//! variable length.

use crate::compute::{Compute, EmptyCompute, MerkleCompute};

/// Static knobs of the bundled state machines.
#[derive(Clone, Copy, Debug)]
pub struct StateMachineConfig {
    /// Keys expire once the history window passes their last write.
    pub expire: bool,
    /// Cache nodes only down to this depth (in nibbles); `None` caches all.
    pub cache_depth: Option<usize>,
    /// Keys may be proper prefixes of one another.
    pub variable_length: bool,
    /// The sub-trie participates in compaction rewrites.
    pub compact: bool,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        StateMachineConfig {
            expire: false,
            cache_depth: None,
            variable_length: false,
            compact: true,
        }
    }
}

/// Per-walk trie policy. `down`/`up` are called for every nibble edge the
/// driver crosses, path nibbles included.
pub trait StateMachine: Send {
    fn down(&mut self, nibble: u8);
    fn up(&mut self, nibbles: usize);
    /// The digest computation for nodes at the current position.
    fn compute(&self) -> &dyn Compute;
    /// Whether nodes at the current position are cache-worthy.
    fn cache(&self) -> bool;
    /// Whether the current sub-trie is subject to compaction.
    fn compact(&self) -> bool;
    /// Whether keys under the current position expire with the window.
    fn auto_expire(&self) -> bool;
    /// Whether keys under the current position are variable length.
    fn is_variable_length(&self) -> bool;
    fn clone_boxed(&self) -> Box<dyn StateMachine>;
}

/// A state machine applying one compute and one config at every depth.
#[derive(Clone)]
pub struct StateMachineAlways<C> {
    compute: C,
    config: StateMachineConfig,
    depth: usize,
}

impl<C: Compute + Clone + 'static> StateMachineAlways<C> {
    pub fn new(compute: C, config: StateMachineConfig) -> Self {
        StateMachineAlways {
            compute,
            config,
            depth: 0,
        }
    }
}

impl<C: Compute + Clone + 'static> StateMachine for StateMachineAlways<C> {
    fn down(&mut self, _nibble: u8) {
        self.depth += 1;
    }

    fn up(&mut self, nibbles: usize) {
        debug_assert!(self.depth >= nibbles);
        self.depth -= nibbles;
    }

    fn compute(&self) -> &dyn Compute {
        &self.compute
    }

    fn cache(&self) -> bool {
        match self.config.cache_depth {
            None => true,
            Some(limit) => self.depth <= limit,
        }
    }

    fn compact(&self) -> bool {
        self.config.compact
    }

    fn auto_expire(&self) -> bool {
        self.config.expire
    }

    fn is_variable_length(&self) -> bool {
        self.config.variable_length
    }

    fn clone_boxed(&self) -> Box<dyn StateMachine> {
        Box::new(self.clone())
    }
}

/// Merkle digests at every depth.
pub type StateMachineAlwaysMerkle = StateMachineAlways<MerkleCompute>;

/// No digests at any depth.
pub type StateMachineAlwaysEmpty = StateMachineAlways<EmptyCompute>;

impl Default for StateMachineAlwaysMerkle {
    fn default() -> Self {
        StateMachineAlways::new(MerkleCompute, StateMachineConfig::default())
    }
}

impl Default for StateMachineAlwaysEmpty {
    fn default() -> Self {
        StateMachineAlways::new(EmptyCompute, StateMachineConfig::default())
    }
}

/// Plain trie over variable-length keys, no digests.
pub fn plain_variable_length() -> StateMachineAlwaysEmpty {
    StateMachineAlways::new(
        EmptyCompute,
        StateMachineConfig {
            variable_length: true,
            ..StateMachineConfig::default()
        },
    )
}

/// Auto-expiring trie caching only the top `cache_depth` nibbles.
pub fn auto_expire(cache_depth: usize) -> StateMachineAlwaysEmpty {
    StateMachineAlways::new(
        EmptyCompute,
        StateMachineConfig {
            expire: true,
            cache_depth: Some(cache_depth),
            ..StateMachineConfig::default()
        },
    )
}

/// Merkle digests below a fixed-length prefix, nothing above it. The prefix
/// levels are bookkeeping (block numbers, table tags) that needs no
/// authentication.
#[derive(Clone)]
pub struct MerkleAfterPrefix {
    prefix_nibbles: usize,
    depth: usize,
    merkle: MerkleCompute,
    empty: EmptyCompute,
}

impl MerkleAfterPrefix {
    pub fn new(prefix_nibbles: usize) -> Self {
        MerkleAfterPrefix {
            prefix_nibbles,
            depth: 0,
            merkle: MerkleCompute,
            empty: EmptyCompute,
        }
    }
}

impl StateMachine for MerkleAfterPrefix {
    fn down(&mut self, _nibble: u8) {
        self.depth += 1;
    }

    fn up(&mut self, nibbles: usize) {
        debug_assert!(self.depth >= nibbles);
        self.depth -= nibbles;
    }

    fn compute(&self) -> &dyn Compute {
        if self.depth < self.prefix_nibbles {
            &self.empty
        } else {
            &self.merkle
        }
    }

    fn cache(&self) -> bool {
        true
    }

    fn compact(&self) -> bool {
        true
    }

    fn auto_expire(&self) -> bool {
        false
    }

    fn is_variable_length(&self) -> bool {
        self.depth < self.prefix_nibbles
    }

    fn clone_boxed(&self) -> Box<dyn StateMachine> {
        Box::new(self.clone())
    }
}
