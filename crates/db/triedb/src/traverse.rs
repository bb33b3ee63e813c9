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

//! Caller-driven trie walks.

use std::sync::Arc;

use crate::error::DbError;
use crate::node::{Node, INVALID_BRANCH};
use crate::trie::{child_expired, resolve_child, NodeLoader};

/// The visitor driving a traversal. `down` runs pre-order and may return
/// `false` to skip the node's children; `up` always pairs with its `down`.
/// The root is visited with [`INVALID_BRANCH`]. `clone_boxed` lets the
/// driver hand independent sub-trie walks to worker threads; machines that
/// accumulate state share it through their own synchronization.
pub trait TraverseMachine: Send {
    fn down(&mut self, branch: u8, node: &Node) -> bool;
    fn up(&mut self, branch: u8, node: &Node);
    fn should_visit(&self, _node: &Node, _branch: u8) -> bool {
        true
    }
    fn clone_boxed(&self) -> Box<dyn TraverseMachine>;
}

/// Depth-first walk in branch-nibble order, entirely on the calling thread.
pub fn traverse_blocking(
    loader: &dyn NodeLoader,
    min_valid: u64,
    root: &Arc<Node>,
    machine: &mut dyn TraverseMachine,
) -> Result<(), DbError> {
    walk(loader, min_valid, root, INVALID_BRANCH, machine)
}

pub(crate) fn walk(
    loader: &dyn NodeLoader,
    min_valid: u64,
    node: &Arc<Node>,
    branch: u8,
    machine: &mut dyn TraverseMachine,
) -> Result<(), DbError> {
    if machine.down(branch, node) {
        for (child_branch, entry) in node.children() {
            if child_expired(entry, min_valid) {
                continue;
            }
            if !machine.should_visit(node, child_branch) {
                continue;
            }
            let child = resolve_child(loader, entry)?;
            walk(loader, min_valid, &child, child_branch, machine)?;
        }
    }
    machine.up(branch, node);
    Ok(())
}
