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

//! Trie algorithms: copy-on-write upsert and key lookup.
//!
//! All algorithms are driven by a recursion over `(node, operations)` where
//! the operations are grouped by the branch nibble they take out of the
//! current node. Unaffected children are carried by reference — their chunk
//! offset, size and digest move into the new node untouched — so a version's
//! trie shares every unchanged sub-trie with its predecessor.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use triedb_io::AsyncIo;
use triedb_pool::ChunkOffset;

use crate::cache::{BeginLoad, NodeCache};
use crate::error::DbError;
use crate::nibbles::{concat, Nibbles};
use crate::node::{Child, Data, Node, NO_EXPIRY};
use crate::state_machine::StateMachine;
use crate::update::Update;

/// Resolves child references during trie walks.
pub trait NodeLoader {
    fn load(&self, offset: ChunkOffset, disk_size: u32) -> Result<Arc<Node>, DbError>;
}

/// Everything an upsert recursion needs besides the state machine.
pub(crate) struct UpsertCtx<'a> {
    pub loader: &'a dyn NodeLoader,
    /// The version being written.
    pub version: u64,
    /// Start of the retention window, for expired-child pruning.
    pub min_valid: u64,
}

/// One flattened operation: a full nibble key plus what to do at it.
struct Op {
    key: Vec<u8>,
    pos: usize,
    value: Option<Vec<u8>>,
    incarnation: bool,
    version: Option<u64>,
    graft: Option<Arc<Node>>,
}

impl Op {
    fn remaining(&self) -> &[u8] {
        &self.key[self.pos..]
    }

    fn is_erase(&self) -> bool {
        self.value.is_none() && !self.incarnation && self.graft.is_none()
    }
}

/// Expands a byte key into its nibbles, high nibble first.
pub(crate) fn bytes_to_nibbles(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() * 2);
    for byte in key {
        out.push(byte >> 4);
        out.push(byte & 0x0f);
    }
    out
}

fn flatten_into(updates: Vec<Update>, base: &[u8], out: &mut Vec<Op>) {
    for update in updates {
        let mut key = base.to_vec();
        key.extend(bytes_to_nibbles(&update.key));
        let carries_anything =
            update.value.is_some() || update.incarnation || update.graft.is_some();
        if carries_anything || update.next.is_empty() {
            out.push(Op {
                key: key.clone(),
                pos: 0,
                value: update.value,
                incarnation: update.incarnation,
                version: update.version,
                graft: update.graft,
            });
        }
        if !update.next.is_empty() {
            flatten_into(update.next, &key, out);
        }
    }
}

/// Copy-on-write upsert: applies `updates` over `root` and returns the new
/// in-memory root. `None` means the trie came out empty.
pub(crate) fn upsert(
    ctx: &UpsertCtx,
    sm: &mut dyn StateMachine,
    root: Option<Arc<Node>>,
    updates: Vec<Update>,
) -> Result<Option<Node>, DbError> {
    let mut ops = Vec::new();
    flatten_into(updates, &[], &mut ops);
    if ops.is_empty() {
        return Ok(root.map(|r| (*r).clone()));
    }
    apply_at(ctx, sm, root, ops)
}

fn path_matches(path: &Nibbles, rem: &[u8]) -> usize {
    let mut i = 0;
    while i < path.len() && i < rem.len() && path.at(i) == rem[i] {
        i += 1;
    }
    i
}

fn apply_at(
    ctx: &UpsertCtx,
    sm: &mut dyn StateMachine,
    old: Option<Arc<Node>>,
    ops: Vec<Op>,
) -> Result<Option<Node>, DbError> {
    match old {
        None => {
            // Erasing below nothing is a no-op.
            let ops: Vec<Op> = ops.into_iter().filter(|op| !op.is_erase()).collect();
            if ops.is_empty() {
                return Ok(None);
            }
            let mut prefix = ops[0].remaining().to_vec();
            for op in &ops[1..] {
                let common = op
                    .remaining()
                    .iter()
                    .zip(prefix.iter())
                    .take_while(|(a, b)| a == b)
                    .count();
                prefix.truncate(common);
            }
            let mut node = Node::empty();
            node.path = Nibbles::from_nibbles(&prefix);
            finish_node(ctx, sm, node, ops, prefix.len())
        }
        Some(old_node) => {
            let path_len = old_node.path.len();
            let mut split_at = path_len;
            let mut kept = Vec::with_capacity(ops.len());
            for op in ops {
                let common = path_matches(&old_node.path, op.remaining());
                if common < path_len && op.is_erase() {
                    // The key leaves the trie before the node: absent.
                    continue;
                }
                split_at = split_at.min(common);
                kept.push(op);
            }
            if kept.is_empty() {
                return Ok(Some((*old_node).clone()));
            }
            if split_at < path_len {
                // Split the edge: a new interior node takes the shared
                // prefix and the existing node moves under it, shortened.
                let branch = old_node.path.at(split_at);
                let mut moved = (*old_node).clone();
                moved.path = old_node.path.substr(split_at + 1, path_len - split_at - 1);
                let mut parent = Node::empty();
                parent.path = old_node.path.substr(0, split_at);
                parent.version = old_node.version;
                parent.set_child(
                    branch,
                    Child::new_dirty(Arc::new(moved), Data::empty(), NO_EXPIRY),
                );
                finish_node(ctx, sm, parent, kept, split_at)
            } else {
                let node = (*old_node).clone();
                finish_node(ctx, sm, node, kept, path_len)
            }
        }
    }
}

/// Applies ops to a node whose path (of `consumed` nibbles) they all share.
/// The state machine is advanced through the path and every visited branch.
fn finish_node(
    ctx: &UpsertCtx,
    sm: &mut dyn StateMachine,
    node: Node,
    ops: Vec<Op>,
    consumed: usize,
) -> Result<Option<Node>, DbError> {
    debug_assert_eq!(node.path.len(), consumed);
    for i in 0..consumed {
        let nibble = node.path.at(i);
        sm.down(nibble);
    }
    let result = finish_node_positioned(ctx, sm, node, ops, consumed);
    sm.up(consumed);
    result
}

fn finish_node_positioned(
    ctx: &UpsertCtx,
    sm: &mut dyn StateMachine,
    mut node: Node,
    ops: Vec<Op>,
    consumed: usize,
) -> Result<Option<Node>, DbError> {
    let mut version_acc = node.version;
    let mut groups: BTreeMap<u8, Vec<Op>> = BTreeMap::new();

    for mut op in ops {
        op.pos += consumed;
        if !op.remaining().is_empty() {
            let branch = op.remaining()[0];
            op.pos += 1;
            groups.entry(branch).or_default().push(op);
            continue;
        }
        let effective = op.version.unwrap_or(ctx.version);
        if let Some(graft) = op.graft {
            // Structural replacement: the grafted sub-trie takes over this
            // position wholesale, child offsets reused as they are.
            debug_assert!(groups.is_empty(), "graft mixed with other operations");
            let mut grafted = (*graft).clone();
            grafted.path = node.path.clone();
            grafted.keep_cached = sm.cache();
            node = grafted;
            version_acc = version_acc.max(node.version);
        } else if op.incarnation {
            // Drop the entire existing sub-trie; operations queued so far
            // targeted the old incarnation and die with it.
            node = Node {
                path: node.path.clone(),
                ..Node::empty()
            };
            groups.clear();
            node.value = op.value;
            version_acc = version_acc.max(effective);
        } else if op.value.is_some() {
            node.value = op.value;
            version_acc = version_acc.max(effective);
        } else if node.value.is_some() {
            // Erase of the value at this node; interior structure may
            // collapse below. The prior node version is retained.
            node.value = None;
        }
    }

    for (branch, group) in groups {
        sm.down(branch);
        let old_child = match node.child(branch) {
            Some(entry) => {
                if entry.subtrie_min_version != NO_EXPIRY
                    && entry.subtrie_min_version < ctx.min_valid
                {
                    // Expired: whatever was below is gone.
                    None
                } else {
                    Some(resolve_child(ctx.loader, entry)?)
                }
            }
            None => None,
        };
        let outcome = apply_at(ctx, sm, old_child, group);
        sm.up(1);
        match outcome? {
            Some(new_child) => {
                version_acc = version_acc.max(new_child.version);
                node.set_child(
                    branch,
                    Child::new_dirty(Arc::new(new_child), Data::empty(), NO_EXPIRY),
                );
            }
            None => {
                node.remove_child(branch);
            }
        }
    }

    // Structural collapse: an interior node with no value of its own and a
    // single child merges into that child.
    if node.value.is_none() {
        match node.number_of_children() {
            0 => return Ok(None),
            1 => {
                let (branch, entry) = node.single_child().expect("count is one");
                let child = resolve_child(ctx.loader, entry)?;
                let mut merged = (*child).clone();
                merged.path = concat(node.path.as_slice(), branch, child.path.as_slice());
                merged.keep_cached = sm.cache();
                return Ok(Some(merged));
            }
            _ => {}
        }
    }

    let expire = sm.auto_expire();
    let compute = sm.compute();
    for (_, entry) in node.children_mut() {
        if entry.is_flushed() {
            continue;
        }
        let child = entry.node.as_ref().expect("unflushed children are in memory");
        entry.data = compute.compute_branch(child);
        entry.subtrie_min_version = if expire { child.version } else { NO_EXPIRY };
    }
    node.version = version_acc;
    node.data = compute.compute(&node);
    node.keep_cached = sm.cache();
    Ok(Some(node))
}

pub(crate) fn resolve_child(
    loader: &dyn NodeLoader,
    entry: &Child,
) -> Result<Arc<Node>, DbError> {
    match entry.node {
        Some(ref node) => Ok(node.clone()),
        None => loader.load(entry.offset, entry.disk_size),
    }
}

/// Lookup outcomes that are not errors.
pub(crate) enum FindResult {
    /// The key resolved exactly to this node.
    Found(Arc<Node>),
    /// The path diverged from the trie structure.
    Mismatch,
}

/// Whether a child entry must be treated as absent under the current window.
pub(crate) fn child_expired(entry: &Child, min_valid: u64) -> bool {
    entry.subtrie_min_version != NO_EXPIRY && entry.subtrie_min_version < min_valid
}

/// Descends from `root` along `key`, reading children through the loader.
pub(crate) fn find_blocking(
    loader: &dyn NodeLoader,
    min_valid: u64,
    root: &Arc<Node>,
    key: &[u8],
) -> Result<FindResult, DbError> {
    let nibbles = bytes_to_nibbles(key);
    let mut node = root.clone();
    let mut pos = 0;
    loop {
        let rem = &nibbles[pos..];
        let common = path_matches(&node.path, rem);
        if common < node.path.len() {
            return Ok(FindResult::Mismatch);
        }
        if rem.len() == node.path.len() {
            return Ok(FindResult::Found(node));
        }
        let branch = rem[node.path.len()];
        let entry = match node.child(branch) {
            Some(entry) if !child_expired(entry, min_valid) => entry,
            _ => return Ok(FindResult::Mismatch),
        };
        let next = resolve_child(loader, entry)?;
        pos += node.path.len() + 1;
        node = next;
    }
}

/// Async find completion.
pub(crate) type FindCallback =
    Box<dyn FnOnce(&AsyncIo, Result<FindResult, DbError>) + Send>;

/// Schedules the read backing a cache miss and fans its result out through
/// the cache's single-flight list. Backpressure from the reactor is retried
/// on a short timer.
pub(crate) fn schedule_node_read(
    io: &AsyncIo,
    cache: Arc<NodeCache>,
    offset: ChunkOffset,
    disk_size: u32,
) {
    let completion_cache = cache.clone();
    let submitted = io.submit_read(
        offset,
        disk_size as usize,
        Box::new(move |io, result| {
            let parsed = result.map_err(DbError::from).and_then(|bytes| {
                Node::decode(&bytes)
                    .map(Arc::new)
                    .map_err(|_| DbError::BadNode)
            });
            completion_cache.complete_load(io, offset, parsed);
        }),
    );
    if let Err(err) = submitted {
        if err.kind() == std::io::ErrorKind::WouldBlock {
            io.submit_after(
                Duration::from_micros(250),
                Box::new(move |io| schedule_node_read(io, cache, offset, disk_size)),
            );
        } else {
            cache.complete_load(io, offset, Err(err.into()));
        }
    }
}

/// Non-blocking find over the reactor: descends in memory while it can,
/// suspends on each disk child, coalescing with any identical read already
/// in flight.
pub(crate) fn find_async(
    io: &AsyncIo,
    cache: Arc<NodeCache>,
    min_valid: u64,
    root: Arc<Node>,
    key: Arc<Vec<u8>>,
    start: usize,
    cb: FindCallback,
) {
    let mut node = root;
    let mut pos = start;
    loop {
        let rem = &key[pos..];
        let common = path_matches(&node.path, rem);
        if common < node.path.len() {
            return cb(io, Ok(FindResult::Mismatch));
        }
        if rem.len() == node.path.len() {
            return cb(io, Ok(FindResult::Found(node)));
        }
        let branch = rem[node.path.len()];
        let (offset, disk_size, in_memory) = match node.child(branch) {
            Some(entry) if !child_expired(entry, min_valid) => {
                (entry.offset, entry.disk_size, entry.node.clone())
            }
            _ => return cb(io, Ok(FindResult::Mismatch)),
        };
        pos += node.path.len() + 1;
        if let Some(next) = in_memory {
            node = next;
            continue;
        }
        let resume_cache = cache.clone();
        let continuation: crate::cache::LoadCallback =
            Box::new(move |io, result| match result {
                Ok(next) => find_async(io, resume_cache, min_valid, next, key, pos, cb),
                Err(err) => cb(io, Err(err)),
            });
        return match cache.begin_load(offset, continuation) {
            // A hit hands the continuation back; run it right here.
            BeginLoad::Hit(next, continuation) => continuation(io, Ok(next)),
            BeginLoad::Coalesced => {}
            BeginLoad::Started => schedule_node_read(io, cache, offset, disk_size),
        };
    }
}
