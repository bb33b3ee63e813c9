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

//! The update coordinator.
//!
//! `UpdateAux` owns the two append streams and every transition of the
//! chunk lists, maintains the root-offset ring and the history window,
//! drives compaction and expiration, and supports rewind. It exists in two
//! backings: over a storage pool, or purely in memory with a map of
//! retained roots (used by tests and light tooling).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use triedb_pool::{
    ChunkList, ChunkOffset, StoragePool, DISK_PAGE_SIZE, INVALID_VERSION, MAX_HISTORY_LENGTH,
    MIN_HISTORY_LENGTH,
};

use crate::cache::NodeCache;
use crate::error::DbError;
use crate::node::{Node, NO_EXPIRY};
use crate::node_writer::NodeWriter;
use crate::state_machine::StateMachine;
use crate::trie::{upsert, NodeLoader, UpsertCtx};
use crate::update::Update;

/// Per-upsert switches.
#[derive(Clone, Copy, Debug)]
pub struct UpsertFlags {
    /// Run the compaction step of this upsert.
    pub compaction: bool,
    /// Record the new root in the root-offset ring. Leaving it off makes
    /// the write invisible to readers until a later upsert commits a root
    /// for the same version.
    pub write_root: bool,
}

impl Default for UpsertFlags {
    fn default() -> Self {
        UpsertFlags {
            compaction: false,
            write_root: true,
        }
    }
}

/// Blocking node resolution through the shared cache, counting cache
/// misses when asked to.
pub struct PoolCacheLoader {
    pub pool: Arc<StoragePool>,
    pub cache: Arc<NodeCache>,
    pub misses: Option<Arc<std::sync::atomic::AtomicUsize>>,
}

impl NodeLoader for PoolCacheLoader {
    fn load(&self, offset: ChunkOffset, disk_size: u32) -> Result<Arc<Node>, DbError> {
        if let Some(node) = self.cache.get(offset) {
            return Ok(node);
        }
        if let Some(ref misses) = self.misses {
            misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        let bytes = self.pool.read(offset, disk_size as usize)?;
        let node = Arc::new(Node::decode(&bytes).map_err(|_| DbError::BadNode)?);
        self.cache.insert(offset, node.clone());
        Ok(node)
    }
}

struct MemLoader;

impl NodeLoader for MemLoader {
    fn load(&self, offset: ChunkOffset, _disk_size: u32) -> Result<Arc<Node>, DbError> {
        unreachable!("in-memory trie holds no on-disk children ({})", offset)
    }
}

/// A swept chunk waiting for the window to pass its sweep version.
struct PendingFree {
    chunk: u32,
    swept_at: u64,
}

struct DiskState {
    pool: Arc<StoragePool>,
    writer_fast: NodeWriter,
    writer_slow: NodeWriter,
    pending_free: Vec<PendingFree>,
}

struct MemState {
    roots: BTreeMap<u64, Option<Arc<Node>>>,
    history_length: u64,
    min_valid: u64,
    max_version: u64,
}

enum Backend {
    Memory(MemState),
    Disk(DiskState),
}

/// Owner of the write side: streams, chunk lists, root-offset ring and the
/// history window. Confined to the single writer thread.
pub struct UpdateAux {
    backend: Backend,
    cache: Arc<NodeCache>,
}

impl UpdateAux {
    /// Coordinator over an open pool. `history_override` applies the
    /// reopen-time history length change: shrinking advances the window
    /// start immediately, growing never resurrects invalidated versions.
    pub fn new(
        pool: Arc<StoragePool>,
        cache: Arc<NodeCache>,
        history_override: Option<u64>,
    ) -> Result<UpdateAux, DbError> {
        assert!(!pool.is_read_only(), "the coordinator needs the write side");
        if let Some(history) = history_override {
            let history = history.clamp(MIN_HISTORY_LENGTH, MAX_HISTORY_LENGTH);
            let mut meta = pool.metadata_mut();
            if history != meta.history_length {
                debug!(
                    target: "triedb",
                    "history length {} -> {}", meta.history_length, history
                );
                meta.history_length = history;
                if meta.max_version != INVALID_VERSION {
                    let floor = meta.max_version.saturating_sub(history - 1);
                    meta.min_valid_version = meta.min_valid_version.max(floor);
                }
                meta.mark_window_dirty();
            }
        }
        let writer_fast = NodeWriter::restore(&pool, ChunkList::Fast);
        let writer_slow = NodeWriter::restore(&pool, ChunkList::Slow);
        let aux = UpdateAux {
            backend: Backend::Disk(DiskState {
                pool: pool.clone(),
                writer_fast,
                writer_slow,
                pending_free: Vec::new(),
            }),
            cache,
        };
        pool.commit_metadata()?;
        Ok(aux)
    }

    /// Coordinator with no disk behind it.
    pub fn new_in_memory(history_length: u64, cache: Arc<NodeCache>) -> UpdateAux {
        UpdateAux {
            backend: Backend::Memory(MemState {
                roots: BTreeMap::new(),
                history_length: history_length.clamp(MIN_HISTORY_LENGTH, MAX_HISTORY_LENGTH),
                min_valid: INVALID_VERSION,
                max_version: INVALID_VERSION,
            }),
            cache,
        }
    }

    pub fn is_on_disk(&self) -> bool {
        matches!(self.backend, Backend::Disk(_))
    }

    pub fn pool(&self) -> Option<&Arc<StoragePool>> {
        match self.backend {
            Backend::Disk(ref disk) => Some(&disk.pool),
            Backend::Memory(_) => None,
        }
    }

    pub fn cache(&self) -> &Arc<NodeCache> {
        &self.cache
    }

    pub fn loader(&self) -> Box<dyn NodeLoader + '_> {
        match self.backend {
            Backend::Disk(ref disk) => Box::new(PoolCacheLoader {
                pool: disk.pool.clone(),
                cache: self.cache.clone(),
                misses: None,
            }),
            Backend::Memory(_) => Box::new(MemLoader),
        }
    }

    pub fn history_length(&self) -> u64 {
        match self.backend {
            Backend::Memory(ref mem) => mem.history_length,
            Backend::Disk(ref disk) => disk.pool.metadata().history_length,
        }
    }

    /// `(min_valid_version, max_version)`, both `INVALID_VERSION` on an
    /// empty database.
    pub fn window(&self) -> (u64, u64) {
        match self.backend {
            Backend::Memory(ref mem) => (mem.min_valid, mem.max_version),
            Backend::Disk(ref disk) => {
                let meta = disk.pool.metadata();
                (meta.min_valid_version, meta.max_version)
            }
        }
    }

    pub fn max_version(&self) -> u64 {
        self.window().1
    }

    pub(crate) fn min_valid_raw(&self) -> u64 {
        let (min_valid, max) = self.window();
        if max == INVALID_VERSION {
            0
        } else {
            min_valid
        }
    }

    pub fn version_is_valid(&self, version: u64) -> bool {
        match self.backend {
            Backend::Memory(ref mem) => {
                mem.max_version != INVALID_VERSION
                    && version >= mem.min_valid
                    && version <= mem.max_version
                    && mem.roots.contains_key(&version)
            }
            Backend::Disk(ref disk) => disk.pool.metadata().version_is_valid(version),
        }
    }

    /// First valid version of the window, `None` on an empty database.
    pub fn earliest_version(&self) -> Option<u64> {
        match self.backend {
            Backend::Memory(ref mem) => mem.roots.keys().next().copied(),
            Backend::Disk(ref disk) => disk.pool.metadata().earliest_version(),
        }
    }

    /// Bytes currently accounted to chunks, across all lists.
    pub fn disk_usage(&self) -> u64 {
        match self.backend {
            Backend::Memory(_) => 0,
            Backend::Disk(ref disk) => {
                let meta = disk.pool.metadata();
                (0..meta.chunk_count())
                    .map(|c| u64::from(meta.chunk(c).size))
                    .sum()
            }
        }
    }

    /// The root recorded for a version. `Ok(None)` is a version whose trie
    /// is empty; an unknown version is `VersionNoLongerExists`.
    pub fn load_root(&self, version: u64) -> Result<Option<Arc<Node>>, DbError> {
        match self.backend {
            Backend::Memory(ref mem) => match mem.roots.get(&version) {
                Some(root) => Ok(root.clone()),
                None => Err(DbError::VersionNoLongerExists),
            },
            Backend::Disk(ref disk) => {
                let offset = disk
                    .pool
                    .metadata()
                    .root_offset(version)
                    .ok_or(DbError::VersionNoLongerExists)?;
                if !offset.is_valid() {
                    return Ok(None);
                }
                read_node_unsized(&disk.pool, &self.cache, offset).map(Some)
            }
        }
    }

    /// The upsert entry point: runs the trie transformation, compacts,
    /// flushes new nodes onto the streams, records the root and advances
    /// the window. On error the prior root stays committed.
    pub fn do_update(
        &mut self,
        sm: &mut dyn StateMachine,
        prev_root: Option<Arc<Node>>,
        prev_version: u64,
        updates: Vec<Update>,
        version: u64,
        flags: UpsertFlags,
    ) -> Result<Option<Arc<Node>>, DbError> {
        assert!(version != INVALID_VERSION, "invalid upsert version");
        match self.backend {
            Backend::Memory(_) => {
                let ctx = UpsertCtx {
                    loader: &MemLoader,
                    version,
                    min_valid: self.min_valid_raw(),
                };
                let new_root = upsert(&ctx, sm, prev_root, updates)?.map(Arc::new);
                if let Backend::Memory(ref mut mem) = self.backend {
                    if flags.write_root {
                        mem.roots.insert(version, new_root.clone());
                        if mem.max_version == INVALID_VERSION || version > mem.max_version {
                            mem.max_version = version;
                        }
                        let floor = mem.max_version.saturating_sub(mem.history_length - 1);
                        mem.min_valid = if mem.min_valid == INVALID_VERSION {
                            floor
                        } else {
                            mem.min_valid.max(floor)
                        };
                        let min_valid = mem.min_valid;
                        mem.roots.retain(|&v, _| v >= min_valid);
                    }
                }
                Ok(new_root)
            }
            Backend::Disk(_) => self.do_update_on_disk(sm, prev_root, prev_version, updates, version, flags),
        }
    }

    fn do_update_on_disk(
        &mut self,
        sm: &mut dyn StateMachine,
        prev_root: Option<Arc<Node>>,
        prev_version: u64,
        updates: Vec<Update>,
        version: u64,
        flags: UpsertFlags,
    ) -> Result<Option<Arc<Node>>, DbError> {
        let (pool, cache) = match self.backend {
            Backend::Disk(ref disk) => (disk.pool.clone(), self.cache.clone()),
            Backend::Memory(_) => unreachable!(),
        };
        let loader = PoolCacheLoader {
            pool: pool.clone(),
            cache,
            misses: None,
        };
        let ctx = UpsertCtx {
            loader: &loader,
            version,
            min_valid: self.min_valid_raw(),
        };
        let mut new_root = upsert(&ctx, sm, prev_root, updates)?;

        if flags.compaction && !sm.auto_expire() {
            if let Some(ref mut root) = new_root {
                self.compaction_step(&loader, root, version, prev_version)?;
            }
        }

        let root_offset = match new_root {
            Some(ref mut root) => loop {
                match self.flush_subtree(root) {
                    Ok((offset, _)) => break offset,
                    Err(DbError::OutOfChunks) => self.relieve_pressure()?,
                    Err(err) => return Err(err),
                }
            },
            None => ChunkOffset::INVALID,
        };
        let root_arc = new_root.map(Arc::new);

        let disk = match self.backend {
            Backend::Disk(ref mut disk) => disk,
            Backend::Memory(_) => unreachable!(),
        };
        if flags.write_root {
            let mut meta = pool.metadata_mut();
            meta.set_root_offset(version, root_offset);
            if meta.max_version == INVALID_VERSION || version > meta.max_version {
                meta.max_version = version;
            }
            let floor = meta.max_version.saturating_sub(meta.history_length - 1);
            meta.min_valid_version = if meta.min_valid_version == INVALID_VERSION {
                floor
            } else {
                meta.min_valid_version.max(floor)
            };
            meta.mark_window_dirty();
            if let Some(ref root) = root_arc {
                if root_offset.is_valid() {
                    drop(meta);
                    self.cache.insert(root_offset, root.clone());
                }
            }
        }
        Self::reclaim_pending(disk, &self.cache);
        pool.commit_metadata()?;
        trace!(
            target: "triedb",
            "version {} committed, root at {}", version, root_offset
        );
        Ok(root_arc)
    }

    /// Emits the sub-trie post-order: children first, so every reference
    /// written to disk points at an already flushed node.
    fn flush_subtree(&mut self, node: &mut Node) -> Result<(ChunkOffset, u32), DbError> {
        let disk = match self.backend {
            Backend::Disk(ref mut disk) => disk,
            Backend::Memory(_) => unreachable!("flush without a pool"),
        };
        flush_node(disk, &self.cache, node)
    }

    /// The compaction step of one upsert: rewrite every still reachable,
    /// non-expiring node living in the sweep set onto the slow stream. A
    /// swept chunk goes back to the free list once the window passes its
    /// sweep version.
    fn compaction_step(
        &mut self,
        loader: &PoolCacheLoader,
        root: &mut Node,
        version: u64,
        prev_version: u64,
    ) -> Result<(), DbError> {
        let disk = match self.backend {
            Backend::Disk(ref mut disk) => disk,
            Backend::Memory(_) => unreachable!(),
        };
        let mut candidates: HashSet<u32> = HashSet::new();
        let sweep_clock;
        {
            let meta = disk.pool.metadata();
            // Roots committed before this sweep — including ones tagged
            // with later version numbers by a version move — may reference
            // the swept chunks, so the clock starts at the newest version
            // in existence, not just the one being written.
            sweep_clock = if meta.max_version == INVALID_VERSION {
                version
            } else {
                version.max(meta.max_version)
            };
            // Chunks already swept whose sweep predates the root this
            // upsert builds on must restart their clock: the older root may
            // have carried stale references back in.
            for pending in &disk.pending_free {
                if prev_version == INVALID_VERSION || pending.swept_at > prev_version {
                    candidates.insert(pending.chunk);
                }
            }
            // Sweeping the moment the free list runs dry is too late: a
            // swept chunk only frees once the window passes its sweep
            // version, so the pipeline needs a head start.
            let free_low = meta.list_len(ChunkList::Free) <= 2;
            if free_low {
                let writer_chunk = disk.writer_fast.offset();
                for chunk in meta.list_iter(ChunkList::Fast) {
                    let is_writer_chunk =
                        writer_chunk.is_valid() && writer_chunk.id() == chunk;
                    let already_pending =
                        disk.pending_free.iter().any(|p| p.chunk == chunk);
                    if !is_writer_chunk && !already_pending {
                        candidates.insert(chunk);
                        break;
                    }
                }
            }
        }
        if candidates.is_empty() {
            return Ok(());
        }
        debug!(
            target: "compact",
            "sweeping chunks {:?} at version {}", candidates, version
        );
        sweep_node(loader, root, &candidates)?;
        for chunk in candidates {
            match disk.pending_free.iter_mut().find(|p| p.chunk == chunk) {
                // A re-sweep never moves the clock backwards: roots between
                // the two sweep versions may still hold the old references.
                Some(pending) => pending.swept_at = pending.swept_at.max(sweep_clock),
                None => disk.pending_free.push(PendingFree {
                    chunk,
                    swept_at: sweep_clock,
                }),
            }
        }
        Ok(())
    }

    /// Frees swept chunks once every version that could have referenced
    /// them has left the window.
    fn reclaim_pending(disk: &mut DiskState, cache: &NodeCache) -> usize {
        let min_valid = {
            let meta = disk.pool.metadata();
            if meta.max_version == INVALID_VERSION {
                return 0;
            }
            meta.min_valid_version
        };
        let mut freed = 0;
        disk.pending_free.retain(|pending| {
            if min_valid > pending.swept_at {
                debug!(target: "compact", "chunk {} reclaimed", pending.chunk);
                cache.remove_chunk(pending.chunk);
                disk.pool.release_chunk(pending.chunk);
                freed += 1;
                false
            } else {
                true
            }
        });
        freed
    }

    /// Exhaustion fallback: free what compaction has prepared, shortening
    /// the history window down to its minimum if that is what it takes.
    fn relieve_pressure(&mut self) -> Result<(), DbError> {
        let disk = match self.backend {
            Backend::Disk(ref mut disk) => disk,
            Backend::Memory(_) => unreachable!(),
        };
        if Self::reclaim_pending(disk, &self.cache) > 0 {
            return Ok(());
        }
        loop {
            let mut meta = disk.pool.metadata_mut();
            if meta.history_length <= MIN_HISTORY_LENGTH || meta.max_version == INVALID_VERSION {
                return Err(DbError::OutOfChunks);
            }
            meta.history_length -= 1;
            let floor = meta.max_version.saturating_sub(meta.history_length - 1);
            meta.min_valid_version = meta.min_valid_version.max(floor);
            meta.mark_window_dirty();
            warn!(
                target: "compact",
                "free list exhausted, history length shortened to {}",
                meta.history_length
            );
            drop(meta);
            if Self::reclaim_pending(disk, &self.cache) > 0 {
                return Ok(());
            }
        }
    }

    /// Drops every version after `w` and re-seats the fast stream right
    /// after `w`'s root, truncating the fast chunks that followed it.
    /// Rewinding to the latest version is a no-op.
    pub fn rewind_to_version(&mut self, w: u64) -> Result<(), DbError> {
        let disk = match self.backend {
            Backend::Disk(ref mut disk) => disk,
            Backend::Memory(ref mut mem) => {
                assert!(mem.roots.contains_key(&w), "rewind to an invalid version");
                if w == mem.max_version {
                    return Ok(());
                }
                mem.roots.retain(|&v, _| v <= w);
                mem.max_version = w;
                return Ok(());
            }
        };
        let (old_max, root_offset) = {
            let meta = disk.pool.metadata();
            assert!(meta.version_is_valid(w), "rewind to an invalid version");
            (meta.max_version, meta.root_offset(w).expect("checked valid"))
        };
        if w == old_max {
            return Ok(());
        }
        info!(target: "triedb", "rewinding from version {} to {}", old_max, w);
        {
            let mut meta = disk.pool.metadata_mut();
            meta.invalidate_versions_in(w, old_max);
            meta.max_version = w;
            meta.mark_window_dirty();
        }

        if root_offset.is_valid() {
            let root = read_node_unsized(&disk.pool, &self.cache, root_offset)?;
            let end = root_offset
                .add_to_offset(root.encoded_len() as u32)
                .map(|o| o.round_up_align(triedb_pool::DISK_PAGE_BITS).offset())
                .unwrap_or_else(|| disk.pool.chunk_capacity());
            let root_chunk = root_offset.id();
            let trailing: Vec<u32> = {
                let meta = disk.pool.metadata();
                meta.list_iter(ChunkList::Fast)
                    .skip_while(|&c| c != root_chunk)
                    .skip(1)
                    .collect()
            };
            for chunk in trailing {
                self.cache.remove_chunk(chunk);
                disk.pool.release_chunk(chunk);
                disk.pending_free.retain(|p| p.chunk != chunk);
            }
            self.cache.remove_chunk(root_chunk);
            self.cache.insert(root_offset, root);
            disk.pool.metadata_mut().set_chunk_size(root_chunk, end);
            disk.writer_fast.set_position(root_chunk, end);
        } else {
            // Rewound to a version whose trie is empty: the whole fast
            // stream after it is garbage.
            let fast: Vec<u32> = disk.pool.metadata().list_iter(ChunkList::Fast).collect();
            for chunk in fast {
                self.cache.remove_chunk(chunk);
                disk.pool.release_chunk(chunk);
                disk.pending_free.retain(|p| p.chunk != chunk);
            }
            disk.writer_fast = NodeWriter::restore(&disk.pool, ChunkList::Fast);
        }
        disk.pool.commit_metadata()?;
        Ok(())
    }

    /// Copies the root recorded at `src` to `dst` (`dst > src`), retires
    /// `src` and every version between, and slides the window up to `dst`.
    /// The surviving set of valid versions may come out discontiguous.
    pub fn move_trie_version_forward(&mut self, src: u64, dst: u64) -> Result<(), DbError> {
        assert!(dst > src, "version moves only go forward");
        match self.backend {
            Backend::Memory(ref mut mem) => {
                let root = mem
                    .roots
                    .get(&src)
                    .cloned()
                    .unwrap_or_else(|| panic!("moving an invalid version {}", src));
                mem.roots.remove(&src);
                mem.roots.insert(dst, root);
                mem.max_version = dst;
                let floor = dst.saturating_sub(mem.history_length - 1);
                mem.min_valid = mem.min_valid.max(floor);
                let min_valid = mem.min_valid;
                mem.roots.retain(|&v, _| v >= min_valid);
                Ok(())
            }
            Backend::Disk(ref mut disk) => {
                {
                    let mut meta = disk.pool.metadata_mut();
                    assert!(meta.version_is_valid(src), "moving an invalid version");
                    let offset = meta.slot(src).offset;
                    meta.set_root_offset(dst, offset);
                    meta.invalidate_slot(src);
                    meta.max_version = dst;
                    let floor = dst.saturating_sub(meta.history_length - 1);
                    meta.min_valid_version = meta.min_valid_version.max(floor);
                    meta.mark_window_dirty();
                }
                Self::reclaim_pending(disk, &self.cache);
                disk.pool.commit_metadata()?;
                Ok(())
            }
        }
    }

    /// Current fast stream position, for diagnostics and tests.
    pub fn fast_offset(&self) -> ChunkOffset {
        match self.backend {
            Backend::Disk(ref disk) => disk.writer_fast.offset(),
            Backend::Memory(_) => ChunkOffset::INVALID,
        }
    }

    /// Current slow stream position.
    pub fn slow_offset(&self) -> ChunkOffset {
        match self.backend {
            Backend::Disk(ref disk) => disk.writer_slow.offset(),
            Backend::Memory(_) => ChunkOffset::INVALID,
        }
    }
}

fn flush_node(
    disk: &mut DiskState,
    cache: &NodeCache,
    node: &mut Node,
) -> Result<(ChunkOffset, u32), DbError> {
    // Collect branches first: the borrow of the children iterator cannot
    // overlap the writer calls.
    let dirty: Vec<u8> = node
        .children()
        .filter(|(_, entry)| !entry.is_flushed())
        .map(|(branch, _)| branch)
        .collect();
    for branch in dirty {
        let entry = node.child_mut(branch).expect("branch collected above");
        let arc = entry.node.as_mut().expect("unflushed children stay in memory");
        let child = Arc::get_mut(arc).expect("new nodes are uniquely owned until flushed");
        let (offset, disk_size) = flush_node(disk, cache, child)?;
        let keep = child.keep_cached;
        entry.offset = offset;
        entry.disk_size = disk_size;
        if keep {
            cache.insert(offset, arc.clone());
        } else {
            entry.node = None;
        }
    }
    let bytes = node.encode();
    let writer = if node.write_slow {
        &mut disk.writer_slow
    } else {
        &mut disk.writer_fast
    };
    let offset = writer.append(&disk.pool, &bytes)?;
    Ok((offset, bytes.len() as u32))
}

/// Depth-first rewrite pass: loads reachable nodes, converts those living
/// in the sweep set into in-memory children destined for the slow stream,
/// and reports whether anything below changed.
fn sweep_node(
    loader: &PoolCacheLoader,
    node: &mut Node,
    candidates: &HashSet<u32>,
) -> Result<bool, DbError> {
    let mut any = false;
    let branches: Vec<u8> = node.children().map(|(b, _)| b).collect();
    for branch in branches {
        let entry = node.child_mut(branch).expect("branch collected above");
        if entry.subtrie_min_version != NO_EXPIRY {
            // Auto-expiring sub-tries are never rewritten; their storage
            // dies with the window.
            continue;
        }
        match entry.node {
            Some(ref mut arc) => {
                let child = Arc::make_mut(arc);
                let below = sweep_node(loader, child, candidates)?;
                let resident = entry.offset.is_valid() && candidates.contains(&entry.offset.id());
                if below || resident {
                    if entry.offset.is_valid() {
                        Arc::make_mut(entry.node.as_mut().expect("checked above")).write_slow =
                            true;
                        entry.offset = ChunkOffset::INVALID;
                    }
                    any = true;
                }
            }
            None => {
                let loaded = loader.load(entry.offset, entry.disk_size)?;
                let mut child = (*loaded).clone();
                let below = sweep_node(loader, &mut child, candidates)?;
                let resident = candidates.contains(&entry.offset.id());
                if below || resident {
                    child.write_slow = true;
                    entry.node = Some(Arc::new(child));
                    entry.offset = ChunkOffset::INVALID;
                    any = true;
                }
            }
        }
    }
    Ok(any)
}

/// Reads a node whose length nobody recorded, growing the read until the
/// self-delimited encoding resolves. Used for roots, which are addressed by
/// the ring without a size.
pub(crate) fn read_node_unsized(
    pool: &Arc<StoragePool>,
    cache: &NodeCache,
    offset: ChunkOffset,
) -> Result<Arc<Node>, DbError> {
    if let Some(node) = cache.get(offset) {
        return Ok(node);
    }
    let available = (pool.chunk_capacity() - offset.offset()) as usize;
    let mut len = (DISK_PAGE_SIZE as usize).min(available);
    let mut buf = pool.read(offset, len)?;
    loop {
        match Node::required_len(&buf) {
            Ok(required) if required <= buf.len() => {
                let node =
                    Arc::new(Node::decode(&buf[..required]).map_err(|_| DbError::BadNode)?);
                cache.insert(offset, node.clone());
                return Ok(node);
            }
            Ok(required) if required <= available => {
                buf = pool.read(offset, required)?;
            }
            Ok(_) => return Err(DbError::BadNode),
            Err(_) if len < available => {
                len = (len * 2).min(available);
                buf = pool.read(offset, len)?;
            }
            Err(_) => return Err(DbError::BadNode),
        }
    }
}
