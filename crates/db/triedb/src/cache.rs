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

//! Byte-budgeted cache of decoded nodes, keyed by their on-disk address,
//! with single-flight deduplication of concurrent loads.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use lru_cache::LruCache;
use parking_lot::Mutex;
use triedb_io::AsyncIo;
use triedb_pool::ChunkOffset;

use crate::error::DbError;
use crate::node::Node;

/// Ballpark figure for sizing cache budgets in "number of nodes" terms.
pub const AVERAGE_NODE_SIZE: usize = 512;

/// Completion of a load, invoked on the reactor thread.
pub type LoadCallback = Box<dyn FnOnce(&AsyncIo, Result<Arc<Node>, DbError>) + Send>;

/// Outcome of [`NodeCache::begin_load`].
pub enum BeginLoad {
    /// The node was resident; the callback comes back to the caller, which
    /// continues inline.
    Hit(Arc<Node>, LoadCallback),
    /// A load of the same offset is in flight; the callback was appended to
    /// its notify list.
    Coalesced,
    /// The caller must schedule the read and call
    /// [`NodeCache::complete_load`] when it finishes.
    Started,
}

struct Entry {
    node: Arc<Node>,
    size: usize,
}

struct Inner {
    lru: LruCache<ChunkOffset, Entry>,
    mem: usize,
    max_mem: usize,
    pending: HashMap<ChunkOffset, Vec<LoadCallback>>,
    hits: u64,
    misses: u64,
}

/// Concurrent LRU of decoded nodes. Capacity is in bytes of approximate
/// resident size; eviction is lazy and keeps the total within ten percent
/// over budget.
pub struct NodeCache {
    inner: Mutex<Inner>,
}

impl NodeCache {
    pub fn new(max_mem: usize) -> NodeCache {
        NodeCache {
            inner: Mutex::new(Inner {
                lru: LruCache::new(usize::MAX),
                mem: 0,
                max_mem,
                pending: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn get(&self, offset: ChunkOffset) -> Option<Arc<Node>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.lru.get_mut(&offset) {
            Some(entry) => {
                inner.hits += 1;
                Some(entry.node.clone())
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn insert(&self, offset: ChunkOffset, node: Arc<Node>) {
        debug_assert!(offset.is_valid());
        let size = node.approx_mem_size();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(old) = inner.lru.insert(offset, Entry { node, size }) {
            inner.mem -= old.size;
        }
        inner.mem += size;
        let headroom = inner.max_mem + inner.max_mem / 10;
        while inner.mem > headroom {
            match inner.lru.remove_lru() {
                Some((_, evicted)) => inner.mem -= evicted.size,
                None => break,
            }
        }
    }

    /// Drops every resident entry of a chunk. Called when a chunk returns
    /// to the free list, so stale decodings can never be served once the
    /// chunk is rewritten.
    pub fn remove_chunk(&self, chunk: u32) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let victims: Vec<ChunkOffset> = inner
            .lru
            .iter()
            .map(|(offset, _)| *offset)
            .filter(|offset| offset.id() == chunk)
            .collect();
        for offset in victims {
            if let Some(entry) = inner.lru.remove(&offset) {
                inner.mem -= entry.size;
            }
        }
    }

    /// Drops a resident entry, e.g. after its chunk was reclaimed.
    pub fn remove(&self, offset: ChunkOffset) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(entry) = inner.lru.remove(&offset) {
            inner.mem -= entry.size;
        }
    }

    /// Looks the offset up; on a miss either joins an in-flight load or
    /// tells the caller to start one.
    pub fn begin_load(&self, offset: ChunkOffset, cb: LoadCallback) -> BeginLoad {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(entry) = inner.lru.get_mut(&offset) {
            inner.hits += 1;
            return BeginLoad::Hit(entry.node.clone(), cb);
        }
        inner.misses += 1;
        match inner.pending.get_mut(&offset) {
            Some(waiters) => {
                waiters.push(cb);
                BeginLoad::Coalesced
            }
            None => {
                inner.pending.insert(offset, vec![cb]);
                BeginLoad::Started
            }
        }
    }

    /// Delivers a finished load to every waiter, inserting the node on
    /// success. Runs the callbacks on the calling (reactor) thread.
    pub fn complete_load(
        &self,
        io: &AsyncIo,
        offset: ChunkOffset,
        result: Result<Arc<Node>, DbError>,
    ) {
        let waiters = {
            let mut inner = self.inner.lock();
            inner.pending.remove(&offset).unwrap_or_default()
        };
        if let Ok(ref node) = result {
            self.insert(offset, node.clone());
        }
        for cb in waiters {
            cb(io, clone_result(&result));
        }
    }

    pub fn mem_used(&self) -> usize {
        self.inner.lock().mem
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` counters.
    pub fn stats(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.hits, inner.misses)
    }
}

// Load results fan out to every coalesced waiter; errors reconstruct since
// `io::Error` does not clone.
fn clone_result(result: &Result<Arc<Node>, DbError>) -> Result<Arc<Node>, DbError> {
    match result {
        Ok(node) => Ok(node.clone()),
        Err(DbError::VersionNoLongerExists) => Err(DbError::VersionNoLongerExists),
        Err(DbError::KeyMismatch) => Err(DbError::KeyMismatch),
        Err(DbError::BadNode) => Err(DbError::BadNode),
        Err(DbError::OutOfChunks) => Err(DbError::OutOfChunks),
        Err(DbError::Io(err)) => Err(DbError::Io(io::Error::new(err.kind(), err.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nibbles::Nibbles;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use triedb_io::IoConfig;
    use triedb_pool::{Options, StoragePool};

    fn node_with_value(len: usize) -> Arc<Node> {
        Arc::new(Node::leaf(Nibbles::new(), vec![0xab; len], 0))
    }

    fn test_io() -> AsyncIo {
        let pool = StoragePool::anonymous(
            1,
            Options {
                chunk_capacity_log2: 16,
                ..Options::default()
            },
        )
        .unwrap();
        AsyncIo::new(Arc::new(pool), IoConfig::default())
    }

    #[test]
    fn insert_get_and_byte_accounting() {
        let cache = NodeCache::new(10_000);
        let offset = ChunkOffset::new(0, 0);
        let node = node_with_value(100);
        cache.insert(offset, node.clone());
        assert!(cache.get(offset).is_some());
        assert_eq!(cache.mem_used(), node.approx_mem_size());

        // Replacing the same offset must not double count.
        cache.insert(offset, node.clone());
        assert_eq!(cache.mem_used(), node.approx_mem_size());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn eviction_keeps_memory_within_headroom() {
        let budget = 4096;
        let cache = NodeCache::new(budget);
        for i in 0..64 {
            cache.insert(ChunkOffset::new(0, i * 4096), node_with_value(400));
        }
        assert!(cache.mem_used() <= budget + budget / 10);
        assert!(cache.len() < 64);
        // The most recently inserted entry survives.
        assert!(cache.get(ChunkOffset::new(0, 63 * 4096)).is_some());
    }

    #[test]
    fn coalesced_loads_share_one_flight() {
        let cache = NodeCache::new(10_000);
        let io = test_io();
        let offset = ChunkOffset::new(0, 8192);
        let delivered = Arc::new(AtomicUsize::new(0));

        let cb = |delivered: &Arc<AtomicUsize>| -> LoadCallback {
            let delivered = delivered.clone();
            Box::new(move |_io, res| {
                assert!(res.is_ok());
                delivered.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert!(matches!(cache.begin_load(offset, cb(&delivered)), BeginLoad::Started));
        assert!(matches!(cache.begin_load(offset, cb(&delivered)), BeginLoad::Coalesced));
        assert!(matches!(cache.begin_load(offset, cb(&delivered)), BeginLoad::Coalesced));

        cache.complete_load(&io, offset, Ok(node_with_value(10)));
        assert_eq!(delivered.load(Ordering::SeqCst), 3);

        // Now resident: no further flights; the callback comes back.
        assert!(matches!(
            cache.begin_load(offset, Box::new(|_, _| {})),
            BeginLoad::Hit(_, _)
        ));
    }

    #[test]
    fn failed_load_notifies_all_waiters_without_caching() {
        let cache = NodeCache::new(10_000);
        let io = test_io();
        let offset = ChunkOffset::new(0, 4096);
        let errors = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let errors = errors.clone();
            let cb: LoadCallback = Box::new(move |_io, res| {
                assert!(matches!(res, Err(DbError::BadNode)));
                errors.fetch_add(1, Ordering::SeqCst);
            });
            let _ = cache.begin_load(offset, cb);
        }
        cache.complete_load(&io, offset, Err(DbError::BadNode));
        assert_eq!(errors.load(Ordering::SeqCst), 2);
        assert!(cache.get(offset).is_none());
    }

    #[test]
    fn dropped_cache_drops_pending_waiters_quietly() {
        let cache = NodeCache::new(1000);
        let _ = cache.begin_load(
            ChunkOffset::new(0, 0),
            Box::new(|_, _| panic!("waiter of an abandoned load ran")),
        );
        drop(cache);
    }
}
