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

//! Database facades.
//!
//! [`Db`] is the single writer: it owns the update coordinator, a reactor
//! and an optional worker pool, and keeps the current in-memory root.
//! [`ReadOnlyDb`] opens the same pool read-only on its own reactor and
//! observes the writer's progress through the metadata double buffer, so a
//! follower sees versions appear (and expire) while the writer runs.

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use ethereum_types::H256;
use parity_bytes::Bytes;
use parking_lot::Mutex;
use triedb_io::{AsyncIo, IoConfig, WorkerContext, WorkerPool};
use triedb_pool::{
    ChunkOffset, Mode, Options, StoragePool, INVALID_VERSION, MAX_HISTORY_LENGTH,
    MIN_HISTORY_LENGTH,
};

use crate::aux::{read_node_unsized, PoolCacheLoader, UpdateAux, UpsertFlags};
use crate::cache::NodeCache;
use crate::compute::finalize_root;
use crate::error::DbError;
use crate::node::{Node, INVALID_BRANCH};
use crate::state_machine::StateMachine;
use crate::traverse::{traverse_blocking, walk, TraverseMachine};
use crate::trie::{
    bytes_to_nibbles, child_expired, find_async, find_blocking, resolve_child, FindResult,
    NodeLoader,
};
use crate::update::{make_graft, Update};

/// Read-write database configuration.
#[derive(Clone, Debug)]
pub struct DbConfig {
    /// Backing files or block devices; empty means an anonymous temporary
    /// pool.
    pub dbname_paths: Vec<PathBuf>,
    /// Open an existing pool instead of initializing a fresh one.
    pub append: bool,
    /// Run compaction as part of every upsert.
    pub compaction: bool,
    /// log2 of the chunk capacity; 28 is the 256 MiB default.
    pub chunk_capacity_log2: u8,
    /// Retention window; on reopen this overrides the stored length.
    pub fixed_history_length: Option<u64>,
    /// Node cache budget in bytes.
    pub node_cache_mem: usize,
    /// Worker threads for parallel traversal; zero disables the pool.
    pub worker_threads: usize,
    /// Chunk count of an anonymous pool.
    pub anonymous_chunks: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            dbname_paths: Vec::new(),
            append: false,
            compaction: false,
            chunk_capacity_log2: 28,
            fixed_history_length: None,
            node_cache_mem: 64 * 1024 * 1024,
            worker_threads: 0,
            anonymous_chunks: 16,
        }
    }
}

/// Read-only database configuration.
#[derive(Clone, Debug)]
pub struct ReadOnlyDbConfig {
    pub dbname_paths: Vec<PathBuf>,
    /// Node cache budget in bytes.
    pub node_lru_max_mem: usize,
    /// Worker threads for parallel traversal; zero disables the pool.
    pub worker_threads: usize,
}

impl Default for ReadOnlyDbConfig {
    fn default() -> Self {
        ReadOnlyDbConfig {
            dbname_paths: Vec::new(),
            node_lru_max_mem: 8 * 1024 * 1024,
            worker_threads: 0,
        }
    }
}

/// The read-write database handle. One per pool, confined to its thread.
pub struct Db {
    sm: Box<dyn StateMachine>,
    aux: UpdateAux,
    io: Option<AsyncIo>,
    workers: Option<WorkerPool>,
    root: Option<Arc<Node>>,
    root_version: u64,
    compaction: bool,
    writer_thread: ThreadId,
}

impl Db {
    /// A database with no disk behind it; versions are retained in memory.
    pub fn new_in_memory(sm: Box<dyn StateMachine>, history_length: u64) -> Db {
        let cache = Arc::new(NodeCache::new(0));
        Db {
            sm,
            aux: UpdateAux::new_in_memory(history_length, cache),
            io: None,
            workers: None,
            root: None,
            root_version: INVALID_VERSION,
            compaction: false,
            writer_thread: thread::current().id(),
        }
    }

    /// Creates or reopens an on-disk database. Backing files must already
    /// exist at their final size.
    pub fn open(sm: Box<dyn StateMachine>, config: DbConfig) -> Result<Db, DbError> {
        let options = Options {
            chunk_capacity_log2: config.chunk_capacity_log2,
            read_only: false,
            history_length: config
                .fixed_history_length
                .unwrap_or(1000)
                .clamp(MIN_HISTORY_LENGTH, MAX_HISTORY_LENGTH),
        };
        let pool = if config.dbname_paths.is_empty() {
            StoragePool::anonymous(config.anonymous_chunks, options)?
        } else {
            let mode = if config.append {
                Mode::OpenExisting
            } else {
                Mode::Truncate
            };
            StoragePool::open(&config.dbname_paths, mode, options)?
        };
        let pool = Arc::new(pool);
        let cache = Arc::new(NodeCache::new(config.node_cache_mem));
        let history_override = if config.append {
            config.fixed_history_length
        } else {
            None
        };
        let aux = UpdateAux::new(pool.clone(), cache, history_override)?;
        let io = AsyncIo::new(pool.clone(), IoConfig::default());
        let workers = if config.worker_threads > 0 {
            Some(WorkerPool::new(pool, config.worker_threads, 64))
        } else {
            None
        };
        let mut db = Db {
            sm,
            aux,
            io: Some(io),
            workers,
            root: None,
            root_version: INVALID_VERSION,
            compaction: config.compaction,
            writer_thread: thread::current().id(),
        };
        let latest = db.aux.max_version();
        if latest != INVALID_VERSION {
            db.load_root_for_version(latest)?;
        }
        Ok(db)
    }

    /// The current in-memory root, which may not yet be committed.
    pub fn root(&self) -> Option<Arc<Node>> {
        self.root.clone()
    }

    /// The 32-byte digest authenticating the current root.
    pub fn root_hash(&self) -> H256 {
        finalize_root(self.root.as_ref().map(|r| &r.data))
    }

    pub fn get_history_length(&self) -> u64 {
        self.aux.history_length()
    }

    pub fn get_latest_version(&self) -> Option<u64> {
        let max = self.aux.max_version();
        if max == INVALID_VERSION {
            None
        } else {
            Some(max)
        }
    }

    pub fn get_earliest_version(&self) -> Option<u64> {
        self.aux.earliest_version()
    }

    pub fn version_is_valid(&self, version: u64) -> bool {
        self.aux.version_is_valid(version)
    }

    /// Applies a batch at `version` on top of the current in-memory root.
    pub fn upsert(&mut self, updates: Vec<Update>, version: u64) -> Result<(), DbError> {
        let compaction = self.compaction;
        self.upsert_opt(
            updates,
            version,
            UpsertFlags {
                compaction,
                write_root: true,
            },
        )
    }

    /// `upsert` with explicit compaction and root-commit switches.
    pub fn upsert_opt(
        &mut self,
        updates: Vec<Update>,
        version: u64,
        flags: UpsertFlags,
    ) -> Result<(), DbError> {
        assert_eq!(
            thread::current().id(),
            self.writer_thread,
            "upsert from a thread that does not own the writer"
        );
        let prev = self.root.clone();
        let new_root =
            self.aux
                .do_update(self.sm.as_mut(), prev, self.root_version, updates, version, flags)?;
        self.root = new_root;
        self.root_version = version;
        Ok(())
    }

    fn root_for(&self, version: u64) -> Result<Option<Arc<Node>>, DbError> {
        if version == self.root_version {
            return Ok(self.root.clone());
        }
        self.aux.load_root(version)
    }

    /// Re-seats the in-memory root on a historical version, so following
    /// upserts build on it.
    pub fn load_root_for_version(&mut self, version: u64) -> Result<(), DbError> {
        let root = self.aux.load_root(version)?;
        self.root = root;
        self.root_version = version;
        Ok(())
    }

    /// Resolves `key` at `version` to its node.
    pub fn find(&self, key: &[u8], version: u64) -> Result<Arc<Node>, DbError> {
        let root = self.root_for(version)?.ok_or(DbError::KeyMismatch)?;
        let loader = self.aux.loader();
        match find_blocking(&*loader, self.aux.min_valid_raw(), &root, key)? {
            FindResult::Found(node) => Ok(node),
            FindResult::Mismatch => Err(DbError::KeyMismatch),
        }
    }

    /// The value stored at `key`, exactly as last upserted before
    /// `version`.
    pub fn get(&self, key: &[u8], version: u64) -> Result<Bytes, DbError> {
        let node = self.find(key, version)?;
        node.value.clone().ok_or(DbError::KeyMismatch)
    }

    /// The digest stored at the node `prefix` resolves to.
    pub fn get_data(&self, prefix: &[u8], version: u64) -> Result<Bytes, DbError> {
        let node = self.find(prefix, version)?;
        Ok(node.data.as_slice().to_vec())
    }

    /// Strictly ordered depth-first traversal on the calling thread.
    pub fn traverse_blocking(
        &self,
        machine: &mut dyn TraverseMachine,
        version: u64,
    ) -> Result<(), DbError> {
        let root = match self.root_for(version)? {
            Some(root) => root,
            None => return Ok(()),
        };
        let loader = self.aux.loader();
        let result = traverse_blocking(&*loader, self.aux.min_valid_raw(), &root, machine);
        self.map_expiry(result, version)
    }

    /// Traversal that fans sub-tries out to the worker pool when one is
    /// attached; machine clones run concurrently, sharing state however the
    /// machine chooses.
    pub fn traverse(
        &self,
        machine: &mut dyn TraverseMachine,
        version: u64,
    ) -> Result<(), DbError> {
        let (io, workers, pool) = match (&self.io, &self.workers, self.aux.pool()) {
            (Some(io), Some(workers), Some(pool)) => (io, workers, pool),
            _ => return self.traverse_blocking(machine, version),
        };
        let root = match self.root_for(version)? {
            Some(root) => root,
            None => return Ok(()),
        };
        let result = traverse_parallel(
            io,
            workers,
            pool,
            self.aux.cache(),
            self.aux.min_valid_raw(),
            &root,
            machine,
            None,
        );
        self.map_expiry(result, version)
    }

    /// Walks every reachable node at `version`, warming the cache. Returns
    /// how many nodes came off disk; a second call returns zero.
    pub fn load_all(&self, version: u64) -> Result<usize, DbError> {
        let root = match self.root_for(version)? {
            Some(root) => root,
            None => return Ok(0),
        };
        let misses = Arc::new(AtomicUsize::new(0));
        let mut machine = NullMachine;
        match (&self.io, &self.workers, self.aux.pool()) {
            (Some(io), Some(workers), Some(pool)) => {
                traverse_parallel(
                    io,
                    workers,
                    pool,
                    self.aux.cache(),
                    self.aux.min_valid_raw(),
                    &root,
                    &mut machine,
                    Some(misses.clone()),
                )?;
            }
            _ => match self.aux.pool() {
                Some(pool) => {
                    let loader = PoolCacheLoader {
                        pool: pool.clone(),
                        cache: self.aux.cache().clone(),
                        misses: Some(misses.clone()),
                    };
                    walk(&loader, self.aux.min_valid_raw(), &root, INVALID_BRANCH, &mut machine)?;
                }
                None => {
                    let loader = self.aux.loader();
                    walk(&*loader, self.aux.min_valid_raw(), &root, INVALID_BRANCH, &mut machine)?;
                }
            },
        }
        Ok(misses.load(AtomicOrdering::Relaxed))
    }

    /// Structurally copies the sub-trie at `(src_version, src_prefix)` to
    /// `(dst_version, dst_prefix)`. Child offsets are reused; nothing is
    /// re-encoded for unchanged sub-tries. An existing destination sub-trie
    /// is replaced. When `dst_version` does not exist yet the new root
    /// stays uncommitted until an upsert at that version commits it.
    pub fn copy_trie(
        &mut self,
        src_version: u64,
        src_prefix: &[u8],
        dst_version: u64,
        dst_prefix: &[u8],
    ) -> Result<(), DbError> {
        assert!(dst_version >= src_version, "copy_trie goes forward in time");
        let src_root = self.root_for(src_version)?.ok_or(DbError::KeyMismatch)?;
        let src_node = {
            let loader = self.aux.loader();
            match find_blocking(&*loader, self.aux.min_valid_raw(), &src_root, src_prefix)? {
                FindResult::Found(node) => node,
                FindResult::Mismatch => return Err(DbError::KeyMismatch),
            }
        };
        let base = if dst_version == self.root_version {
            self.root.clone()
        } else if self.aux.version_is_valid(dst_version) {
            self.aux.load_root(dst_version)?
        } else {
            // Fresh destination version: snapshot the source and layer the
            // copy over it.
            Some(src_root)
        };
        let write_root = !self.aux.is_on_disk() || self.aux.version_is_valid(dst_version);
        let update = make_graft(dst_prefix, src_node);
        let new_root = self.aux.do_update(
            self.sm.as_mut(),
            base,
            self.root_version,
            vec![update],
            dst_version,
            UpsertFlags {
                compaction: false,
                write_root,
            },
        )?;
        self.root = new_root;
        self.root_version = dst_version;
        Ok(())
    }

    /// Re-tags the trie at `src` as version `dst`, invalidating everything
    /// in between; the valid set may come out discontiguous.
    pub fn move_trie_version_forward(&mut self, src: u64, dst: u64) -> Result<(), DbError> {
        self.aux.move_trie_version_forward(src, dst)?;
        if self.root_version == src {
            self.root_version = dst;
        }
        Ok(())
    }

    /// Drops every version after `w`; see
    /// [`UpdateAux::rewind_to_version`].
    pub fn rewind_to_version(&mut self, w: u64) -> Result<(), DbError> {
        self.aux.rewind_to_version(w)?;
        self.load_root_for_version(w)
    }

    /// Advances this handle's reactor.
    pub fn poll(&self, block: bool) -> usize {
        self.io.as_ref().map_or(0, |io| io.poll(block))
    }

    /// The coordinator, for inspection by tests and tools.
    pub fn aux(&self) -> &UpdateAux {
        &self.aux
    }

    fn map_expiry(&self, result: Result<(), DbError>, version: u64) -> Result<(), DbError> {
        match result {
            Err(err) if version != self.root_version && !self.aux.version_is_valid(version) => {
                trace!(target: "triedb", "traversal lost version {}: {}", version, err);
                Err(DbError::VersionNoLongerExists)
            }
            other => other,
        }
    }
}

/// A follower handle over the same pool, read-only, on its own reactor.
pub struct ReadOnlyDb {
    pool: Arc<StoragePool>,
    cache: Arc<NodeCache>,
    io: Rc<AsyncIo>,
    workers: Option<WorkerPool>,
}

impl ReadOnlyDb {
    pub fn open(config: ReadOnlyDbConfig) -> Result<ReadOnlyDb, DbError> {
        let pool = Self::open_pool(&config)?;
        let io = Rc::new(AsyncIo::new(pool.clone(), IoConfig::default()));
        Self::with_reactor(pool, config, io)
    }

    /// Opens a follower sharing an existing reactor; several read-only
    /// handles over the same database can poll one event loop.
    pub fn open_shared(config: ReadOnlyDbConfig, io: Rc<AsyncIo>) -> Result<ReadOnlyDb, DbError> {
        let pool = Self::open_pool(&config)?;
        Self::with_reactor(pool, config, io)
    }

    fn open_pool(config: &ReadOnlyDbConfig) -> Result<Arc<StoragePool>, DbError> {
        assert!(
            !config.dbname_paths.is_empty(),
            "a read-only database needs backing paths"
        );
        let pool = StoragePool::open(
            &config.dbname_paths,
            Mode::OpenExisting,
            Options {
                read_only: true,
                ..Options::default()
            },
        )?;
        Ok(Arc::new(pool))
    }

    fn with_reactor(
        pool: Arc<StoragePool>,
        config: ReadOnlyDbConfig,
        io: Rc<AsyncIo>,
    ) -> Result<ReadOnlyDb, DbError> {
        let workers = if config.worker_threads > 0 {
            Some(WorkerPool::new(pool.clone(), config.worker_threads, 64))
        } else {
            None
        };
        Ok(ReadOnlyDb {
            cache: Arc::new(NodeCache::new(config.node_lru_max_mem)),
            pool,
            io,
            workers,
        })
    }

    pub fn get_history_length(&self) -> Result<u64, DbError> {
        Ok(self.pool.meta_snapshot()?.history_length)
    }

    /// Latest version at this instant; a concurrent writer makes this a
    /// moving target that only ever grows.
    pub fn get_latest_version(&self) -> Result<Option<u64>, DbError> {
        let snap = self.pool.meta_snapshot()?;
        if snap.max_version == INVALID_VERSION {
            Ok(None)
        } else {
            Ok(Some(snap.max_version))
        }
    }

    pub fn get_earliest_version(&self) -> Result<Option<u64>, DbError> {
        Ok(self.pool.read_earliest_version()?)
    }

    fn min_valid(&self) -> Result<u64, DbError> {
        let snap = self.pool.meta_snapshot()?;
        if snap.max_version == INVALID_VERSION {
            Ok(0)
        } else {
            Ok(snap.min_valid_version)
        }
    }

    /// The root node of `version` as currently observable, `Ok(None)` for
    /// a committed empty trie.
    pub fn load_root_for_version(&self, version: u64) -> Result<Option<Arc<Node>>, DbError> {
        let offset = self
            .pool
            .read_root_offset(version)?
            .ok_or(DbError::VersionNoLongerExists)?;
        if !offset.is_valid() {
            return Ok(None);
        }
        read_node_unsized(&self.pool, &self.cache, offset).map(Some)
    }

    /// Resolves `key` at `version`, suspending on the reactor for every
    /// node read; identical concurrent lookups share one read in flight.
    pub fn find(&self, key: &[u8], version: u64) -> Result<Arc<Node>, DbError> {
        let root = self
            .load_root_for_version(version)?
            .ok_or(DbError::KeyMismatch)?;
        let min_valid = self.min_valid()?;
        let outcome: Arc<Mutex<Option<Result<FindResult, DbError>>>> = Arc::new(Mutex::new(None));
        let delivery = outcome.clone();
        find_async(
            &self.io,
            self.cache.clone(),
            min_valid,
            root,
            Arc::new(bytes_to_nibbles(key)),
            0,
            Box::new(move |_io, result| {
                *delivery.lock() = Some(result);
            }),
        );
        let result = loop {
            if let Some(result) = outcome.lock().take() {
                break result;
            }
            self.io.poll(true);
        };
        match result? {
            FindResult::Found(node) => Ok(node),
            FindResult::Mismatch => Err(DbError::KeyMismatch),
        }
    }

    pub fn get(&self, key: &[u8], version: u64) -> Result<Bytes, DbError> {
        let node = self.find(key, version)?;
        node.value.clone().ok_or(DbError::KeyMismatch)
    }

    pub fn get_data(&self, prefix: &[u8], version: u64) -> Result<Bytes, DbError> {
        let node = self.find(prefix, version)?;
        Ok(node.data.as_slice().to_vec())
    }

    /// Non-blocking `get`: the callback runs on this handle's reactor
    /// during a later `poll`. A burst of lookups for the same key issues
    /// each node read at most once; the rest coalesce.
    pub fn get_async(
        &self,
        key: &[u8],
        version: u64,
        cb: Box<dyn FnOnce(Result<Bytes, DbError>) + Send>,
    ) {
        let root = match self.load_root_for_version(version) {
            Ok(Some(root)) => root,
            Ok(None) => return cb(Err(DbError::KeyMismatch)),
            Err(err) => return cb(Err(err)),
        };
        let min_valid = match self.min_valid() {
            Ok(min_valid) => min_valid,
            Err(err) => return cb(Err(err)),
        };
        find_async(
            &self.io,
            self.cache.clone(),
            min_valid,
            root,
            Arc::new(bytes_to_nibbles(key)),
            0,
            Box::new(move |_io, result| {
                cb(result.and_then(|outcome| match outcome {
                    FindResult::Found(node) => {
                        node.value.clone().ok_or(DbError::KeyMismatch)
                    }
                    FindResult::Mismatch => Err(DbError::KeyMismatch),
                }))
            }),
        );
    }

    /// Depth-first traversal; fails with `VersionNoLongerExists` when the
    /// version is reclaimed while the walk is under way.
    pub fn traverse_blocking(
        &self,
        machine: &mut dyn TraverseMachine,
        version: u64,
    ) -> Result<(), DbError> {
        let root = match self.load_root_for_version(version)? {
            Some(root) => root,
            None => return Ok(()),
        };
        let loader = PoolCacheLoader {
            pool: self.pool.clone(),
            cache: self.cache.clone(),
            misses: None,
        };
        let result = traverse_blocking(&loader, self.min_valid()?, &root, machine);
        self.map_expiry(result, version)
    }

    /// Traversal with sub-tries fanned out to the worker pool when one is
    /// attached.
    pub fn traverse(
        &self,
        machine: &mut dyn TraverseMachine,
        version: u64,
    ) -> Result<(), DbError> {
        let workers = match self.workers {
            Some(ref workers) => workers,
            None => return self.traverse_blocking(machine, version),
        };
        let root = match self.load_root_for_version(version)? {
            Some(root) => root,
            None => return Ok(()),
        };
        let result = traverse_parallel(
            &self.io,
            workers,
            &self.pool,
            &self.cache,
            self.min_valid()?,
            &root,
            machine,
            None,
        );
        self.map_expiry(result, version)
    }

    /// Advances the reactor; `true` parks until something completes.
    pub fn poll(&self, block: bool) -> usize {
        self.io.poll(block)
    }

    /// This handle's reactor, for sharing with further read-only handles.
    pub fn reactor(&self) -> Rc<AsyncIo> {
        self.io.clone()
    }

    fn map_expiry(&self, result: Result<(), DbError>, version: u64) -> Result<(), DbError> {
        match result {
            Err(err) => {
                let gone = match self.pool.read_root_offset(version) {
                    Ok(offset) => offset.is_none(),
                    Err(_) => true,
                };
                if gone {
                    trace!(target: "triedb", "traversal lost version {}: {}", version, err);
                    Err(DbError::VersionNoLongerExists)
                } else {
                    Err(err)
                }
            }
            ok => ok,
        }
    }
}

/// Traversal machine that only forces loads.
struct NullMachine;

impl TraverseMachine for NullMachine {
    fn down(&mut self, _branch: u8, _node: &Node) -> bool {
        true
    }

    fn up(&mut self, _branch: u8, _node: &Node) {}

    fn clone_boxed(&self) -> Box<dyn TraverseMachine> {
        Box::new(NullMachine)
    }
}

/// Node resolution on a worker: reads only, through the shared cache.
struct WorkerLoader<'a> {
    ctx: &'a WorkerContext,
    cache: Arc<NodeCache>,
    misses: Option<Arc<AtomicUsize>>,
}

impl NodeLoader for WorkerLoader<'_> {
    fn load(&self, offset: ChunkOffset, disk_size: u32) -> Result<Arc<Node>, DbError> {
        if let Some(node) = self.cache.get(offset) {
            return Ok(node);
        }
        if let Some(ref misses) = self.misses {
            misses.fetch_add(1, AtomicOrdering::Relaxed);
        }
        let bytes = self.ctx.read(offset, disk_size as usize)?;
        let node = Arc::new(Node::decode(&bytes).map_err(|_| DbError::BadNode)?);
        self.cache.insert(offset, node.clone());
        Ok(node)
    }
}

/// Fans the root's sub-tries out to workers, each walking with its own
/// machine clone; completions bounce back through the master reactor.
#[allow(clippy::too_many_arguments)]
fn traverse_parallel(
    io: &AsyncIo,
    workers: &WorkerPool,
    pool: &Arc<StoragePool>,
    cache: &Arc<NodeCache>,
    min_valid: u64,
    root: &Arc<Node>,
    machine: &mut dyn TraverseMachine,
    misses: Option<Arc<AtomicUsize>>,
) -> Result<(), DbError> {
    if !machine.down(INVALID_BRANCH, root) {
        machine.up(INVALID_BRANCH, root);
        return Ok(());
    }
    let master_loader = PoolCacheLoader {
        pool: pool.clone(),
        cache: cache.clone(),
        misses: misses.clone(),
    };
    let done = Arc::new(AtomicUsize::new(0));
    let errors: Arc<Mutex<Vec<DbError>>> = Arc::new(Mutex::new(Vec::new()));
    let mut spawned = 0usize;

    for (branch, entry) in root.children() {
        if child_expired(entry, min_valid) || !machine.should_visit(root, branch) {
            continue;
        }
        let child = resolve_child(&master_loader, entry)?;
        let mut sub_machine = machine.clone_boxed();
        let job_cache = cache.clone();
        let job_misses = misses.clone();
        let job_done = done.clone();
        let job_errors = errors.clone();
        let job_child = child.clone();
        let remote = io.remote();
        let outcome = workers.execute(move |ctx| {
            let loader = WorkerLoader {
                ctx,
                cache: job_cache,
                misses: job_misses,
            };
            if let Err(err) = walk(&loader, min_valid, &job_child, branch, &mut *sub_machine) {
                job_errors.lock().push(err);
            }
            job_done.fetch_add(1, AtomicOrdering::Release);
            remote.spawn(|_| {});
        });
        match outcome {
            Ok(()) => spawned += 1,
            Err(_) => {
                // Every queue is full; take this sub-trie on the master.
                let mut sub_machine = machine.clone_boxed();
                if let Err(err) = walk(&master_loader, min_valid, &child, branch, &mut *sub_machine)
                {
                    errors.lock().push(err);
                }
            }
        }
    }

    while done.load(AtomicOrdering::Acquire) < spawned {
        io.poll(true);
    }
    machine.up(INVALID_BRANCH, root);
    let popped = errors.lock().pop();
    match popped {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
