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

//! Auxiliary worker pool for read fan-out.
//!
//! Work is submitted from the master reactor thread, runs on a worker with a
//! read-only view of the pool, and completes by bouncing a closure back to
//! the master through its `RemoteHandle`. Queues are bounded; a full pool
//! pushes back on the submitter instead of growing without limit.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use triedb_pool::{ChunkOffset, StoragePool};

/// What a worker job is allowed to touch: positioned reads, nothing else.
/// The write side of the pool stays exclusive to the master.
pub struct WorkerContext {
    pool: Arc<StoragePool>,
}

impl WorkerContext {
    pub fn read(&self, offset: ChunkOffset, len: usize) -> io::Result<Vec<u8>> {
        self.pool.read(offset, len)
    }

    pub fn read_into(&self, offset: ChunkOffset, buf: &mut [u8]) -> io::Result<()> {
        self.pool.read_into(offset, buf)
    }

    pub fn chunk_capacity(&self) -> u32 {
        self.pool.chunk_capacity()
    }
}

type Job = Box<dyn FnOnce(&WorkerContext) + Send>;

/// Fixed set of worker threads with bounded per-worker queues.
pub struct WorkerPool {
    txs: Vec<Sender<Job>>,
    next: AtomicUsize,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(pool: Arc<StoragePool>, workers: usize, queue_capacity: usize) -> WorkerPool {
        let workers = workers.max(1);
        let mut txs = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let (tx, rx): (Sender<Job>, Receiver<Job>) =
                crossbeam_channel::bounded(queue_capacity.max(1));
            let ctx = WorkerContext { pool: pool.clone() };
            let handle = thread::Builder::new()
                .name(format!("triedb-worker {}", i))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job(&ctx);
                    }
                    trace!(target: "io", "worker exiting");
                })
                .expect("failed to spawn worker thread");
            txs.push(tx);
            handles.push(handle);
        }
        WorkerPool {
            txs,
            next: AtomicUsize::new(0),
            handles,
        }
    }

    pub fn workers(&self) -> usize {
        self.txs.len()
    }

    /// Round-robin submission. When every queue is full the job comes back
    /// to the caller, which retries after a delay of its choosing.
    pub fn execute<F>(&self, job: F) -> Result<(), Box<dyn FnOnce(&WorkerContext) + Send>>
    where
        F: FnOnce(&WorkerContext) + Send + 'static,
    {
        let mut job: Job = Box::new(job);
        let start = self.next.fetch_add(1, AtomicOrdering::Relaxed);
        for i in 0..self.txs.len() {
            let tx = &self.txs[(start + i) % self.txs.len()];
            match tx.try_send(job) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) | Err(TrySendError::Disconnected(back)) => {
                    job = back;
                }
            }
        }
        Err(job)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.txs.clear();
        for handle in self.handles.drain(..) {
            handle.join().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AsyncIo, IoConfig};
    use std::sync::atomic::AtomicU64;
    use triedb_pool::Options;

    fn pool_with_data() -> Arc<StoragePool> {
        let pool = StoragePool::anonymous(
            2,
            Options {
                chunk_capacity_log2: 16,
                ..Options::default()
            },
        )
        .unwrap();
        pool.allocate_chunk().unwrap();
        pool.write(ChunkOffset::new(0, 0), b"worker bytes").unwrap();
        Arc::new(pool)
    }

    #[test]
    fn jobs_read_and_bounce_back_to_master() {
        let pool = pool_with_data();
        let io = AsyncIo::new(pool.clone(), IoConfig::default());
        let workers = WorkerPool::new(pool, 2, 16);
        let done = Arc::new(AtomicU64::new(0));

        for _ in 0..8 {
            let remote = io.remote();
            let done = done.clone();
            workers
                .execute(move |ctx| {
                    let bytes = ctx.read(ChunkOffset::new(0, 0), 12).unwrap();
                    assert_eq!(bytes, b"worker bytes");
                    remote.spawn(move |_| {
                        done.fetch_add(1, AtomicOrdering::Release);
                    });
                })
                .map_err(|_| "queue full")
                .unwrap();
        }
        while done.load(AtomicOrdering::Acquire) < 8 {
            io.poll(true);
        }
    }

    #[test]
    fn full_queues_hand_the_job_back() {
        let pool = pool_with_data();
        let workers = WorkerPool::new(pool, 1, 1);
        let (block_tx, block_rx) = crossbeam_channel::bounded::<()>(0);

        // Occupy the only worker, then fill its queue of one.
        workers
            .execute(move |_| {
                let _ = block_rx.recv();
            })
            .map_err(|_| "first job rejected")
            .unwrap();
        // Either this submission or the next must eventually be rejected;
        // the worker is parked, so at most one more fits the queue.
        let second = workers.execute(|_| {});
        let third = workers.execute(|_| {});
        assert!(second.is_err() || third.is_err());
        block_tx.send(()).unwrap();
    }
}
