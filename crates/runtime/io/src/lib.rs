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

//! Completion-based I/O reactor.
//!
//! An [`AsyncIo`] instance belongs to exactly one thread. Submissions hand a
//! positioned read to the reactor's internal I/O threads; completions are
//! queued and delivered, in arrival order, by [`AsyncIo::poll`] on the owning
//! thread. Timers and thread-safe resumption follow the same
//! submit-then-complete contract, so the only suspension points a caller
//! ever observes are its own `poll` calls.

#[macro_use]
extern crate log;

mod worker_pool;

pub use worker_pool::{WorkerContext, WorkerPool};

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use slab::Slab;
use triedb_pool::{ChunkOffset, StoragePool};

/// Completion callback of a read; runs on the reactor thread.
pub type ReadCallback = Box<dyn FnOnce(&AsyncIo, io::Result<Vec<u8>>)>;
/// Callback of a timer; runs on the reactor thread.
pub type TimerCallback = Box<dyn FnOnce(&AsyncIo)>;
/// A closure bounced onto the reactor thread from elsewhere.
pub type RemoteFn = Box<dyn FnOnce(&AsyncIo) + Send>;

/// Reactor construction options.
#[derive(Clone, Debug)]
pub struct IoConfig {
    /// Internal threads executing positioned reads.
    pub io_threads: usize,
    /// In-flight read cap; submissions beyond it fail with `WouldBlock`.
    pub max_in_flight: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            io_threads: ::num_cpus::get().min(4).max(1),
            max_in_flight: 128,
        }
    }
}

enum Event {
    ReadDone {
        token: usize,
        result: io::Result<Vec<u8>>,
    },
    Remote(RemoteFn),
}

struct ReadRequest {
    token: usize,
    offset: ChunkOffset,
    len: usize,
}

struct Timer {
    at: Instant,
    seq: u64,
    cb: TimerCallback,
}

// Max-heap; reverse so the earliest deadline pops first.
impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for Timer {}
impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

/// A single-threaded completion reactor over a storage pool.
///
/// Not `Sync`: the instance lives on its reactor thread. Cross-thread
/// interaction goes through [`RemoteHandle`].
pub struct AsyncIo {
    pool: Arc<StoragePool>,
    pending: RefCell<Slab<ReadCallback>>,
    timers: RefCell<BinaryHeap<Timer>>,
    timer_seq: Cell<u64>,
    work_tx: Option<Sender<ReadRequest>>,
    event_tx: Sender<Event>,
    event_rx: Receiver<Event>,
    io_threads: Vec<JoinHandle<()>>,
    max_in_flight: usize,
}

impl AsyncIo {
    pub fn new(pool: Arc<StoragePool>, config: IoConfig) -> AsyncIo {
        let (work_tx, work_rx) = crossbeam_channel::unbounded::<ReadRequest>();
        let (event_tx, event_rx) = crossbeam_channel::unbounded::<Event>();
        let mut io_threads = Vec::with_capacity(config.io_threads);
        for i in 0..config.io_threads.max(1) {
            let rx = work_rx.clone();
            let tx = event_tx.clone();
            let pool = pool.clone();
            let handle = thread::Builder::new()
                .name(format!("triedb-io {}", i))
                .spawn(move || {
                    while let Ok(req) = rx.recv() {
                        let result = pool.read(req.offset, req.len);
                        if tx
                            .send(Event::ReadDone {
                                token: req.token,
                                result,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    trace!(target: "io", "io thread exiting");
                })
                .expect("failed to spawn io thread");
            io_threads.push(handle);
        }
        AsyncIo {
            pool,
            pending: RefCell::new(Slab::new()),
            timers: RefCell::new(BinaryHeap::new()),
            timer_seq: Cell::new(0),
            work_tx: Some(work_tx),
            event_tx,
            event_rx,
            io_threads,
            max_in_flight: config.max_in_flight,
        }
    }

    pub fn storage_pool(&self) -> &Arc<StoragePool> {
        &self.pool
    }

    /// Submits a positioned read. The callback runs on this thread from a
    /// later `poll`. Fails with `WouldBlock` when the in-flight table is
    /// full; callers retry after a timer of their choice.
    pub fn submit_read(
        &self,
        offset: ChunkOffset,
        len: usize,
        cb: ReadCallback,
    ) -> io::Result<usize> {
        let mut pending = self.pending.borrow_mut();
        if pending.len() >= self.max_in_flight {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "reactor in-flight queue is full",
            ));
        }
        let token = pending.insert(cb);
        drop(pending);
        self.work_tx
            .as_ref()
            .expect("work channel lives as long as the reactor")
            .send(ReadRequest { token, offset, len })
            .expect("io threads outlive the reactor");
        Ok(token)
    }

    /// Schedules a callback after a delay, measured on the monotonic clock.
    pub fn submit_after(&self, delay: Duration, cb: TimerCallback) {
        let seq = self.timer_seq.get();
        self.timer_seq.set(seq + 1);
        self.timers.borrow_mut().push(Timer {
            at: Instant::now() + delay,
            seq,
            cb,
        });
    }

    /// A clonable, `Send` handle that enqueues closures for execution on
    /// this reactor's thread.
    pub fn remote(&self) -> RemoteHandle {
        RemoteHandle {
            tx: self.event_tx.clone(),
        }
    }

    /// Reads still in flight.
    pub fn pending_reads(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Drives completions. With `block` set and nothing ready, parks until
    /// the next completion or timer deadline. Returns the number of
    /// callbacks run; callbacks may themselves submit new work.
    pub fn poll(&self, block: bool) -> usize {
        let mut processed = self.run_due_timers();
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => {
                    self.dispatch(event);
                    processed += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if processed == 0 && block {
            let event = match self.next_deadline() {
                Some(at) => {
                    let timeout = at.saturating_duration_since(Instant::now());
                    self.event_rx.recv_timeout(timeout).ok()
                }
                None => self.event_rx.recv().ok(),
            };
            if let Some(event) = event {
                self.dispatch(event);
                processed += 1;
            }
            processed += self.run_due_timers();
        }
        processed
    }

    /// Polls until no reads remain in flight.
    pub fn wait_until_done(&self) {
        while self.pending_reads() > 0 {
            self.poll(true);
        }
    }

    fn dispatch(&self, event: Event) {
        match event {
            Event::ReadDone { token, result } => {
                let cb = {
                    let mut pending = self.pending.borrow_mut();
                    if !pending.contains(token) {
                        // Cancelled; the kernel-side read finished anyway and
                        // its result is dropped.
                        return;
                    }
                    pending.remove(token)
                };
                cb(self, result);
            }
            Event::Remote(f) => f(self),
        }
    }

    /// Cooperative cancellation: the read's completion is dropped when it
    /// arrives. Cannot race the callback, both run on this thread.
    pub fn cancel_read(&self, token: usize) -> bool {
        let mut pending = self.pending.borrow_mut();
        if pending.contains(token) {
            let _ = pending.remove(token);
            true
        } else {
            false
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().peek().map(|t| t.at)
    }

    fn run_due_timers(&self) -> usize {
        let mut ran = 0;
        loop {
            let due = {
                let mut timers = self.timers.borrow_mut();
                match timers.peek() {
                    Some(t) if t.at <= Instant::now() => timers.pop(),
                    _ => None,
                }
            };
            match due {
                Some(timer) => {
                    (timer.cb)(self);
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }
}

impl Drop for AsyncIo {
    fn drop(&mut self) {
        // Dropping the work sender ends the io threads' recv loops.
        self.work_tx.take();
        for handle in self.io_threads.drain(..) {
            handle.join().ok();
        }
    }
}

/// Thread-safe resumption onto a reactor thread. The channel carries the
/// release/acquire pairing: state written before `spawn` is visible to the
/// closure when it runs.
#[derive(Clone)]
pub struct RemoteHandle {
    tx: Sender<Event>,
}

impl RemoteHandle {
    /// Enqueues a closure for the reactor's next `poll`. Returns `false`
    /// when the reactor is gone.
    pub fn spawn<F>(&self, f: F) -> bool
    where
        F: FnOnce(&AsyncIo) + Send + 'static,
    {
        self.tx.send(Event::Remote(Box::new(f))).is_ok()
    }
}
