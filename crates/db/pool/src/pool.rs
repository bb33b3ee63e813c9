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

//! Fixed-size, chunk-partitioned storage pool over one or more backing
//! files or block devices.
//!
//! The first device starts with the metadata region (selector page plus the
//! double-buffered metadata copies); everything after it, and the whole of
//! every further device, is a sequence of equally sized chunks addressed by
//! [`ChunkOffset`].

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::{fmt, io};

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::chunk_offset::{ChunkOffset, CHUNK_OFFSET_BITS, DISK_PAGE_SIZE, MAX_CHUNKS};
use crate::metadata::{
    raw, ChunkList, DbMetadata, MetadataError, INVALID_VERSION, MAX_HISTORY_LENGTH,
    MIN_HISTORY_LENGTH,
};

/// How a pool over existing paths is brought up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Initialize the metadata region and a full free list, discarding any
    /// previous pool in the files.
    Truncate,
    /// Verify the header and load the newest consistent metadata copy.
    OpenExisting,
}

/// Pool construction options.
#[derive(Clone, Debug)]
pub struct Options {
    /// log2 of the chunk capacity in bytes. The facade default is 28
    /// (256 MiB); tests use much smaller chunks.
    pub chunk_capacity_log2: u8,
    /// Open without write access; all mutating calls are rejected.
    pub read_only: bool,
    /// History length written into fresh metadata.
    pub history_length: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            chunk_capacity_log2: 28,
            read_only: false,
            history_length: 1000,
        }
    }
}

/// Pool errors.
#[derive(Debug)]
pub enum Error {
    /// Propagated operating system error.
    Io(io::Error),
    /// The free list is empty.
    OutOfChunks,
    /// Metadata failed to load or violates invariants.
    Metadata(MetadataError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match *self {
            Error::Io(ref err) => write!(f, "io error: {}", err),
            Error::OutOfChunks => write!(f, "storage pool is out of chunks"),
            Error::Metadata(ref err) => write!(f, "{}", err),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<MetadataError> for Error {
    fn from(err: MetadataError) -> Self {
        Error::Metadata(err)
    }
}

struct Device {
    file: File,
    path: Option<PathBuf>,
    first_chunk: u32,
    chunk_count: u32,
    /// File offset of this device's first chunk.
    data_base: u64,
}

struct CommitState {
    generation: u64,
    active_copy: usize,
    /// Ranges written into the active copy by the previous commit; they must
    /// be replayed into the other copy before it can take new updates.
    carry: Vec<(usize, Vec<u8>)>,
}

/// A chunk-partitioned storage pool.
pub struct StoragePool {
    devices: Vec<Device>,
    meta: RwLock<DbMetadata>,
    commit: Mutex<CommitState>,
    chunk_capacity: u32,
    region_len: u64,
    read_only: bool,
    reads: AtomicU64,
}

const SELECTOR_MAGIC_POS: u64 = 8;
const SELECTOR_CHUNKS_POS: u64 = 16;
const MAX_META_READ_RETRIES: usize = 1000;

impl StoragePool {
    /// Creates or opens a pool over the given paths. Files must already
    /// exist with their final size; the pool never grows them.
    pub fn open(paths: &[PathBuf], mode: Mode, options: Options) -> Result<StoragePool, Error> {
        assert!(!paths.is_empty(), "a pool needs at least one device");
        assert!(
            options.chunk_capacity_log2 as u32 > crate::chunk_offset::DISK_PAGE_BITS
                && options.chunk_capacity_log2 as u32 <= CHUNK_OFFSET_BITS,
            "chunk capacity log2 {} out of range",
            options.chunk_capacity_log2
        );
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let file = OpenOptions::new()
                .read(true)
                .write(!options.read_only)
                .open(path)?;
            files.push((file, Some(path.clone())));
        }
        Self::from_files(files, mode, options)
    }

    /// A pool over an unlinked temporary file, for tests and tools.
    pub fn anonymous(total_chunks: u32, options: Options) -> Result<StoragePool, Error> {
        assert!(total_chunks > 0);
        let capacity = 1u64 << options.chunk_capacity_log2;
        let region = DbMetadata::region_len(total_chunks);
        let file = tempfile::tempfile()?;
        file.set_len(region + u64::from(total_chunks) * capacity)?;
        Self::from_files(vec![(file, None)], Mode::Truncate, options)
    }

    fn from_files(
        files: Vec<(File, Option<PathBuf>)>,
        mode: Mode,
        options: Options,
    ) -> Result<StoragePool, Error> {
        match mode {
            Mode::Truncate => Self::create(files, options),
            Mode::OpenExisting => Self::open_existing(files, options),
        }
    }

    fn create(files: Vec<(File, Option<PathBuf>)>, options: Options) -> Result<StoragePool, Error> {
        assert!(!options.read_only, "cannot create a pool read-only");
        assert!(
            (MIN_HISTORY_LENGTH..=MAX_HISTORY_LENGTH).contains(&options.history_length),
            "history length {} out of range",
            options.history_length
        );
        let capacity = 1u64 << options.chunk_capacity_log2;
        let lens: Vec<u64> = files
            .iter()
            .map(|(f, _)| f.metadata().map(|m| m.len()))
            .collect::<io::Result<_>>()?;

        // The region length depends on the chunk count and vice versa; a
        // couple of fixed-point rounds settles it.
        let mut region_len = DbMetadata::region_len(1);
        let mut chunk_count = 0u32;
        for _ in 0..4 {
            let mut total = 0u64;
            for (i, len) in lens.iter().enumerate() {
                let avail = if i == 0 { len.saturating_sub(region_len) } else { *len };
                total += avail / capacity;
            }
            let total = total.min(u64::from(MAX_CHUNKS)) as u32;
            if total == chunk_count {
                break;
            }
            chunk_count = total;
            region_len = DbMetadata::region_len(chunk_count.max(1));
        }
        if chunk_count == 0 {
            return Err(Error::Metadata(MetadataError::Corrupt(
                "backing files too small for a single chunk".into(),
            )));
        }

        let mut devices = Vec::with_capacity(files.len());
        let mut next_chunk = 0u32;
        for (i, ((file, path), len)) in files.into_iter().zip(lens.iter()).enumerate() {
            let data_base = if i == 0 { region_len } else { 0 };
            let count = (len.saturating_sub(data_base) / capacity)
                .min(u64::from(chunk_count - next_chunk)) as u32;
            devices.push(Device {
                file,
                path,
                first_chunk: next_chunk,
                chunk_count: count,
                data_base,
            });
            next_chunk += count;
        }
        assert_eq!(next_chunk, chunk_count);

        let meta = DbMetadata::create(
            chunk_count,
            options.chunk_capacity_log2,
            options.history_length,
        );
        let pool = StoragePool {
            devices,
            chunk_capacity: capacity as u32,
            region_len,
            read_only: false,
            reads: AtomicU64::new(0),
            commit: Mutex::new(CommitState {
                generation: 1,
                active_copy: 0,
                carry: Vec::new(),
            }),
            meta: RwLock::new(meta),
        };
        pool.write_region_header(chunk_count)?;
        {
            let meta = pool.meta.read();
            let full = meta.encode_full(1);
            pool.write_copy_bytes(0, 0, &full)?;
            pool.write_copy_bytes(1, 0, &full)?;
        }
        pool.write_selector(0)?;
        debug!(target: "pool", "created pool: {} chunks of {} bytes", chunk_count, capacity);
        Ok(pool)
    }

    fn open_existing(
        files: Vec<(File, Option<PathBuf>)>,
        options: Options,
    ) -> Result<StoragePool, Error> {
        let (first, _) = &files[0];
        let mut head = [0u8; 24];
        first.read_exact_at(&mut head, 0)?;
        if head[SELECTOR_MAGIC_POS as usize..SELECTOR_MAGIC_POS as usize + 8]
            != crate::metadata::MAGIC
        {
            return Err(Error::Metadata(MetadataError::BadMagic));
        }
        let chunk_count = LittleEndian::read_u32(&head[SELECTOR_CHUNKS_POS as usize..]);
        if chunk_count == 0 || chunk_count > MAX_CHUNKS {
            return Err(Error::Metadata(MetadataError::Corrupt(
                "selector page chunk count out of range".into(),
            )));
        }
        let region_len = DbMetadata::region_len(chunk_count);
        let copy_len = DbMetadata::copy_len(chunk_count);

        // Load both copies; the newest consistent one wins.
        let mut best: Option<(DbMetadata, u64, usize)> = None;
        for copy in 0..2 {
            let mut buf = vec![0u8; copy_len];
            let pos = Self::copy_base_for(region_len, copy);
            if first.read_exact_at(&mut buf, pos).is_err() {
                continue;
            }
            match DbMetadata::decode(&buf) {
                Ok((meta, generation)) => {
                    if best.as_ref().map_or(true, |&(_, g, _)| generation > g) {
                        best = Some((meta, generation, copy));
                    }
                }
                Err(MetadataError::BadMagic) => return Err(Error::Metadata(MetadataError::BadMagic)),
                Err(err) => {
                    warn!(target: "pool", "metadata copy {} unusable: {}", copy, err);
                }
            }
        }
        let (meta, generation, active_copy) = best.ok_or_else(|| {
            Error::Metadata(MetadataError::Corrupt(
                "no consistent metadata copy found".into(),
            ))
        })?;

        let capacity = meta.chunk_capacity();
        let mut devices = Vec::with_capacity(files.len());
        let mut next_chunk = 0u32;
        for (i, (file, path)) in files.into_iter().enumerate() {
            let len = file.metadata()?.len();
            let data_base = if i == 0 { region_len } else { 0 };
            let count = (len.saturating_sub(data_base) / u64::from(capacity))
                .min(u64::from(chunk_count - next_chunk)) as u32;
            devices.push(Device {
                file,
                path,
                first_chunk: next_chunk,
                chunk_count: count,
                data_base,
            });
            next_chunk += count;
        }
        if next_chunk != chunk_count {
            return Err(Error::Metadata(MetadataError::Corrupt(format!(
                "devices hold {} chunks, metadata says {}",
                next_chunk, chunk_count
            ))));
        }

        debug!(
            target: "pool",
            "opened pool: {} chunks, generation {}, read_only={}",
            chunk_count, generation, options.read_only
        );
        let pool = StoragePool {
            devices,
            chunk_capacity: capacity,
            region_len,
            read_only: options.read_only,
            reads: AtomicU64::new(0),
            commit: Mutex::new(CommitState {
                generation,
                active_copy,
                carry: Vec::new(),
            }),
            meta: RwLock::new(meta),
        };
        if !pool.read_only {
            // The stale copy may be missing the last commit before the
            // previous close; bring both copies level so incremental commits
            // have a sound base.
            let full = pool.metadata().encode_full(generation);
            pool.write_copy_bytes(1 - active_copy, 0, &full)?;
            pool.write_selector(active_copy as u8)?;
        }
        Ok(pool)
    }

    fn copy_base_for(region_len: u64, copy: usize) -> u64 {
        let page = u64::from(DISK_PAGE_SIZE);
        let copy_span = (region_len - page) / 2;
        page + copy as u64 * copy_span
    }

    fn copy_base(&self, copy: usize) -> u64 {
        Self::copy_base_for(self.region_len, copy)
    }

    fn write_region_header(&self, chunk_count: u32) -> io::Result<()> {
        let mut page = vec![0u8; DISK_PAGE_SIZE as usize];
        page[SELECTOR_MAGIC_POS as usize..SELECTOR_MAGIC_POS as usize + 8]
            .copy_from_slice(&crate::metadata::MAGIC);
        LittleEndian::write_u32(&mut page[SELECTOR_CHUNKS_POS as usize..], chunk_count);
        self.devices[0].file.write_all_at(&page, 0)
    }

    fn write_selector(&self, active: u8) -> io::Result<()> {
        self.devices[0].file.write_all_at(&[active], 0)
    }

    fn write_copy_bytes(&self, copy: usize, offset: usize, bytes: &[u8]) -> io::Result<()> {
        let base = self.copy_base(copy);
        self.devices[0].file.write_all_at(bytes, base + offset as u64)
    }

    fn read_copy_bytes(&self, copy: usize, offset: usize, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let base = self.copy_base(copy);
        self.devices[0].file.read_exact_at(&mut buf, base + offset as u64)?;
        Ok(buf)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn chunk_capacity(&self) -> u32 {
        self.chunk_capacity
    }

    pub fn chunk_count(&self) -> u32 {
        self.devices.iter().map(|d| d.chunk_count).sum()
    }

    /// Path of the device holding a chunk, when file backed.
    pub fn device_path(&self, chunk: u32) -> Option<&Path> {
        self.device_for(chunk).and_then(|d| d.path.as_deref())
    }

    /// Number of read operations served; tests use this to assert
    /// single-flight behavior.
    pub fn read_count(&self) -> u64 {
        self.reads.load(AtomicOrdering::Relaxed)
    }

    fn device_for(&self, chunk: u32) -> Option<&Device> {
        self.devices
            .iter()
            .find(|d| chunk >= d.first_chunk && chunk < d.first_chunk + d.chunk_count)
    }

    fn file_pos(&self, offset: ChunkOffset) -> Option<(&Device, u64)> {
        let device = self.device_for(offset.id())?;
        let pos = device.data_base
            + u64::from(offset.id() - device.first_chunk) * u64::from(self.chunk_capacity)
            + u64::from(offset.offset());
        Some((device, pos))
    }

    /// Reads `len` bytes at the given address.
    pub fn read(&self, offset: ChunkOffset, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(offset, &mut buf)?;
        Ok(buf)
    }

    /// Reads into a caller buffer. Addresses pointing outside the pool are
    /// an error, not a panic: they can come off disk.
    pub fn read_into(&self, offset: ChunkOffset, buf: &mut [u8]) -> io::Result<()> {
        if !offset.is_valid() || offset.offset() as usize + buf.len() > self.chunk_capacity as usize
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("read of {} bytes at {} leaves the pool", buf.len(), offset),
            ));
        }
        self.reads.fetch_add(1, AtomicOrdering::Relaxed);
        let (device, pos) = self.file_pos(offset).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("chunk {} does not exist", offset.id()),
            )
        })?;
        device.file.read_exact_at(buf, pos)
    }

    /// Writes bytes at the given address. The write side of the pool belongs
    /// to the single writer; a read-only pool rejects this.
    pub fn write(&self, offset: ChunkOffset, bytes: &[u8]) -> io::Result<()> {
        assert!(!self.read_only, "write on a read-only pool");
        assert!(offset.is_valid(), "write to the invalid offset");
        assert!(
            offset.offset() as usize + bytes.len() <= self.chunk_capacity as usize,
            "write of {} bytes at {} crosses the chunk end",
            bytes.len(),
            offset
        );
        let (device, pos) = self.file_pos(offset).expect("writer addresses chunks it allocated");
        device.file.write_all_at(bytes, pos)
    }

    pub fn metadata(&self) -> RwLockReadGuard<DbMetadata> {
        self.meta.read()
    }

    pub fn metadata_mut(&self) -> RwLockWriteGuard<DbMetadata> {
        assert!(!self.read_only, "metadata mutation on a read-only pool");
        self.meta.write()
    }

    /// Pops a chunk off the free list; the caller owns it until it is linked
    /// into the fast or slow list (or released).
    pub fn allocate_chunk(&self) -> Result<u32, Error> {
        let mut meta = self.metadata_mut();
        let idx = meta.pop_head(ChunkList::Free).ok_or(Error::OutOfChunks)?;
        meta.set_chunk_size(idx, 0);
        trace!(target: "pool", "allocated chunk {}", idx);
        Ok(idx)
    }

    /// Returns a chunk to the free list and forgets its contents.
    pub fn release_chunk(&self, idx: u32) {
        let mut meta = self.metadata_mut();
        if meta.chunk(idx).list().is_some() {
            meta.remove(idx);
        }
        meta.set_chunk_size(idx, 0);
        meta.append(ChunkList::Free, idx);
        trace!(target: "pool", "released chunk {}", idx);
    }

    /// Commits dirtied metadata through the double buffer: write the stale
    /// copy, flip the selector, remember the ranges for catch-up.
    pub fn commit_metadata(&self) -> Result<(), Error> {
        assert!(!self.read_only, "metadata commit on a read-only pool");
        let mut ranges = {
            let mut meta = self.metadata_mut();
            meta.take_dirty_ranges()
        };
        let mut commit = self.commit.lock();
        let target = 1 - commit.active_copy;
        let generation = commit.generation + 1;

        // Ranges that went only into the other copy last time around.
        let carry = std::mem::take(&mut commit.carry);
        let header = {
            let meta = self.metadata();
            let mut buf = vec![0u8; raw::HEADER_LEN];
            meta.encode_header_into(generation, &mut buf);
            buf
        };
        // Head generation first: a torn write leaves head != tail and the
        // copy is ignored by every reader.
        self.write_copy_bytes(target, raw::GENERATION, &header[raw::GENERATION..raw::GENERATION + 8])?;
        for (pos, bytes) in carry.iter().chain(ranges.iter()) {
            self.write_copy_bytes(target, *pos, bytes)?;
        }
        self.write_copy_bytes(target, 0, &header)?;
        let tail_pos = raw::tail_generation_pos(self.chunk_count());
        let mut tail = [0u8; 8];
        LittleEndian::write_u64(&mut tail, generation);
        self.write_copy_bytes(target, tail_pos, &tail)?;
        self.write_selector(target as u8)?;

        commit.generation = generation;
        commit.active_copy = target;
        ranges.push((0, header));
        commit.carry = ranges;
        Ok(())
    }

    fn read_generation_pair(&self, copy: usize) -> io::Result<(u64, u64)> {
        let head = self.read_copy_bytes(copy, raw::GENERATION, 8)?;
        let tail_pos = raw::tail_generation_pos(self.chunk_count());
        let tail = self.read_copy_bytes(copy, tail_pos, 8)?;
        Ok((LittleEndian::read_u64(&head), LittleEndian::read_u64(&tail)))
    }

    /// A consistent snapshot of the history window, read through the double
    /// buffer. Used by read-only databases; the writer reads its own memory.
    pub fn meta_snapshot(&self) -> Result<MetaSnapshot, Error> {
        for _ in 0..MAX_META_READ_RETRIES {
            let mut best: Option<MetaSnapshot> = None;
            for copy in 0..2 {
                let (g1, _) = self.read_generation_pair(copy)?;
                let header = self.read_copy_bytes(copy, 0, raw::HEADER_LEN)?;
                let (_, g2) = self.read_generation_pair(copy)?;
                if g1 != g2 || LittleEndian::read_u64(&header[raw::GENERATION..]) != g1 {
                    continue;
                }
                let snap = MetaSnapshot {
                    generation: g1,
                    history_length: LittleEndian::read_u64(&header[raw::HISTORY_LEN..]),
                    min_valid_version: LittleEndian::read_u64(&header[raw::MIN_VALID..]),
                    max_version: LittleEndian::read_u64(&header[raw::MAX_VERSION..]),
                };
                if best.as_ref().map_or(true, |b| snap.generation > b.generation) {
                    best = Some(snap);
                }
            }
            if let Some(snap) = best {
                return Ok(snap);
            }
        }
        Err(Error::Metadata(MetadataError::Corrupt(
            "metadata copies never settled".into(),
        )))
    }

    /// The root offset persisted for `version`, observed through the double
    /// buffer together with the window that validates it.
    pub fn read_root_offset(&self, version: u64) -> Result<Option<ChunkOffset>, Error> {
        let chunk_count = self.chunk_count();
        let ring_capacity = u64::from(crate::metadata::RING_CAPACITY);
        let slot = (version % ring_capacity) as u32;
        for _ in 0..MAX_META_READ_RETRIES {
            for copy in 0..2 {
                let (g1, _) = self.read_generation_pair(copy)?;
                let header = self.read_copy_bytes(copy, 0, raw::HEADER_LEN)?;
                let slot_bytes = self.read_copy_bytes(copy, raw::slot_pos(chunk_count, slot), 16)?;
                let (_, g2) = self.read_generation_pair(copy)?;
                if g1 != g2 || LittleEndian::read_u64(&header[raw::GENERATION..]) != g1 {
                    continue;
                }
                let min_valid = LittleEndian::read_u64(&header[raw::MIN_VALID..]);
                let max_version = LittleEndian::read_u64(&header[raw::MAX_VERSION..]);
                if max_version == INVALID_VERSION || version < min_valid || version > max_version {
                    return Ok(None);
                }
                let slot = raw::decode_slot(&slot_bytes).ok_or_else(|| {
                    Error::Metadata(MetadataError::Corrupt("bad ring slot".into()))
                })?;
                if slot.valid && slot.version == version {
                    return Ok(Some(slot.offset));
                }
                return Ok(None);
            }
        }
        Err(Error::Metadata(MetadataError::Corrupt(
            "metadata copies never settled".into(),
        )))
    }

    fn read_slots_consistent(&self, slot: u32, run: u32) -> Result<Vec<u8>, Error> {
        let chunk_count = self.chunk_count();
        for _ in 0..MAX_META_READ_RETRIES {
            for copy in 0..2 {
                let (g1, _) = self.read_generation_pair(copy)?;
                let bytes =
                    self.read_copy_bytes(copy, raw::slot_pos(chunk_count, slot), run as usize * 16)?;
                let (_, g2) = self.read_generation_pair(copy)?;
                if g1 == g2 {
                    return Ok(bytes);
                }
            }
        }
        Err(Error::Metadata(MetadataError::Corrupt(
            "metadata copies never settled".into(),
        )))
    }

    /// First valid version within the observed window, scanning slots in
    /// batches. `None` on an empty database.
    pub fn read_earliest_version(&self) -> Result<Option<u64>, Error> {
        let snap = self.meta_snapshot()?;
        if snap.max_version == INVALID_VERSION {
            return Ok(None);
        }
        let ring_capacity = u64::from(crate::metadata::RING_CAPACITY);
        let mut v = snap.min_valid_version;
        while v <= snap.max_version {
            let slot = (v % ring_capacity) as u32;
            let run = (crate::metadata::RING_CAPACITY - slot)
                .min(512)
                .min((snap.max_version - v + 1) as u32);
            let bytes = self.read_slots_consistent(slot, run)?;
            for i in 0..run {
                let slot = raw::decode_slot(&bytes[i as usize * 16..]).ok_or_else(|| {
                    Error::Metadata(MetadataError::Corrupt("bad ring slot".into()))
                })?;
                if slot.valid && slot.version == v + u64::from(i) {
                    return Ok(Some(v + u64::from(i)));
                }
            }
            v += u64::from(run);
        }
        Ok(None)
    }
}

/// The history window as read through the metadata double buffer.
#[derive(Clone, Copy, Debug)]
pub struct MetaSnapshot {
    pub generation: u64,
    pub history_length: u64,
    pub min_valid_version: u64,
    pub max_version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ChunkList;

    fn small_pool() -> StoragePool {
        StoragePool::anonymous(
            4,
            Options {
                chunk_capacity_log2: 16,
                ..Options::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn create_builds_full_free_list() {
        let pool = small_pool();
        assert_eq!(pool.chunk_count(), 4);
        assert_eq!(pool.metadata().list_len(ChunkList::Free), 4);
        assert_eq!(pool.chunk_capacity(), 1 << 16);
    }

    #[test]
    fn read_back_what_was_written() {
        let pool = small_pool();
        let idx = pool.allocate_chunk().unwrap();
        let offset = ChunkOffset::new(idx, 4096);
        pool.write(offset, b"all work and no play").unwrap();
        assert_eq!(pool.read(offset, 20).unwrap(), b"all work and no play");
    }

    #[test]
    fn allocation_exhausts_then_fails() {
        let pool = small_pool();
        let mut chunks = Vec::new();
        for _ in 0..4 {
            chunks.push(pool.allocate_chunk().unwrap());
        }
        assert!(matches!(pool.allocate_chunk(), Err(Error::OutOfChunks)));
        pool.release_chunk(chunks.pop().unwrap());
        assert!(pool.allocate_chunk().is_ok());
    }

    #[test]
    fn metadata_survives_commit_and_reload() {
        let pool = small_pool();
        let idx = pool.allocate_chunk().unwrap();
        {
            let mut meta = pool.metadata_mut();
            meta.append(ChunkList::Fast, idx);
            meta.set_chunk_size(idx, 8192);
            meta.min_valid_version = 0;
            meta.max_version = 3;
            meta.set_root_offset(3, ChunkOffset::new(idx, 4096));
            meta.mark_window_dirty();
        }
        pool.commit_metadata().unwrap();

        let snap = pool.meta_snapshot().unwrap();
        assert_eq!(snap.max_version, 3);
        assert_eq!(
            pool.read_root_offset(3).unwrap(),
            Some(ChunkOffset::new(idx, 4096))
        );
        assert_eq!(pool.read_root_offset(2).unwrap(), None);
        assert_eq!(pool.read_earliest_version().unwrap(), Some(3));
    }

    #[test]
    fn both_copies_catch_up_over_two_commits() {
        let pool = small_pool();
        {
            let mut meta = pool.metadata_mut();
            meta.min_valid_version = 0;
            meta.max_version = 0;
            meta.set_root_offset(0, ChunkOffset::new(0, 0));
            meta.mark_window_dirty();
        }
        pool.commit_metadata().unwrap();
        {
            let mut meta = pool.metadata_mut();
            meta.max_version = 1;
            meta.set_root_offset(1, ChunkOffset::new(0, 4096));
            meta.mark_window_dirty();
        }
        pool.commit_metadata().unwrap();

        // The second commit landed on the copy that missed the first one;
        // the carry-over must have replayed version 0's slot there.
        assert_eq!(
            pool.read_root_offset(0).unwrap(),
            Some(ChunkOffset::new(0, 0))
        );
        assert_eq!(
            pool.read_root_offset(1).unwrap(),
            Some(ChunkOffset::new(0, 4096))
        );
    }

    #[test]
    fn reopen_loads_newest_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(DbMetadata::region_len(4) + 4 * (1 << 16)).unwrap();
        drop(file);

        let options = Options {
            chunk_capacity_log2: 16,
            ..Options::default()
        };
        let paths = vec![path];
        {
            let pool = StoragePool::open(&paths, Mode::Truncate, options.clone()).unwrap();
            let idx = pool.allocate_chunk().unwrap();
            let mut meta = pool.metadata_mut();
            meta.append(ChunkList::Fast, idx);
            meta.min_valid_version = 0;
            meta.max_version = 7;
            meta.set_root_offset(7, ChunkOffset::new(idx, 0));
            drop(meta);
            pool.commit_metadata().unwrap();
        }
        let pool = StoragePool::open(&paths, Mode::OpenExisting, options).unwrap();
        let meta = pool.metadata();
        assert_eq!(meta.max_version, 7);
        assert_eq!(meta.list_len(ChunkList::Fast), 1);
        assert_eq!(meta.root_offset(7), Some(ChunkOffset::new(0, 0)));
    }

    #[test]
    fn read_only_pool_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(DbMetadata::region_len(2) + 2 * (1 << 16)).unwrap();
        drop(file);
        let paths = vec![path];
        let options = Options {
            chunk_capacity_log2: 16,
            ..Options::default()
        };
        drop(StoragePool::open(&paths, Mode::Truncate, options.clone()).unwrap());

        let ro = StoragePool::open(
            &paths,
            Mode::OpenExisting,
            Options {
                read_only: true,
                ..options
            },
        )
        .unwrap();
        assert!(ro.is_read_only());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ro.write(ChunkOffset::new(0, 0), b"nope").unwrap();
        }));
        assert!(result.is_err());
    }

    #[test]
    fn torn_active_copy_falls_back_to_the_other() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(DbMetadata::region_len(2) + 2 * (1 << 16)).unwrap();
        drop(file);
        let paths = vec![path.clone()];
        let options = Options {
            chunk_capacity_log2: 16,
            ..Options::default()
        };
        {
            let pool = StoragePool::open(&paths, Mode::Truncate, options.clone()).unwrap();
            let mut meta = pool.metadata_mut();
            meta.min_valid_version = 0;
            meta.max_version = 1;
            meta.set_root_offset(1, ChunkOffset::new(0, 0));
            drop(meta);
            pool.commit_metadata().unwrap();
        }
        {
            // Corrupt the tail generation of the copy the last commit wrote.
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            let base = StoragePool::copy_base_for(DbMetadata::region_len(2), 1);
            let pos = base + raw::tail_generation_pos(2) as u64;
            file.write_all_at(&[0xff; 8], pos).unwrap();
        }
        let pool = StoragePool::open(&paths, Mode::OpenExisting, options).unwrap();
        // The intact older copy is used; version 1 was lost with the torn
        // copy but the pool still opens.
        assert_eq!(pool.metadata().max_version, INVALID_VERSION);
    }
}
