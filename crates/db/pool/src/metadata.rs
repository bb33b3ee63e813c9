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

//! The persistent metadata region: chunk table with intrusive free/fast/slow
//! lists, the root-offset ring and the history window, committed through an
//! atomic double buffer.
//!
//! The region occupies the head of the first device: one selector page
//! followed by two copies of the serialized metadata. A commit writes the
//! dirty ranges into the stale copy between matching generation bumps at the
//! copy's head and tail, then flips the selector. Readers accept a copy only
//! when both generation stamps agree, so a torn copy is never observed; they
//! retry against the other copy instead.

use std::collections::BTreeSet;
use std::{fmt, io};

use byteorder::{ByteOrder, LittleEndian};

use crate::chunk_offset::{ChunkOffset, DISK_PAGE_SIZE, MAX_CHUNKS};

/// Magic bytes at the head of each metadata copy.
pub const MAGIC: [u8; 8] = *b"TRIEPOOL";
/// On-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Sentinel for "no such version".
pub const INVALID_VERSION: u64 = u64::MAX;
/// Sentinel chunk index terminating an intrusive list.
pub const INVALID_CHUNK: u32 = u32::MAX;

/// Smallest history length the engine will ever shorten itself to.
pub const MIN_HISTORY_LENGTH: u64 = 2;
/// Largest supported history length; fixes the root-offset ring capacity so
/// the region never needs re-laying when the history length changes.
pub const MAX_HISTORY_LENGTH: u64 = 65_535;

/// Root-offset ring capacity in slots.
pub const RING_CAPACITY: u32 = (MAX_HISTORY_LENGTH + 1) as u32;

const HEADER_LEN: usize = 96;
const CHUNK_ENTRY_LEN: usize = 20;
const SLOT_LEN: usize = 16;

const OFF_MAGIC: usize = 0;
const OFF_FORMAT: usize = 8;
const OFF_CAPACITY_LOG2: usize = 12;
const OFF_CHUNK_COUNT: usize = 16;
const OFF_COPY_LEN: usize = 20;
const OFF_GENERATION: usize = 24;
const OFF_HISTORY_LEN: usize = 32;
const OFF_MIN_VALID: usize = 40;
const OFF_MAX_VERSION: usize = 48;
const OFF_LISTS: usize = 56;

const SLOT_VALID_BIT: u64 = 1 << 63;

/// Which intrusive list a chunk is linked on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkList {
    /// Available for allocation.
    Free = 0,
    /// Holds the hot append stream.
    Fast = 1,
    /// Holds compacted long-lived nodes.
    Slow = 2,
}

const TAG_DETACHED: u8 = 3;

impl ChunkList {
    fn from_tag(tag: u8) -> Option<ChunkList> {
        match tag {
            0 => Some(ChunkList::Free),
            1 => Some(ChunkList::Fast),
            2 => Some(ChunkList::Slow),
            _ => None,
        }
    }
}

/// Per-chunk bookkeeping threaded into one of the three lists.
#[derive(Clone, Debug)]
pub struct ChunkInfo {
    /// 20-bit counter ordering chunks within their list across reopens.
    pub insertion_count: u32,
    /// High-water mark of writes into the chunk.
    pub size: u32,
    prev: u32,
    next: u32,
    tag: u8,
}

impl ChunkInfo {
    /// The list this chunk is linked on, or `None` while a writer owns it.
    pub fn list(&self) -> Option<ChunkList> {
        ChunkList::from_tag(self.tag)
    }

    pub fn next(&self) -> Option<u32> {
        if self.next == INVALID_CHUNK {
            None
        } else {
            Some(self.next)
        }
    }

    pub fn prev(&self) -> Option<u32> {
        if self.prev == INVALID_CHUNK {
            None
        } else {
            Some(self.prev)
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct ListState {
    head: u32,
    tail: u32,
    next_insertion_count: u32,
}

/// One entry of the root-offset ring.
#[derive(Clone, Copy, Debug)]
pub struct RingSlot {
    pub offset: ChunkOffset,
    pub valid: bool,
    /// The version this slot was last written for; a slot only answers for
    /// version `v` when the tag matches, which is what makes discontinuous
    /// valid sets representable after `move_trie_version_forward`.
    pub version: u64,
}

impl Default for RingSlot {
    fn default() -> RingSlot {
        RingSlot {
            offset: ChunkOffset::INVALID,
            valid: false,
            version: INVALID_VERSION,
        }
    }
}

/// Metadata corruption kinds surfaced at open.
#[derive(Debug)]
pub enum MetadataError {
    Io(io::Error),
    /// Magic bytes did not match; not a pool.
    BadMagic,
    /// The format version is from a future writer.
    UnsupportedVersion(u32),
    /// Structural invariants violated; the pool must be restored or rebuilt.
    Corrupt(String),
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match *self {
            MetadataError::Io(ref err) => write!(f, "metadata io error: {}", err),
            MetadataError::BadMagic => write!(f, "bad metadata magic"),
            MetadataError::UnsupportedVersion(v) => {
                write!(f, "unsupported metadata format version {}", v)
            }
            MetadataError::Corrupt(ref s) => write!(f, "corrupt metadata: {}", s),
        }
    }
}

impl From<io::Error> for MetadataError {
    fn from(err: io::Error) -> Self {
        MetadataError::Io(err)
    }
}

/// Dirty state accumulated since the last commit.
#[derive(Default)]
struct Dirty {
    header: bool,
    chunks: BTreeSet<u32>,
    slots: BTreeSet<u32>,
}

impl Dirty {
    fn clear(&mut self) {
        self.header = false;
        self.chunks.clear();
        self.slots.clear();
    }
}

/// The in-memory image of the metadata region. Only the writer mutates it;
/// read-only databases go through [`crate::pool::MetadataReader`] instead.
pub struct DbMetadata {
    chunk_capacity_log2: u8,
    chunks: Vec<ChunkInfo>,
    lists: [ListState; 3],
    pub history_length: u64,
    pub min_valid_version: u64,
    pub max_version: u64,
    ring: Vec<RingSlot>,
    dirty: Dirty,
}

impl DbMetadata {
    /// Fresh metadata with every chunk on the free list, in index order.
    pub fn create(chunk_count: u32, chunk_capacity_log2: u8, history_length: u64) -> DbMetadata {
        assert!(chunk_count > 0 && chunk_count <= MAX_CHUNKS);
        assert!((MIN_HISTORY_LENGTH..=MAX_HISTORY_LENGTH).contains(&history_length));
        let mut meta = DbMetadata {
            chunk_capacity_log2,
            chunks: (0..chunk_count)
                .map(|_| ChunkInfo {
                    insertion_count: 0,
                    size: 0,
                    prev: INVALID_CHUNK,
                    next: INVALID_CHUNK,
                    tag: TAG_DETACHED,
                })
                .collect(),
            lists: [ListState {
                head: INVALID_CHUNK,
                tail: INVALID_CHUNK,
                next_insertion_count: 0,
            }; 3],
            history_length,
            min_valid_version: INVALID_VERSION,
            max_version: INVALID_VERSION,
            ring: vec![RingSlot::default(); RING_CAPACITY as usize],
            dirty: Dirty::default(),
        };
        for idx in 0..chunk_count {
            meta.append(ChunkList::Free, idx);
        }
        meta.dirty.header = true;
        meta
    }

    pub fn chunk_capacity_log2(&self) -> u8 {
        self.chunk_capacity_log2
    }

    pub fn chunk_capacity(&self) -> u32 {
        1 << self.chunk_capacity_log2
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn chunk(&self, idx: u32) -> &ChunkInfo {
        &self.chunks[idx as usize]
    }

    pub fn set_chunk_size(&mut self, idx: u32, size: u32) {
        assert!(size <= self.chunk_capacity());
        self.chunks[idx as usize].size = size;
        self.dirty.chunks.insert(idx);
    }

    pub fn list_head(&self, list: ChunkList) -> Option<u32> {
        let head = self.lists[list as usize].head;
        if head == INVALID_CHUNK {
            None
        } else {
            Some(head)
        }
    }

    pub fn list_tail(&self, list: ChunkList) -> Option<u32> {
        let tail = self.lists[list as usize].tail;
        if tail == INVALID_CHUNK {
            None
        } else {
            Some(tail)
        }
    }

    /// Walks a list from head to tail.
    pub fn list_iter(&self, list: ChunkList) -> impl Iterator<Item = u32> + '_ {
        let mut cur = self.list_head(list);
        std::iter::from_fn(move || {
            let idx = cur?;
            cur = self.chunks[idx as usize].next();
            Some(idx)
        })
    }

    pub fn list_len(&self, list: ChunkList) -> usize {
        self.list_iter(list).count()
    }

    /// Unlinks a chunk from whatever list it is on; it becomes owned by the
    /// caller until re-appended.
    pub fn remove(&mut self, idx: u32) {
        let (prev, next, tag) = {
            let c = &self.chunks[idx as usize];
            (c.prev, c.next, c.tag)
        };
        let list =
            ChunkList::from_tag(tag).unwrap_or_else(|| panic!("chunk {} not on any list", idx));
        if prev == INVALID_CHUNK {
            self.lists[list as usize].head = next;
        } else {
            self.chunks[prev as usize].next = next;
            self.dirty.chunks.insert(prev);
        }
        if next == INVALID_CHUNK {
            self.lists[list as usize].tail = prev;
        } else {
            self.chunks[next as usize].prev = prev;
            self.dirty.chunks.insert(next);
        }
        let c = &mut self.chunks[idx as usize];
        c.prev = INVALID_CHUNK;
        c.next = INVALID_CHUNK;
        c.tag = TAG_DETACHED;
        self.dirty.chunks.insert(idx);
        self.dirty.header = true;
    }

    /// Appends a detached chunk at the tail of a list, assigning the next
    /// insertion count of that list.
    pub fn append(&mut self, list: ChunkList, idx: u32) {
        assert_eq!(
            self.chunks[idx as usize].tag, TAG_DETACHED,
            "chunk {} already linked",
            idx
        );
        let state = &mut self.lists[list as usize];
        let count = state.next_insertion_count;
        state.next_insertion_count = (count + 1) & (MAX_CHUNKS - 1);
        let old_tail = state.tail;
        state.tail = idx;
        if old_tail == INVALID_CHUNK {
            state.head = idx;
        } else {
            self.chunks[old_tail as usize].next = idx;
            self.dirty.chunks.insert(old_tail);
        }
        let c = &mut self.chunks[idx as usize];
        c.prev = old_tail;
        c.next = INVALID_CHUNK;
        c.tag = list as u8;
        c.insertion_count = count;
        self.dirty.chunks.insert(idx);
        self.dirty.header = true;
    }

    /// Pops the head of a list, leaving the chunk detached.
    pub fn pop_head(&mut self, list: ChunkList) -> Option<u32> {
        let head = self.list_head(list)?;
        self.remove(head);
        Some(head)
    }

    /// Resolves a chunk id from a list and its insertion count; the ordering
    /// key survives reopen while raw indices do not.
    pub fn chunk_id_from_insertion_count(&self, list: ChunkList, count: u32) -> Option<u32> {
        self.list_iter(list)
            .find(|&idx| self.chunks[idx as usize].insertion_count == count)
    }

    pub fn ring_capacity(&self) -> u32 {
        self.ring.len() as u32
    }

    fn slot_index(&self, version: u64) -> usize {
        (version % u64::from(self.ring_capacity())) as usize
    }

    pub fn slot(&self, version: u64) -> &RingSlot {
        &self.ring[self.slot_index(version)]
    }

    /// The root offset recorded for `version`, if that version is still live.
    pub fn root_offset(&self, version: u64) -> Option<ChunkOffset> {
        if self.max_version == INVALID_VERSION
            || version < self.min_valid_version
            || version > self.max_version
        {
            return None;
        }
        let slot = self.slot(version);
        if slot.valid && slot.version == version {
            Some(slot.offset)
        } else {
            None
        }
    }

    pub fn version_is_valid(&self, version: u64) -> bool {
        self.root_offset(version).is_some()
    }

    pub fn set_root_offset(&mut self, version: u64, offset: ChunkOffset) {
        let idx = self.slot_index(version);
        self.ring[idx] = RingSlot {
            offset,
            valid: true,
            version,
        };
        self.dirty.slots.insert(idx as u32);
    }

    pub fn invalidate_slot(&mut self, version: u64) {
        let idx = self.slot_index(version);
        if self.ring[idx].version == version {
            self.ring[idx].valid = false;
            self.dirty.slots.insert(idx as u32);
        }
    }

    /// Invalidates every slot tagged with a version in
    /// `(from_exclusive, to_inclusive]`. One pass over the ring, however
    /// wide the version range is.
    pub fn invalidate_versions_in(&mut self, from_exclusive: u64, to_inclusive: u64) {
        for idx in 0..self.ring.len() {
            let slot = &self.ring[idx];
            if slot.valid && slot.version > from_exclusive && slot.version <= to_inclusive {
                self.ring[idx].valid = false;
                self.dirty.slots.insert(idx as u32);
            }
        }
    }

    pub fn mark_window_dirty(&mut self) {
        self.dirty.header = true;
    }

    /// First valid version at or after `min_valid_version`.
    pub fn earliest_version(&self) -> Option<u64> {
        if self.max_version == INVALID_VERSION {
            return None;
        }
        (self.min_valid_version..=self.max_version).find(|&v| self.version_is_valid(v))
    }

    fn ring_base(chunk_count: u32) -> usize {
        let end = HEADER_LEN + CHUNK_ENTRY_LEN * chunk_count as usize;
        (end + 15) & !15
    }

    /// Bytes one serialized copy occupies, before page rounding.
    pub fn copy_len(chunk_count: u32) -> usize {
        Self::ring_base(chunk_count) + SLOT_LEN * RING_CAPACITY as usize + 8
    }

    /// Bytes the whole region occupies: selector page plus two page-aligned
    /// copies. Never less than 24 KiB.
    pub fn region_len(chunk_count: u32) -> u64 {
        let page = DISK_PAGE_SIZE as u64;
        let copy = (Self::copy_len(chunk_count) as u64 + page - 1) & !(page - 1);
        (page + 2 * copy).max(24 * 1024)
    }

    /// Serializes the fixed header, generation stamp included, into the
    /// first [`raw::HEADER_LEN`] bytes of `out`.
    pub fn encode_header_into(&self, generation: u64, out: &mut [u8]) {
        self.encode_header(generation, out);
    }

    fn encode_header(&self, generation: u64, out: &mut [u8]) {
        out[..HEADER_LEN].fill(0);
        out[OFF_MAGIC..OFF_MAGIC + 8].copy_from_slice(&MAGIC);
        LittleEndian::write_u32(&mut out[OFF_FORMAT..], FORMAT_VERSION);
        out[OFF_CAPACITY_LOG2] = self.chunk_capacity_log2;
        LittleEndian::write_u32(&mut out[OFF_CHUNK_COUNT..], self.chunk_count());
        LittleEndian::write_u32(&mut out[OFF_COPY_LEN..], Self::copy_len(self.chunk_count()) as u32);
        LittleEndian::write_u64(&mut out[OFF_GENERATION..], generation);
        LittleEndian::write_u64(&mut out[OFF_HISTORY_LEN..], self.history_length);
        LittleEndian::write_u64(&mut out[OFF_MIN_VALID..], self.min_valid_version);
        LittleEndian::write_u64(&mut out[OFF_MAX_VERSION..], self.max_version);
        for (i, state) in self.lists.iter().enumerate() {
            let base = OFF_LISTS + i * 12;
            LittleEndian::write_u32(&mut out[base..], state.head);
            LittleEndian::write_u32(&mut out[base + 4..], state.tail);
            LittleEndian::write_u32(&mut out[base + 8..], state.next_insertion_count);
        }
    }

    fn encode_chunk(&self, idx: u32, out: &mut [u8]) {
        let c = &self.chunks[idx as usize];
        out[..CHUNK_ENTRY_LEN].fill(0);
        LittleEndian::write_u32(&mut out[0..], c.insertion_count);
        LittleEndian::write_u32(&mut out[4..], c.prev);
        LittleEndian::write_u32(&mut out[8..], c.next);
        LittleEndian::write_u32(&mut out[12..], c.size);
        out[16] = c.tag;
    }

    fn encode_slot(&self, idx: u32, out: &mut [u8]) {
        let slot = &self.ring[idx as usize];
        let mut word = slot.offset.to_raw();
        if slot.valid {
            word |= SLOT_VALID_BIT;
        }
        LittleEndian::write_u64(&mut out[0..], word);
        LittleEndian::write_u64(&mut out[8..], slot.version);
    }

    /// Serializes a whole copy, generation stamps included.
    pub fn encode_full(&self, generation: u64) -> Vec<u8> {
        let chunk_count = self.chunk_count();
        let len = Self::copy_len(chunk_count);
        let mut out = vec![0u8; len];
        self.encode_header(generation, &mut out);
        for idx in 0..chunk_count {
            let base = HEADER_LEN + idx as usize * CHUNK_ENTRY_LEN;
            self.encode_chunk(idx, &mut out[base..]);
        }
        let ring_base = Self::ring_base(chunk_count);
        for idx in 0..RING_CAPACITY {
            let base = ring_base + idx as usize * SLOT_LEN;
            self.encode_slot(idx, &mut out[base..]);
        }
        LittleEndian::write_u64(&mut out[len - 8..], generation);
        out
    }

    /// Parses one copy, validating magic, format, generation stamps and the
    /// intrusive list structure.
    pub fn decode(buf: &[u8]) -> Result<(DbMetadata, u64), MetadataError> {
        if buf.len() < HEADER_LEN + 8 {
            return Err(MetadataError::Corrupt("metadata copy too short".into()));
        }
        if buf[OFF_MAGIC..OFF_MAGIC + 8] != MAGIC {
            return Err(MetadataError::BadMagic);
        }
        let format = LittleEndian::read_u32(&buf[OFF_FORMAT..]);
        if format != FORMAT_VERSION {
            return Err(MetadataError::UnsupportedVersion(format));
        }
        let chunk_count = LittleEndian::read_u32(&buf[OFF_CHUNK_COUNT..]);
        if chunk_count == 0 || chunk_count > MAX_CHUNKS {
            return Err(MetadataError::Corrupt(format!(
                "chunk count {} out of range",
                chunk_count
            )));
        }
        let copy_len = Self::copy_len(chunk_count);
        if LittleEndian::read_u32(&buf[OFF_COPY_LEN..]) as usize != copy_len
            || buf.len() < copy_len
        {
            return Err(MetadataError::Corrupt("copy length mismatch".into()));
        }
        let generation = LittleEndian::read_u64(&buf[OFF_GENERATION..]);
        let tail_generation = LittleEndian::read_u64(&buf[copy_len - 8..copy_len]);
        if generation != tail_generation {
            return Err(MetadataError::Corrupt("torn metadata copy".into()));
        }

        let mut lists = [ListState::default(); 3];
        for (i, state) in lists.iter_mut().enumerate() {
            let base = OFF_LISTS + i * 12;
            state.head = LittleEndian::read_u32(&buf[base..]);
            state.tail = LittleEndian::read_u32(&buf[base + 4..]);
            state.next_insertion_count = LittleEndian::read_u32(&buf[base + 8..]);
        }
        let mut chunks = Vec::with_capacity(chunk_count as usize);
        for idx in 0..chunk_count as usize {
            let base = HEADER_LEN + idx * CHUNK_ENTRY_LEN;
            chunks.push(ChunkInfo {
                insertion_count: LittleEndian::read_u32(&buf[base..]),
                prev: LittleEndian::read_u32(&buf[base + 4..]),
                next: LittleEndian::read_u32(&buf[base + 8..]),
                size: LittleEndian::read_u32(&buf[base + 12..]),
                tag: buf[base + 16],
            });
        }
        let ring_base = Self::ring_base(chunk_count);
        let mut ring = Vec::with_capacity(RING_CAPACITY as usize);
        for idx in 0..RING_CAPACITY as usize {
            let base = ring_base + idx * SLOT_LEN;
            let word = LittleEndian::read_u64(&buf[base..]);
            let offset = ChunkOffset::from_raw(word & !SLOT_VALID_BIT).ok_or_else(|| {
                MetadataError::Corrupt(format!("ring slot {} holds a bad offset", idx))
            })?;
            ring.push(RingSlot {
                offset,
                valid: word & SLOT_VALID_BIT != 0,
                version: LittleEndian::read_u64(&buf[base + 8..]),
            });
        }

        let meta = DbMetadata {
            chunk_capacity_log2: buf[OFF_CAPACITY_LOG2],
            chunks,
            lists,
            history_length: LittleEndian::read_u64(&buf[OFF_HISTORY_LEN..]),
            min_valid_version: LittleEndian::read_u64(&buf[OFF_MIN_VALID..]),
            max_version: LittleEndian::read_u64(&buf[OFF_MAX_VERSION..]),
            ring,
            dirty: Dirty::default(),
        };
        meta.check_lists()?;
        Ok((meta, generation))
    }

    fn check_lists(&self) -> Result<(), MetadataError> {
        let mut seen = vec![false; self.chunks.len()];
        for list in [ChunkList::Free, ChunkList::Fast, ChunkList::Slow] {
            let mut prev = INVALID_CHUNK;
            let mut cur = self.lists[list as usize].head;
            while cur != INVALID_CHUNK {
                let c = self
                    .chunks
                    .get(cur as usize)
                    .ok_or_else(|| MetadataError::Corrupt(format!("list points past table: {}", cur)))?;
                if seen[cur as usize] {
                    return Err(MetadataError::Corrupt(format!("chunk {} linked twice", cur)));
                }
                seen[cur as usize] = true;
                if c.tag != list as u8 {
                    return Err(MetadataError::Corrupt(format!(
                        "chunk {} tag disagrees with its list",
                        cur
                    )));
                }
                if c.prev != prev {
                    return Err(MetadataError::Corrupt(format!("chunk {} back link broken", cur)));
                }
                prev = cur;
                cur = c.next;
            }
            if self.lists[list as usize].tail != prev {
                return Err(MetadataError::Corrupt("list tail disagrees with walk".into()));
            }
        }
        Ok(())
    }

    /// Serialized `(range_start, bytes)` pairs for everything dirtied since
    /// the last take, header and generation stamps excluded.
    pub fn take_dirty_ranges(&mut self) -> Vec<(usize, Vec<u8>)> {
        let chunk_count = self.chunk_count();
        let ring_base = Self::ring_base(chunk_count);
        let mut out = Vec::with_capacity(1 + self.dirty.chunks.len() + self.dirty.slots.len());
        for &idx in &self.dirty.chunks {
            let mut buf = vec![0u8; CHUNK_ENTRY_LEN];
            self.encode_chunk(idx, &mut buf);
            out.push((HEADER_LEN + idx as usize * CHUNK_ENTRY_LEN, buf));
        }
        for &idx in &self.dirty.slots {
            let mut buf = vec![0u8; SLOT_LEN];
            self.encode_slot(idx, &mut buf);
            out.push((ring_base + idx as usize * SLOT_LEN, buf));
        }
        self.dirty.clear();
        out
    }
}

/// Byte offsets used by raw readers of a serialized copy.
pub mod raw {
    use super::*;

    pub const GENERATION: usize = OFF_GENERATION;
    pub const HISTORY_LEN: usize = OFF_HISTORY_LEN;
    pub const MIN_VALID: usize = OFF_MIN_VALID;
    pub const MAX_VERSION: usize = OFF_MAX_VERSION;
    pub const CHUNK_COUNT: usize = OFF_CHUNK_COUNT;
    pub const HEADER_LEN: usize = super::HEADER_LEN;

    pub fn tail_generation_pos(chunk_count: u32) -> usize {
        DbMetadata::copy_len(chunk_count) - 8
    }

    pub fn slot_pos(chunk_count: u32, slot: u32) -> usize {
        DbMetadata::ring_base(chunk_count) + slot as usize * SLOT_LEN
    }

    pub fn decode_slot(buf: &[u8]) -> Option<RingSlot> {
        let word = LittleEndian::read_u64(&buf[0..8]);
        Some(RingSlot {
            offset: ChunkOffset::from_raw(word & !SLOT_VALID_BIT)?,
            valid: word & SLOT_VALID_BIT != 0,
            version: LittleEndian::read_u64(&buf[8..16]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> DbMetadata {
        DbMetadata::create(8, 20, 1000)
    }

    #[test]
    fn create_puts_all_chunks_on_free_list() {
        let m = meta();
        let free: Vec<u32> = m.list_iter(ChunkList::Free).collect();
        assert_eq!(free, (0..8).collect::<Vec<u32>>());
        assert_eq!(m.list_len(ChunkList::Fast), 0);
        assert_eq!(m.list_len(ChunkList::Slow), 0);
    }

    #[test]
    fn append_assigns_monotonic_insertion_counts() {
        let mut m = meta();
        for _ in 0..3 {
            let idx = m.pop_head(ChunkList::Free).unwrap();
            m.append(ChunkList::Fast, idx);
        }
        let counts: Vec<u32> = m
            .list_iter(ChunkList::Fast)
            .map(|i| m.chunk(i).insertion_count)
            .collect();
        assert_eq!(counts, vec![0, 1, 2]);
        assert_eq!(m.chunk_id_from_insertion_count(ChunkList::Fast, 1), Some(1));
        assert_eq!(m.chunk_id_from_insertion_count(ChunkList::Fast, 9), None);
    }

    #[test]
    fn remove_relinks_neighbours() {
        let mut m = meta();
        m.remove(3);
        let free: Vec<u32> = m.list_iter(ChunkList::Free).collect();
        assert_eq!(free, vec![0, 1, 2, 4, 5, 6, 7]);
        m.append(ChunkList::Free, 3);
        assert_eq!(m.list_tail(ChunkList::Free), Some(3));
    }

    #[test]
    fn ring_slot_tags_versions() {
        let mut m = meta();
        m.min_valid_version = 0;
        m.max_version = 0;
        m.set_root_offset(0, ChunkOffset::new(1, 4096));
        assert_eq!(m.root_offset(0), Some(ChunkOffset::new(1, 4096)));

        // A colliding slot written for a much later version must not answer
        // for the old one.
        let wrapped = u64::from(RING_CAPACITY);
        m.max_version = wrapped;
        m.set_root_offset(wrapped, ChunkOffset::new(2, 0));
        m.min_valid_version = 0;
        assert_eq!(m.root_offset(0), None);
        assert_eq!(m.root_offset(wrapped), Some(ChunkOffset::new(2, 0)));
    }

    #[test]
    fn earliest_version_skips_holes() {
        let mut m = meta();
        m.min_valid_version = 5;
        m.max_version = 9;
        m.set_root_offset(7, ChunkOffset::new(0, 0));
        m.set_root_offset(9, ChunkOffset::new(0, 4096));
        assert_eq!(m.earliest_version(), Some(7));
    }

    #[test]
    fn full_encode_decode_round_trips() {
        let mut m = meta();
        for _ in 0..2 {
            let idx = m.pop_head(ChunkList::Free).unwrap();
            m.append(ChunkList::Fast, idx);
        }
        m.set_chunk_size(0, 8192);
        m.min_valid_version = 1;
        m.max_version = 4;
        m.set_root_offset(4, ChunkOffset::new(0, 4096));

        let buf = m.encode_full(17);
        let (decoded, generation) = DbMetadata::decode(&buf).unwrap();
        assert_eq!(generation, 17);
        assert_eq!(decoded.chunk_count(), 8);
        assert_eq!(decoded.chunk(0).size, 8192);
        assert_eq!(
            decoded.list_iter(ChunkList::Fast).collect::<Vec<_>>(),
            m.list_iter(ChunkList::Fast).collect::<Vec<_>>()
        );
        assert_eq!(decoded.root_offset(4), Some(ChunkOffset::new(0, 4096)));
        assert_eq!(decoded.history_length, 1000);
    }

    #[test]
    fn torn_copy_is_rejected() {
        let m = meta();
        let mut buf = m.encode_full(3);
        let pos = raw::tail_generation_pos(8);
        LittleEndian::write_u64(&mut buf[pos..], 2);
        assert!(matches!(
            DbMetadata::decode(&buf),
            Err(MetadataError::Corrupt(_))
        ));
    }

    #[test]
    fn broken_list_is_rejected() {
        let mut m = meta();
        let idx = m.pop_head(ChunkList::Free).unwrap();
        m.append(ChunkList::Fast, idx);
        let mut buf = m.encode_full(1);
        // Point the fast head's next field at a chunk that is linked on the
        // free list.
        let base = HEADER_LEN + idx as usize * CHUNK_ENTRY_LEN;
        LittleEndian::write_u32(&mut buf[base + 8..], 5);
        assert!(matches!(
            DbMetadata::decode(&buf),
            Err(MetadataError::Corrupt(_))
        ));
    }

    #[test]
    fn dirty_ranges_cover_mutations() {
        let mut m = meta();
        let _ = m.take_dirty_ranges();
        m.set_chunk_size(2, 4096);
        m.set_root_offset(0, ChunkOffset::new(2, 0));
        let ranges = m.take_dirty_ranges();
        assert_eq!(ranges.len(), 2);
        assert!(m.take_dirty_ranges().is_empty());
    }
}
