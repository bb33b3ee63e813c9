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

//! Chunk-partitioned storage pool and its persistent metadata region.
//!
//! A pool is a fixed array of equally sized chunks over one or more backing
//! files or block devices, addressed by `(chunk_id, offset)` pairs. Chunk
//! lifecycle (free/fast/slow lists), the root-offset ring and the history
//! window live in the double-buffered metadata region at the head of the
//! first device.

#[macro_use]
extern crate log;

pub mod chunk_offset;
pub mod metadata;
pub mod pool;

pub use chunk_offset::{
    round_up_to_page, ChunkOffset, DISK_PAGE_BITS, DISK_PAGE_SIZE, MAX_CHUNKS, MAX_CHUNK_CAPACITY,
};
pub use metadata::{
    ChunkInfo, ChunkList, DbMetadata, MetadataError, RingSlot, INVALID_VERSION,
    MAX_HISTORY_LENGTH, MIN_HISTORY_LENGTH, RING_CAPACITY,
};
pub use pool::{Error, MetaSnapshot, Mode, Options, StoragePool};
