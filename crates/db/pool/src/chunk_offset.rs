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

//! 48-bit on-disk addresses: 20 bits of chunk id, 28 bits of byte offset
//! within the chunk.

use std::fmt;

/// Number of bits in a chunk id.
pub const CHUNK_ID_BITS: u32 = 20;
/// Number of bits in an in-chunk byte offset.
pub const CHUNK_OFFSET_BITS: u32 = 28;
/// Maximum number of chunks a pool can address.
pub const MAX_CHUNKS: u32 = 1 << CHUNK_ID_BITS;
/// Maximum chunk capacity in bytes addressable by an in-chunk offset.
pub const MAX_CHUNK_CAPACITY: u32 = 1 << CHUNK_OFFSET_BITS;
/// log2 of the disk page size. Write positions are always page aligned.
pub const DISK_PAGE_BITS: u32 = 12;
/// The disk page size in bytes.
pub const DISK_PAGE_SIZE: u32 = 1 << DISK_PAGE_BITS;

const ID_MASK: u32 = MAX_CHUNKS - 1;
const OFFSET_MASK: u32 = MAX_CHUNK_CAPACITY - 1;

/// The on-disk address of a persisted record: `(chunk_id, offset_in_chunk)`
/// packed into the low 48 bits of a `u64` on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkOffset {
    id: u32,
    offset: u32,
}

impl ChunkOffset {
    /// The distinguished "points nowhere" address: all 48 bits set.
    pub const INVALID: ChunkOffset = ChunkOffset {
        id: ID_MASK,
        offset: OFFSET_MASK,
    };

    pub fn new(id: u32, offset: u32) -> ChunkOffset {
        assert!(id <= ID_MASK, "chunk id out of range: {}", id);
        assert!(offset <= OFFSET_MASK, "chunk offset out of range: {}", offset);
        ChunkOffset { id, offset }
    }

    pub fn id(self) -> u32 {
        self.id
    }

    pub fn offset(self) -> u32 {
        self.offset
    }

    pub fn is_valid(self) -> bool {
        self != ChunkOffset::INVALID
    }

    /// Packs into the low 48 bits of a `u64`; the upper 16 bits are zero.
    pub fn to_raw(self) -> u64 {
        (u64::from(self.id) << CHUNK_OFFSET_BITS) | u64::from(self.offset)
    }

    /// Inverse of `to_raw`. Raw values with any of the upper 16 bits set are
    /// rejected as corrupt.
    pub fn from_raw(raw: u64) -> Option<ChunkOffset> {
        if raw >> (CHUNK_ID_BITS + CHUNK_OFFSET_BITS) != 0 {
            return None;
        }
        Some(ChunkOffset {
            id: (raw >> CHUNK_OFFSET_BITS) as u32 & ID_MASK,
            offset: raw as u32 & OFFSET_MASK,
        })
    }

    /// Advances the in-chunk offset, staying within the same chunk. `None`
    /// when the result would not be addressable.
    pub fn add_to_offset(self, delta: u32) -> Option<ChunkOffset> {
        debug_assert!(self.is_valid());
        let offset = self.offset.checked_add(delta)?;
        if offset > OFFSET_MASK {
            return None;
        }
        Some(ChunkOffset { id: self.id, offset })
    }

    /// Rounds the in-chunk offset up to a multiple of `1 << bits`.
    pub fn round_up_align(self, bits: u32) -> ChunkOffset {
        let mask = (1u32 << bits) - 1;
        ChunkOffset {
            id: self.id,
            offset: (self.offset + mask) & !mask,
        }
    }

    /// Rounds the in-chunk offset down to a multiple of `1 << bits`.
    pub fn round_down_align(self, bits: u32) -> ChunkOffset {
        let mask = (1u32 << bits) - 1;
        ChunkOffset {
            id: self.id,
            offset: self.offset & !mask,
        }
    }
}

impl fmt::Debug for ChunkOffset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}:{}", self.id, self.offset)
        } else {
            write!(f, "invalid")
        }
    }
}

impl fmt::Display for ChunkOffset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Rounds a length up to a whole number of disk pages.
pub fn round_up_to_page(len: u32) -> u32 {
    (len + DISK_PAGE_SIZE - 1) & !(DISK_PAGE_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip() {
        let off = ChunkOffset::new(3, 0x1234);
        assert_eq!(ChunkOffset::from_raw(off.to_raw()), Some(off));
        assert_eq!(off.id(), 3);
        assert_eq!(off.offset(), 0x1234);

        let max = ChunkOffset::new(ID_MASK - 1, OFFSET_MASK - 1);
        assert_eq!(ChunkOffset::from_raw(max.to_raw()), Some(max));
    }

    #[test]
    fn invalid_is_all_ones() {
        assert_eq!(ChunkOffset::INVALID.to_raw(), (1u64 << 48) - 1);
        assert!(!ChunkOffset::INVALID.is_valid());
        assert!(ChunkOffset::new(0, 0).is_valid());
    }

    #[test]
    fn rejects_high_bits() {
        assert_eq!(ChunkOffset::from_raw(1u64 << 48), None);
        assert_eq!(ChunkOffset::from_raw(u64::MAX), None);
    }

    #[test]
    fn add_to_offset_checks_limit() {
        let off = ChunkOffset::new(1, OFFSET_MASK - 8);
        assert_eq!(off.add_to_offset(8), Some(ChunkOffset::new(1, OFFSET_MASK)));
        assert_eq!(off.add_to_offset(9), None);
    }

    #[test]
    fn alignment() {
        let off = ChunkOffset::new(0, 4097);
        assert_eq!(off.round_up_align(DISK_PAGE_BITS).offset(), 8192);
        assert_eq!(off.round_down_align(DISK_PAGE_BITS).offset(), 4096);
        let aligned = ChunkOffset::new(0, 8192);
        assert_eq!(aligned.round_up_align(DISK_PAGE_BITS).offset(), 8192);
    }

    #[test]
    #[should_panic]
    fn rejects_out_of_range_offset() {
        let _ = ChunkOffset::new(0, MAX_CHUNK_CAPACITY);
    }
}
