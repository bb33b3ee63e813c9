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

//! Append-only node stream over one chunk list.
//!
//! Every record starts on a disk-page boundary and is zero-padded to whole
//! pages; a record never spans chunks. When the current chunk cannot take
//! the next record the writer seals it (final size recorded in the chunk
//! table) and continues at offset 0 of a chunk freshly linked at the tail
//! of its list.

use triedb_pool::{round_up_to_page, ChunkList, ChunkOffset, Error as PoolError, StoragePool};

/// A stateful appender bound to the fast or slow list.
pub struct NodeWriter {
    list: ChunkList,
    chunk: Option<u32>,
    pos: u32,
}

impl NodeWriter {
    /// Positions the writer after the last byte written to its list's tail
    /// chunk, or leaves it unbacked until the first append.
    pub fn restore(pool: &StoragePool, list: ChunkList) -> NodeWriter {
        let meta = pool.metadata();
        let (chunk, pos) = match meta.list_tail(list) {
            Some(tail) => (Some(tail), meta.chunk(tail).size),
            None => (None, 0),
        };
        NodeWriter { list, chunk, pos }
    }

    pub fn list(&self) -> ChunkList {
        self.list
    }

    /// The position the next append will write to, or `INVALID` while the
    /// writer has no chunk yet.
    pub fn offset(&self) -> ChunkOffset {
        match self.chunk {
            Some(chunk) => ChunkOffset::new(chunk, self.pos),
            None => ChunkOffset::INVALID,
        }
    }

    /// Re-seats the stream, used by rewind.
    pub(crate) fn set_position(&mut self, chunk: u32, pos: u32) {
        self.chunk = Some(chunk);
        self.pos = pos;
    }

    /// Makes sure the current chunk can take `upcoming` more bytes; if not,
    /// seals it and allocates a fresh chunk at the tail of the list.
    fn ensure_space(&mut self, pool: &StoragePool, upcoming: u32) -> Result<(), PoolError> {
        assert!(upcoming <= pool.chunk_capacity(), "record larger than a chunk");
        if let Some(chunk) = self.chunk {
            if self.pos + upcoming <= pool.chunk_capacity() {
                return Ok(());
            }
            trace!(
                target: "triedb",
                "sealing chunk {} of {:?} list at {} bytes",
                chunk, self.list, self.pos
            );
            pool.metadata_mut().set_chunk_size(chunk, self.pos);
        }
        let fresh = pool.allocate_chunk()?;
        pool.metadata_mut().append(self.list, fresh);
        self.chunk = Some(fresh);
        self.pos = 0;
        Ok(())
    }

    /// Appends one record, zero-padded to whole pages, and returns where it
    /// landed.
    pub fn append(&mut self, pool: &StoragePool, bytes: &[u8]) -> Result<ChunkOffset, PoolError> {
        let padded = round_up_to_page(bytes.len() as u32);
        self.ensure_space(pool, padded)?;
        let chunk = self.chunk.expect("ensure_space leaves a current chunk");
        let offset = ChunkOffset::new(chunk, self.pos);
        let mut page_buf = bytes.to_vec();
        page_buf.resize(padded as usize, 0);
        pool.write(offset, &page_buf)?;
        self.pos += padded;
        pool.metadata_mut().set_chunk_size(chunk, self.pos);
        Ok(offset)
    }
}
