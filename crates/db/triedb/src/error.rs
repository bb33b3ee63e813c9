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

use std::{fmt, io};

/// Database errors surfaced to callers.
#[derive(Debug)]
pub enum DbError {
    /// The requested version fell out of the retention window, or was
    /// invalidated by a rewind or a version move.
    VersionNoLongerExists,
    /// The key is not present at the requested version.
    KeyMismatch,
    /// A persisted node failed to parse; a healthy pool never produces this.
    BadNode,
    /// Propagated operating system error.
    Io(io::Error),
    /// The free list is exhausted and compaction could not free a chunk.
    OutOfChunks,
}

impl DbError {
    /// Lookup misses are normal outcomes; everything else indicates a
    /// damaged or exhausted pool.
    pub fn is_miss(&self) -> bool {
        matches!(self, DbError::VersionNoLongerExists | DbError::KeyMismatch)
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match *self {
            DbError::VersionNoLongerExists => write!(f, "version no longer exists"),
            DbError::KeyMismatch => write!(f, "key not found"),
            DbError::BadNode => write!(f, "persisted node failed to parse"),
            DbError::Io(ref err) => write!(f, "io error: {}", err),
            DbError::OutOfChunks => write!(f, "storage pool is out of chunks"),
        }
    }
}

impl From<io::Error> for DbError {
    fn from(err: io::Error) -> Self {
        DbError::Io(err)
    }
}

impl From<triedb_pool::Error> for DbError {
    fn from(err: triedb_pool::Error) -> Self {
        match err {
            triedb_pool::Error::Io(err) => DbError::Io(err),
            triedb_pool::Error::OutOfChunks => DbError::OutOfChunks,
            triedb_pool::Error::Metadata(_) => DbError::BadNode,
        }
    }
}
