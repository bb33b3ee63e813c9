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

//! Injected digest computations.
//!
//! The trie itself does not interpret keys or hash anything; the state
//! machine hands it a [`Compute`] which produces the ≤32-byte `data` of each
//! node. Two digests exist per node: [`Compute::compute`] digests the node's
//! children and value (its own path excluded, so a copied sub-trie keeps its
//! digest wherever it is grafted), and [`Compute::compute_branch`] wraps
//! that digest with the node's path segment for inclusion in the parent.
//! Encodings shorter than 32 bytes are inlined instead of hashed, the
//! empty-trie digest being `keccak(rlp(""))`.

use ethereum_types::H256;
use keccak_hash::{keccak, KECCAK_NULL_RLP};
use rlp::RlpStream;

use crate::nibbles::NibbleSlice;
use crate::node::{Data, Node};

/// Digest of the empty trie: `keccak256(rlp(<>))`.
pub const EMPTY_TRIE_ROOT: H256 = KECCAK_NULL_RLP;

/// A node digest computation.
pub trait Compute: Send + Sync {
    /// The node's own digest, stored as `node.data`. Children's entry
    /// digests must already be in place.
    fn compute(&self, node: &Node) -> Data;

    /// The digest a parent stores in its child entry for this node: the
    /// node's digest wrapped with its path segment.
    fn compute_branch(&self, node: &Node) -> Data;
}

/// Keccak/RLP Merkle digests.
#[derive(Clone, Copy, Default)]
pub struct MerkleCompute;

/// No digests at all; `data` stays empty.
#[derive(Clone, Copy, Default)]
pub struct EmptyCompute;

/// Hex-prefix ("compact") encoding of a nibble run, with a terminator flag
/// marking leaves.
pub fn hex_prefix(path: NibbleSlice, leaf: bool) -> Vec<u8> {
    let odd = path.len() % 2 == 1;
    let mut out = Vec::with_capacity(path.len() / 2 + 1);
    let mut first = if leaf { 0x20u8 } else { 0x00 };
    let mut i = 0;
    if odd {
        first |= 0x10 | path.at(0);
        i = 1;
    }
    out.push(first);
    while i < path.len() {
        out.push(path.at(i) << 4 | path.at(i + 1));
        i += 2;
    }
    out
}

fn hash_or_inline(encoded: &[u8]) -> Data {
    if encoded.len() < 32 {
        Data::from_slice(encoded)
    } else {
        Data::from_slice(keccak(encoded).as_bytes())
    }
}

// A digest of exactly 32 bytes is a hash; anything shorter is itself a
// complete RLP item and is inlined raw.
fn append_digest(stream: &mut RlpStream, data: &Data) {
    if data.is_empty() {
        stream.append_empty_data();
    } else if data.len() == 32 {
        stream.append(&data.as_slice().to_vec());
    } else {
        stream.append_raw(data.as_slice(), 1);
    }
}

impl Compute for MerkleCompute {
    fn compute(&self, node: &Node) -> Data {
        let mut stream = RlpStream::new_list(17);
        for branch in 0u8..16 {
            match node.child(branch) {
                Some(child) => append_digest(&mut stream, &child.data),
                None => {
                    stream.append_empty_data();
                }
            }
        }
        match node.value {
            Some(ref value) => {
                stream.append(value);
            }
            None => {
                stream.append_empty_data();
            }
        }
        hash_or_inline(&stream.out())
    }

    fn compute_branch(&self, node: &Node) -> Data {
        let mut stream = RlpStream::new_list(2);
        stream.append(&hex_prefix(node.path.as_slice(), node.is_leaf()));
        append_digest(&mut stream, &node.data);
        hash_or_inline(&stream.out())
    }
}

impl Compute for EmptyCompute {
    fn compute(&self, _node: &Node) -> Data {
        Data::empty()
    }

    fn compute_branch(&self, _node: &Node) -> Data {
        Data::empty()
    }
}

/// Finalizes a root digest to 32 bytes: short inline encodings are hashed,
/// an absent root is the empty-trie digest.
pub fn finalize_root(data: Option<&Data>) -> H256 {
    match data {
        None => EMPTY_TRIE_ROOT,
        Some(data) if data.len() == 32 => H256::from_slice(data.as_slice()),
        Some(data) => keccak(data.as_slice()),
    }
}
