//! Merkle root over a set of asset hashes
//!
//! Leaves are sorted by asset path and paired bottom-up with
//! `sha256(left || right)` over the hex strings. An odd trailing node is
//! promoted to the next level unchanged. The empty set hashes to
//! `sha256("")`. Other producers compute the same root, so the algorithm is
//! part of the wire contract.

use crate::hash::sha256_hex;

/// A leaf: asset path and its content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleLeaf {
    /// Logical asset path, used only for ordering
    pub path: String,
    /// Hex content hash
    pub hash: String,
}

impl MerkleLeaf {
    /// Create a leaf
    pub fn new(path: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
        }
    }
}

/// Compute the Merkle root for a set of leaves in any order
pub fn merkle_root<I>(leaves: I) -> String
where
    I: IntoIterator<Item = MerkleLeaf>,
{
    let mut leaves: Vec<MerkleLeaf> = leaves.into_iter().collect();
    leaves.sort_by(|a, b| a.path.cmp(&b.path));

    let mut level: Vec<String> = leaves.into_iter().map(|leaf| leaf.hash).collect();
    if level.is_empty() {
        return sha256_hex(b"");
    }

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                if let [left, right] = pair {
                    sha256_hex(format!("{left}{right}").as_bytes())
                } else {
                    // Odd node: promoted unchanged
                    pair.concat()
                }
            })
            .collect();
    }

    level.swap_remove(0)
}
