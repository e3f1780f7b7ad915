//! Hash primitives for the world-state accumulators.
//!
//! All tree nodes are 32-byte BLAKE3 digests. Leaf and internal hashes are
//! domain-separated with single-byte prefixes so a leaf can never be
//! reinterpreted as an internal node (second-preimage hardening).
//!
//! The [`zero_hashes`] table gives the digest of a fully-empty subtree at
//! every level, which is how the accumulators avoid materializing the
//! `2^D` default leaves.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MerkleError, MerkleResult};

/// The length of hash digests (32 bytes = 256 bits).
pub const HASH_LENGTH: usize = 32;

/// Domain separation prefix for leaf nodes.
const LEAF_PREFIX: &[u8] = &[0x00];

/// Domain separation prefix for internal nodes.
const INTERNAL_PREFIX: &[u8] = &[0x01];

/// A 256-bit hash value.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HashValue([u8; HASH_LENGTH]);

impl HashValue {
    /// Create a hash value from raw bytes.
    pub const fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// The all-zero hash value.
    pub const fn zero() -> Self {
        Self([0u8; HASH_LENGTH])
    }

    /// Create a hash value from a byte slice.
    pub fn from_slice(bytes: &[u8]) -> MerkleResult<Self> {
        if bytes.len() != HASH_LENGTH {
            return Err(MerkleError::InvalidHashLength {
                expected: HASH_LENGTH,
                got: bytes.len(),
            });
        }
        let mut out = [0u8; HASH_LENGTH];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Get the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Check whether this is the all-zero value.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LENGTH]
    }

    /// Interpret the low 8 bytes as a little-endian integer.
    ///
    /// Used to derive sparse-tree slot indexes from nullifier values.
    pub fn low_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(buf)
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashValue({})", hex::encode(&self.0[..8]))
    }
}

impl AsRef<[u8]> for HashValue {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hash raw leaf data with the leaf domain prefix.
pub fn hash_leaf(data: &[u8]) -> HashValue {
    let mut hasher = blake3::Hasher::new();
    hasher.update(LEAF_PREFIX);
    hasher.update(data);
    HashValue::new(*hasher.finalize().as_bytes())
}

/// Hash two child digests into their parent with the internal prefix.
pub fn hash_internal(left: &HashValue, right: &HashValue) -> HashValue {
    let mut hasher = blake3::Hasher::new();
    hasher.update(INTERNAL_PREFIX);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    HashValue::new(*hasher.finalize().as_bytes())
}

lazy_static::lazy_static! {
    /// Hash of an empty (never-written) leaf slot.
    static ref EMPTY_LEAF: HashValue = {
        let mut bytes = [0u8; HASH_LENGTH];
        bytes.copy_from_slice(blake3::hash(b"SESAME_EMPTY_LEAF").as_bytes());
        HashValue::new(bytes)
    };
}

/// Hash of an empty leaf slot.
pub fn empty_leaf_hash() -> HashValue {
    *EMPTY_LEAF
}

/// Precompute the empty-subtree digest for every level up to `depth`.
///
/// Index 0 is the empty leaf, index `depth` is the root of a fully-empty
/// tree. All accumulators derive default nodes from this table instead of
/// storing them.
pub fn zero_hashes(depth: usize) -> Vec<HashValue> {
    let mut table = Vec::with_capacity(depth + 1);
    table.push(empty_leaf_hash());
    for level in 0..depth {
        let child = table[level];
        table.push(hash_internal(&child, &child));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_and_internal_domains_differ() {
        let a = HashValue::new([7u8; 32]);
        // A leaf over the concatenated children must not equal the internal hash.
        let mut concat = Vec::new();
        concat.extend_from_slice(a.as_bytes());
        concat.extend_from_slice(a.as_bytes());
        assert_ne!(hash_leaf(&concat), hash_internal(&a, &a));
    }

    #[test]
    fn test_from_slice_length_check() {
        assert!(HashValue::from_slice(&[0u8; 32]).is_ok());
        assert!(HashValue::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_zero_hash_table() {
        let table = zero_hashes(4);
        assert_eq!(table.len(), 5);
        assert_eq!(table[0], empty_leaf_hash());
        for level in 1..=4 {
            assert_eq!(
                table[level],
                hash_internal(&table[level - 1], &table[level - 1])
            );
        }
    }

    #[test]
    fn test_display_roundtrip() {
        let h = hash_leaf(b"leaf");
        let s = h.to_string();
        assert_eq!(s.len(), 64);
        assert_eq!(HashValue::from_slice(&hex::decode(s).unwrap()).unwrap(), h);
    }
}
