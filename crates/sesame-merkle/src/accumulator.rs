//! Fixed-depth sparse Merkle accumulator.
//!
//! An accumulator of depth `D` commits to `2^D` leaf slots. Only populated
//! nodes are stored, keyed by `(level, index)`; every unpopulated node is
//! derived from the precomputed zero-hash table, so an empty tree costs no
//! memory regardless of depth.
//!
//! Two write shapes are supported:
//!
//! - **Append**: `append` places a leaf at the next free index
//!   (note-commitment and root-history trees).
//! - **Keyed**: `set_leaf` writes an arbitrary slot (nullifier tree, where
//!   the slot index is derived from the nullifier value).
//!
//! Mutations recompute only the `O(D)` ancestor path per touched leaf, and
//! a batch of leaves shares ancestor recomputation through a single
//! post-order pass per level ([`MerkleAccumulator::apply_batch`] and
//! [`MerkleAccumulator::staged_update`]).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{MerkleError, MerkleResult};
use crate::hash::{hash_internal, hash_leaf, zero_hashes, HashValue};

/// Identifies one node in the tree: level 0 holds leaves, level `depth`
/// holds the single root node at index 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub level: u32,
    pub index: u64,
}

impl NodeKey {
    pub fn new(level: u32, index: u64) -> Self {
        Self { level, index }
    }
}

/// Sibling hashes from a leaf up to the root; length equals the tree depth.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashPath {
    siblings: Vec<HashValue>,
}

impl HashPath {
    pub fn siblings(&self) -> &[HashValue] {
        &self.siblings
    }

    /// Recompute the root this path proves for the given leaf commitment.
    pub fn compute_root(&self, commitment: &HashValue, leaf_index: u64) -> MerkleResult<HashValue> {
        if self.siblings.len() < 64 && leaf_index >> self.siblings.len() != 0 {
            return Err(MerkleError::IndexOutOfBounds {
                index: leaf_index,
                size: 1u64 << self.siblings.len(),
            });
        }
        let mut current = hash_leaf(commitment.as_bytes());
        let mut index = leaf_index;
        for sibling in &self.siblings {
            current = if index % 2 == 0 {
                hash_internal(&current, sibling)
            } else {
                hash_internal(sibling, &current)
            };
            index /= 2;
        }
        Ok(current)
    }

    /// Verify the path against a known root.
    pub fn verify(&self, root: &HashValue, commitment: &HashValue, leaf_index: u64) -> MerkleResult<()> {
        let computed = self.compute_root(commitment, leaf_index)?;
        if &computed == root {
            Ok(())
        } else {
            Err(MerkleError::InvalidInput(format!(
                "hash path root mismatch: expected {}, got {}",
                root, computed
            )))
        }
    }
}

/// The complete set of recomputed nodes for a batch of provisional writes.
///
/// Produced by [`MerkleAccumulator::staged_update`] without touching the
/// accumulator; applied atomically by [`MerkleAccumulator::apply_staged`].
/// Commit-time all-or-nothing comes from this split: staging is pure, and
/// applying a staged set cannot fail.
#[derive(Clone, Debug)]
pub struct StagedUpdate {
    pub nodes: HashMap<NodeKey, HashValue>,
    pub root: HashValue,
    pub size: u64,
}

/// A fixed-depth sparse Merkle accumulator.
#[derive(Clone, Debug)]
pub struct MerkleAccumulator {
    name: String,
    depth: usize,
    size: u64,
    root: HashValue,
    nodes: HashMap<NodeKey, HashValue>,
    zero: Vec<HashValue>,
}

impl MerkleAccumulator {
    /// Create an empty accumulator. `depth` must be in `1..=62`.
    pub fn new(name: impl Into<String>, depth: usize) -> Self {
        assert!((1..=62).contains(&depth), "unsupported tree depth {depth}");
        let zero = zero_hashes(depth);
        let root = zero[depth];
        Self {
            name: name.into(),
            depth,
            size: 0,
            root,
            nodes: HashMap::new(),
            zero,
        }
    }

    /// Rebuild an accumulator from persisted nodes and metadata.
    pub fn from_parts(
        name: impl Into<String>,
        depth: usize,
        size: u64,
        nodes: HashMap<NodeKey, HashValue>,
    ) -> Self {
        let mut acc = Self::new(name, depth);
        acc.size = size;
        acc.nodes = nodes;
        acc.root = acc.node(depth as u32, 0);
        acc
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of appended leaves (next append index).
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn is_full(&self) -> bool {
        self.size >= self.capacity()
    }

    /// Current root. Always a pure function of all leaf values.
    pub fn root(&self) -> HashValue {
        self.root
    }

    /// All populated nodes, for persistence.
    pub fn nodes(&self) -> &HashMap<NodeKey, HashValue> {
        &self.nodes
    }

    fn node(&self, level: u32, index: u64) -> HashValue {
        self.nodes
            .get(&NodeKey::new(level, index))
            .copied()
            .unwrap_or(self.zero[level as usize])
    }

    /// Whether a leaf slot has never been written.
    pub fn is_slot_empty(&self, index: u64) -> bool {
        !self.nodes.contains_key(&NodeKey::new(0, index))
    }

    /// Append a commitment at the next free index.
    pub fn append(&mut self, commitment: HashValue) -> MerkleResult<u64> {
        if self.is_full() {
            return Err(MerkleError::CapacityExceeded {
                tree: self.name.clone(),
                capacity: self.capacity(),
            });
        }
        let index = self.size;
        self.write_leaf(index, commitment)?;
        self.size = index + 1;
        Ok(index)
    }

    /// Write a commitment at an arbitrary slot, recomputing its ancestor path.
    pub fn set_leaf(&mut self, index: u64, commitment: HashValue) -> MerkleResult<()> {
        self.write_leaf(index, commitment)?;
        self.size = self.size.max(index + 1);
        Ok(())
    }

    fn write_leaf(&mut self, index: u64, commitment: HashValue) -> MerkleResult<()> {
        if index >= self.capacity() {
            return Err(MerkleError::IndexOutOfBounds {
                index,
                size: self.capacity(),
            });
        }
        self.nodes
            .insert(NodeKey::new(0, index), hash_leaf(commitment.as_bytes()));
        self.recompute_ancestors([index].into_iter().collect());
        Ok(())
    }

    /// Apply a batch of keyed writes with shared ancestor recomputation.
    ///
    /// All leaves are staged first; the ancestor pass then runs once per
    /// level, so `K` leaves under a common subtree hash each shared
    /// ancestor once instead of `K` times.
    pub fn apply_batch(&mut self, updates: &[(u64, HashValue)]) -> MerkleResult<()> {
        let mut dirty = BTreeSet::new();
        for (index, commitment) in updates {
            if *index >= self.capacity() {
                return Err(MerkleError::IndexOutOfBounds {
                    index: *index,
                    size: self.capacity(),
                });
            }
            self.nodes
                .insert(NodeKey::new(0, *index), hash_leaf(commitment.as_bytes()));
            self.size = self.size.max(index + 1);
            dirty.insert(*index);
        }
        self.recompute_ancestors(dirty);
        Ok(())
    }

    fn recompute_ancestors(&mut self, mut dirty: BTreeSet<u64>) {
        for level in 0..self.depth as u32 {
            let parents: BTreeSet<u64> = dirty.iter().map(|i| i >> 1).collect();
            for &parent in &parents {
                let left = self.node(level, parent * 2);
                let right = self.node(level, parent * 2 + 1);
                self.nodes
                    .insert(NodeKey::new(level + 1, parent), hash_internal(&left, &right));
            }
            dirty = parents;
        }
        self.root = self.node(self.depth as u32, 0);
    }

    /// Sibling path for a leaf, valid against the current root.
    pub fn hash_path(&self, index: u64) -> MerkleResult<HashPath> {
        if index >= self.capacity() {
            return Err(MerkleError::IndexOutOfBounds {
                index,
                size: self.capacity(),
            });
        }
        let mut siblings = Vec::with_capacity(self.depth);
        let mut idx = index;
        for level in 0..self.depth as u32 {
            siblings.push(self.node(level, idx ^ 1));
            idx >>= 1;
        }
        Ok(HashPath { siblings })
    }

    /// Compute the complete node set a batch of provisional leaf writes
    /// would produce, without mutating the accumulator.
    ///
    /// `overlay` maps leaf index to commitment value; `size` is the
    /// post-write append cursor. Shares ancestor hashing across the batch
    /// exactly like [`Self::apply_batch`].
    pub fn staged_update(&self, overlay: &BTreeMap<u64, HashValue>, size: u64) -> StagedUpdate {
        let mut nodes: HashMap<NodeKey, HashValue> = HashMap::new();
        let mut dirty: BTreeSet<u64> = BTreeSet::new();
        for (&index, commitment) in overlay {
            nodes.insert(NodeKey::new(0, index), hash_leaf(commitment.as_bytes()));
            dirty.insert(index);
        }
        for level in 0..self.depth as u32 {
            let parents: BTreeSet<u64> = dirty.iter().map(|i| i >> 1).collect();
            for &parent in &parents {
                let left = self.staged_node(&nodes, level, parent * 2);
                let right = self.staged_node(&nodes, level, parent * 2 + 1);
                nodes.insert(NodeKey::new(level + 1, parent), hash_internal(&left, &right));
            }
            dirty = parents;
        }
        let root = if overlay.is_empty() {
            self.root
        } else {
            self.staged_node(&nodes, self.depth as u32, 0)
        };
        StagedUpdate {
            nodes,
            root,
            size: size.max(self.size),
        }
    }

    fn staged_node(&self, staged: &HashMap<NodeKey, HashValue>, level: u32, index: u64) -> HashValue {
        staged
            .get(&NodeKey::new(level, index))
            .copied()
            .unwrap_or_else(|| self.node(level, index))
    }

    /// Merge a staged node set. Infallible: staging has already validated
    /// every index, so commit cannot half-apply.
    pub fn apply_staged(&mut self, staged: StagedUpdate) {
        for (key, hash) in staged.nodes {
            self.nodes.insert(key, hash);
        }
        self.size = staged.size;
        self.root = staged.root;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commitment(byte: u8) -> HashValue {
        HashValue::new([byte; 32])
    }

    /// Recompute the root from scratch over explicit leaves, the slow way.
    fn naive_root(depth: usize, leaves: &BTreeMap<u64, HashValue>) -> HashValue {
        let zero = zero_hashes(depth);
        let mut level_nodes: BTreeMap<u64, HashValue> = leaves
            .iter()
            .map(|(&i, c)| (i, hash_leaf(c.as_bytes())))
            .collect();
        for level in 0..depth {
            let mut next: BTreeMap<u64, HashValue> = BTreeMap::new();
            let parents: BTreeSet<u64> = level_nodes.keys().map(|i| i >> 1).collect();
            for parent in parents {
                let left = level_nodes
                    .get(&(parent * 2))
                    .copied()
                    .unwrap_or(zero[level]);
                let right = level_nodes
                    .get(&(parent * 2 + 1))
                    .copied()
                    .unwrap_or(zero[level]);
                next.insert(parent, hash_internal(&left, &right));
            }
            level_nodes = next;
        }
        level_nodes.get(&0).copied().unwrap_or(zero[depth])
    }

    #[test]
    fn test_empty_root_matches_zero_table() {
        let acc = MerkleAccumulator::new("data", 8);
        assert_eq!(acc.root(), zero_hashes(8)[8]);
    }

    #[test]
    fn test_root_invariant_appends() {
        let mut acc = MerkleAccumulator::new("data", 6);
        let mut leaves = BTreeMap::new();
        for i in 0..20u8 {
            let index = acc.append(commitment(i)).unwrap();
            leaves.insert(index, commitment(i));
            assert_eq!(acc.root(), naive_root(6, &leaves));
        }
    }

    #[test]
    fn test_root_invariant_keyed_writes() {
        let mut acc = MerkleAccumulator::new("nullifier", 10);
        let mut leaves = BTreeMap::new();
        for (i, index) in [(1u8, 5u64), (2, 700), (3, 1023), (4, 0), (5, 5)] {
            acc.set_leaf(index, commitment(i)).unwrap();
            leaves.insert(index, commitment(i));
        }
        assert_eq!(acc.root(), naive_root(10, &leaves));
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut acc = MerkleAccumulator::new("tiny", 2);
        for i in 0..4u8 {
            acc.append(commitment(i)).unwrap();
        }
        assert!(matches!(
            acc.append(commitment(9)),
            Err(MerkleError::CapacityExceeded { capacity: 4, .. })
        ));
    }

    #[test]
    fn test_batch_matches_sequential() {
        let updates: Vec<(u64, HashValue)> =
            (0..16u8).map(|i| (i as u64 * 3, commitment(i))).collect();

        let mut batched = MerkleAccumulator::new("a", 8);
        batched.apply_batch(&updates).unwrap();

        let mut sequential = MerkleAccumulator::new("a", 8);
        for (index, c) in &updates {
            sequential.set_leaf(*index, *c).unwrap();
        }
        assert_eq!(batched.root(), sequential.root());
        assert_eq!(batched.size(), sequential.size());
    }

    #[test]
    fn test_hash_path_verifies() {
        let mut acc = MerkleAccumulator::new("data", 8);
        for i in 0..10u8 {
            acc.append(commitment(i)).unwrap();
        }
        let root = acc.root();
        for i in 0..10u64 {
            let path = acc.hash_path(i).unwrap();
            assert_eq!(path.siblings().len(), 8);
            path.verify(&root, &commitment(i as u8), i).unwrap();
        }
        // Wrong leaf value fails.
        let path = acc.hash_path(3).unwrap();
        assert!(path.verify(&root, &commitment(99), 3).is_err());
    }

    #[test]
    fn test_staged_update_is_pure_then_exact() {
        let mut acc = MerkleAccumulator::new("data", 8);
        for i in 0..5u8 {
            acc.append(commitment(i)).unwrap();
        }
        let committed_root = acc.root();

        let mut overlay = BTreeMap::new();
        overlay.insert(5, commitment(50));
        overlay.insert(6, commitment(60));
        let staged = acc.staged_update(&overlay, 7);

        // Staging does not mutate.
        assert_eq!(acc.root(), committed_root);
        assert_eq!(acc.size(), 5);

        // Applying the staged set equals applying the writes directly.
        let mut direct = acc.clone();
        direct.set_leaf(5, commitment(50)).unwrap();
        direct.set_leaf(6, commitment(60)).unwrap();
        acc.apply_staged(staged);
        assert_eq!(acc.root(), direct.root());
        assert_eq!(acc.size(), 7);
    }

    #[test]
    fn test_empty_staged_update_keeps_root() {
        let mut acc = MerkleAccumulator::new("data", 8);
        acc.append(commitment(1)).unwrap();
        let staged = acc.staged_update(&BTreeMap::new(), 1);
        assert_eq!(staged.root, acc.root());
    }

    #[test]
    fn test_from_parts_restores_root() {
        let mut acc = MerkleAccumulator::new("data", 8);
        for i in 0..9u8 {
            acc.append(commitment(i)).unwrap();
        }
        let restored =
            MerkleAccumulator::from_parts("data", 8, acc.size(), acc.nodes().clone());
        assert_eq!(restored.root(), acc.root());
        assert_eq!(restored.hash_path(4).unwrap(), acc.hash_path(4).unwrap());
    }
}
