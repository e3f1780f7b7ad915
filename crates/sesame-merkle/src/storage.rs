//! Persistence traits for the world-state accumulators.
//!
//! Per accumulator the store persists its committed root (with commit
//! sequence and leaf count) and the sparse populated-node map keyed by
//! `(level, index)`; the root history additionally persists the raw
//! historical data roots in append order. No other state survives a
//! restart; provisional views are always lost.
//!
//! The in-memory implementation backs tests; production systems implement
//! these traits over a persistent backend.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::accumulator::NodeKey;
use crate::error::MerkleResult;
use crate::hash::HashValue;
use crate::world_state::TreeId;

/// Durable metadata for one accumulator's committed root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootMetadata {
    /// Commit sequence this root was published at.
    pub commit_seq: u64,
    /// The committed root hash.
    pub root: HashValue,
    /// Leaf count (append cursor) at this commit.
    pub size: u64,
}

/// One tree's share of a commit: its new root metadata and the recomputed
/// nodes.
#[derive(Clone, Debug)]
pub struct TreeCommit {
    pub tree: TreeId,
    pub meta: RootMetadata,
    pub nodes: Vec<(NodeKey, HashValue)>,
}

/// Every durable effect of one world-state commit.
///
/// Applied as a unit through [`WorldStateStorage::apply_commit`], so a
/// reader never observes new nodes under old root metadata or the other
/// way around.
#[derive(Clone, Debug)]
pub struct CommitBatch {
    pub commit_seq: u64,
    pub trees: Vec<TreeCommit>,
    /// Data root to append to the raw root history.
    pub history_root: HashValue,
}

/// Storage for populated tree nodes.
pub trait NodeStore: Send + Sync {
    /// Persist a batch of nodes for one tree.
    fn put_nodes(&self, tree: TreeId, nodes: &[(NodeKey, HashValue)]) -> MerkleResult<()>;

    /// Retrieve a single node.
    fn get_node(&self, tree: TreeId, key: NodeKey) -> MerkleResult<Option<HashValue>>;

    /// Load every populated node of a tree.
    fn load_nodes(&self, tree: TreeId) -> MerkleResult<HashMap<NodeKey, HashValue>>;
}

/// Storage for committed roots and the raw root history.
pub trait RootStore: Send + Sync {
    /// Persist a tree's committed root metadata. This is the durable
    /// "pointer swap": recovery reads roots first, then nodes.
    fn put_root(&self, tree: TreeId, meta: RootMetadata) -> MerkleResult<()>;

    /// Latest committed root metadata for a tree, if any commit happened.
    fn latest_root(&self, tree: TreeId) -> MerkleResult<Option<RootMetadata>>;

    /// Append a raw data root to the durable root history.
    fn append_history_root(&self, root: HashValue) -> MerkleResult<()>;

    /// Load the full root history, oldest first.
    fn load_history_roots(&self) -> MerkleResult<Vec<HashValue>>;
}

/// Combined storage interface for the world state.
pub trait WorldStateStorage: NodeStore + RootStore {
    /// Apply one commit's nodes, root metadata, and history append as a
    /// single all-or-nothing unit. A crash mid-apply must leave either the
    /// previous commit or this one fully readable, never a mix of the two;
    /// persistent backends map this onto their write-batch primitive.
    fn apply_commit(&self, batch: &CommitBatch) -> MerkleResult<()>;

    /// Flush pending writes to durable media.
    fn flush(&self) -> MerkleResult<()>;
}

/// An in-memory implementation of [`WorldStateStorage`] for testing.
#[derive(Default)]
pub struct InMemoryWorldStateStorage {
    nodes: RwLock<HashMap<(TreeId, NodeKey), HashValue>>,
    roots: RwLock<HashMap<TreeId, RootMetadata>>,
    history: RwLock<Vec<HashValue>>,
}

impl InMemoryWorldStateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted nodes across all trees.
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }
}

impl NodeStore for InMemoryWorldStateStorage {
    fn put_nodes(&self, tree: TreeId, nodes: &[(NodeKey, HashValue)]) -> MerkleResult<()> {
        let mut map = self.nodes.write();
        for (key, hash) in nodes {
            map.insert((tree, *key), *hash);
        }
        Ok(())
    }

    fn get_node(&self, tree: TreeId, key: NodeKey) -> MerkleResult<Option<HashValue>> {
        Ok(self.nodes.read().get(&(tree, key)).copied())
    }

    fn load_nodes(&self, tree: TreeId) -> MerkleResult<HashMap<NodeKey, HashValue>> {
        Ok(self
            .nodes
            .read()
            .iter()
            .filter(|((t, _), _)| *t == tree)
            .map(|((_, key), hash)| (*key, *hash))
            .collect())
    }
}

impl RootStore for InMemoryWorldStateStorage {
    fn put_root(&self, tree: TreeId, meta: RootMetadata) -> MerkleResult<()> {
        self.roots.write().insert(tree, meta);
        Ok(())
    }

    fn latest_root(&self, tree: TreeId) -> MerkleResult<Option<RootMetadata>> {
        Ok(self.roots.read().get(&tree).copied())
    }

    fn append_history_root(&self, root: HashValue) -> MerkleResult<()> {
        self.history.write().push(root);
        Ok(())
    }

    fn load_history_roots(&self) -> MerkleResult<Vec<HashValue>> {
        Ok(self.history.read().clone())
    }
}

impl WorldStateStorage for InMemoryWorldStateStorage {
    fn apply_commit(&self, batch: &CommitBatch) -> MerkleResult<()> {
        // All three locks are held across the whole mutation, so a
        // concurrent reader sees the previous commit or this one whole.
        let mut nodes = self.nodes.write();
        let mut roots = self.roots.write();
        let mut history = self.history.write();
        for tree_commit in &batch.trees {
            for (key, hash) in &tree_commit.nodes {
                nodes.insert((tree_commit.tree, *key), *hash);
            }
            roots.insert(tree_commit.tree, tree_commit.meta);
        }
        history.push(batch.history_root);
        Ok(())
    }

    fn flush(&self) -> MerkleResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_roundtrip() {
        let store = InMemoryWorldStateStorage::new();
        let key = NodeKey::new(3, 17);
        let hash = HashValue::new([9u8; 32]);
        store.put_nodes(TreeId::Data, &[(key, hash)]).unwrap();

        assert_eq!(store.get_node(TreeId::Data, key).unwrap(), Some(hash));
        assert_eq!(store.get_node(TreeId::Nullifier, key).unwrap(), None);
        assert_eq!(store.load_nodes(TreeId::Data).unwrap().len(), 1);
    }

    #[test]
    fn test_latest_root_overwrites() {
        let store = InMemoryWorldStateStorage::new();
        for seq in 1..=3u64 {
            store
                .put_root(
                    TreeId::Data,
                    RootMetadata {
                        commit_seq: seq,
                        root: HashValue::new([seq as u8; 32]),
                        size: seq,
                    },
                )
                .unwrap();
        }
        let meta = store.latest_root(TreeId::Data).unwrap().unwrap();
        assert_eq!(meta.commit_seq, 3);
        assert_eq!(store.latest_root(TreeId::Defi).unwrap(), None);
    }

    #[test]
    fn test_apply_commit_writes_nodes_roots_and_history() {
        let store = InMemoryWorldStateStorage::new();
        let key = NodeKey::new(0, 2);
        let leaf = HashValue::new([5u8; 32]);
        let root = HashValue::new([6u8; 32]);
        store
            .apply_commit(&CommitBatch {
                commit_seq: 1,
                trees: vec![TreeCommit {
                    tree: TreeId::Data,
                    meta: RootMetadata {
                        commit_seq: 1,
                        root,
                        size: 3,
                    },
                    nodes: vec![(key, leaf)],
                }],
                history_root: root,
            })
            .unwrap();

        assert_eq!(store.get_node(TreeId::Data, key).unwrap(), Some(leaf));
        let meta = store.latest_root(TreeId::Data).unwrap().unwrap();
        assert_eq!(meta.root, root);
        assert_eq!(meta.size, 3);
        assert_eq!(store.load_history_roots().unwrap(), vec![root]);
    }

    #[test]
    fn test_history_order() {
        let store = InMemoryWorldStateStorage::new();
        for i in 0..4u8 {
            store.append_history_root(HashValue::new([i; 32])).unwrap();
        }
        let history = store.load_history_roots().unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], HashValue::new([0u8; 32]));
        assert_eq!(history[3], HashValue::new([3u8; 32]));
    }
}
