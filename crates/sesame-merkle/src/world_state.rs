//! Versioned Merkle world state.
//!
//! The [`WorldStateStore`] owns the four on-chain accumulators (note
//! commitments, nullifiers, root history, bridge/defi) and is the single
//! source of truth for committed state. All mutation flows through
//! [`ProvisionalView`]s: copy-on-write overlays that stage writes for one
//! in-flight rollup and only become visible on [`WorldStateStore::commit`].
//!
//! # Commit semantics
//!
//! - Committed reads (`get_root`, `get_hash_path`) never block on in-flight
//!   provisional work; they observe the last fully committed state.
//! - `commit` is mutually exclusive (single commit lock) and all-or-nothing:
//!   the complete new node set is computed, then persisted, and only then is
//!   the in-memory root swapped. An error at any point leaves the prior
//!   committed state intact.
//! - Each commit appends the new data-tree root to the root-history
//!   accumulator, so transaction proofs generated against an older root stay
//!   valid within the configured retention window.
//! - A view snapshots the commit sequence it was taken at; committing a view
//!   whose base no longer matches the store is a fatal integrity error
//!   (`StaleBaseRoot`), never a silent merge.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::accumulator::{HashPath, MerkleAccumulator, StagedUpdate};
use crate::error::{MerkleError, MerkleResult};
use crate::hash::{hash_internal, HashValue};
use crate::storage::{CommitBatch, RootMetadata, TreeCommit, WorldStateStorage};

/// Identifies one of the world-state accumulators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TreeId {
    /// Note-commitment (data) tree, append-only.
    Data,
    /// Nullifier tree, keyed by nullifier value, overwrite forbidden.
    Nullifier,
    /// Append-only history of committed data-tree roots.
    RootHistory,
    /// Bridge/defi interaction tree.
    Defi,
}

impl TreeId {
    pub const ALL: [TreeId; 4] = [
        TreeId::Data,
        TreeId::Nullifier,
        TreeId::RootHistory,
        TreeId::Defi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TreeId::Data => "data",
            TreeId::Nullifier => "nullifier",
            TreeId::RootHistory => "root-history",
            TreeId::Defi => "defi",
        }
    }

    /// Whether writing an already-populated slot is an error.
    fn forbids_overwrite(&self) -> bool {
        matches!(self, TreeId::Nullifier)
    }
}

impl std::fmt::Display for TreeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tree depths for the world-state accumulators.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorldStateConfig {
    pub data_tree_depth: usize,
    pub nullifier_tree_depth: usize,
    pub root_history_depth: usize,
    pub defi_tree_depth: usize,
}

impl Default for WorldStateConfig {
    fn default() -> Self {
        Self {
            data_tree_depth: 32,
            nullifier_tree_depth: 40,
            root_history_depth: 24,
            defi_tree_depth: 16,
        }
    }
}

impl WorldStateConfig {
    fn depth_of(&self, tree: TreeId) -> usize {
        match tree {
            TreeId::Data => self.data_tree_depth,
            TreeId::Nullifier => self.nullifier_tree_depth,
            TreeId::RootHistory => self.root_history_depth,
            TreeId::Defi => self.defi_tree_depth,
        }
    }
}

/// Per-tree overlay of provisional writes.
#[derive(Clone, Debug, Default)]
struct TreeOverlay {
    /// Leaf index -> commitment value (not yet leaf-hashed).
    leaves: BTreeMap<u64, HashValue>,
    /// Append cursor after the staged writes; `None` until first append.
    next_index: Option<u64>,
}

/// Copy-on-write overlay of uncommitted world-state mutations.
///
/// Owned by the in-flight aggregation that borrowed it; discarded whole
/// (never partially merged) on failure. Dropping a view is equivalent to
/// rolling it back.
#[derive(Clone, Debug)]
pub struct ProvisionalView {
    base_seq: u64,
    base_roots: HashMap<TreeId, HashValue>,
    overlays: HashMap<TreeId, TreeOverlay>,
}

impl ProvisionalView {
    /// Commit sequence of the committed state this view was taken from.
    pub fn base_seq(&self) -> u64 {
        self.base_seq
    }

    /// Committed root of `tree` at the time the view was taken.
    pub fn base_root(&self, tree: TreeId) -> HashValue {
        self.base_roots[&tree]
    }

    /// Number of provisional leaf writes staged for `tree`.
    pub fn staged_count(&self, tree: TreeId) -> usize {
        self.overlays.get(&tree).map_or(0, |o| o.leaves.len())
    }

    fn overlay_mut(&mut self, tree: TreeId) -> &mut TreeOverlay {
        self.overlays.entry(tree).or_default()
    }

    fn overlay(&self, tree: TreeId) -> Option<&TreeOverlay> {
        self.overlays.get(&tree)
    }
}

/// Result of a successful commit.
#[derive(Clone, Debug)]
pub struct CommitInfo {
    /// Monotonic commit sequence number of the new state.
    pub commit_seq: u64,
    /// Committed data-tree root (also appended to root history).
    pub data_root: HashValue,
    /// Composite root over all four accumulators.
    pub world_root: HashValue,
}

struct WorldStateInner {
    trees: HashMap<TreeId, MerkleAccumulator>,
    commit_seq: u64,
    /// Raw committed data-tree roots in append order, oldest first.
    /// Mirrors the root-history accumulator leaves for retention checks.
    history_roots: VecDeque<HashValue>,
}

/// The versioned Merkle world-state store.
pub struct WorldStateStore {
    inner: RwLock<WorldStateInner>,
    commit_lock: Mutex<()>,
    config: WorldStateConfig,
    storage: Option<Arc<dyn WorldStateStorage>>,
}

impl WorldStateStore {
    /// Create an empty in-memory store.
    pub fn new(config: WorldStateConfig) -> Self {
        let trees: HashMap<TreeId, MerkleAccumulator> = TreeId::ALL
            .iter()
            .map(|&tree| {
                (
                    tree,
                    MerkleAccumulator::new(tree.as_str(), config.depth_of(tree)),
                )
            })
            .collect();
        // The genesis data root is a valid anchor until the retention
        // window pushes it out, so it starts off in the history.
        let history_roots = VecDeque::from([trees[&TreeId::Data].root()]);
        Self {
            inner: RwLock::new(WorldStateInner {
                trees,
                commit_seq: 0,
                history_roots,
            }),
            commit_lock: Mutex::new(()),
            config,
            storage: None,
        }
    }

    /// Open a store backed by persistent storage, restoring the last durable
    /// commit. Nothing of a previous process's provisional state survives.
    pub fn open(
        config: WorldStateConfig,
        storage: Arc<dyn WorldStateStorage>,
    ) -> MerkleResult<Self> {
        let mut trees = HashMap::new();
        let mut commit_seq = 0;
        for &tree in &TreeId::ALL {
            let depth = config.depth_of(tree);
            match storage.latest_root(tree)? {
                Some(meta) => {
                    let nodes = storage.load_nodes(tree)?;
                    let acc =
                        MerkleAccumulator::from_parts(tree.as_str(), depth, meta.size, nodes);
                    if acc.root() != meta.root {
                        return Err(MerkleError::StorageError(format!(
                            "restored {} root {} does not match persisted root {}",
                            tree,
                            acc.root(),
                            meta.root
                        )));
                    }
                    commit_seq = commit_seq.max(meta.commit_seq);
                    trees.insert(tree, acc);
                }
                None => {
                    trees.insert(tree, MerkleAccumulator::new(tree.as_str(), depth));
                }
            }
        }
        let mut history_roots: VecDeque<HashValue> = storage.load_history_roots()?.into();
        if history_roots.is_empty() {
            history_roots.push_back(trees[&TreeId::Data].root());
        }
        info!(
            commit_seq,
            history_len = history_roots.len(),
            "restored world state from storage"
        );
        Ok(Self {
            inner: RwLock::new(WorldStateInner {
                trees,
                commit_seq,
                history_roots,
            }),
            commit_lock: Mutex::new(()),
            config,
            storage: Some(storage),
        })
    }

    pub fn config(&self) -> &WorldStateConfig {
        &self.config
    }

    /// Current committed root of `tree`. Never blocks on provisional work.
    pub fn get_root(&self, tree: TreeId) -> HashValue {
        self.inner.read().trees[&tree].root()
    }

    /// Composite root over all four committed accumulators.
    pub fn world_root(&self) -> HashValue {
        let inner = self.inner.read();
        Self::world_root_of(&|tree| inner.trees[&tree].root())
    }

    fn world_root_of(root_of: &dyn Fn(TreeId) -> HashValue) -> HashValue {
        let left = hash_internal(&root_of(TreeId::Data), &root_of(TreeId::Nullifier));
        let right = hash_internal(&root_of(TreeId::RootHistory), &root_of(TreeId::Defi));
        hash_internal(&left, &right)
    }

    /// Number of leaves appended to `tree` in committed state.
    pub fn tree_size(&self, tree: TreeId) -> u64 {
        self.inner.read().trees[&tree].size()
    }

    /// Current commit sequence number.
    pub fn commit_seq(&self) -> u64 {
        self.inner.read().commit_seq
    }

    /// Sibling path for a committed leaf, valid against the committed root.
    pub fn get_hash_path(&self, tree: TreeId, index: u64) -> MerkleResult<HashPath> {
        self.inner.read().trees[&tree].hash_path(index)
    }

    /// Snapshot the committed roots into a fresh provisional view.
    pub fn begin_provisional(&self) -> ProvisionalView {
        let inner = self.inner.read();
        let base_roots = TreeId::ALL
            .iter()
            .map(|&tree| (tree, inner.trees[&tree].root()))
            .collect();
        debug!(base_seq = inner.commit_seq, "opened provisional view");
        ProvisionalView {
            base_seq: inner.commit_seq,
            base_roots,
            overlays: HashMap::new(),
        }
    }

    /// Provisionally append a commitment at the next free index of `tree`.
    pub fn insert_leaf(
        &self,
        view: &mut ProvisionalView,
        tree: TreeId,
        commitment: HashValue,
    ) -> MerkleResult<u64> {
        let inner = self.inner.read();
        let acc = &inner.trees[&tree];
        let overlay = view.overlay_mut(tree);
        let index = overlay.next_index.unwrap_or(acc.size());
        if index >= acc.capacity() {
            return Err(MerkleError::CapacityExceeded {
                tree: tree.as_str().to_string(),
                capacity: acc.capacity(),
            });
        }
        overlay.leaves.insert(index, commitment);
        overlay.next_index = Some(index + 1);
        Ok(index)
    }

    /// Provisionally write a commitment at a fixed slot of `tree`.
    ///
    /// For trees that forbid overwrite (the nullifier tree) an occupied
    /// slot, committed or staged in this view, fails with
    /// [`MerkleError::DuplicateNullifier`].
    pub fn update_leaf(
        &self,
        view: &mut ProvisionalView,
        tree: TreeId,
        index: u64,
        commitment: HashValue,
    ) -> MerkleResult<()> {
        let inner = self.inner.read();
        let acc = &inner.trees[&tree];
        if index >= acc.capacity() {
            return Err(MerkleError::IndexOutOfBounds {
                index,
                size: acc.capacity(),
            });
        }
        if tree.forbids_overwrite() && !self.slot_empty_in(&inner, view, tree, index) {
            return Err(MerkleError::DuplicateNullifier { index });
        }
        drop(inner);
        view.overlay_mut(tree).leaves.insert(index, commitment);
        Ok(())
    }

    fn slot_empty_in(
        &self,
        inner: &WorldStateInner,
        view: &ProvisionalView,
        tree: TreeId,
        index: u64,
    ) -> bool {
        if let Some(overlay) = view.overlay(tree) {
            if overlay.leaves.contains_key(&index) {
                return false;
            }
        }
        inner.trees[&tree].is_slot_empty(index)
    }

    /// Whether a slot is free in committed state and untouched by `view`.
    pub fn is_slot_empty(&self, view: &ProvisionalView, tree: TreeId, index: u64) -> bool {
        self.slot_empty_in(&self.inner.read(), view, tree, index)
    }

    /// Root `tree` would have if `view` were committed now.
    pub fn view_root(&self, view: &ProvisionalView, tree: TreeId) -> HashValue {
        let inner = self.inner.read();
        let acc = &inner.trees[&tree];
        match view.overlay(tree) {
            Some(overlay) => {
                acc.staged_update(&overlay.leaves, overlay.next_index.unwrap_or(acc.size()))
                    .root
            }
            None => acc.root(),
        }
    }

    /// Composite world root the store would have if `view` were committed.
    pub fn view_world_root(&self, view: &ProvisionalView) -> HashValue {
        Self::world_root_of(&|tree| self.view_root(view, tree))
    }

    /// Slot index for a nullifier value in the nullifier tree.
    pub fn nullifier_index(&self, nullifier: &HashValue) -> u64 {
        let capacity = 1u64 << self.config.nullifier_tree_depth;
        nullifier.low_u64() & (capacity - 1)
    }

    /// Whether `root` is the current committed data root or one of the last
    /// `window` historical data roots. Transactions proven against anything
    /// older must be rejected as stale.
    pub fn is_recent_root(&self, root: &HashValue, window: usize) -> bool {
        let inner = self.inner.read();
        if inner.trees[&TreeId::Data].root() == *root {
            return true;
        }
        inner
            .history_roots
            .iter()
            .rev()
            .take(window)
            .any(|r| r == root)
    }

    /// Number of historical data roots recorded so far.
    pub fn history_len(&self) -> usize {
        self.inner.read().history_roots.len()
    }

    /// Atomically publish all provisional writes in `view` as the new
    /// committed state and append the new data root to root history.
    ///
    /// Consumes the view: a committed view can never be rolled back or
    /// committed twice. Once this runs it completes in full; the staged
    /// node set is computed and persisted before any committed state
    /// changes, so an error leaves the prior state intact.
    pub fn commit(&self, view: ProvisionalView) -> MerkleResult<CommitInfo> {
        let _guard = self.commit_lock.lock();
        let mut inner = self.inner.write();

        if view.base_seq != inner.commit_seq {
            warn!(
                view_seq = view.base_seq,
                store_seq = inner.commit_seq,
                "rejecting commit of provisional view with stale base"
            );
            return Err(MerkleError::StaleBaseRoot {
                view_seq: view.base_seq,
                store_seq: inner.commit_seq,
            });
        }

        // Stage the complete new node set for every tree before touching
        // committed state. Staging is pure; applying is infallible.
        let empty = TreeOverlay::default();
        let mut staged: Vec<(TreeId, StagedUpdate)> = Vec::with_capacity(TreeId::ALL.len());
        for &tree in &[TreeId::Data, TreeId::Nullifier, TreeId::Defi] {
            let acc = &inner.trees[&tree];
            let overlay = view.overlay(tree).unwrap_or(&empty);
            staged.push((
                tree,
                acc.staged_update(&overlay.leaves, overlay.next_index.unwrap_or(acc.size())),
            ));
        }
        let data_root = staged[0].1.root;

        // The new data root becomes the next root-history leaf.
        let history_acc = &inner.trees[&TreeId::RootHistory];
        if history_acc.is_full() {
            return Err(MerkleError::CapacityExceeded {
                tree: TreeId::RootHistory.as_str().to_string(),
                capacity: history_acc.capacity(),
            });
        }
        let mut history_overlay = view
            .overlay(TreeId::RootHistory)
            .map(|o| o.leaves.clone())
            .unwrap_or_default();
        let history_index = history_acc.size();
        history_overlay.insert(history_index, data_root);
        staged.push((
            TreeId::RootHistory,
            history_acc.staged_update(&history_overlay, history_index + 1),
        ));

        let commit_seq = inner.commit_seq + 1;

        // Persist every durable effect of this commit as one atomic batch,
        // and only then mutate in-memory committed state. The storage layer
        // guarantees a crash leaves the previous commit fully readable.
        if let Some(storage) = &self.storage {
            let batch = CommitBatch {
                commit_seq,
                trees: staged
                    .iter()
                    .map(|(tree, update)| TreeCommit {
                        tree: *tree,
                        meta: RootMetadata {
                            commit_seq,
                            root: update.root,
                            size: update.size,
                        },
                        nodes: update.nodes.iter().map(|(key, hash)| (*key, *hash)).collect(),
                    })
                    .collect(),
                history_root: data_root,
            };
            storage.apply_commit(&batch)?;
        }

        for (tree, update) in staged {
            let root = update.root;
            if let Some(acc) = inner.trees.get_mut(&tree) {
                acc.apply_staged(update);
            }
            debug!(tree = %tree, root = %root, "committed accumulator");
        }
        inner.commit_seq = commit_seq;
        inner.history_roots.push_back(data_root);

        let world_root = Self::world_root_of(&|tree| inner.trees[&tree].root());
        info!(commit_seq, data_root = %data_root, world_root = %world_root, "world state committed");
        Ok(CommitInfo {
            commit_seq,
            data_root,
            world_root,
        })
    }

    /// Discard a provisional view. Committed state is unaffected.
    ///
    /// Equivalent to dropping the view; the explicit form exists so the
    /// pipeline can log the abandonment.
    pub fn rollback(&self, view: ProvisionalView) {
        debug!(
            base_seq = view.base_seq,
            staged_data = view.staged_count(TreeId::Data),
            staged_nullifiers = view.staged_count(TreeId::Nullifier),
            "rolled back provisional view"
        );
        drop(view);
    }
}
