//! # sesame-merkle
//!
//! Versioned Merkle world state for the Sesame rollup sequencer.
//!
//! This crate provides:
//!
//! - [`accumulator::MerkleAccumulator`]: a fixed-depth sparse accumulator
//!   storing only populated nodes, with O(depth) path updates and batched
//!   ancestor recomputation
//! - [`world_state::WorldStateStore`]: the four on-chain accumulators
//!   (note commitments, nullifiers, root history, bridge/defi) behind
//!   copy-on-write [`world_state::ProvisionalView`]s with atomic
//!   commit/rollback semantics
//! - [`storage`]: persistence traits plus an in-memory implementation for
//!   tests
//!
//! ## Design Philosophy
//!
//! Committed state is the single source of truth and is only ever mutated
//! by `commit()`. In-flight rollup construction works against provisional
//! overlays that can be abandoned at any point without a trace; the root of
//! every accumulator is a pure function of its leaves at all times.

pub mod accumulator;
pub mod error;
pub mod hash;
pub mod storage;
pub mod world_state;

pub use accumulator::{HashPath, MerkleAccumulator, NodeKey, StagedUpdate};
pub use error::{MerkleError, MerkleResult};
pub use hash::{empty_leaf_hash, hash_internal, hash_leaf, zero_hashes, HashValue, HASH_LENGTH};
pub use storage::{
    CommitBatch, InMemoryWorldStateStorage, NodeStore, RootMetadata, RootStore, TreeCommit,
    WorldStateStorage,
};
pub use world_state::{CommitInfo, ProvisionalView, TreeId, WorldStateConfig, WorldStateStore};
