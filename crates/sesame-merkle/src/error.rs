//! Error types for world-state accumulator operations.

use thiserror::Error;

/// Result type for merkle operations
pub type MerkleResult<T> = Result<T, MerkleError>;

/// Errors that can occur during accumulator and world-state operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MerkleError {
    /// The tree has no free leaf slots left
    #[error("Capacity exceeded: tree {tree} is full at {capacity} leaves")]
    CapacityExceeded { tree: String, capacity: u64 },

    /// A nullifier slot was already occupied (double-spend attempt)
    #[error("Duplicate nullifier at index {index}")]
    DuplicateNullifier { index: u64 },

    /// Index out of bounds
    #[error("Index out of bounds: {index} >= {size}")]
    IndexOutOfBounds { index: u64, size: u64 },

    /// Invalid hash length
    #[error("Invalid hash length: expected {expected}, got {got}")]
    InvalidHashLength { expected: usize, got: usize },

    /// A provisional view's base root no longer matches the committed state
    #[error("Stale base root: view was taken at commit {view_seq}, store is at {store_seq}")]
    StaleBaseRoot { view_seq: u64, store_seq: u64 },

    /// A provisional view was used after it was committed or rolled back
    #[error("View already finalized")]
    ViewFinalized,

    /// Unknown tree identifier
    #[error("Unknown tree: {0}")]
    UnknownTree(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
