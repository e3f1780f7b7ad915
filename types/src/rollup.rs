//! Inner and outer rollup records.
//!
//! An inner rollup batches up to `K` transactions between a pre/post
//! data-root and nullifier-root pair; an outer rollup batches up to `M`
//! inner rollups between a pre/post world-root pair and is the unit handed
//! to publication.

use serde::{Deserialize, Serialize};
use sesame_merkle::{hash_leaf, HashValue};
use std::fmt;

use crate::tx::{TxRecord, NOOP_PROOF};

/// Unique rollup identifier, derived from the rollup content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RollupId(pub HashValue);

impl fmt::Display for RollupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RollupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RollupId({})", &self.0.to_string()[..16])
    }
}

/// Rollup state machine, reported to the ledger at every transition.
///
/// `Constructing -> Proving -> {Proved | Failed}`; `Proved` becomes
/// `Committed` only once the world-state commit succeeds; `Failed` always
/// becomes `RolledBack`, after which constituents are requeued. `Published`
/// and `Settled` apply to outer rollups at the publication boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollupStatus {
    Constructing,
    Proving,
    Proved,
    Failed,
    Committed,
    RolledBack,
    Published,
    Settled,
}

impl fmt::Display for RollupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RollupStatus::Constructing => "constructing",
            RollupStatus::Proving => "proving",
            RollupStatus::Proved => "proved",
            RollupStatus::Failed => "failed",
            RollupStatus::Committed => "committed",
            RollupStatus::RolledBack => "rolled-back",
            RollupStatus::Published => "published",
            RollupStatus::Settled => "settled",
        };
        f.write_str(s)
    }
}

/// A proven batch of transactions and the tree transition it performs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerRollup {
    pub id: RollupId,
    /// Included transactions in arrival order, padded with no-ops when the
    /// batch was cut by the timer.
    pub txs: Vec<TxRecord>,
    pub pre_data_root: HashValue,
    pub post_data_root: HashValue,
    pub pre_nullifier_root: HashValue,
    pub post_nullifier_root: HashValue,
    /// Aggregate proof over all constituent transaction proofs.
    pub proof: Vec<u8>,
}

impl InnerRollup {
    pub fn new(
        txs: Vec<TxRecord>,
        pre_data_root: HashValue,
        post_data_root: HashValue,
        pre_nullifier_root: HashValue,
        post_nullifier_root: HashValue,
        proof: Vec<u8>,
    ) -> Self {
        let mut rollup = Self {
            id: RollupId(HashValue::zero()),
            txs,
            pre_data_root,
            post_data_root,
            pre_nullifier_root,
            post_nullifier_root,
            proof,
        };
        rollup.id = RollupId(hash_leaf(&rollup.public_input_bytes()));
        rollup
    }

    /// The canonical no-op inner rollup used to pad underfilled outer
    /// batches. Performs the identity transition on both trees.
    pub fn noop(data_root: HashValue, nullifier_root: HashValue, num_txs: usize) -> Self {
        Self::new(
            (0..num_txs).map(|_| TxRecord::noop()).collect(),
            data_root,
            data_root,
            nullifier_root,
            nullifier_root,
            NOOP_PROOF.to_vec(),
        )
    }

    pub fn is_noop(&self) -> bool {
        self.pre_data_root == self.post_data_root && self.txs.iter().all(|tx| tx.is_noop())
    }

    /// Number of non-padding transactions.
    pub fn real_tx_count(&self) -> usize {
        self.txs.iter().filter(|tx| !tx.is_noop()).count()
    }

    /// Canonical public-input encoding consumed by outer aggregation.
    pub fn public_input_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.pre_data_root.as_bytes());
        out.extend_from_slice(self.post_data_root.as_bytes());
        out.extend_from_slice(self.pre_nullifier_root.as_bytes());
        out.extend_from_slice(self.post_nullifier_root.as_bytes());
        out.extend_from_slice(&(self.txs.len() as u64).to_le_bytes());
        for tx in &self.txs {
            out.extend_from_slice(&tx.encode());
        }
        out
    }
}

/// A proven batch of inner rollups; the unit handed to publication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OuterRollup {
    pub id: RollupId,
    /// Constituent inner rollups in construction order.
    pub inners: Vec<InnerRollup>,
    pub pre_world_root: HashValue,
    /// Post world root; also the idempotency key at the publication
    /// boundary.
    pub post_world_root: HashValue,
    /// Single aggregate proof covering every inner proof.
    pub proof: Vec<u8>,
}

impl OuterRollup {
    pub fn new(
        inners: Vec<InnerRollup>,
        pre_world_root: HashValue,
        post_world_root: HashValue,
        proof: Vec<u8>,
    ) -> Self {
        let mut rollup = Self {
            id: RollupId(HashValue::zero()),
            inners,
            pre_world_root,
            post_world_root,
            proof,
        };
        rollup.id = RollupId(hash_leaf(&rollup.public_input_bundle()));
        rollup
    }

    /// Number of non-padding inner rollups.
    pub fn real_inner_count(&self) -> usize {
        self.inners.iter().filter(|inner| !inner.is_noop()).count()
    }

    /// Serialized public inputs submitted alongside the proof.
    pub fn public_input_bundle(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.pre_world_root.as_bytes());
        out.extend_from_slice(self.post_world_root.as_bytes());
        out.extend_from_slice(&(self.inners.len() as u64).to_le_bytes());
        for inner in &self.inners {
            out.extend_from_slice(&inner.public_input_bytes());
        }
        out
    }
}
