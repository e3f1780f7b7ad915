//! Transaction records and their lifecycle.
//!
//! A transaction arrives individually proven, with its public inputs
//! already decoded and verified upstream. The sequencer only stages its
//! note-commitment and nullifier insertions and aggregates its proof; it
//! never inspects the proof bytes.

use serde::{Deserialize, Serialize};
use sesame_merkle::HashValue;
use std::fmt;

/// Well-known proof bytes of the canonical no-op transaction used to pad
/// underfilled, time-triggered batches. No-op transactions touch no tree.
pub const NOOP_PROOF: [u8; 32] = *b"SESAME_NOOP_TRANSACTION_PROOF_V1";

/// Unique transaction identifier, derived from the transaction content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub HashValue);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", &self.0.to_string()[..16])
    }
}

/// Decoded public inputs of an individually-proven transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPublicInputs {
    /// Note commitments this transaction appends to the data tree.
    pub note_commitments: Vec<HashValue>,
    /// Nullifiers this transaction consumes.
    pub nullifiers: Vec<HashValue>,
    /// Transfer value.
    pub value: u64,
    /// Asset identifier.
    pub asset_id: u32,
    /// Fee offered to the sequencer. Informational only: inclusion order
    /// is strictly FIFO, never fee-priority.
    pub fee: u64,
    /// Data-tree root the proof was generated against.
    pub anchor_root: HashValue,
    /// Opaque bridge interaction payload, committed to the defi tree.
    pub bridge_call_data: Option<Vec<u8>>,
}

/// An individually-proven transaction as accepted by the intake queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub id: TxId,
    /// Opaque proof bytes.
    pub proof: Vec<u8>,
    pub public_inputs: TxPublicInputs,
}

impl TxRecord {
    /// Build a record, deriving its id from the canonical encoding.
    pub fn new(proof: Vec<u8>, public_inputs: TxPublicInputs) -> Self {
        let mut record = Self {
            id: TxId(HashValue::zero()),
            proof,
            public_inputs,
        };
        record.id = TxId(sesame_merkle::hash_leaf(&record.encode()));
        record
    }

    /// The canonical no-op transaction. Deterministic: padding a batch
    /// twice yields bit-identical records.
    pub fn noop() -> Self {
        Self::new(NOOP_PROOF.to_vec(), TxPublicInputs::default())
    }

    pub fn is_noop(&self) -> bool {
        self.proof == NOOP_PROOF
            && self.public_inputs.note_commitments.is_empty()
            && self.public_inputs.nullifiers.is_empty()
    }

    /// Canonical byte encoding of proof and public inputs, used for id
    /// derivation and proof aggregation.
    pub fn encode(&self) -> Vec<u8> {
        let inputs = &self.public_inputs;
        let mut out = Vec::with_capacity(
            self.proof.len() + 32 * (inputs.note_commitments.len() + inputs.nullifiers.len()) + 64,
        );
        out.extend_from_slice(&(self.proof.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.proof);
        out.extend_from_slice(&(inputs.note_commitments.len() as u64).to_le_bytes());
        for commitment in &inputs.note_commitments {
            out.extend_from_slice(commitment.as_bytes());
        }
        out.extend_from_slice(&(inputs.nullifiers.len() as u64).to_le_bytes());
        for nullifier in &inputs.nullifiers {
            out.extend_from_slice(nullifier.as_bytes());
        }
        out.extend_from_slice(&inputs.value.to_le_bytes());
        out.extend_from_slice(&inputs.asset_id.to_le_bytes());
        out.extend_from_slice(&inputs.fee.to_le_bytes());
        out.extend_from_slice(inputs.anchor_root.as_bytes());
        match &inputs.bridge_call_data {
            Some(data) => {
                out.extend_from_slice(&(data.len() as u64 + 1).to_le_bytes());
                out.extend_from_slice(data);
            }
            None => out.extend_from_slice(&0u64.to_le_bytes()),
        }
        out
    }
}

/// Why a transaction was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxRejectReason {
    /// A nullifier was already consumed (double-spend attempt).
    DuplicateNullifier,
    /// The proof's anchor root fell outside the root-history retention
    /// window.
    StaleRoot,
    /// The batch it was part of failed to aggregate.
    AggregationFailed,
    /// Requeued more times than the configured maximum.
    RetriesExhausted,
}

impl fmt::Display for TxRejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxRejectReason::DuplicateNullifier => write!(f, "duplicate nullifier"),
            TxRejectReason::StaleRoot => write!(f, "stale anchor root"),
            TxRejectReason::AggregationFailed => write!(f, "aggregation failed"),
            TxRejectReason::RetriesExhausted => write!(f, "retries exhausted"),
        }
    }
}

/// Transaction lifecycle as reported to the rollup ledger.
///
/// `Rejected` is terminal and only reachable before `Published`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Received,
    Staged,
    IncludedInInner,
    IncludedInOuter,
    Published,
    Settled,
    Rejected(TxRejectReason),
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxStatus::Received => write!(f, "received"),
            TxStatus::Staged => write!(f, "staged"),
            TxStatus::IncludedInInner => write!(f, "included-in-inner-rollup"),
            TxStatus::IncludedInOuter => write!(f, "included-in-outer-rollup"),
            TxStatus::Published => write!(f, "published"),
            TxStatus::Settled => write!(f, "settled"),
            TxStatus::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}
