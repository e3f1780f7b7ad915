//! Publication boundary.
//!
//! An outer rollup leaves the sequencer through [`RollupPublisher`].
//! Submission is at-least-once: the scheduler retries failed submissions
//! with exponential backoff, and the post world root serves as the
//! idempotency key on the receiving side.

use async_trait::async_trait;
use sesame_merkle::HashValue;
use sesame_types::{OuterRollup, RollupId};
use thiserror::Error;
use tracing::info;

/// What the publisher hands to the settlement layer.
#[derive(Clone, Debug)]
pub struct PublishRequest {
    pub rollup_id: RollupId,
    pub pre_world_root: HashValue,
    pub post_world_root: HashValue,
    pub proof: Vec<u8>,
    pub public_inputs: Vec<u8>,
}

impl PublishRequest {
    pub fn from_outer(outer: &OuterRollup) -> Self {
        Self {
            rollup_id: outer.id,
            pre_world_root: outer.pre_world_root,
            post_world_root: outer.post_world_root,
            proof: outer.proof.clone(),
            public_inputs: outer.public_input_bundle(),
        }
    }
}

/// Acknowledgement from the settlement layer.
#[derive(Clone, Debug)]
pub struct SubmissionReceipt {
    pub tx_hash: HashValue,
    pub block_number: u64,
}

/// All variants are retried; none is treated as permanent by the
/// scheduler.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("submission reverted: {0}")]
    Reverted(String),
    #[error("submission underpriced")]
    Underpriced,
    #[error("submission invalidated by reorg")]
    ReorgInvalidated,
    #[error("transient submission failure: {0}")]
    Transient(String),
}

#[async_trait]
pub trait RollupPublisher: Send + Sync {
    async fn submit(&self, request: PublishRequest) -> Result<SubmissionReceipt, PublishError>;
}

/// Publisher that acknowledges every submission and only logs it. Used by
/// the standalone node when no settlement endpoint is configured.
#[derive(Default)]
pub struct LogPublisher {
    block_number: std::sync::atomic::AtomicU64,
}

impl LogPublisher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RollupPublisher for LogPublisher {
    async fn submit(&self, request: PublishRequest) -> Result<SubmissionReceipt, PublishError> {
        let block_number = self
            .block_number
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        info!(
            rollup_id = %request.rollup_id,
            post_world_root = %request.post_world_root,
            proof_len = request.proof.len(),
            block_number,
            "publishing rollup"
        );
        Ok(SubmissionReceipt {
            tx_hash: sesame_merkle::hash_leaf(&request.public_inputs),
            block_number,
        })
    }
}
