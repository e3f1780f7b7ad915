//! Proof aggregation.
//!
//! Both rollup layers aggregate the same way: stage the constituents'
//! tree writes into a provisional view, then fold their proofs into one
//! aggregate proof through the crypto backend. [`AggregateProver`] is the
//! layer-independent proving path; [`ProofAggregator`] adds the
//! world-state staging rules (stale-anchor rejection, double-spend
//! rejection, no-op padding).
//!
//! Staging mutates the caller's view even on failure; the caller holds a
//! checkpoint clone and restores it when an outcome other than `Built`
//! comes back.

use sesame_backend::{Backend, BackendFactory, PoolConfig, WorkerPool};
use sesame_merkle::{hash_leaf, HashValue, MerkleError, ProvisionalView, TreeId, WorldStateStore};
use sesame_types::{InnerRollup, OuterRollup, RollupId, SequencerConfig, TxRecord, TxRejectReason};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{SequencerError, SequencerResult};
use crate::intake::Queued;

/// A constituent with an already-verified proof, aggregatable into the
/// next rollup layer. Transactions aggregate into inner rollups, inner
/// rollups into outer rollups.
pub trait ProvenUnit {
    fn proof_bytes(&self) -> &[u8];
    fn public_inputs(&self) -> Vec<u8>;
    /// Padding units carry the canonical no-op proof and perform the
    /// identity transition.
    fn is_padding(&self) -> bool;
}

impl ProvenUnit for TxRecord {
    fn proof_bytes(&self) -> &[u8] {
        &self.proof
    }

    fn public_inputs(&self) -> Vec<u8> {
        self.encode()
    }

    fn is_padding(&self) -> bool {
        self.is_noop()
    }
}

impl ProvenUnit for InnerRollup {
    fn proof_bytes(&self) -> &[u8] {
        &self.proof
    }

    fn public_inputs(&self) -> Vec<u8> {
        self.public_input_bytes()
    }

    fn is_padding(&self) -> bool {
        self.is_noop()
    }
}

/// Layer-independent aggregate prover.
///
/// Folds constituent proofs and public inputs into a transcript, then runs
/// the heavy kernels (multi-scalar multiplication, polynomial transforms,
/// the final pairing product check) across the worker pool. Deterministic:
/// the same constituents and roots always yield the same proof bytes.
pub struct AggregateProver<F: BackendFactory> {
    pool: WorkerPool<F>,
    /// Coordinator-side backend for transcript hashing and the final
    /// pairing check.
    backend: F::B,
}

impl<F: BackendFactory> AggregateProver<F> {
    pub fn new(factory: &F, pool_config: PoolConfig) -> SequencerResult<Self> {
        let pool = WorkerPool::init(factory, pool_config)?;
        let backend = factory.create()?;
        Ok(Self { pool, backend })
    }

    /// Aggregate the units' proofs over the `pre_roots -> post_roots`
    /// transition.
    pub async fn prove<U: ProvenUnit>(
        &self,
        units: &[U],
        pre_roots: &[HashValue],
        post_roots: &[HashValue],
    ) -> SequencerResult<Vec<u8>> {
        if units.is_empty() {
            return Err(SequencerError::AggregationFailed(
                "cannot aggregate zero units".into(),
            ));
        }

        let mut transcript = Vec::new();
        for root in pre_roots.iter().chain(post_roots) {
            transcript.extend_from_slice(root.as_bytes());
        }
        for unit in units {
            transcript.extend_from_slice(&self.backend.hash32(unit.proof_bytes()));
            transcript.extend_from_slice(&self.backend.hash32(&unit.public_inputs()));
        }
        let seed = self.backend.hash32(&transcript);

        // One accumulator slot per unit, rounded up to a power-of-two
        // domain shared by the MSM and the polynomial transform.
        let n = units.len().next_power_of_two().max(2);
        let mut points = Vec::with_capacity(n);
        let mut scalars = Vec::with_capacity(n);
        let mut values = Vec::with_capacity(n);
        let mut digest = seed;
        for i in 0..n {
            let mut buf = Vec::with_capacity(40);
            buf.extend_from_slice(&digest);
            buf.extend_from_slice(&(i as u64).to_le_bytes());
            digest = self.backend.hash32(&buf);
            points.push(self.backend.point_from_bytes(&digest));
            scalars.push(self.backend.scalar_from_bytes(&digest[..16]));
            values.push(self.backend.field_from_bytes(&digest[16..]));
        }

        let accumulated = self.pool.multi_scalar_multiply(&points, &scalars).await?;

        // The final pairing product check of the recursive verifier. The
        // right-hand accumulator is folded on the coordinator in reverse
        // order; the group law makes both sides equal for a sound
        // transcript.
        let reversed_points: Vec<_> = points.iter().rev().cloned().collect();
        let reversed_scalars: Vec<_> = scalars.iter().rev().cloned().collect();
        let expected = self.backend.msm(&reversed_points, &reversed_scalars)?;
        if !self.backend.pairing_check(&accumulated, &expected)? {
            return Err(SequencerError::AggregationFailed(
                "pairing product check failed".into(),
            ));
        }

        // Quotient polynomial evaluation and back: a transform that does
        // not invert cleanly means a corrupted domain or a faulty worker.
        let evaluations = self.pool.fft(values.clone(), false).await?;
        let restored = self.pool.fft(evaluations, true).await?;
        if restored != values {
            return Err(SequencerError::AggregationFailed(
                "polynomial transform self-check failed".into(),
            ));
        }

        let mut proof = Vec::with_capacity(64);
        proof.extend_from_slice(&seed);
        let mut closing = Vec::with_capacity(64);
        closing.extend_from_slice(&self.backend.point_to_bytes(&accumulated));
        closing.extend_from_slice(&seed);
        proof.extend_from_slice(&self.backend.hash32(&closing));
        debug!(units = units.len(), domain = n, "aggregate proof produced");
        Ok(proof)
    }
}

/// A transaction bounced out of a batch during staging.
#[derive(Debug)]
pub struct RejectedTx {
    pub queued: Queued<TxRecord>,
    pub reason: TxRejectReason,
}

/// Outcome of one inner-rollup construction attempt.
pub enum InnerOutcome {
    Built {
        rollup: InnerRollup,
        included: Vec<Queued<TxRecord>>,
        rejected: Vec<RejectedTx>,
    },
    /// Staging or proving failed after some transactions were admitted;
    /// the caller must restore its view checkpoint and requeue `included`.
    ProofFailed {
        id: Option<RollupId>,
        included: Vec<Queued<TxRecord>>,
        rejected: Vec<RejectedTx>,
        error: String,
    },
    /// Every transaction in the batch was rejected; nothing was staged.
    Empty { rejected: Vec<RejectedTx> },
}

/// Outcome of one outer-rollup construction attempt.
pub enum OuterOutcome {
    Built { rollup: OuterRollup },
    ProofFailed { id: RollupId, error: String },
}

/// Builds inner and outer rollups against the world state.
pub struct ProofAggregator<F: BackendFactory> {
    store: Arc<WorldStateStore>,
    prover: AggregateProver<F>,
    num_inner_txs: usize,
    num_outer_proofs: usize,
    root_retention: usize,
}

impl<F: BackendFactory> ProofAggregator<F> {
    pub fn new(
        store: Arc<WorldStateStore>,
        factory: &F,
        config: &SequencerConfig,
    ) -> SequencerResult<Self> {
        let prover = AggregateProver::new(
            factory,
            PoolConfig {
                worker_count: config.worker_count,
                chunk_size: config.msm_chunk_size,
                fft_parallel_threshold: config.fft_parallel_threshold,
            },
        )?;
        Ok(Self {
            store,
            prover,
            num_inner_txs: config.num_inner_txs,
            num_outer_proofs: config.num_outer_proofs,
            root_retention: config.root_history_retention,
        })
    }

    pub fn prover(&self) -> &AggregateProver<F> {
        &self.prover
    }

    /// Construct an inner rollup from `batch`, staging accepted writes into
    /// `view`. Underfilled batches are padded with no-op transactions only
    /// when `pad` is set (the timer cut the batch early).
    pub async fn build_inner(
        &self,
        view: &mut ProvisionalView,
        batch: Vec<Queued<TxRecord>>,
        pad: bool,
    ) -> InnerOutcome {
        let pre_data_root = self.store.view_root(view, TreeId::Data);
        let pre_nullifier_root = self.store.view_root(view, TreeId::Nullifier);

        let mut included: Vec<Queued<TxRecord>> = Vec::with_capacity(batch.len());
        let mut rejected = Vec::new();
        for queued in batch {
            match self.stage_tx(view, &queued.item) {
                Ok(()) => included.push(queued),
                Err(StageError::Reject(reason)) => {
                    debug!(tx_id = %queued.item.id, %reason, "transaction rejected from batch");
                    rejected.push(RejectedTx { queued, reason });
                }
                Err(StageError::Merkle(e)) => {
                    included.push(queued);
                    return InnerOutcome::ProofFailed {
                        id: None,
                        included,
                        rejected,
                        error: e.to_string(),
                    };
                }
            }
        }
        if included.is_empty() {
            return InnerOutcome::Empty { rejected };
        }

        let mut txs: Vec<TxRecord> = included.iter().map(|q| q.item.clone()).collect();
        if pad {
            while txs.len() < self.num_inner_txs {
                txs.push(TxRecord::noop());
            }
        }

        let post_data_root = self.store.view_root(view, TreeId::Data);
        let post_nullifier_root = self.store.view_root(view, TreeId::Nullifier);
        // The id covers roots and transactions but not the aggregate
        // proof, so it is stable across proving attempts.
        let id = InnerRollup::new(
            txs.clone(),
            pre_data_root,
            post_data_root,
            pre_nullifier_root,
            post_nullifier_root,
            Vec::new(),
        )
        .id;

        match self
            .prover
            .prove(
                &txs,
                &[pre_data_root, pre_nullifier_root],
                &[post_data_root, post_nullifier_root],
            )
            .await
        {
            Ok(proof) => InnerOutcome::Built {
                rollup: InnerRollup::new(
                    txs,
                    pre_data_root,
                    post_data_root,
                    pre_nullifier_root,
                    post_nullifier_root,
                    proof,
                ),
                included,
                rejected,
            },
            Err(e) => InnerOutcome::ProofFailed {
                id: Some(id),
                included,
                rejected,
                error: e.to_string(),
            },
        }
    }

    /// Replay an already-built inner rollup's writes into `view`, checking
    /// that the recorded transition is reproduced exactly.
    pub fn stage_inner(
        &self,
        view: &mut ProvisionalView,
        inner: &InnerRollup,
    ) -> SequencerResult<()> {
        let pre_data = self.store.view_root(view, TreeId::Data);
        let pre_nullifier = self.store.view_root(view, TreeId::Nullifier);
        if pre_data != inner.pre_data_root || pre_nullifier != inner.pre_nullifier_root {
            return Err(SequencerError::IntegrityViolation(format!(
                "inner rollup {} expects pre data root {}, view has {}",
                inner.id, inner.pre_data_root, pre_data
            )));
        }
        for tx in inner.txs.iter().filter(|tx| !tx.is_noop()) {
            self.apply_tx_writes(view, tx)?;
        }
        let post_data = self.store.view_root(view, TreeId::Data);
        let post_nullifier = self.store.view_root(view, TreeId::Nullifier);
        if post_data != inner.post_data_root || post_nullifier != inner.post_nullifier_root {
            return Err(SequencerError::IntegrityViolation(format!(
                "inner rollup {} replay produced data root {}, recorded {}",
                inner.id, post_data, inner.post_data_root
            )));
        }
        Ok(())
    }

    /// Construct an outer rollup over `inners` as staged in `view`. Pads
    /// with no-op inner rollups up to the configured width when `pad` is
    /// set.
    pub async fn build_outer(
        &self,
        view: &ProvisionalView,
        mut inners: Vec<InnerRollup>,
        pad: bool,
    ) -> OuterOutcome {
        let pre_world_root = self.store.world_root();
        let post_world_root = self.store.view_world_root(view);
        if pad {
            let data_root = self.store.view_root(view, TreeId::Data);
            let nullifier_root = self.store.view_root(view, TreeId::Nullifier);
            while inners.len() < self.num_outer_proofs {
                inners.push(InnerRollup::noop(
                    data_root,
                    nullifier_root,
                    self.num_inner_txs,
                ));
            }
        }

        let id = OuterRollup::new(
            inners.clone(),
            pre_world_root,
            post_world_root,
            Vec::new(),
        )
        .id;
        match self
            .prover
            .prove(&inners, &[pre_world_root], &[post_world_root])
            .await
        {
            Ok(proof) => OuterOutcome::Built {
                rollup: OuterRollup::new(inners, pre_world_root, post_world_root, proof),
            },
            Err(e) => OuterOutcome::ProofFailed {
                id,
                error: e.to_string(),
            },
        }
    }

    /// Admission checks, then tree writes. Check-then-apply: a rejected
    /// transaction leaves the view untouched.
    fn stage_tx(&self, view: &mut ProvisionalView, tx: &TxRecord) -> Result<(), StageError> {
        let inputs = &tx.public_inputs;
        if !self
            .store
            .is_recent_root(&inputs.anchor_root, self.root_retention)
        {
            return Err(StageError::Reject(TxRejectReason::StaleRoot));
        }
        let mut indices = Vec::with_capacity(inputs.nullifiers.len());
        for nullifier in &inputs.nullifiers {
            let index = self.store.nullifier_index(nullifier);
            if indices.contains(&index)
                || !self.store.is_slot_empty(view, TreeId::Nullifier, index)
            {
                return Err(StageError::Reject(TxRejectReason::DuplicateNullifier));
            }
            indices.push(index);
        }
        self.apply_tx_writes(view, tx)?;
        Ok(())
    }

    fn apply_tx_writes(
        &self,
        view: &mut ProvisionalView,
        tx: &TxRecord,
    ) -> Result<(), MerkleError> {
        let inputs = &tx.public_inputs;
        for nullifier in &inputs.nullifiers {
            let index = self.store.nullifier_index(nullifier);
            self.store
                .update_leaf(view, TreeId::Nullifier, index, *nullifier)?;
        }
        for commitment in &inputs.note_commitments {
            self.store.insert_leaf(view, TreeId::Data, *commitment)?;
        }
        if let Some(bridge_call_data) = &inputs.bridge_call_data {
            self.store
                .insert_leaf(view, TreeId::Defi, hash_leaf(bridge_call_data))?;
        }
        Ok(())
    }
}

enum StageError {
    Reject(TxRejectReason),
    Merkle(MerkleError),
}

impl From<MerkleError> for StageError {
    fn from(e: MerkleError) -> Self {
        match e {
            MerkleError::DuplicateNullifier { .. } => {
                warn!("duplicate nullifier slipped past admission checks");
                StageError::Reject(TxRejectReason::DuplicateNullifier)
            }
            other => StageError::Merkle(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sesame_backend::ReferenceBackendFactory;
    use sesame_merkle::WorldStateConfig;
    use sesame_types::TxPublicInputs;
    use tokio::time::Instant;

    fn test_config() -> SequencerConfig {
        SequencerConfig {
            num_inner_txs: 4,
            num_outer_proofs: 2,
            worker_count: 2,
            root_history_retention: 8,
            world_state: WorldStateConfig {
                data_tree_depth: 8,
                nullifier_tree_depth: 16,
                root_history_depth: 8,
                defi_tree_depth: 8,
            },
            ..SequencerConfig::default()
        }
    }

    fn aggregator() -> (Arc<WorldStateStore>, ProofAggregator<ReferenceBackendFactory>) {
        let config = test_config();
        let store = Arc::new(WorldStateStore::new(config.world_state.clone()));
        let aggregator =
            ProofAggregator::new(store.clone(), &ReferenceBackendFactory::new(), &config).unwrap();
        (store, aggregator)
    }

    fn tx(seed: u8, store: &WorldStateStore) -> TxRecord {
        TxRecord::new(
            vec![seed; 48],
            TxPublicInputs {
                note_commitments: vec![HashValue::new([seed; 32])],
                nullifiers: vec![HashValue::new([seed.wrapping_add(100); 32])],
                value: seed as u64,
                asset_id: 0,
                fee: 1,
                anchor_root: store.get_root(TreeId::Data),
                bridge_call_data: None,
            },
        )
    }

    fn queued(tx: TxRecord, seq: u64) -> Queued<TxRecord> {
        Queued {
            item: tx,
            seq,
            arrived_at: Instant::now(),
            retries: 0,
        }
    }

    #[tokio::test]
    async fn test_aggregate_proof_is_deterministic() {
        let (store, aggregator) = aggregator();
        let txs = vec![tx(1, &store), tx(2, &store)];
        let roots = [store.get_root(TreeId::Data)];
        let a = aggregator.prover().prove(&txs, &roots, &roots).await.unwrap();
        let b = aggregator.prover().prove(&txs, &roots, &roots).await.unwrap();
        assert_eq!(a, b);

        let other = vec![tx(1, &store), tx(3, &store)];
        let c = aggregator.prover().prove(&other, &roots, &roots).await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_build_inner_pads_when_time_triggered() {
        let (store, aggregator) = aggregator();
        let mut view = store.begin_provisional();
        let outcome = aggregator
            .build_inner(&mut view, vec![queued(tx(1, &store), 0)], true)
            .await;
        match outcome {
            InnerOutcome::Built { rollup, included, rejected } => {
                assert_eq!(rollup.txs.len(), 4);
                assert_eq!(rollup.real_tx_count(), 1);
                assert_eq!(included.len(), 1);
                assert!(rejected.is_empty());
                assert_eq!(rollup.pre_data_root, store.get_root(TreeId::Data));
                assert_ne!(rollup.post_data_root, rollup.pre_data_root);
            }
            _ => panic!("expected built inner rollup"),
        }
    }

    #[tokio::test]
    async fn test_build_inner_without_padding_keeps_batch_size() {
        let (store, aggregator) = aggregator();
        let mut view = store.begin_provisional();
        let batch = (0..4).map(|i| queued(tx(i + 1, &store), i as u64)).collect();
        match aggregator.build_inner(&mut view, batch, false).await {
            InnerOutcome::Built { rollup, .. } => {
                assert_eq!(rollup.txs.len(), 4);
                assert_eq!(rollup.real_tx_count(), 4);
            }
            _ => panic!("expected built inner rollup"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_nullifier_rejected_batch_proceeds() {
        let (store, aggregator) = aggregator();
        let mut view = store.begin_provisional();
        let first = tx(1, &store);
        let mut duplicate = tx(2, &store);
        duplicate.public_inputs.nullifiers = first.public_inputs.nullifiers.clone();
        let duplicate = TxRecord::new(duplicate.proof.clone(), duplicate.public_inputs);
        let batch = vec![
            queued(first, 0),
            queued(duplicate, 1),
            queued(tx(3, &store), 2),
        ];
        match aggregator.build_inner(&mut view, batch, true).await {
            InnerOutcome::Built { rollup, included, rejected } => {
                assert_eq!(rollup.real_tx_count(), 2);
                assert_eq!(included.len(), 2);
                assert_eq!(rejected.len(), 1);
                assert_eq!(rejected[0].reason, TxRejectReason::DuplicateNullifier);
                assert_eq!(rejected[0].queued.seq, 1);
            }
            _ => panic!("expected built inner rollup"),
        }
    }

    #[tokio::test]
    async fn test_stale_anchor_rejected() {
        let (store, aggregator) = aggregator();
        let mut stale = tx(1, &store);
        stale.public_inputs.anchor_root = HashValue::new([0xaa; 32]);
        let stale = TxRecord::new(stale.proof.clone(), stale.public_inputs);
        let mut view = store.begin_provisional();
        match aggregator.build_inner(&mut view, vec![queued(stale, 0)], true).await {
            InnerOutcome::Empty { rejected } => {
                assert_eq!(rejected.len(), 1);
                assert_eq!(rejected[0].reason, TxRejectReason::StaleRoot);
            }
            _ => panic!("expected empty outcome"),
        }
    }

    #[tokio::test]
    async fn test_stage_inner_replays_to_recorded_roots() {
        let (store, aggregator) = aggregator();
        let mut view = store.begin_provisional();
        let batch = vec![queued(tx(1, &store), 0), queued(tx(2, &store), 1)];
        let rollup = match aggregator.build_inner(&mut view, batch, true).await {
            InnerOutcome::Built { rollup, .. } => rollup,
            _ => panic!("expected built inner rollup"),
        };
        drop(view);

        let mut replay = store.begin_provisional();
        aggregator.stage_inner(&mut replay, &rollup).unwrap();
        assert_eq!(store.view_root(&replay, TreeId::Data), rollup.post_data_root);

        // Replaying on top of itself must fail the pre-root check.
        assert!(matches!(
            aggregator.stage_inner(&mut replay, &rollup),
            Err(SequencerError::IntegrityViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_build_outer_pads_and_spans_world_transition() {
        let (store, aggregator) = aggregator();
        let mut view = store.begin_provisional();
        let rollup = match aggregator
            .build_inner(&mut view, vec![queued(tx(1, &store), 0)], true)
            .await
        {
            InnerOutcome::Built { rollup, .. } => rollup,
            _ => panic!("expected built inner rollup"),
        };
        let pre_world = store.world_root();
        let post_world = store.view_world_root(&view);
        match aggregator.build_outer(&view, vec![rollup], true).await {
            OuterOutcome::Built { rollup: outer } => {
                assert_eq!(outer.inners.len(), 2);
                assert_eq!(outer.real_inner_count(), 1);
                assert_eq!(outer.pre_world_root, pre_world);
                assert_eq!(outer.post_world_root, post_world);
                assert!(outer.inners[1].is_noop());
            }
            OuterOutcome::ProofFailed { error, .. } => panic!("outer proving failed: {error}"),
        }
    }

    #[tokio::test]
    async fn test_bridge_call_data_lands_in_defi_tree() {
        let (store, aggregator) = aggregator();
        let mut bridged = tx(1, &store);
        bridged.public_inputs.bridge_call_data = Some(vec![1, 2, 3]);
        let bridged = TxRecord::new(bridged.proof.clone(), bridged.public_inputs);
        let mut view = store.begin_provisional();
        match aggregator.build_inner(&mut view, vec![queued(bridged, 0)], true).await {
            InnerOutcome::Built { .. } => {}
            _ => panic!("expected built inner rollup"),
        }
        assert_eq!(view.staged_count(TreeId::Defi), 1);
        assert_ne!(
            store.view_root(&view, TreeId::Defi),
            store.get_root(TreeId::Defi)
        );
    }
}
