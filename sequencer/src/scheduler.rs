//! Rollup scheduling.
//!
//! Drives the pipeline: cut a transaction batch into an inner rollup when
//! the intake queue reaches capacity or the publish interval elapses, cut
//! pending inner rollups into an outer rollup by the same policy, commit
//! the world state once the outer proof exists, then publish. At most one
//! outer rollup is in flight at a time; publication retries block the next
//! cut, so a committed transition is always published before the next one
//! is constructed.
//!
//! Pending inner rollups chain on one provisional view. An outer proving
//! failure discards the view; the inner rollups stay queued in their
//! original order and their writes are replayed into a fresh view on the
//! next attempt.

use sesame_backend::BackendFactory;
use sesame_merkle::{ProvisionalView, WorldStateStore};
use sesame_types::{
    InnerRollup, OuterRollup, RollupStatus, SequencerConfig, TxRecord, TxRejectReason, TxStatus,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::aggregator::{InnerOutcome, OuterOutcome, ProofAggregator, RejectedTx};
use crate::error::SequencerResult;
use crate::events::ChainEvent;
use crate::intake::{IntakeQueue, Queued};
use crate::ledger::RollupLedger;
use crate::publisher::{PublishRequest, RollupPublisher};

const TICK: Duration = Duration::from_millis(10);

/// A proved inner rollup waiting to be folded into an outer rollup.
struct PendingInner {
    inner: InnerRollup,
    built_at: Instant,
    retries: u32,
}

/// Submission handle shared with whatever feeds the sequencer.
#[derive(Clone)]
pub struct SequencerHandle {
    intake: Arc<IntakeQueue<TxRecord>>,
    ledger: Arc<dyn RollupLedger>,
}

impl SequencerHandle {
    /// Accept an individually-proven transaction into the intake queue.
    /// A transaction bounced off a full queue leaves no ledger trace.
    pub fn submit_tx(&self, tx: TxRecord) -> SequencerResult<u64> {
        let id = tx.id;
        let seq = self.intake.submit(tx)?;
        self.ledger.record_tx(id, TxStatus::Received)?;
        Ok(seq)
    }

    pub fn queue_len(&self) -> usize {
        self.intake.len()
    }
}

/// The pipeline driver.
pub struct RollupScheduler<F: BackendFactory> {
    config: SequencerConfig,
    store: Arc<WorldStateStore>,
    intake: Arc<IntakeQueue<TxRecord>>,
    aggregator: ProofAggregator<F>,
    ledger: Arc<dyn RollupLedger>,
    publisher: Arc<dyn RollupPublisher>,
    /// Staged writes of every pending inner rollup, based on the current
    /// committed state. `None` after a commit or a discarded attempt.
    chain_view: Option<ProvisionalView>,
    pending: VecDeque<PendingInner>,
}

impl<F: BackendFactory> RollupScheduler<F> {
    pub fn new(
        config: SequencerConfig,
        store: Arc<WorldStateStore>,
        factory: &F,
        ledger: Arc<dyn RollupLedger>,
        publisher: Arc<dyn RollupPublisher>,
    ) -> SequencerResult<Self> {
        let aggregator = ProofAggregator::new(store.clone(), factory, &config)?;
        let intake = Arc::new(IntakeQueue::new(config.intake_capacity));
        Ok(Self {
            config,
            store,
            intake,
            aggregator,
            ledger,
            publisher,
            chain_view: None,
            pending: VecDeque::new(),
        })
    }

    pub fn handle(&self) -> SequencerHandle {
        SequencerHandle {
            intake: self.intake.clone(),
            ledger: self.ledger.clone(),
        }
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ChainEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> SequencerResult<()> {
        self.recover_unpublished().await?;
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => self.step().await?,
                Some(event) = events.recv() => self.handle_event(event)?,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("scheduler stopped");
        Ok(())
    }

    /// Resume publication of outer rollups that were committed but not yet
    /// acknowledged before a restart.
    pub async fn recover_unpublished(&self) -> SequencerResult<()> {
        for outer in self.ledger.unpublished_outers() {
            info!(rollup_id = %outer.id, "resuming publication of committed rollup");
            self.publish_with_retry(&outer).await?;
        }
        Ok(())
    }

    /// One scheduling pass: cut an inner rollup and/or an outer rollup if
    /// either trigger fires. The run loop calls this on every tick.
    pub async fn step(&mut self) -> SequencerResult<()> {
        let interval = self.config.publish_interval();
        let k = self.config.num_inner_txs;
        let queue_len = self.intake.len();
        let inner_time_up = self
            .intake
            .oldest_age()
            .is_some_and(|age| age >= interval);
        if queue_len >= k || (inner_time_up && queue_len > 0) {
            self.cut_inner(queue_len < k).await?;
        }

        let m = self.config.num_outer_proofs;
        let outer_time_up = self
            .pending
            .front()
            .is_some_and(|p| p.built_at.elapsed() >= interval);
        if self.pending.len() >= m || (outer_time_up && !self.pending.is_empty()) {
            self.cut_outer(self.pending.len() < m).await?;
        }
        Ok(())
    }

    /// Settlement-layer confirmations move published rollups to `Settled`.
    pub fn handle_event(&self, event: ChainEvent) -> SequencerResult<()> {
        match event {
            ChainEvent::RollupMined {
                post_world_root,
                block_number,
            } => match self.ledger.outer_by_post_root(&post_world_root) {
                Some(outer) => {
                    info!(rollup_id = %outer.id, block_number, "rollup settled");
                    self.ledger.record_rollup(outer.id, RollupStatus::Settled)?;
                    for inner in outer.inners.iter().filter(|inner| !inner.is_noop()) {
                        self.ledger.record_rollup(inner.id, RollupStatus::Settled)?;
                    }
                    for tx in Self::real_txs(&outer) {
                        self.ledger.record_tx(tx.id, TxStatus::Settled)?;
                    }
                }
                None => {
                    warn!(root = %post_world_root, "settlement event for unknown world root");
                }
            },
        }
        Ok(())
    }

    async fn cut_inner(&mut self, time_triggered: bool) -> SequencerResult<()> {
        let batch = self.intake.take_batch(self.config.num_inner_txs);
        if batch.is_empty() {
            return Ok(());
        }
        for queued in &batch {
            self.ledger.record_tx(queued.item.id, TxStatus::Staged)?;
        }

        let mut view = match self.chain_view.take() {
            Some(view) => view,
            None => self.store.begin_provisional(),
        };
        let checkpoint = view.clone();

        match self.aggregator.build_inner(&mut view, batch, time_triggered).await {
            InnerOutcome::Built {
                rollup,
                included,
                rejected,
            } => {
                self.chain_view = Some(view);
                for queued in &included {
                    self.ledger
                        .record_tx(queued.item.id, TxStatus::IncludedInInner)?;
                }
                self.handle_rejections(rejected)?;
                for status in [
                    RollupStatus::Constructing,
                    RollupStatus::Proving,
                    RollupStatus::Proved,
                ] {
                    self.ledger.record_rollup(rollup.id, status)?;
                }
                info!(
                    rollup_id = %rollup.id,
                    txs = rollup.txs.len(),
                    real = rollup.real_tx_count(),
                    time_triggered,
                    "inner rollup proved"
                );
                self.pending.push_back(PendingInner {
                    inner: rollup,
                    built_at: Instant::now(),
                    retries: 0,
                });
            }
            InnerOutcome::Empty { rejected } => {
                self.chain_view = Some(view);
                self.handle_rejections(rejected)?;
            }
            InnerOutcome::ProofFailed {
                id,
                included,
                rejected,
                error,
            } => {
                warn!(txs = included.len(), error = %error, "inner aggregation failed; rolling back batch");
                self.chain_view = Some(checkpoint);
                if let Some(id) = id {
                    for status in [
                        RollupStatus::Constructing,
                        RollupStatus::Proving,
                        RollupStatus::Failed,
                        RollupStatus::RolledBack,
                    ] {
                        self.ledger.record_rollup(id, status)?;
                    }
                }
                self.handle_rejections(rejected)?;
                self.requeue_txs(included)?;
            }
        }
        Ok(())
    }

    async fn cut_outer(&mut self, time_triggered: bool) -> SequencerResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let view = match self.chain_view.take() {
            Some(view) => view,
            None => {
                // The previous attempt's view was discarded; replay the
                // pending inner rollups against committed state.
                let mut view = self.store.begin_provisional();
                for pending in &self.pending {
                    self.aggregator.stage_inner(&mut view, &pending.inner)?;
                }
                view
            }
        };

        let post_world_root = self.store.view_world_root(&view);
        if let Some(existing) = self.ledger.outer_by_post_root(&post_world_root) {
            warn!(
                rollup_id = %existing.id,
                "outer rollup for this transition already recorded; skipping construction"
            );
            self.chain_view = Some(view);
            return Ok(());
        }

        let inners: Vec<InnerRollup> = self.pending.iter().map(|p| p.inner.clone()).collect();
        match self.aggregator.build_outer(&view, inners, time_triggered).await {
            OuterOutcome::Built { rollup } => {
                for status in [
                    RollupStatus::Constructing,
                    RollupStatus::Proving,
                    RollupStatus::Proved,
                ] {
                    self.ledger.record_rollup(rollup.id, status)?;
                }
                let commit = self.store.commit(view)?;
                info!(
                    rollup_id = %rollup.id,
                    commit_seq = commit.commit_seq,
                    world_root = %commit.world_root,
                    inners = rollup.inners.len(),
                    real = rollup.real_inner_count(),
                    "outer rollup committed"
                );
                for pending in &self.pending {
                    self.ledger
                        .record_rollup(pending.inner.id, RollupStatus::Committed)?;
                }
                self.ledger.record_rollup(rollup.id, RollupStatus::Committed)?;
                self.ledger.record_outer(&rollup)?;
                for tx in Self::real_txs(&rollup) {
                    self.ledger.record_tx(tx.id, TxStatus::IncludedInOuter)?;
                }
                self.pending.clear();
                self.publish_with_retry(&rollup).await?;
            }
            OuterOutcome::ProofFailed { id, error } => {
                warn!(
                    rollup_id = %id,
                    pending = self.pending.len(),
                    error = %error,
                    "outer aggregation failed; discarding provisional view"
                );
                for status in [
                    RollupStatus::Constructing,
                    RollupStatus::Proving,
                    RollupStatus::Failed,
                    RollupStatus::RolledBack,
                ] {
                    self.ledger.record_rollup(id, status)?;
                }
                self.store.rollback(view);
                // Pending inner rollups keep their order; their writes get
                // replayed on the next attempt. An inner bounced too often
                // is dissolved back into its transactions.
                let max_retries = self.config.max_tx_retries;
                let mut kept = VecDeque::new();
                for mut pending in std::mem::take(&mut self.pending) {
                    if pending.retries >= max_retries {
                        warn!(
                            rollup_id = %pending.inner.id,
                            "inner rollup retries exhausted; requeueing its transactions"
                        );
                        self.ledger
                            .record_rollup(pending.inner.id, RollupStatus::RolledBack)?;
                        for tx in pending.inner.txs.iter().filter(|tx| !tx.is_noop()) {
                            if self.intake.submit(tx.clone()).is_err() {
                                warn!(tx_id = %tx.id, "intake full during requeue");
                                self.ledger.record_tx(
                                    tx.id,
                                    TxStatus::Rejected(TxRejectReason::AggregationFailed),
                                )?;
                            } else {
                                self.ledger.record_tx(tx.id, TxStatus::Received)?;
                            }
                        }
                    } else {
                        pending.retries += 1;
                        kept.push_back(pending);
                    }
                }
                self.pending = kept;
            }
        }
        Ok(())
    }

    fn handle_rejections(&self, rejected: Vec<RejectedTx>) -> SequencerResult<()> {
        let mut bounced = Vec::new();
        for rejection in rejected {
            match rejection.reason {
                // Double spends may be transient (two txs racing for one
                // note); give the loser another chance in a later batch.
                TxRejectReason::DuplicateNullifier => bounced.push(rejection.queued),
                reason => {
                    info!(tx_id = %rejection.queued.item.id, %reason, "transaction rejected");
                    self.ledger
                        .record_tx(rejection.queued.item.id, TxStatus::Rejected(reason))?;
                }
            }
        }
        self.requeue_txs(bounced)
    }

    fn requeue_txs(&self, items: Vec<Queued<TxRecord>>) -> SequencerResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let ids: Vec<_> = items.iter().map(|q| q.item.id).collect();
        let exhausted = self.intake.requeue(items, self.config.max_tx_retries);
        let exhausted_ids: Vec<_> = exhausted.iter().map(|q| q.item.id).collect();
        for queued in exhausted {
            warn!(tx_id = %queued.item.id, retries = queued.retries, "transaction retries exhausted");
            self.ledger.record_tx(
                queued.item.id,
                TxStatus::Rejected(TxRejectReason::RetriesExhausted),
            )?;
        }
        for id in ids.into_iter().filter(|id| !exhausted_ids.contains(id)) {
            debug!(tx_id = %id, "transaction requeued");
            self.ledger.record_tx(id, TxStatus::Received)?;
        }
        Ok(())
    }

    /// At-least-once submission with exponential backoff. The post world
    /// root is the idempotency key on the receiving side, so retrying an
    /// already-accepted submission is harmless.
    async fn publish_with_retry(&self, rollup: &OuterRollup) -> SequencerResult<()> {
        let mut backoff = self.config.publish_backoff_base();
        let cap = self.config.publish_backoff_max();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.publisher.submit(PublishRequest::from_outer(rollup)).await {
                Ok(receipt) => {
                    info!(
                        rollup_id = %rollup.id,
                        tx_hash = %receipt.tx_hash,
                        block_number = receipt.block_number,
                        attempt,
                        "outer rollup published"
                    );
                    self.ledger.record_rollup(rollup.id, RollupStatus::Published)?;
                    for tx in Self::real_txs(rollup) {
                        self.ledger.record_tx(tx.id, TxStatus::Published)?;
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        rollup_id = %rollup.id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "publication failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(cap);
                }
            }
        }
    }

    fn real_txs(rollup: &OuterRollup) -> impl Iterator<Item = &TxRecord> {
        rollup
            .inners
            .iter()
            .flat_map(|inner| inner.txs.iter())
            .filter(|tx| !tx.is_noop())
    }
}
