//! Rollup ledger: the durable record of transaction and rollup lifecycle.
//!
//! Every pipeline transition is reported here, including failures, so an
//! operator can reconstruct what happened to any transaction. The ledger
//! also remembers committed outer rollups so publication can resume after
//! a restart.

use parking_lot::RwLock;
use sesame_merkle::HashValue;
use sesame_types::{OuterRollup, RollupId, RollupStatus, TxId, TxStatus};
use std::collections::HashMap;

use crate::error::SequencerResult;

pub trait RollupLedger: Send + Sync {
    fn record_tx(&self, id: TxId, status: TxStatus) -> SequencerResult<()>;

    fn record_rollup(&self, id: RollupId, status: RollupStatus) -> SequencerResult<()>;

    fn tx_status(&self, id: &TxId) -> Option<TxStatus>;

    fn rollup_status(&self, id: &RollupId) -> Option<RollupStatus>;

    /// Persist a committed outer rollup record for publication recovery.
    fn record_outer(&self, outer: &OuterRollup) -> SequencerResult<()>;

    /// Look up a recorded outer rollup by its post world root, the
    /// idempotency key at the publication boundary.
    fn outer_by_post_root(&self, post_world_root: &HashValue) -> Option<OuterRollup>;

    /// Committed outer rollups not yet published, in commit order.
    fn unpublished_outers(&self) -> Vec<OuterRollup>;
}

/// In-memory ledger keeping full transition history per id.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: RwLock<LedgerInner>,
}

#[derive(Default)]
struct LedgerInner {
    tx_history: HashMap<TxId, Vec<TxStatus>>,
    rollup_history: HashMap<RollupId, Vec<RollupStatus>>,
    outers: Vec<OuterRollup>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full transition history for a rollup, oldest first.
    pub fn rollup_transitions(&self, id: &RollupId) -> Vec<RollupStatus> {
        self.inner
            .read()
            .rollup_history
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Full transition history for a transaction, oldest first.
    pub fn tx_transitions(&self, id: &TxId) -> Vec<TxStatus> {
        self.inner
            .read()
            .tx_history
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of rollups whose history contains the given status.
    pub fn count_rollups_with_status(&self, status: RollupStatus) -> usize {
        self.inner
            .read()
            .rollup_history
            .values()
            .filter(|history| history.contains(&status))
            .count()
    }

    /// Total transitions into the given status across all rollups.
    pub fn count_rollup_transitions(&self, status: RollupStatus) -> usize {
        self.inner
            .read()
            .rollup_history
            .values()
            .map(|history| history.iter().filter(|s| **s == status).count())
            .sum()
    }

    pub fn recorded_outers(&self) -> Vec<OuterRollup> {
        self.inner.read().outers.clone()
    }
}

impl RollupLedger for InMemoryLedger {
    fn record_tx(&self, id: TxId, status: TxStatus) -> SequencerResult<()> {
        self.inner
            .write()
            .tx_history
            .entry(id)
            .or_default()
            .push(status);
        Ok(())
    }

    fn record_rollup(&self, id: RollupId, status: RollupStatus) -> SequencerResult<()> {
        self.inner
            .write()
            .rollup_history
            .entry(id)
            .or_default()
            .push(status);
        Ok(())
    }

    fn tx_status(&self, id: &TxId) -> Option<TxStatus> {
        self.inner
            .read()
            .tx_history
            .get(id)
            .and_then(|history| history.last().cloned())
    }

    fn rollup_status(&self, id: &RollupId) -> Option<RollupStatus> {
        self.inner
            .read()
            .rollup_history
            .get(id)
            .and_then(|history| history.last().cloned())
    }

    fn record_outer(&self, outer: &OuterRollup) -> SequencerResult<()> {
        self.inner.write().outers.push(outer.clone());
        Ok(())
    }

    fn outer_by_post_root(&self, post_world_root: &HashValue) -> Option<OuterRollup> {
        self.inner
            .read()
            .outers
            .iter()
            .find(|outer| outer.post_world_root == *post_world_root)
            .cloned()
    }

    fn unpublished_outers(&self) -> Vec<OuterRollup> {
        let inner = self.inner.read();
        inner
            .outers
            .iter()
            .filter(|outer| {
                let last = inner
                    .rollup_history
                    .get(&outer.id)
                    .and_then(|history| history.last());
                matches!(last, Some(RollupStatus::Committed))
            })
            .cloned()
            .collect()
    }
}
