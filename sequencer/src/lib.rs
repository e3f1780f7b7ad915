//! Privacy-rollup sequencer pipeline.
//!
//! Wires the world-state store and the crypto worker pool into the full
//! batching pipeline:
//!
//! - [`intake`]: bounded FIFO queue of individually-proven transactions
//! - [`aggregator`]: inner/outer rollup construction and proof aggregation
//! - [`scheduler`]: cut policy, commit, publication and settlement tracking
//! - [`ledger`]: lifecycle record of every transaction and rollup
//! - [`publisher`]: the at-least-once boundary to the settlement layer
//! - [`events`]: settlement confirmations flowing back in

pub mod aggregator;
pub mod error;
pub mod events;
pub mod intake;
pub mod ledger;
pub mod publisher;
pub mod scheduler;

pub use aggregator::{
    AggregateProver, InnerOutcome, OuterOutcome, ProofAggregator, ProvenUnit, RejectedTx,
};
pub use error::{SequencerError, SequencerResult};
pub use events::{chain_event_channel, ChainEvent, ChainEventSender};
pub use intake::{IntakeQueue, Queued};
pub use ledger::{InMemoryLedger, RollupLedger};
pub use publisher::{
    LogPublisher, PublishError, PublishRequest, RollupPublisher, SubmissionReceipt,
};
pub use scheduler::{RollupScheduler, SequencerHandle};
