//! # sesame-types
//!
//! Shared data model for the Sesame rollup sequencer: transaction records
//! and their lifecycle, inner/outer rollup records and the rollup state
//! machine, and the pipeline configuration.

pub mod config;
pub mod rollup;
pub mod tx;

pub use config::SequencerConfig;
pub use rollup::{InnerRollup, OuterRollup, RollupId, RollupStatus};
pub use tx::{TxId, TxPublicInputs, TxRecord, TxRejectReason, TxStatus, NOOP_PROOF};
