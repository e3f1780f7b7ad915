use sesame_backend::BackendError;
use sesame_merkle::MerkleError;
use thiserror::Error;

pub type SequencerResult<T> = Result<T, SequencerError>;

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("Intake queue full (capacity {0})")]
    QueueFull(usize),

    #[error("Aggregation failed: {0}")]
    AggregationFailed(String),

    #[error("Publication failed: {0}")]
    PublicationFailed(String),

    #[error("Staged inner rollup does not reproduce its recorded roots: {0}")]
    IntegrityViolation(String),

    #[error("Chain event channel full")]
    EventChannelFull,

    #[error(transparent)]
    Merkle(#[from] MerkleError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
