//! Bounded chain-event channel.
//!
//! The settlement watcher pushes confirmations here; the scheduler drains
//! them to move published rollups to `Settled`. The channel is bounded, and
//! a full channel is an error surfaced to the producer, never a silent
//! drop.

use sesame_merkle::HashValue;
use tokio::sync::mpsc;

use crate::error::{SequencerError, SequencerResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainEvent {
    /// A published outer rollup was mined on the settlement layer.
    RollupMined {
        post_world_root: HashValue,
        block_number: u64,
    },
}

#[derive(Clone)]
pub struct ChainEventSender {
    sender: mpsc::Sender<ChainEvent>,
}

impl ChainEventSender {
    /// Push an event without waiting; fails when the channel is full.
    pub fn send(&self, event: ChainEvent) -> SequencerResult<()> {
        self.sender
            .try_send(event)
            .map_err(|_| SequencerError::EventChannelFull)
    }
}

pub fn chain_event_channel(capacity: usize) -> (ChainEventSender, mpsc::Receiver<ChainEvent>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (ChainEventSender { sender }, receiver)
}
