//! Bounded FIFO intake queue.
//!
//! The queue preserves strict arrival order: batches are taken from the
//! front, and items bounced out of a failed batch are reinserted at the
//! front in their original relative order. Fee never influences position.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{SequencerError, SequencerResult};

/// A queued item together with its arrival bookkeeping.
#[derive(Clone, Debug)]
pub struct Queued<T> {
    pub item: T,
    /// Monotonic arrival sequence number; the FIFO sort key.
    pub seq: u64,
    /// When the item first arrived. Requeueing does not reset this, so the
    /// time-based cut trigger sees the true age of the oldest work.
    pub arrived_at: Instant,
    /// How many times the item has been bounced back into the queue.
    pub retries: u32,
}

/// Bounded FIFO queue feeding batch construction.
pub struct IntakeQueue<T> {
    items: Mutex<VecDeque<Queued<T>>>,
    next_seq: AtomicU64,
    capacity: usize,
}

impl<T> IntakeQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            next_seq: AtomicU64::new(0),
            capacity,
        }
    }

    /// Append an item, rejecting it outright when the queue is full.
    pub fn submit(&self, item: T) -> SequencerResult<u64> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(SequencerError::QueueFull(self.capacity));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        items.push_back(Queued {
            item,
            seq,
            arrived_at: Instant::now(),
            retries: 0,
        });
        Ok(seq)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Age of the oldest queued item, `None` when empty.
    pub fn oldest_age(&self) -> Option<Duration> {
        let items = self.items.lock();
        items.front().map(|queued| queued.arrived_at.elapsed())
    }

    /// Remove and return up to `max` items from the front.
    pub fn take_batch(&self, max: usize) -> Vec<Queued<T>> {
        let mut items = self.items.lock();
        let count = max.min(items.len());
        items.drain(..count).collect()
    }

    /// Reinsert bounced items at the front, preserving their original
    /// relative order. Items already requeued `max_retries` times are not
    /// reinserted and are returned for permanent rejection.
    pub fn requeue(&self, batch: Vec<Queued<T>>, max_retries: u32) -> Vec<Queued<T>> {
        let mut exhausted = Vec::new();
        let mut keep: Vec<Queued<T>> = Vec::with_capacity(batch.len());
        for mut queued in batch {
            if queued.retries >= max_retries {
                exhausted.push(queued);
            } else {
                queued.retries += 1;
                keep.push(queued);
            }
        }
        keep.sort_by_key(|queued| queued.seq);
        let mut items = self.items.lock();
        for queued in keep.into_iter().rev() {
            items.push_front(queued);
        }
        exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order_preserved() {
        let queue = IntakeQueue::new(16);
        for value in 0..5u32 {
            queue.submit(value).unwrap();
        }
        let batch = queue.take_batch(3);
        assert_eq!(
            batch.iter().map(|q| q.item).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_submit_rejected_at_capacity() {
        let queue = IntakeQueue::new(2);
        queue.submit(1u32).unwrap();
        queue.submit(2u32).unwrap();
        assert!(matches!(
            queue.submit(3u32),
            Err(SequencerError::QueueFull(2))
        ));
    }

    #[tokio::test]
    async fn test_requeue_goes_to_front_in_order() {
        let queue = IntakeQueue::new(16);
        for value in 0..4u32 {
            queue.submit(value).unwrap();
        }
        let batch = queue.take_batch(3);
        // Bounce items 0 and 2; item 3 is still queued behind them.
        let bounced = vec![batch[0].clone(), batch[2].clone()];
        let exhausted = queue.requeue(bounced, 3);
        assert!(exhausted.is_empty());

        let drained = queue.take_batch(8);
        assert_eq!(
            drained.iter().map(|q| q.item).collect::<Vec<_>>(),
            vec![0, 2, 3]
        );
        assert_eq!(drained[0].retries, 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let queue = IntakeQueue::new(16);
        queue.submit(7u32).unwrap();
        for round in 0..2 {
            let batch = queue.take_batch(1);
            let exhausted = queue.requeue(batch, 1);
            if round == 0 {
                assert!(exhausted.is_empty());
            } else {
                assert_eq!(exhausted.len(), 1);
                assert_eq!(exhausted[0].item, 7);
            }
        }
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oldest_age_tracks_first_arrival() {
        let queue = IntakeQueue::new(16);
        assert!(queue.oldest_age().is_none());
        queue.submit(1u32).unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        queue.submit(2u32).unwrap();
        assert!(queue.oldest_age().unwrap() >= Duration::from_secs(5));

        // Requeueing must not reset the age of the oldest item.
        let batch = queue.take_batch(2);
        queue.requeue(batch, 3);
        assert!(queue.oldest_age().unwrap() >= Duration::from_secs(5));
    }
}
