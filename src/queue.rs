use crate::types::PoseUpdate;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Bounded FIFO handing decoded records from the receive thread to the consumer.
///
/// Backpressure policy is drop-oldest: when the queue is full, `push` evicts
/// the oldest record to make room. Only the most recent pose is actionable,
/// so a stalled consumer loses history instead of growing memory.
#[derive(Clone)]
pub struct PoseQueue {
    sender: Sender<PoseUpdate>,
    receiver: Receiver<PoseUpdate>,
    evicted: Arc<AtomicU64>,
    capacity: usize,
}

impl PoseQueue {
    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self {
            sender,
            receiver,
            evicted: Arc::new(AtomicU64::new(0)),
            capacity,
        }
    }

    /// Append a record, evicting the oldest one if the queue is full.
    pub fn push(&self, record: PoseUpdate) {
        let mut record = record;
        loop {
            match self.sender.try_send(record) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.receiver.try_recv().is_ok() {
                        self.evicted.fetch_add(1, Ordering::Relaxed);
                        log::trace!("Pose queue full, dropped oldest record");
                    }
                    record = back;
                }
                // Both ends live in self, so the channel cannot disconnect.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Remove and return the oldest record without blocking.
    pub fn try_pop(&self) -> Option<PoseUpdate> {
        self.receiver.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records discarded by the drop-oldest policy since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Discard everything currently queued.
    pub fn clear(&self) {
        while self.receiver.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vectors(n: u32) -> PoseUpdate {
        PoseUpdate::Vectors {
            id: n.to_string(),
            tvec: [n as f64, 0.0, 0.0],
            rvec: [0.0; 3],
        }
    }

    #[test]
    fn test_fifo_order() {
        let q = PoseQueue::bounded(8);
        for n in 0..3 {
            q.push(vectors(n));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.try_pop(), Some(vectors(0)));
        assert_eq!(q.try_pop(), Some(vectors(1)));
        assert_eq!(q.try_pop(), Some(vectors(2)));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let q = PoseQueue::bounded(2);
        for n in 0..5 {
            q.push(vectors(n));
        }
        assert_eq!(q.len(), 2);
        assert_eq!(q.evicted(), 3);
        assert_eq!(q.try_pop(), Some(vectors(3)));
        assert_eq!(q.try_pop(), Some(vectors(4)));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let q = PoseQueue::bounded(0);
        assert_eq!(q.capacity(), 1);
        q.push(vectors(1));
        q.push(vectors(2));
        assert_eq!(q.try_pop(), Some(vectors(2)));
    }

    #[test]
    fn test_cross_thread_handoff() {
        let q = PoseQueue::bounded(1024);
        let producer = q.clone();
        let handle = std::thread::spawn(move || {
            for n in 0..100 {
                producer.push(vectors(n));
            }
        });
        handle.join().unwrap();

        let mut seen = Vec::new();
        while let Some(PoseUpdate::Vectors { tvec, .. }) = q.try_pop() {
            seen.push(tvec[0] as u32);
        }
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        assert!(q.is_empty());
    }
}
