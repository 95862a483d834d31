//! Bounded queues bridging the real-time audio callback thread and the
//! async world (spec §5: "the audio callback must not block on a mutex";
//! §4.6's back-pressure rule that overload drops the *oldest* item).
//!
//! `crossbeam_channel` is the same crate the capture/playback pipeline
//! historically used to get samples off the callback thread without
//! touching Tokio; here it backs a small drop-oldest queue instead of a
//! fixed buffer pool, since the pipeline now moves `Vec<f32>` blocks and
//! encoded frame bytes rather than raw header-prefixed byte buffers.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// A bounded queue where a push against a full queue evicts the oldest
/// entry rather than rejecting the new one or blocking the caller —
/// exactly the policy spec §4.6 asks for on the outbound audio path, and
/// a safe default for the capture-thread-to-async handoff in general.
pub struct DropOldestQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Enqueue `item`, evicting the oldest queued item if the queue is
    /// full. Never blocks — safe to call from a real-time callback.
    pub fn push(&self, item: T) {
        let mut item = item;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    let _ = self.rx.try_recv();
                    item = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Non-blocking pop, for a consumer draining the queue on its own
    /// schedule (the async send task, or a test).
    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn sender(&self) -> Sender<T> {
        self.tx.clone()
    }

    pub fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_under_capacity_preserves_everything() {
        let queue = DropOldestQueue::new(4);
        for i in 0..4 {
            queue.push(i);
        }
        let drained: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
    }

    #[test]
    fn push_past_capacity_drops_the_oldest_entry() {
        let queue = DropOldestQueue::new(2);
        queue.push(1);
        queue.push(2);
        queue.push(3); // evicts 1
        let drained: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(drained, vec![2, 3]);
    }

    #[test]
    fn empty_queue_pops_none() {
        let queue: DropOldestQueue<u8> = DropOldestQueue::new(4);
        assert_eq!(queue.try_pop(), None);
    }
}
