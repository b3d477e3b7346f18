#![deny(missing_docs)]
//! Shared helpers for queue-backed node implementations.
//!
//! The mock source/decoder/sink nodes in `mock-nodes` all buffer their
//! [`NodeEvent`](node_abi::NodeEvent)s the same way: a bounded FIFO drained
//! by the engine each tick. This crate centralizes that flow so the
//! concrete nodes focus on what events to produce.

use node_abi::SubmitOutcome;
use smallvec::SmallVec;
use std::cell::UnsafeCell;
use std::collections::VecDeque;

/// Single-threaded queue wrapper used by node implementations.
///
/// The scheduler operates on a single thread, so we can rely on
/// single-owner-style access while still exposing a type that is
/// `Send + Sync` for trait object ergonomics (`Arc<dyn Node + Send + Sync>`).
pub struct LocalQueue<T> {
    inner: UnsafeCell<VecDeque<T>>,
}

impl<T> LocalQueue<T> {
    /// Creates a new queue with the requested capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: UnsafeCell::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Grants temporary mutable access to the underlying deque.
    #[inline]
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut VecDeque<T>) -> R) -> R {
        // SAFETY: the queue is only ever mutated from the scheduler thread.
        // Node trait objects require `Sync`, so we guarantee no concurrent
        // access ourselves rather than through the type system.
        let deque = unsafe { &mut *self.inner.get() };
        f(deque)
    }
}

// SAFETY: `LocalQueue` enforces single-threaded mutation; callers can move
// the queue across threads because the scheduler never shares mutable
// references concurrently. Elements are `Send`, so moving them between
// threads is sound.
unsafe impl<T: Send> Send for LocalQueue<T> {}
// SAFETY: although the underlying storage uses interior mutability, the
// scheduler guarantees single-threaded access. Declaring `Sync` allows the
// queue to live behind `Arc<dyn Node + Send + Sync>` without introducing
// races.
unsafe impl<T: Send> Sync for LocalQueue<T> {}

/// Backpressure policy applied when a node's event queue is at capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Drop the new event, keeping what's already queued.
    BestEffort,
    /// Refuse the new event and report `WouldBlock` so the caller retries
    /// once the queue has drained.
    Lossless,
}

/// Attempts to push one event into a bounded queue under `policy`.
pub fn try_submit_queue<T, F>(
    queue: &LocalQueue<T>,
    capacity: usize,
    policy: QueuePolicy,
    materialize: F,
) -> SubmitOutcome
where
    T: Send + 'static,
    F: FnOnce() -> T,
{
    queue.with_mut(|inner| {
        if inner.len() >= capacity {
            return match policy {
                QueuePolicy::BestEffort => SubmitOutcome::Accepted,
                QueuePolicy::Lossless => SubmitOutcome::WouldBlock,
            };
        }
        inner.push_back(materialize());
        SubmitOutcome::Accepted
    })
}

/// Drains up to `max` events from the queue, oldest first.
pub fn drain_queue<T>(queue: &LocalQueue<T>, max: usize) -> SmallVec<[T; 8]>
where
    T: Send + 'static,
{
    if max == 0 {
        return SmallVec::new();
    }
    queue.with_mut(|inner| {
        let limit = max.min(inner.len());
        let mut out = SmallVec::<[T; 8]>::new();
        for _ in 0..limit {
            if let Some(item) = inner.pop_front() {
                out.push(item);
            }
        }
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_abi::{NodeErrorKind, NodeEvent};

    #[test]
    fn best_effort_drops_when_full() {
        let queue: LocalQueue<NodeEvent> = LocalQueue::with_capacity(1);
        let outcome = try_submit_queue(&queue, 1, QueuePolicy::BestEffort, || {
            NodeEvent::Error(NodeErrorKind::Failure)
        });
        assert_eq!(outcome, SubmitOutcome::Accepted);
        let dropped = try_submit_queue(&queue, 1, QueuePolicy::BestEffort, || {
            NodeEvent::Error(NodeErrorKind::Busy)
        });
        assert_eq!(dropped, SubmitOutcome::Accepted);
        // best-effort silently drops the second event rather than growing
        // past capacity.
        assert_eq!(drain_queue(&queue, 8).len(), 1);
    }

    #[test]
    fn lossless_reports_would_block_when_full() {
        let queue: LocalQueue<NodeEvent> = LocalQueue::with_capacity(1);
        try_submit_queue(&queue, 1, QueuePolicy::Lossless, || {
            NodeEvent::Error(NodeErrorKind::Failure)
        });
        let blocked = try_submit_queue(&queue, 1, QueuePolicy::Lossless, || {
            NodeEvent::Error(NodeErrorKind::Busy)
        });
        assert_eq!(blocked, SubmitOutcome::WouldBlock);
    }

    #[test]
    fn drain_returns_fifo_order() {
        let queue: LocalQueue<u32> = LocalQueue::with_capacity(4);
        queue.with_mut(|inner| inner.extend([1, 2, 3]));
        let drained = drain_queue(&queue, 2);
        assert_eq!(&drained[..], &[1, 2]);
        assert_eq!(drain_queue(&queue, 8).as_slice(), &[3]);
    }
}
