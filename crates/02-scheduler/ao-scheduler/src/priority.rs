use std::collections::VecDeque;

/// Six priority levels the engine's command queue dispatches across, highest
/// first. Lower numeric value runs first; within one level, FIFO order is
/// preserved by enqueue order (callers are expected to enqueue with a
/// monotonically increasing command id so FIFO-by-arrival and FIFO-by-id
/// coincide).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CommandPriority {
    /// Reserved for internal bookkeeping above all client-visible work.
    P0 = 0,
    /// `CancelDueToError`, datapath teardown.
    P1 = 1,
    /// `Stop`/`Reset`/cleanup triggered by error handling.
    P2 = 2,
    /// `CancelAllCommands`, `CancelAcquireLicense`.
    P3 = 3,
    /// Auto-pause on end-of-clip.
    P4 = 4,
    /// Normal client API calls, and underflow-triggered auto-pause/resume.
    P5 = 5,
}

impl CommandPriority {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        self as usize
    }
}

/// Six-bucket FIFO-within-priority queue, generalizing a three-level design
/// to the engine's full priority range.
#[derive(Debug)]
pub struct PriorityQueues<T> {
    buckets: [VecDeque<T>; CommandPriority::COUNT],
}

impl<T> Default for PriorityQueues<T> {
    fn default() -> Self {
        Self {
            buckets: Default::default(),
        }
    }
}

impl<T> PriorityQueues<T> {
    /// Creates empty priority queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates empty priority queues with an initial per-bucket capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: std::array::from_fn(|_| VecDeque::with_capacity(capacity)),
        }
    }

    /// Returns `true` when every bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(VecDeque::is_empty)
    }

    /// Number of items per priority level, ordered `[P0, P1, P2, P3, P4, P5]`.
    pub fn len_per_priority(&self) -> [usize; CommandPriority::COUNT] {
        std::array::from_fn(|i| self.buckets[i].len())
    }

    /// Enqueues `item` at the back of the bucket matching `priority`.
    pub fn enqueue(&mut self, priority: CommandPriority, item: T) {
        self.buckets[priority.index()].push_back(item);
    }

    /// Enqueues `item` at the front of `priority`'s bucket, ahead of
    /// anything already queued at that level. Used to resume a command that
    /// yielded mid-phase so it runs again before newer arrivals at the same
    /// priority.
    pub fn enqueue_front(&mut self, priority: CommandPriority, item: T) {
        self.buckets[priority.index()].push_front(item);
    }

    /// Pops the next item honoring strict priority ordering (P0 highest).
    pub fn pop_next(&mut self) -> Option<T> {
        self.buckets.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Returns the highest priority level that currently holds an item.
    pub fn current_priority(&self) -> Option<CommandPriority> {
        self.buckets
            .iter()
            .position(|b| !b.is_empty())
            .map(|idx| match idx {
                0 => CommandPriority::P0,
                1 => CommandPriority::P1,
                2 => CommandPriority::P2,
                3 => CommandPriority::P3,
                4 => CommandPriority::P4,
                _ => CommandPriority::P5,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_respected() {
        let mut q = PriorityQueues::new();
        q.enqueue(CommandPriority::P5, "normal");
        q.enqueue(CommandPriority::P2, "stop");
        q.enqueue(CommandPriority::P1, "cancel-due-to-error");
        assert_eq!(q.pop_next(), Some("cancel-due-to-error"));
        assert_eq!(q.pop_next(), Some("stop"));
        assert_eq!(q.pop_next(), Some("normal"));
        assert_eq!(q.pop_next(), None);
    }

    #[test]
    fn fifo_stability_within_priority() {
        let mut q = PriorityQueues::new();
        q.enqueue(CommandPriority::P5, 1);
        q.enqueue(CommandPriority::P5, 2);
        q.enqueue(CommandPriority::P5, 3);
        assert_eq!(q.pop_next(), Some(1));
        assert_eq!(q.pop_next(), Some(2));
        assert_eq!(q.pop_next(), Some(3));
    }

    #[test]
    fn enqueue_front_resumes_ahead_of_same_priority_peers() {
        let mut q = PriorityQueues::new();
        q.enqueue(CommandPriority::P5, "new-arrival");
        q.enqueue_front(CommandPriority::P5, "resumed");
        assert_eq!(q.pop_next(), Some("resumed"));
        assert_eq!(q.pop_next(), Some("new-arrival"));
    }

    #[test]
    fn empty_behavior_and_len_tracking() {
        let mut q: PriorityQueues<u32> = PriorityQueues::new();
        assert!(q.is_empty());
        assert_eq!(q.current_priority(), None);
        q.enqueue(CommandPriority::P3, 7);
        assert!(!q.is_empty());
        assert_eq!(q.current_priority(), Some(CommandPriority::P3));
        assert_eq!(q.len_per_priority(), [0, 0, 0, 1, 0, 0]);
        q.pop_next();
        assert!(q.is_empty());
    }
}
