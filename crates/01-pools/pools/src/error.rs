//! Error type shared by the fixed-chunk and resizable-block allocators.

use thiserror::Error;

/// Failure modes surfaced by [`crate::fixed::FixedChunkPool`] and
/// [`crate::resizable::ResizableBlockPool`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Requested size exceeds what the pool (or any future buffer it could
    /// grow to) is able to satisfy.
    #[error("requested size {requested} exceeds pool capacity {capacity}")]
    RequestTooLarge {
        /// Size the caller asked for.
        requested: usize,
        /// Largest size the pool could ever satisfy.
        capacity: usize,
    },
    /// No free chunk/block is available right now and the pool cannot grow
    /// (fixed pool: all chunks checked out; resizable pool: at the buffer
    /// count limit with no empty buffer to evict).
    #[error("pool exhausted")]
    NoResources,
    /// A handle was presented to `deallocate`/`trim` that does not belong to
    /// this pool, or whose fence bytes have been overwritten.
    #[error("corrupt or foreign block handle")]
    Corrupt,
    /// Operation attempted after the pool's refcount reached zero and it
    /// self-destructed.
    #[error("pool already destroyed")]
    Destroyed,
    /// A chunk-available/block-available notification was requested while
    /// one was already pending; the pool only tracks one outstanding
    /// observer at a time.
    #[error("a free-notification callback is already registered")]
    ObserverAlreadyRegistered,
}
