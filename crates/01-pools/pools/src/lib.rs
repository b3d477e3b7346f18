//! Memory pool allocators used by the engine to hand out command contexts,
//! node parameter buffers, and other short-lived records without touching
//! the global allocator on the hot path.
//!
//! Two shapes are provided:
//! - [`fixed::FixedChunkPool`]: every chunk is the same size, decided lazily
//!   on first use. Cheapest to allocate/free; used where the caller always
//!   asks for the same kind of record.
//! - [`resizable::ResizableBlockPool`]: blocks vary in size within a buffer;
//!   used where record size depends on the request (e.g. variable-length
//!   parameter payloads).
//!
//! Neither pool is thread-safe; both are designed to be owned and driven
//! from the single scheduler thread, matching the rest of this workspace's
//! concurrency model.

pub mod error;
pub mod fixed;
pub mod resizable;

pub use error::PoolError;
pub use fixed::{ChunkHandle, FixedChunkPool};
pub use resizable::{ResizableBlock, ResizableBlockPool};
