//! Resizable-block pool.
//!
//! Unlike [`crate::fixed::FixedChunkPool`], blocks handed out here can be any
//! size up to a buffer's capacity. The pool owns one or more buffers; each
//! buffer's storage is partitioned address-order into a contiguous run of
//! blocks that are either `Used` or `Free`, with no gaps between them.
//! Allocation finds (or grows into) a free block large enough, splitting off
//! the remainder when it is worth keeping as its own block. Deallocation
//! merges a freed block with any address-adjacent free neighbor in the same
//! buffer, which is what keeps long-running pools from fragmenting into
//! unusably small pieces.
//!
//! Every block carries a pre- and post-fence byte (`PREFENCE`/`POSTFENCE`)
//! immediately around its payload; `validate` checks both on every
//! deallocate/trim so a caller that wrote past the end of a block is caught
//! instead of corrupting a neighbor's header.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::error::PoolError;

const PREFENCE: u8 = 0x55;
const POSTFENCE: u8 = 0xAA;
/// A block's payload must be at least this large for the remainder of a
/// split, or the tail of a trim, to be kept as a standalone free block
/// instead of folded into its neighbor.
const MIN_BLOCK_SIZE: usize = 8;
/// Fence bytes bracketing every block's payload.
const FENCE_OVERHEAD: usize = 2;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum BlockState {
    Free,
    Used,
}

struct Block {
    /// Offset of the prefence byte within the buffer's storage.
    offset: usize,
    /// Usable payload size, excluding fences.
    size: usize,
    state: BlockState,
}

impl Block {
    fn span(&self) -> usize {
        self.size + FENCE_OVERHEAD
    }

    fn payload_start(&self) -> usize {
        self.offset + 1
    }
}

struct Buffer {
    storage: Rc<RefCell<Box<[u8]>>>,
    capacity: usize,
    blocks: Vec<Block>,
    outstanding: usize,
}

impl Buffer {
    fn new(capacity: usize) -> Self {
        let mut storage = vec![0u8; capacity].into_boxed_slice();
        storage[0] = PREFENCE;
        storage[capacity - 1] = POSTFENCE;
        Buffer {
            storage: Rc::new(RefCell::new(storage)),
            capacity,
            blocks: vec![Block {
                offset: 0,
                size: capacity - FENCE_OVERHEAD,
                state: BlockState::Free,
            }],
            outstanding: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.outstanding == 0
    }

    fn largest_free(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.state == BlockState::Free)
            .map(|b| b.size)
            .max()
            .unwrap_or(0)
    }

    /// Finds the first free block able to hold `requested` bytes.
    fn find_free(&self, requested: usize) -> Option<usize> {
        self.blocks
            .iter()
            .position(|b| b.state == BlockState::Free && b.size >= requested)
    }

    /// Marks `blocks[idx]` used, splitting off a free remainder when the
    /// leftover is large enough to stand on its own. A remainder too small
    /// to split is folded into the used block instead (a few bytes of
    /// internal fragmentation) rather than left as a phantom gap between
    /// blocks, so `blocks[idx].size` always matches what the caller asked
    /// for and gets back.
    fn take_block(&mut self, idx: usize, requested: usize) {
        let block = &self.blocks[idx];
        let remainder = block.size - requested;
        if remainder >= MIN_BLOCK_SIZE + FENCE_OVERHEAD {
            let new_offset = block.payload_start() + requested + 1;
            let new_block = Block {
                offset: new_offset,
                size: remainder - FENCE_OVERHEAD,
                state: BlockState::Free,
            };
            self.blocks.insert(idx + 1, new_block);
        }
        self.blocks[idx].size = requested;
        let block = &mut self.blocks[idx];
        block.state = BlockState::Used;
        let mut storage = self.storage.borrow_mut();
        storage[block.offset] = PREFENCE;
        storage[block.offset + 1 + block.size] = POSTFENCE;
        self.outstanding += 1;
    }

    /// Frees `blocks[idx]`, merging with address-adjacent free neighbors.
    /// Returns the merged block's usable size, for observer notification.
    fn free_block(&mut self, idx: usize) -> usize {
        self.blocks[idx].state = BlockState::Free;
        self.outstanding -= 1;

        let mut idx = idx;
        if idx + 1 < self.blocks.len() && self.blocks[idx + 1].state == BlockState::Free {
            let right = self.blocks.remove(idx + 1);
            self.blocks[idx].size += right.span();
        }
        if idx > 0 && self.blocks[idx - 1].state == BlockState::Free {
            let removed = self.blocks.remove(idx);
            self.blocks[idx - 1].size += removed.span();
            idx -= 1;
        }

        let block = &self.blocks[idx];
        let mut storage = self.storage.borrow_mut();
        storage[block.offset] = PREFENCE;
        storage[block.offset + 1 + block.size] = POSTFENCE;
        block.size
    }

    fn validate(&self, offset: usize, size: usize) -> Result<usize, PoolError> {
        let idx = self
            .blocks
            .iter()
            .position(|b| b.offset == offset && b.state == BlockState::Used)
            .ok_or(PoolError::Corrupt)?;
        if self.blocks[idx].size != size {
            return Err(PoolError::Corrupt);
        }
        let storage = self.storage.borrow();
        if storage[offset] != PREFENCE || storage[offset + 1 + size] != POSTFENCE {
            return Err(PoolError::Corrupt);
        }
        Ok(idx)
    }
}

struct Observer {
    requested_size: Option<usize>,
    callback: Box<dyn FnOnce(usize)>,
}

struct Inner {
    default_buffer_size: usize,
    max_buffers: usize,
    buffers: Vec<Buffer>,
    observer: Option<Observer>,
}

/// A pool that grows by allocating additional fixed-capacity buffers, up to
/// `max_buffers`, and packs variably sized blocks within each buffer.
pub struct ResizableBlockPool {
    inner: Rc<RefCell<Inner>>,
}

impl ResizableBlockPool {
    /// Creates a pool whose buffers default to `default_buffer_size` bytes
    /// (pre-allocating the first one), growing up to `max_buffers` buffers
    /// total before refusing further growth.
    pub fn new(default_buffer_size: usize, max_buffers: usize) -> Self {
        assert!(default_buffer_size > MIN_BLOCK_SIZE + FENCE_OVERHEAD);
        assert!(max_buffers >= 1);
        let first = Buffer::new(default_buffer_size);
        Self {
            inner: Rc::new(RefCell::new(Inner {
                default_buffer_size,
                max_buffers,
                buffers: vec![first],
                observer: None,
            })),
        }
    }

    /// Allocates a block able to hold `size` payload bytes.
    pub fn allocate(&self, size: usize) -> Result<ResizableBlock, PoolError> {
        if size == 0 {
            return Err(PoolError::RequestTooLarge {
                requested: 0,
                capacity: 0,
            });
        }
        let mut inner = self.inner.borrow_mut();

        let buffer_idx = match inner
            .buffers
            .iter()
            .position(|b| b.find_free(size).is_some())
        {
            Some(idx) => idx,
            None => grow(&mut inner, size)?,
        };

        let block_idx = inner.buffers[buffer_idx]
            .find_free(size)
            .expect("grow() guarantees a fitting free block");
        inner.buffers[buffer_idx].take_block(block_idx, size);
        let block = &inner.buffers[buffer_idx].blocks[block_idx];
        let offset = block.offset;
        let storage = Rc::clone(&inner.buffers[buffer_idx].storage);

        Ok(ResizableBlock {
            pool: Rc::clone(&self.inner),
            storage,
            buffer_idx,
            offset,
            size,
        })
    }

    /// Registers a one-shot callback fired the next time enough contiguous
    /// space frees up. `requested_size` of `None` means "any free block";
    /// `Some(n)` fires only once a merged free block of at least `n` bytes
    /// appears.
    pub fn notify_free_block_available(
        &self,
        requested_size: Option<usize>,
        callback: impl FnOnce(usize) + 'static,
    ) -> Result<(), PoolError> {
        let mut inner = self.inner.borrow_mut();
        if inner.observer.is_some() {
            return Err(PoolError::ObserverAlreadyRegistered);
        }
        inner.observer = Some(Observer {
            requested_size,
            callback: Box::new(callback),
        });
        Ok(())
    }

    /// Cancels a pending notification, if any.
    pub fn cancel_free_block_available(&self) {
        self.inner.borrow_mut().observer = None;
    }
}

fn grow(inner: &mut Inner, requested: usize) -> Result<usize, PoolError> {
    let needed = requested + FENCE_OVERHEAD;
    let new_capacity = needed.max(inner.default_buffer_size);

    if inner.buffers.len() < inner.max_buffers {
        inner.buffers.push(Buffer::new(new_capacity));
        return Ok(inner.buffers.len() - 1);
    }

    if let Some(idx) = inner.buffers.iter().position(|b| b.is_empty()) {
        inner.buffers[idx] = Buffer::new(new_capacity);
        return Ok(idx);
    }

    log::warn!(
        "resizable pool exhausted: {} buffers in use, none empty, request {} bytes",
        inner.buffers.len(),
        requested
    );
    Err(PoolError::NoResources)
}

fn deallocate(inner: &Rc<RefCell<Inner>>, buffer_idx: usize, offset: usize, size: usize) {
    let mut guard = inner.borrow_mut();
    let block_idx = match guard.buffers[buffer_idx].validate(offset, size) {
        Ok(idx) => idx,
        Err(_) => {
            debug_assert!(false, "deallocate of corrupt or foreign block");
            return;
        }
    };
    let merged_size = guard.buffers[buffer_idx].free_block(block_idx);

    let fire = match &guard.observer {
        None => false,
        Some(obs) => obs.requested_size.map_or(true, |req| merged_size >= req),
    };
    if fire {
        if let Some(obs) = guard.observer.take() {
            drop(guard);
            (obs.callback)(merged_size);
        }
    }
}

/// A checked-out block. Freed automatically on drop.
pub struct ResizableBlock {
    pool: Rc<RefCell<Inner>>,
    storage: Rc<RefCell<Box<[u8]>>>,
    buffer_idx: usize,
    offset: usize,
    size: usize,
}

impl ResizableBlock {
    /// Usable payload size in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Borrows the block's payload bytes.
    pub fn as_slice(&self) -> Ref<'_, [u8]> {
        let start = self.offset + 1;
        let size = self.size;
        Ref::map(self.storage.borrow(), move |buf| &buf[start..start + size])
    }

    /// Mutably borrows the block's payload bytes.
    pub fn as_mut_slice(&mut self) -> RefMut<'_, [u8]> {
        let start = self.offset + 1;
        let size = self.size;
        RefMut::map(self.storage.borrow_mut(), move |buf| {
            &mut buf[start..start + size]
        })
    }

    /// Shrinks the block to `new_size` payload bytes, releasing the tail as
    /// a new free block (merged with its right neighbor if also free). A
    /// `new_size` that doesn't leave enough spare room to form a standalone
    /// free block (or that isn't smaller than the current size) is a no-op:
    /// trimming never leaks and is safe to call repeatedly, including on a
    /// block that was already trimmed.
    pub fn trim(&mut self, new_size: usize) -> Result<(), PoolError> {
        let mut inner = self.pool.borrow_mut();
        let block_idx = inner.buffers[self.buffer_idx].validate(self.offset, self.size)?;

        if new_size >= self.size {
            return Ok(());
        }
        let freed = self.size - new_size;
        if freed < MIN_BLOCK_SIZE + FENCE_OVERHEAD {
            return Ok(());
        }

        let buffer = &mut inner.buffers[self.buffer_idx];
        let tail_offset = buffer.blocks[block_idx].payload_start() + new_size + 1;
        buffer.blocks[block_idx].size = new_size;
        {
            let mut storage = buffer.storage.borrow_mut();
            storage[buffer.blocks[block_idx].offset + 1 + new_size] = POSTFENCE;
        }
        let tail = Block {
            offset: tail_offset,
            size: freed - FENCE_OVERHEAD,
            state: BlockState::Free,
        };
        buffer.blocks.insert(block_idx + 1, tail);
        // merge the new tail with its right neighbor only; its left
        // neighbor is the block we just shrank, which is still live.
        if block_idx + 2 < buffer.blocks.len() && buffer.blocks[block_idx + 2].state == BlockState::Free {
            let right = buffer.blocks.remove(block_idx + 2);
            buffer.blocks[block_idx + 1].size += right.span();
        }
        {
            let tail = &buffer.blocks[block_idx + 1];
            let mut storage = buffer.storage.borrow_mut();
            storage[tail.offset] = PREFENCE;
            storage[tail.offset + 1 + tail.size] = POSTFENCE;
        }

        self.size = new_size;

        let fire = match &inner.observer {
            None => false,
            Some(obs) => obs.requested_size.map_or(true, |req| freed - FENCE_OVERHEAD >= req),
        };
        if fire {
            if let Some(obs) = inner.observer.take() {
                let merged = buffer.blocks[block_idx + 1].size;
                drop(inner);
                (obs.callback)(merged);
            }
        }
        Ok(())
    }
}

impl Drop for ResizableBlock {
    fn drop(&mut self) {
        deallocate(&self.pool, self.buffer_idx, self.offset, self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc as StdRc;

    #[test]
    fn allocate_and_deallocate_roundtrip() {
        let pool = ResizableBlockPool::new(256, 2);
        let a = pool.allocate(32).unwrap();
        let b = pool.allocate(64).unwrap();
        assert_eq!(a.len(), 32);
        assert_eq!(b.len(), 64);
        drop(a);
        drop(b);
    }

    #[test]
    fn deallocate_merges_adjacent_free_blocks() {
        let pool = ResizableBlockPool::new(256, 1);
        let a = pool.allocate(32).unwrap();
        let b = pool.allocate(32).unwrap();
        let c = pool.allocate(32).unwrap();
        drop(a);
        drop(c);
        drop(b);
        // after all three are freed the buffer should have merged back down
        // to (at most) its original single free block, so a big allocation
        // that would not fit in any one of the three original slices alone
        // succeeds.
        let big = pool.allocate(200).expect("merged free space should satisfy a big request");
        drop(big);
    }

    #[test]
    fn grows_new_buffer_under_limit_then_evicts_when_at_limit() {
        let pool = ResizableBlockPool::new(64, 2);
        let first = pool.allocate(40).unwrap();
        // first buffer (64 bytes, ~62 usable) can't fit a second 40-byte
        // block alongside the first, so this should grow a second buffer.
        let second = pool.allocate(40).unwrap();
        assert_eq!(pool.inner.borrow().buffers.len(), 2);

        drop(first);
        // first buffer is now empty; at the 2-buffer limit, a request that
        // doesn't fit in the still-occupied second buffer evicts buffer 0
        // rather than failing.
        let third = pool.allocate(40).expect("should evict the empty buffer");
        drop(second);
        drop(third);
    }

    #[test]
    fn no_resources_when_at_limit_and_nothing_empty() {
        let pool = ResizableBlockPool::new(48, 1);
        let _a = pool.allocate(40).unwrap();
        assert!(matches!(pool.allocate(40), Err(PoolError::NoResources)));
    }

    #[test]
    fn trim_shrinks_block_and_frees_tail_without_leaking() {
        let pool = ResizableBlockPool::new(256, 1);
        let mut block = pool.allocate(100).unwrap();
        block.trim(40).expect("trim should succeed");
        assert_eq!(block.len(), 40);
        // a second trim on the same (already shrunk) block is a safe no-op
        // once the remainder is too small to split again.
        block.trim(36).expect("second trim stays safe");
        drop(block);
        let reclaimed = pool
            .allocate(200)
            .expect("trimmed tail should be reusable via merge after the block frees");
        drop(reclaimed);
    }

    #[test]
    fn allocate_with_unsplittable_remainder_round_trips_cleanly() {
        // 256 - FENCE_OVERHEAD leaves 254 usable bytes; requesting 250
        // leaves a remainder of 4 bytes, too small to split off
        // (MIN_BLOCK_SIZE + FENCE_OVERHEAD = 10), so the whole block must
        // be handed out at its actual (possibly larger) recorded size.
        let pool = ResizableBlockPool::new(256, 1);
        let block = pool.allocate(250).expect("should fit in the sole buffer");
        assert_eq!(block.len(), 250);
        drop(block);
        // deallocate must not flag `Corrupt` and must decrement
        // `outstanding`, freeing the buffer back up for reuse.
        let reused = pool.allocate(250).expect("buffer should be reusable after a clean deallocate");
        drop(reused);
    }

    #[test]
    fn notify_fires_once_on_matching_free() {
        let pool = ResizableBlockPool::new(128, 1);
        let a = pool.allocate(32).unwrap();
        let b = pool.allocate(32).unwrap();

        let fired = StdRc::new(Cell::new(None));
        let fired_clone = StdRc::clone(&fired);
        pool.notify_free_block_available(Some(32), move |size| fired_clone.set(Some(size)))
            .unwrap();

        drop(a);
        assert!(fired.get().is_some());
        let first_value = fired.get();
        drop(b);
        // one-shot: second free does not refire.
        assert_eq!(fired.get(), first_value);
    }

    #[test]
    fn corrupt_postfence_is_caught_by_validate() {
        let pool = ResizableBlockPool::new(128, 1);
        let block = pool.allocate(16).unwrap();
        // simulate a one-byte overrun past the payload by tampering with
        // the postfence byte directly (not reachable through the public
        // API, which is the point of the fence).
        {
            let mut storage = block.storage.borrow_mut();
            storage[block.offset + 1 + block.size] = 0x00;
        }
        let inner = pool.inner.borrow();
        assert!(matches!(
            inner.buffers[block.buffer_idx].validate(block.offset, block.size),
            Err(PoolError::Corrupt)
        ));
        drop(inner);
        // prevent the tampered block's Drop impl from firing a
        // debug_assert in this test binary; leak it instead.
        std::mem::forget(block);
    }
}
