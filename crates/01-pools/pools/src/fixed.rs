//! Fixed-size chunk pool.
//!
//! A single backing arena is carved into `capacity` equally sized chunks.
//! The chunk size itself is not fixed at construction time: the first call
//! to [`FixedChunkPool::allocate`] decides it, and every later call must
//! request no more than that size. Free chunks are tracked by index in a
//! LIFO free list, mirroring the allocator's preference for cache-hot reuse
//! over address-ordering.
//!
//! The pool is refcounted rather than owned: engine components that only
//! hold a reference to a pool created elsewhere call [`FixedChunkPool::add_ref`]
//! / [`FixedChunkPool::remove_ref`] around their use of it. Dropping the
//! refcount to zero retires the pool (no further `allocate` calls succeed),
//! but the backing arena itself stays alive as long as any [`ChunkHandle`]
//! still references it, since handles hold their own strong reference to
//! the storage independent of `Inner`.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::error::PoolError;

type Storage = Rc<RefCell<Box<[u8]>>>;

struct Inner {
    capacity: usize,
    chunk_size: Option<usize>,
    storage: Option<Storage>,
    free: Vec<usize>,
    refcount: usize,
    retired: bool,
    observer: Option<Box<dyn FnOnce()>>,
}

impl Inner {
    fn live(&self) -> Result<(), PoolError> {
        if self.retired {
            Err(PoolError::Destroyed)
        } else {
            Ok(())
        }
    }
}

/// A pool of `capacity` equally sized chunks, lazily sized on first use.
#[derive(Clone)]
pub struct FixedChunkPool {
    inner: Rc<RefCell<Inner>>,
}

impl FixedChunkPool {
    /// Creates a pool able to hand out up to `capacity` chunks. Starts with
    /// a refcount of one, matching the creator's implicit reference.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                capacity,
                chunk_size: None,
                storage: None,
                free: Vec::new(),
                refcount: 1,
                retired: false,
                observer: None,
            })),
        }
    }

    /// Adds a reference, keeping the pool accepting new allocations until a
    /// matching [`FixedChunkPool::remove_ref`].
    pub fn add_ref(&self) {
        self.inner.borrow_mut().refcount += 1;
    }

    /// Removes a reference. Once the count reaches zero the pool retires:
    /// further `allocate`/`notify_*` calls return [`PoolError::Destroyed`].
    /// Chunks already checked out remain valid and are simply freed
    /// normally when their [`ChunkHandle`] drops.
    pub fn remove_ref(&self) {
        let mut inner = self.inner.borrow_mut();
        debug_assert!(inner.refcount > 0, "remove_ref on a pool with no references");
        inner.refcount = inner.refcount.saturating_sub(1);
        if inner.refcount == 0 {
            inner.retired = true;
            inner.observer = None;
            log::debug!("fixed chunk pool retired");
        }
    }

    /// Allocates a chunk able to hold `size` bytes. The first call sizes
    /// the arena; every later call must request no more than that size.
    pub fn allocate(&self, size: usize) -> Result<ChunkHandle, PoolError> {
        let mut inner = self.inner.borrow_mut();
        inner.live()?;

        let chunk_size = match inner.chunk_size {
            Some(existing) => {
                if size > existing {
                    return Err(PoolError::RequestTooLarge {
                        requested: size,
                        capacity: existing,
                    });
                }
                existing
            }
            None => {
                let capacity = inner.capacity;
                let storage = vec![0u8; size.saturating_mul(capacity)].into_boxed_slice();
                inner.storage = Some(Rc::new(RefCell::new(storage)));
                inner.free = (0..capacity).rev().collect();
                inner.chunk_size = Some(size);
                size
            }
        };

        let index = inner.free.pop().ok_or(PoolError::NoResources)?;
        let storage = Rc::clone(inner.storage.as_ref().expect("storage sized above"));

        Ok(ChunkHandle {
            pool: Rc::clone(&self.inner),
            storage,
            index,
            offset: index * chunk_size,
            len: chunk_size,
        })
    }

    /// Registers a one-shot callback fired the next time a chunk is
    /// returned to a previously exhausted pool. Only one callback may be
    /// outstanding at a time.
    pub fn notify_free_chunk_available(
        &self,
        callback: impl FnOnce() + 'static,
    ) -> Result<(), PoolError> {
        let mut inner = self.inner.borrow_mut();
        inner.live()?;
        if inner.observer.is_some() {
            return Err(PoolError::ObserverAlreadyRegistered);
        }
        inner.observer = Some(Box::new(callback));
        Ok(())
    }

    /// Cancels a pending notification registered via
    /// [`FixedChunkPool::notify_free_chunk_available`], if any.
    pub fn cancel_free_chunk_available(&self) {
        self.inner.borrow_mut().observer = None;
    }

    /// Number of chunks currently checked out.
    pub fn outstanding(&self) -> usize {
        let inner = self.inner.borrow();
        match inner.chunk_size {
            Some(_) => inner.capacity - inner.free.len(),
            None => 0,
        }
    }
}

/// A checked-out chunk. Returned to the pool's free list on drop.
pub struct ChunkHandle {
    pool: Rc<RefCell<Inner>>,
    storage: Storage,
    index: usize,
    offset: usize,
    len: usize,
}

impl ChunkHandle {
    /// Borrows the chunk's bytes.
    pub fn as_slice(&self) -> Ref<'_, [u8]> {
        Ref::map(self.storage.borrow(), |buf| &buf[self.offset..self.offset + self.len])
    }

    /// Mutably borrows the chunk's bytes.
    pub fn as_mut_slice(&mut self) -> RefMut<'_, [u8]> {
        RefMut::map(self.storage.borrow_mut(), |buf| {
            &mut buf[self.offset..self.offset + self.len]
        })
    }
}

impl Drop for ChunkHandle {
    fn drop(&mut self) {
        let mut inner = self.pool.borrow_mut();
        let was_exhausted = inner.free.is_empty();
        inner.free.push(self.index);
        if was_exhausted && !inner.retired {
            if let Some(observer) = inner.observer.take() {
                drop(inner);
                observer();
            }
        }
    }
}
