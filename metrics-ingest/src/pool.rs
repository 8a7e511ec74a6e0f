use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use lockfree_object_pool::{LinearObjectPool, LinearOwnedReusable};

/// A pool of fixed-size datagram buffers shared by every socket reader.
///
/// Buffers are checked out for the duration of a single read-split-route cycle and go back to the pool when the
/// [`PooledBuffer`] is dropped. Since every chunk handed to the router borrows from the checked-out buffer, the borrow
/// checker guarantees that a buffer cannot be returned while anything still points into it.
#[derive(Clone)]
pub struct BufferPool {
    pool: Arc<LinearObjectPool<Vec<u8>>>,
    buffer_size: usize,
}

impl BufferPool {
    /// Creates a new `BufferPool` handing out buffers of `buffer_size` bytes.
    ///
    /// Buffers are allocated lazily, as concurrent checkouts require them.
    pub fn new(buffer_size: usize) -> Self {
        let pool = LinearObjectPool::new(move || vec![0; buffer_size], |_| {});
        Self { pool: Arc::new(pool), buffer_size }
    }

    /// Returns the size, in bytes, of the buffers in this pool.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Checks a buffer out of the pool.
    ///
    /// The buffer has exactly one holder until it is dropped, at which point it returns to the pool. Its contents are
    /// whatever the previous holder left in it.
    pub fn checkout(&self) -> PooledBuffer {
        PooledBuffer(self.pool.pull_owned())
    }
}

/// A buffer checked out of a [`BufferPool`].
pub struct PooledBuffer(LinearOwnedReusable<Vec<u8>>);

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}
