//! Reusable outgoing buffers.
//!
//! Buffers come from a lock-free bounded queue and go back to it when the
//! [`PooledBuffer`] guard drops. An empty pool allocates; a full pool lets
//! returned buffers be freed.

use crossbeam::queue::ArrayQueue;
use shared::OutgoingBuffer;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const DEFAULT_POOL_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct BufferPool {
    free: ArrayQueue<Box<OutgoingBuffer>>,
    allocated: AtomicUsize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: ArrayQueue::new(capacity.max(1)),
            allocated: AtomicUsize::new(0),
        })
    }

    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buffer = self.free.pop().unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            Box::new(OutgoingBuffer::new())
        });
        PooledBuffer {
            buffer: Some(buffer),
            pool: Arc::clone(self),
        }
    }

    /// Buffers waiting for reuse.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Buffers ever allocated by this pool.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    fn release(&self, mut buffer: Box<OutgoingBuffer>) {
        buffer.clear();
        let _ = self.free.push(buffer);
    }
}

/// An [`OutgoingBuffer`] on loan from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: Option<Box<OutgoingBuffer>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = OutgoingBuffer;

    fn deref(&self) -> &OutgoingBuffer {
        // Only `Drop` takes the buffer out.
        self.buffer.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut OutgoingBuffer {
        self.buffer.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_reused() {
        let pool = BufferPool::new(4);
        {
            let mut buffer = pool.acquire();
            buffer.append(&[1, 2, 3]);
        }
        assert_eq!(pool.available(), 1);

        let buffer = pool.acquire();
        assert!(buffer.is_empty());
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_full_pool_frees_extra_buffers() {
        let pool = BufferPool::new(1);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.allocated(), 2);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = BufferPool::new(64);
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for i in 0..1000u32 {
                        let mut buffer = pool.acquire();
                        assert!(buffer.is_empty());
                        buffer.append(&i.to_le_bytes());
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert!(pool.allocated() <= 8);
    }
}
