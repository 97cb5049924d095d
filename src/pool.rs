use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const DEFAULT_MAX_RETAINED: usize = 16;
const DEFAULT_MAX_BUFFER_LEN: usize = 1 << 24;

/// Counters describing how a [`BufferPool`] was used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of rentals.
    pub rents: u64,
    /// Rentals served by a fresh allocation because the pool was empty.
    pub misses: u64,
    /// Buffers handed back and retained by the pool.
    pub returns: u64,
}

/// A thread-safe pool of scratch buffers.
///
/// Running out of pooled buffers is never an error: the pool then allocates.
/// Buffers beyond `max_retained`, or whose capacity grew past
/// `max_buffer_len`, are freed instead of being kept.
pub struct BufferPool<T> {
    buffers: Mutex<Vec<Vec<T>>>,
    max_retained: usize,
    max_buffer_len: usize,
    rents: AtomicU64,
    misses: AtomicU64,
    returns: AtomicU64,
}

impl<T> fmt::Debug for BufferPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("max_retained", &self.max_retained)
            .field("max_buffer_len", &self.max_buffer_len)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T> Default for BufferPool<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETAINED, DEFAULT_MAX_BUFFER_LEN)
    }
}

impl<T> BufferPool<T> {
    pub fn new(max_retained: usize, max_buffer_len: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            max_retained,
            max_buffer_len,
            rents: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            returns: AtomicU64::new(0),
        }
    }

    /// A pool shared behind an [`Arc`], ready to be handed to several readers.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Rents an empty buffer able to hold at least `min_capacity` tokens. The
    /// buffer goes back to the pool when the guard is dropped.
    pub fn rent(self: &Arc<Self>, min_capacity: usize) -> PooledBuffer<T> {
        self.rents.fetch_add(1, Ordering::Relaxed);

        let recycled = match self.buffers.lock() {
            Ok(mut buffers) => buffers.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        };

        let mut buffer = match recycled {
            Some(buffer) => buffer,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                log::trace!("buffer pool miss, allocating {} tokens", min_capacity);
                Vec::new()
            }
        };

        buffer.reserve(min_capacity);

        PooledBuffer {
            buffer,
            pool: Arc::clone(self),
        }
    }

    fn give_back(&self, mut buffer: Vec<T>) {
        if buffer.capacity() == 0 || buffer.capacity() > self.max_buffer_len {
            return;
        }

        buffer.clear();

        let mut buffers = match self.buffers.lock() {
            Ok(buffers) => buffers,
            Err(poisoned) => poisoned.into_inner(),
        };

        if buffers.len() < self.max_retained {
            buffers.push(buffer);
            self.returns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            rents: self.rents.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
        }
    }

    /// Number of buffers currently waiting in the pool.
    pub fn retained(&self) -> usize {
        match self.buffers.lock() {
            Ok(buffers) => buffers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// A buffer rented from a [`BufferPool`], returned to it on drop.
pub struct PooledBuffer<T> {
    buffer: Vec<T>,
    pool: Arc<BufferPool<T>>,
}

impl<T> PooledBuffer<T> {
    /// Grows the buffer geometrically so it can hold `additional` more tokens.
    #[inline]
    pub fn ensure_additional(&mut self, additional: usize) {
        let needed = self.buffer.len() + additional;

        if needed > self.buffer.capacity() {
            let target = needed.max(self.buffer.capacity() * 2);
            self.buffer.reserve(target - self.buffer.len());
        }
    }
}

impl<T> Deref for PooledBuffer<T> {
    type Target = Vec<T>;

    #[inline(always)]
    fn deref(&self) -> &Vec<T> {
        &self.buffer
    }
}

impl<T> DerefMut for PooledBuffer<T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Vec<T> {
        &mut self.buffer
    }
}

impl<T> Drop for PooledBuffer<T> {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buffer));
    }
}

impl<T: fmt::Debug> fmt::Debug for PooledBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("PooledBuffer").field(&self.buffer).finish()
    }
}
