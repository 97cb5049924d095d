use std::sync::Arc;

use crate::pool::{BufferPool, PooledBuffer};

/// Stitches data spread over several non-contiguous chunks into one pooled,
/// contiguous buffer.
///
/// The buffer is only rented while something is saved and goes back to the
/// pool as soon as the stitched data is fully consumed.
pub struct Reconciler<T> {
    pool: Arc<BufferPool<T>>,
    scratch: Option<PooledBuffer<T>>,
    start: usize,
}

impl<T: Copy> Reconciler<T> {
    pub fn new(pool: Arc<BufferPool<T>>) -> Self {
        Self {
            pool,
            scratch: None,
            start: 0,
        }
    }

    #[inline(always)]
    pub fn has_something_saved(&self) -> bool {
        self.scratch.is_some()
    }

    /// Appends `tokens` after the data saved so far.
    pub fn save(&mut self, tokens: &[T]) {
        let start = self.start;

        let scratch = self
            .scratch
            .get_or_insert_with(|| self.pool.rent(tokens.len()));

        // Dropping the consumed prefix before growing
        if start > 0 {
            scratch.drain(..start);
            self.start = 0;
        }

        scratch.ensure_additional(tokens.len());
        scratch.extend_from_slice(tokens);
    }

    /// Unconsumed saved data.
    #[inline]
    pub fn saved(&self) -> &[T] {
        match &self.scratch {
            Some(scratch) => &scratch[self.start..],
            None => &[],
        }
    }

    /// Drops `amt` tokens from the front of the saved data, releasing the
    /// buffer once nothing is left.
    pub fn consume(&mut self, amt: usize) {
        self.start += amt;

        if self.saved().is_empty() {
            self.reset();
        }
    }

    /// Releases the buffer back to the pool.
    pub fn reset(&mut self) {
        self.scratch = None;
        self.start = 0;
    }
}
