use std::io::{self, Read};
use std::sync::Arc;

use crate::error::{Error, ErrorKind, Result};
use crate::pool::{BufferPool, PooledBuffer};
use crate::reconcile::Reconciler;
use crate::token::Token;

pub(crate) const DEFAULT_CAPACITY: usize = 8192;

/// Data handed out by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResult<'a, T> {
    /// Unconsumed data, contiguous.
    pub buffer: &'a [T],
    /// Whether `buffer` holds everything left in the source.
    pub is_complete: bool,
}

/// A synchronous provider of tokens for the tokenizer.
///
/// `read` exposes the unconsumed data. `advance(consumed, examined)` drops
/// `consumed` tokens from the front of it and reports that the first
/// `examined` tokens were scanned: when everything was examined, the next
/// `read` must bring more data in (or report completion) rather than hand out
/// the same view again.
pub trait BufferSource<T: Token> {
    fn read(&mut self) -> Result<ReadResult<'_, T>>;

    /// The view returned by the last `read`, minus what was consumed since.
    fn buffer(&self) -> &[T];

    fn advance(&mut self, consumed: usize, examined: usize);

    /// Releases any buffer held by the source. Further reads fail.
    fn dispose(&mut self) -> Result<()>;
}

/// A source over contiguous data already in memory.
#[derive(Debug, Clone)]
pub struct SliceSource<'a, T> {
    data: &'a [T],
    pos: usize,
    disposed: bool,
}

impl<'a, T: Token> SliceSource<'a, T> {
    pub fn new(data: &'a [T]) -> Self {
        Self {
            data,
            pos: 0,
            disposed: false,
        }
    }
}

impl<T: Token> BufferSource<T> for SliceSource<'_, T> {
    fn read(&mut self) -> Result<ReadResult<'_, T>> {
        if self.disposed {
            return Err(Error::new(ErrorKind::Disposed));
        }

        Ok(ReadResult {
            buffer: &self.data[self.pos..],
            is_complete: true,
        })
    }

    #[inline]
    fn buffer(&self) -> &[T] {
        &self.data[self.pos..]
    }

    #[inline]
    fn advance(&mut self, consumed: usize, _examined: usize) {
        self.pos = (self.pos + consumed).min(self.data.len());
    }

    fn dispose(&mut self) -> Result<()> {
        self.disposed = true;
        Ok(())
    }
}

/// A source over an ordered list of in-memory segments.
///
/// Segments are handed out without copying. When the tokenizer needs to look
/// past the end of a segment, the unconsumed tail and the next segment are
/// stitched together by a [`Reconciler`] until the stitched prefix has been
/// consumed.
pub struct SegmentedSource<'a, T> {
    segments: Vec<&'a [T]>,
    next: usize,
    current: &'a [T],
    reconciler: Reconciler<T>,
    last_appended: &'a [T],
    need_more: bool,
    disposed: bool,
}

impl<'a, T: Token> SegmentedSource<'a, T> {
    pub fn new(segments: Vec<&'a [T]>) -> Self {
        Self::with_pool(segments, BufferPool::shared())
    }

    pub fn with_pool(segments: Vec<&'a [T]>, pool: Arc<BufferPool<T>>) -> Self {
        let current = segments.first().copied().unwrap_or(&[]);
        let next = segments.len().min(1);

        Self {
            segments,
            next,
            current,
            reconciler: Reconciler::new(pool),
            last_appended: &[],
            need_more: false,
            disposed: false,
        }
    }

    #[inline]
    fn is_complete(&self) -> bool {
        self.next >= self.segments.len()
    }

    /// Whether the current view is a stitched copy.
    pub fn is_reconciling(&self) -> bool {
        self.reconciler.has_something_saved()
    }

    fn pull_next_segment(&mut self) {
        let segment = self.segments[self.next];
        self.next += 1;

        if self.reconciler.has_something_saved() {
            self.reconciler.save(segment);
            self.last_appended = segment;
        } else if self.current.is_empty() {
            self.current = segment;
        } else {
            self.reconciler.save(self.current);
            self.reconciler.save(segment);
            self.current = &[];
            self.last_appended = segment;
        }
    }
}

impl<T: Token> BufferSource<T> for SegmentedSource<'_, T> {
    fn read(&mut self) -> Result<ReadResult<'_, T>> {
        if self.disposed {
            return Err(Error::new(ErrorKind::Disposed));
        }

        // Skipping empty segments so that a refill always brings new data
        while (self.need_more || self.buffer().is_empty()) && !self.is_complete() {
            let before = self.buffer().len();
            self.pull_next_segment();

            if self.buffer().len() > before {
                break;
            }
        }

        self.need_more = false;

        Ok(ReadResult {
            buffer: self.buffer(),
            is_complete: self.is_complete(),
        })
    }

    #[inline]
    fn buffer(&self) -> &[T] {
        if self.reconciler.has_something_saved() {
            self.reconciler.saved()
        } else {
            self.current
        }
    }

    fn advance(&mut self, consumed: usize, examined: usize) {
        let len = self.buffer().len();
        let consumed = consumed.min(len);

        self.need_more = examined >= len;

        if self.reconciler.has_something_saved() {
            self.reconciler.consume(consumed);

            // Back to zero-copy once the rest lies in the last segment
            let remaining = self.reconciler.saved().len();

            if remaining <= self.last_appended.len() {
                self.current = &self.last_appended[self.last_appended.len() - remaining..];
                self.reconciler.reset();
            }
        } else {
            self.current = &self.current[consumed..];
        }
    }

    fn dispose(&mut self) -> Result<()> {
        self.reconciler.reset();
        self.current = &[];
        self.disposed = true;
        Ok(())
    }
}

/// Owned byte buffer of the stream sources.
///
/// Unread data is moved back to the front before each refill, and the
/// buffer doubles when less than a quarter of it is left free.
pub(crate) struct StreamBuffer {
    buffer: PooledBuffer<u8>,
    start: usize,
    end: usize,
    need_more: bool,
    eof: bool,
}

impl StreamBuffer {
    pub(crate) fn new(capacity: usize, pool: &Arc<BufferPool<u8>>) -> Self {
        let capacity = capacity.max(16);
        let mut buffer = pool.rent(capacity);
        buffer.resize(capacity, 0);

        Self {
            buffer,
            start: 0,
            end: 0,
            need_more: false,
            eof: false,
        }
    }

    #[inline]
    pub(crate) fn view(&self) -> &[u8] {
        &self.buffer[self.start..self.end]
    }

    #[inline]
    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }

    /// Whether the next read must pull bytes from the underlying stream.
    #[inline]
    pub(crate) fn must_fill(&self) -> bool {
        !self.eof && (self.need_more || self.start == self.end)
    }

    /// Makes room for a refill and returns the free space.
    pub(crate) fn spare(&mut self) -> &mut [u8] {
        if self.start > 0 {
            self.buffer.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }

        let capacity = self.buffer.len();

        if capacity - self.end < capacity / 4 {
            log::debug!("growing stream buffer from {} to {} bytes", capacity, capacity * 2);
            self.buffer.ensure_additional(capacity);
            self.buffer.resize(capacity * 2, 0);
        }

        &mut self.buffer[self.end..]
    }

    pub(crate) fn commit(&mut self, n: usize) {
        if n == 0 {
            self.eof = true;
        }

        self.end += n;
        self.need_more = false;
    }

    pub(crate) fn advance(&mut self, consumed: usize, examined: usize) {
        let len = self.end - self.start;

        self.need_more = examined >= len;
        self.start += consumed.min(len);
    }
}

/// A source over any [`std::io::Read`].
pub struct ReaderSource<R> {
    inner: R,
    buffer: Option<StreamBuffer>,
    position: u64,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, inner)
    }

    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        Self::with_pool(capacity, inner, BufferPool::shared())
    }

    pub fn with_pool(capacity: usize, inner: R, pool: Arc<BufferPool<u8>>) -> Self {
        Self {
            inner,
            buffer: Some(StreamBuffer::new(capacity, &pool)),
            position: 0,
        }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> BufferSource<u8> for ReaderSource<R> {
    fn read(&mut self) -> Result<ReadResult<'_, u8>> {
        let buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::Disposed))?;

        if buffer.must_fill() {
            let n = loop {
                match self.inner.read(buffer.spare()) {
                    Ok(n) => break n,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err.into()),
                }
            };

            buffer.commit(n);
        }

        Ok(ReadResult {
            buffer: buffer.view(),
            is_complete: buffer.is_eof(),
        })
    }

    #[inline]
    fn buffer(&self) -> &[u8] {
        self.buffer.as_ref().map(|b| b.view()).unwrap_or(&[])
    }

    fn advance(&mut self, consumed: usize, examined: usize) {
        if let Some(buffer) = self.buffer.as_mut() {
            let consumed = consumed.min(buffer.view().len());
            buffer.advance(consumed, examined);
            self.position += consumed as u64;
        }
    }

    fn dispose(&mut self) -> Result<()> {
        if self.buffer.take().is_some() {
            log::debug!("disposing reader source at byte {}", self.position);
        }
        Ok(())
    }
}
