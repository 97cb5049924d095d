use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

use crate::error::{Error, ErrorKind, Result};
use crate::pool::BufferPool;
use crate::source::{
    BufferSource, ReadResult, SegmentedSource, SliceSource, StreamBuffer, DEFAULT_CAPACITY,
};
use crate::token::Token;

/// A cloneable cancellation signal.
///
/// Every clone observes the same signal. Once cancelled, pending and future
/// async reads observing it fail with [`ErrorKind::Cancelled`].
#[derive(Debug, Clone)]
pub struct Cancellation {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);

        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Completes once [`Cancellation::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::new(ErrorKind::Cancelled));
        }
        Ok(())
    }
}

/// The asynchronous counterpart of [`BufferSource`].
#[async_trait]
pub trait AsyncBufferSource<T: Token>: Send {
    async fn read(&mut self) -> Result<ReadResult<'_, T>>;

    fn buffer(&self) -> &[T];

    fn advance(&mut self, consumed: usize, examined: usize);

    async fn dispose(&mut self) -> Result<()>;
}

#[async_trait]
impl<T: Token> AsyncBufferSource<T> for SliceSource<'_, T> {
    async fn read(&mut self) -> Result<ReadResult<'_, T>> {
        BufferSource::read(self)
    }

    fn buffer(&self) -> &[T] {
        BufferSource::buffer(self)
    }

    fn advance(&mut self, consumed: usize, examined: usize) {
        BufferSource::advance(self, consumed, examined)
    }

    async fn dispose(&mut self) -> Result<()> {
        BufferSource::dispose(self)
    }
}

#[async_trait]
impl<T: Token> AsyncBufferSource<T> for SegmentedSource<'_, T> {
    async fn read(&mut self) -> Result<ReadResult<'_, T>> {
        BufferSource::read(self)
    }

    fn buffer(&self) -> &[T] {
        BufferSource::buffer(self)
    }

    fn advance(&mut self, consumed: usize, examined: usize) {
        BufferSource::advance(self, consumed, examined)
    }

    async fn dispose(&mut self) -> Result<()> {
        BufferSource::dispose(self)
    }
}

/// A source over any [`tokio::io::AsyncRead`].
pub struct AsyncReaderSource<R> {
    inner: R,
    buffer: Option<StreamBuffer>,
    cancellation: Option<Cancellation>,
    position: u64,
}

impl<R: AsyncRead + Unpin + Send> AsyncReaderSource<R> {
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
            cancellation: None,
            position: 0,
        }
    }

    /// Makes pending reads fail as soon as `cancellation` fires.
    pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

async fn read_some<R: AsyncRead + Unpin>(inner: &mut R, spare: &mut [u8]) -> io::Result<usize> {
    loop {
        match inner.read(spare).await {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> AsyncBufferSource<u8> for AsyncReaderSource<R> {
    async fn read(&mut self) -> Result<ReadResult<'_, u8>> {
        let buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::Disposed))?;

        if buffer.must_fill() {
            let spare = buffer.spare();

            let n = match &self.cancellation {
                Some(cancellation) => {
                    cancellation.check()?;

                    tokio::select! {
                        biased;
                        _ = cancellation.cancelled() => {
                            return Err(Error::new(ErrorKind::Cancelled));
                        }
                        result = read_some(&mut self.inner, spare) => result?,
                    }
                }
                None => read_some(&mut self.inner, spare).await?,
            };

            buffer.commit(n);
        }

        Ok(ReadResult {
            buffer: buffer.view(),
            is_complete: buffer.is_eof(),
        })
    }

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

    async fn dispose(&mut self) -> Result<()> {
        if self.buffer.take().is_some() {
            log::debug!("disposing async reader source at byte {}", self.position);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_async_reader_source() -> Result<()> {
        let data = b"a,b\nc,d\n".repeat(20);
        let mut source = AsyncReaderSource::with_capacity(16, data.as_slice());
        let mut output = Vec::new();

        loop {
            let result = source.read().await?;
            let len = result.buffer.len();
            output.extend_from_slice(result.buffer);

            if result.is_complete {
                break;
            }

            source.advance(len, len);
        }

        assert_eq!(output, data);
        assert_eq!(source.position(), data.len() as u64);

        source.dispose().await?;
        assert!(matches!(
            source.read().await.unwrap_err().kind(),
            ErrorKind::Disposed
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_pending_read() {
        let (client, _server) = tokio::io::duplex(64);
        let cancellation = Cancellation::new();

        let mut source = AsyncReaderSource::new(client).cancellation(cancellation.clone());

        let handle = tokio::spawn(async move {
            source.read().await.map(|result| result.buffer.len())
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancellation.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn test_cancelled_before_read() {
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(b"a\n").await.unwrap();

        let cancellation = Cancellation::new();
        cancellation.cancel();
        assert!(cancellation.is_cancelled());

        let mut source = AsyncReaderSource::new(client).cancellation(cancellation);
        assert!(matches!(
            source.read().await.unwrap_err().kind(),
            ErrorKind::Cancelled
        ));
    }

    #[tokio::test]
    async fn test_in_memory_sources_are_async() -> Result<()> {
        let mut source = SliceSource::new(b"x\n".as_slice());
        let result = AsyncBufferSource::read(&mut source).await?;

        assert_eq!(result.buffer, b"x\n");
        assert!(result.is_complete);

        Ok(())
    }
}
