use std::sync::Arc;

use tokio::io::AsyncRead;

use crate::async_source::{AsyncBufferSource, AsyncReaderSource, Cancellation};
use crate::core::{ReaderCore, State, Step, Version};
use crate::dialect::Dialect;
use crate::error::{Error, ErrorKind, Result};
use crate::header::Header;
use crate::reader::{ReaderBuilder, Record};
use crate::records::OwnedRecord;
use crate::token::Token;

impl<T: Token> ReaderBuilder<T> {
    /// Create an [`AsyncReader`] over any [`AsyncBufferSource`].
    pub fn from_async_source<S: AsyncBufferSource<T>>(&self, source: S) -> Result<AsyncReader<T, S>> {
        let core = self.build_core(self.resolve_pool())?;

        Ok(AsyncReader::new(core, source, self.cancellation.clone()))
    }
}

impl ReaderBuilder<u8> {
    /// Create an [`AsyncReader`] using the provided reader implementing
    /// [`tokio::io::AsyncRead`].
    pub fn from_async_reader<R: AsyncRead + Unpin + Send>(
        &self,
        reader: R,
    ) -> Result<AsyncReader<u8, AsyncReaderSource<R>>> {
        let pool = self.resolve_pool();
        let core = self.build_core(Arc::clone(&pool))?;
        let mut source = AsyncReaderSource::with_pool(self.buffer_capacity, reader, pool);

        if let Some(cancellation) = &self.cancellation {
            source = source.cancellation(cancellation.clone());
        }

        Ok(AsyncReader::new(core, source, self.cancellation.clone()))
    }
}

/// The asynchronous counterpart of [`Reader`](crate::Reader).
///
/// Only reading from the source suspends: tokenizing and field access are
/// the same synchronous code the blocking reader runs.
pub struct AsyncReader<T: Token, S> {
    core: ReaderCore<T>,
    source: S,
    cancellation: Option<Cancellation>,
    has_read: bool,
    is_complete: bool,
}

impl<T: Token, S: AsyncBufferSource<T>> AsyncReader<T, S> {
    fn new(core: ReaderCore<T>, source: S, cancellation: Option<Cancellation>) -> Self {
        Self {
            core,
            source,
            cancellation,
            has_read: false,
            is_complete: false,
        }
    }

    async fn fill(&mut self) -> Result<bool> {
        match &self.cancellation {
            Some(cancellation) => {
                cancellation.check()?;

                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => Err(Error::new(ErrorKind::Cancelled)),
                    result = self.source.read() => result.map(|r| r.is_complete),
                }
            }
            None => self.source.read().await.map(|r| r.is_complete),
        }
    }

    async fn drive(&mut self) -> Result<Step> {
        loop {
            if !self.has_read {
                match self.fill().await {
                    Ok(is_complete) => self.is_complete = is_complete,
                    Err(err) => {
                        if matches!(err.kind(), ErrorKind::Cancelled) {
                            log::debug!("CSV reading cancelled, disposing reader");
                            self.dispose().await?;
                        }
                        return Err(err);
                    }
                }

                self.has_read = true;
            }

            match self.core.step(self.source.buffer(), self.is_complete)? {
                Step::NeedMore { consumed, examined } => {
                    self.source.advance(consumed, examined);
                    self.has_read = false;
                }
                step => return Ok(step),
            }
        }
    }

    /// Moves to the next record. Returns `false` once the input is exhausted.
    pub async fn advance(&mut self) -> Result<bool> {
        if !self.core.begin()? {
            return Ok(false);
        }

        Ok(self.drive().await? == Step::Record)
    }

    /// View of the current record.
    pub fn record(&mut self) -> Result<Record<'_, T>> {
        self.core.ensure_record()?;

        let (start, end) = self
            .core
            .record_range()
            .ok_or_else(|| Error::new(ErrorKind::NoCurrentRecord))?;

        Ok(Record {
            data: &self.source.buffer()[start..end],
            core: &mut self.core,
        })
    }

    pub async fn read_record(&mut self) -> Result<Option<Record<'_, T>>> {
        if !self.advance().await? {
            return Ok(None);
        }

        self.record().map(Some)
    }

    /// Copies the next record out of the reader.
    pub async fn read_owned_record(&mut self) -> Result<Option<OwnedRecord<T>>> {
        match self.read_record().await? {
            Some(mut record) => record.to_owned_record().map(Some),
            None => Ok(None),
        }
    }

    pub async fn headers(&mut self) -> Result<&Header> {
        if self.core.request_header()? {
            self.drive().await?;
        }

        self.core.header()
    }

    pub fn version(&self) -> Version {
        self.core.version()
    }

    /// Field `index` of the record identified by `version`.
    pub fn field(&mut self, version: Version, index: usize) -> Result<Option<&[T]>> {
        self.core.ensure_version(version)?;

        let (start, end) = self
            .core
            .record_range()
            .ok_or_else(|| Error::new(ErrorKind::NoCurrentRecord))?;

        self.core.field(&self.source.buffer()[start..end], index)
    }

    /// Field named `name` of the record identified by `version`.
    pub fn field_by_name(&mut self, version: Version, name: &str) -> Result<Option<&[T]>> {
        self.core.ensure_version(version)?;

        match self.core.index_of(name)? {
            Some(index) => self.field(version, index),
            None => Ok(None),
        }
    }

    /// Number of fields of the record identified by `version`.
    pub fn field_count(&mut self, version: Version) -> Result<usize> {
        self.core.ensure_version(version)?;

        let (start, end) = self
            .core
            .record_range()
            .ok_or_else(|| Error::new(ErrorKind::NoCurrentRecord))?;

        self.core.field_count(&self.source.buffer()[start..end])
    }

    pub fn line(&self) -> Option<u64> {
        self.core.line()
    }

    pub fn position(&self) -> Option<u64> {
        self.core.position()
    }

    pub fn state(&self) -> State {
        self.core.state()
    }

    pub fn dialect(&self) -> &Dialect<T> {
        self.core.dialect()
    }

    pub async fn dispose(&mut self) -> Result<()> {
        self.core.dispose();
        self.source.dispose().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    use crate::source::SegmentedSource;

    #[tokio::test]
    async fn test_async_reader() -> Result<()> {
        let data = b"name,text\njohn,\"multi\nline\"\nlucy,plain\n".repeat(50);
        let mut reader = ReaderBuilder::new()
            .buffer_capacity(16)
            .has_headers(false)
            .from_async_reader(data.as_slice())?;

        let mut count = 0;

        while let Some(record) = reader.read_owned_record().await? {
            assert_eq!(record.len(), 2);
            count += 1;
        }

        assert_eq!(count, 150);
        assert_eq!(reader.state(), State::Exhausted);

        Ok(())
    }

    #[tokio::test]
    async fn test_async_headers_and_fields() -> Result<()> {
        let source = SegmentedSource::new(vec![b"a,b\n1,".as_slice(), b"2\n3,4\n".as_slice()]);
        let mut reader = ReaderBuilder::new().from_async_source(source)?;

        assert_eq!(reader.headers().await?.names(), &["a", "b"]);

        assert!(reader.advance().await?);
        let version = reader.version();
        assert_eq!(reader.field(version, 1)?, Some::<&[u8]>(b"2"));
        assert_eq!(reader.field_by_name(version, "a")?, Some::<&[u8]>(b"1"));
        assert_eq!(reader.field_by_name(version, "c")?, None);
        assert_eq!(reader.field_count(version)?, 2);

        assert!(reader.advance().await?);
        assert!(reader.field(version, 1).unwrap_err().is_usage_error());

        assert!(!reader.advance().await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_lazy_field_errors_are_sticky() -> Result<()> {
        let source = SegmentedSource::new(vec![b"a,b\"c".as_slice(), b"\",d\n".as_slice()]);
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_async_source(source)?;

        assert!(reader.advance().await?);
        let version = reader.version();

        for _ in 0..2 {
            assert!(matches!(
                reader.field(version, 1).unwrap_err().kind(),
                ErrorKind::InvalidQuotedField { .. }
            ));
        }

        assert!(matches!(
            reader.field_count(version).unwrap_err().kind(),
            ErrorKind::InvalidQuotedField { .. }
        ));
        assert!(matches!(
            reader.field(version, 2).unwrap_err().kind(),
            ErrorKind::InvalidQuotedField { .. }
        ));
        assert_eq!(reader.field(version, 0)?, Some::<&[u8]>(b"a"));

        Ok(())
    }

    #[tokio::test]
    async fn test_cancellation_disposes_reader() -> Result<()> {
        let (client, mut server) = tokio::io::duplex(64);
        let cancellation = Cancellation::new();

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .cancellation(cancellation.clone())
            .from_async_reader(client)?;

        server.write_all(b"a,b\nc,d").await.unwrap();

        assert!(reader.advance().await?);

        let pending = tokio::spawn(async move {
            let result = reader.advance().await;
            (result.map_err(|err| err.into_kind()), reader.state())
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancellation.cancel();

        let (result, state) = pending.await.unwrap();
        assert!(matches!(result, Err(ErrorKind::Cancelled)));
        assert_eq!(state, State::Disposed);

        Ok(())
    }
}
