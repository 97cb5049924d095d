use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use tokio::sync::Notify;

use crate::async_source::{AsyncBufferSource, Cancellation};
use crate::error::{Error, ErrorKind, Position, Result};
use crate::header::{Header, HeaderMatch};
use crate::pool::BufferPool;
use crate::read_ahead::{ReadAheadBuffer, RecordRef};
use crate::reader::ReaderBuilder;
use crate::source::{BufferSource, ReadResult};
use crate::token::Token;
use crate::utils::{may_hold_partial_bom, trim_bom};

/// Records handed to a single worker task.
const CHUNK_LEN: usize = 512;

/// Rounds spent helping the pool or spinning before yielding the thread.
const SPIN_LIMIT: u32 = 128;

const SCRATCH_CAPACITY: usize = 256;

/// Counter of operations still borrowing a window.
///
/// The producer must not advance its source before the counter drops back to
/// zero, since in-flight operations may still read the window.
#[derive(Debug, Default)]
pub struct ActiveOperations {
    count: AtomicUsize,
    idle: Notify,
}

/// Guard of an operation registered by [`ActiveOperations::enter`]. Dropping
/// it ends the operation.
#[derive(Debug)]
pub struct Operation {
    operations: Arc<ActiveOperations>,
}

impl Drop for Operation {
    fn drop(&mut self) {
        self.operations.exit();
    }
}

impl ActiveOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(self: &Arc<Self>) -> Operation {
        self.count.fetch_add(1, Ordering::AcqRel);

        Operation {
            operations: Arc::clone(self),
        }
    }

    fn exit(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.count() == 0
    }

    /// Blocks until no operation is active.
    ///
    /// From a pool thread, pending pool jobs are run while waiting. Past a
    /// bounded number of rounds the thread is yielded to the OS instead.
    pub fn wait_idle(&self) {
        let mut rounds = 0;

        while !self.is_idle() {
            if rounds < SPIN_LIMIT {
                rounds += 1;

                if rayon::yield_now().is_none() {
                    std::hint::spin_loop();
                }
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Completes once no operation is active.
    pub async fn wait_idle_async(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle() {
                return;
            }

            notified.await;
        }
    }
}

/// First error raised by a worker, and a flag telling the others to stop.
#[derive(Debug, Default)]
struct Failure {
    error: Mutex<Option<Error>>,
    failed: AtomicBool,
}

impl Failure {
    #[inline]
    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    fn set(&self, err: Error) {
        let mut error = match self.error.lock() {
            Ok(error) => error,
            Err(poisoned) => poisoned.into_inner(),
        };

        if error.is_none() {
            *error = Some(err);
        }

        self.failed.store(true, Ordering::Relaxed);
    }

    fn stop(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }

    fn take(&self) -> Option<Error> {
        match self.error.lock() {
            Ok(mut error) => error.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

enum Prepared {
    /// Tokens to skip before the first window.
    Skip(usize),
    NeedMore,
    Window { consumed: usize, first: usize },
}

/// Window indexing shared by the blocking and the async parallel readers.
struct Producer<T: Token> {
    read_ahead: ReadAheadBuffer<T>,
    has_headers: bool,
    header_match: HeaderMatch,
    header: Option<Header>,
    bom_checked: bool,
    windows: u64,
}

impl<T: Token> Producer<T> {
    fn new(builder: &ReaderBuilder<T>) -> Result<Self> {
        builder.dialect.validate()?;

        let mut read_ahead = ReadAheadBuffer::from_valid(&builder.dialect);
        read_ahead.set_expose_content(builder.expose_content);

        Ok(Self {
            read_ahead,
            has_headers: builder.has_headers,
            header_match: builder.header_match,
            header: None,
            bom_checked: false,
            windows: 0,
        })
    }

    fn prepare(&mut self, window: &[T], is_complete: bool) -> Result<Prepared> {
        if !self.bom_checked {
            if may_hold_partial_bom(window) && !is_complete {
                return Ok(Prepared::NeedMore);
            }

            self.bom_checked = true;

            let bom = trim_bom(window);

            if bom > 0 {
                self.read_ahead.skip(bom);
                return Ok(Prepared::Skip(bom));
            }
        }

        let consumed = self.read_ahead.fill(window, is_complete)?;
        let mut first = 0;

        if self.has_headers && self.header.is_none() {
            if let Some(record) = self.read_ahead.record(window, 0) {
                self.header = Some(self.read_header(&record)?);
                first = 1;
            }
        }

        self.windows += 1;

        log::trace!(
            "window {}: {} records over {} of {} tokens",
            self.windows,
            self.read_ahead.len() - first,
            consumed,
            window.len()
        );

        Ok(Prepared::Window { consumed, first })
    }

    fn read_header(&self, record: &RecordRef<'_, T>) -> Result<Header> {
        let mut names = Vec::with_capacity(record.len());

        for index in 0..record.len() {
            if let Some(value) = record.unescape(index)? {
                names.push(T::decode(&value));
            }
        }

        Header::new(names, self.header_match).map_err(|err| {
            err.at(Position {
                line: record.line(),
                offset: record.position(),
            })
        })
    }
}

impl<T: Token> ReaderBuilder<T> {
    /// Create a [`ParallelReader`] over any [`BufferSource`].
    ///
    /// Field count validation, record filters and error handlers are not
    /// applied by parallel readers.
    pub fn parallel<S: BufferSource<T>>(&self, source: S) -> Result<ParallelReader<T, S>> {
        Ok(ParallelReader {
            producer: Producer::new(self)?,
            source,
            pool: self.resolve_pool(),
            operations: Arc::new(ActiveOperations::new()),
        })
    }

    /// Create an [`AsyncParallelReader`] over any [`AsyncBufferSource`].
    pub fn parallel_async<S: AsyncBufferSource<T>>(
        &self,
        source: S,
    ) -> Result<AsyncParallelReader<T, S>> {
        Ok(AsyncParallelReader {
            producer: Producer::new(self)?,
            source,
            pool: self.resolve_pool(),
            operations: Arc::new(ActiveOperations::new()),
            cancellation: self.cancellation.clone(),
        })
    }
}

/// Reads windows of records and hands them to the rayon thread pool.
///
/// Each window is indexed by a [`ReadAheadBuffer`] before any record is
/// dispatched. Records are processed in place, the source only being
/// advanced once every operation on the window is over.
pub struct ParallelReader<T: Token, S> {
    producer: Producer<T>,
    source: S,
    pool: Arc<BufferPool<T>>,
    operations: Arc<ActiveOperations>,
}

impl<T: Token, S: BufferSource<T>> ParallelReader<T, S> {
    /// Header read from the first record, once a window has been processed.
    pub fn headers(&self) -> Option<&Header> {
        self.producer.header.as_ref()
    }

    pub fn operations(&self) -> &Arc<ActiveOperations> {
        &self.operations
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    /// Calls `f` on every data record, in no particular order, and returns
    /// the number of records processed. `f` receives a pooled scratch buffer
    /// owned by its worker task.
    ///
    /// The first error returned by `f` stops the processing of further
    /// records and is returned.
    pub fn for_each<F>(&mut self, f: F) -> Result<u64>
    where
        F: Fn(&RecordRef<'_, T>, &mut Vec<T>) -> Result<()> + Sync,
    {
        let mut total = 0;

        loop {
            let (window_len, is_complete) = {
                let result = self.source.read()?;
                (result.buffer.len(), result.is_complete)
            };

            let window = self.source.buffer();

            let (consumed, first) = match self.producer.prepare(window, is_complete)? {
                Prepared::Skip(bom) => {
                    self.source.advance(bom, bom);
                    continue;
                }
                Prepared::NeedMore => {
                    self.source.advance(0, window_len);
                    continue;
                }
                Prepared::Window { consumed, first } => (consumed, first),
            };

            let read_ahead = &self.producer.read_ahead;
            let operations = &self.operations;
            let pool = &self.pool;
            let failure = Failure::default();
            let f = &f;

            rayon::scope(|scope| {
                for start in (first..read_ahead.len()).step_by(CHUNK_LEN) {
                    let end = (start + CHUNK_LEN).min(read_ahead.len());
                    let operation = operations.enter();
                    let failure = &failure;

                    scope.spawn(move |_| {
                        let _operation = operation;
                        let mut scratch = pool.rent(SCRATCH_CAPACITY);

                        for record in (start..end).filter_map(|i| read_ahead.record(window, i)) {
                            if failure.has_failed() {
                                return;
                            }

                            if let Err(err) = f(&record, &mut *scratch) {
                                failure.set(err);
                                return;
                            }
                        }
                    });
                }

                operations.wait_idle();
            });

            if let Some(err) = failure.take() {
                return Err(err);
            }

            total += (read_ahead.len() - first) as u64;

            self.source.advance(consumed, window_len);

            if is_complete {
                break;
            }
        }

        Ok(total)
    }

    /// Applies `f` to every data record and returns the results in input
    /// order.
    pub fn map<R, F>(&mut self, f: F) -> Result<Vec<R>>
    where
        R: Send,
        F: Fn(&RecordRef<'_, T>, &mut Vec<T>) -> Result<R> + Sync,
    {
        let mut output = Vec::new();

        loop {
            let (window_len, is_complete) = {
                let result = self.source.read()?;
                (result.buffer.len(), result.is_complete)
            };

            let window = self.source.buffer();

            let (consumed, first) = match self.producer.prepare(window, is_complete)? {
                Prepared::Skip(bom) => {
                    self.source.advance(bom, bom);
                    continue;
                }
                Prepared::NeedMore => {
                    self.source.advance(0, window_len);
                    continue;
                }
                Prepared::Window { consumed, first } => (consumed, first),
            };

            let read_ahead = &self.producer.read_ahead;
            let operations = &self.operations;
            let pool = &self.pool;

            let results = (first..read_ahead.len())
                .into_par_iter()
                .filter_map(|i| read_ahead.record(window, i))
                .map_init(
                    || pool.rent(SCRATCH_CAPACITY),
                    |scratch, record| {
                        let _operation = operations.enter();
                        f(&record, &mut **scratch)
                    },
                )
                .collect::<Result<Vec<R>>>()?;

            operations.wait_idle();
            output.extend(results);

            self.source.advance(consumed, window_len);

            if is_complete {
                break;
            }
        }

        Ok(output)
    }
}

/// The asynchronous counterpart of [`ParallelReader`].
///
/// Every window is copied to shared storage before its records are handed to
/// the rayon thread pool, so that worker tasks never borrow the source. The
/// source is advanced once every task on the window is over.
pub struct AsyncParallelReader<T: Token, S> {
    producer: Producer<T>,
    source: S,
    pool: Arc<BufferPool<T>>,
    operations: Arc<ActiveOperations>,
    cancellation: Option<Cancellation>,
}

impl<T: Token, S: AsyncBufferSource<T>> AsyncParallelReader<T, S> {
    pub fn headers(&self) -> Option<&Header> {
        self.producer.header.as_ref()
    }

    pub fn operations(&self) -> &Arc<ActiveOperations> {
        &self.operations
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    async fn read(&mut self) -> Result<(usize, bool)> {
        match &self.cancellation {
            Some(cancellation) => {
                cancellation.check()?;

                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => Err(Error::new(ErrorKind::Cancelled)),
                    result = self.source.read() => result.map(summary),
                }
            }
            None => self.source.read().await.map(summary),
        }
    }

    /// Calls `f` on every data record, in no particular order, and returns
    /// the number of records processed.
    ///
    /// On cancellation, running tasks are told to stop, the source is
    /// disposed and [`ErrorKind::Cancelled`] is returned.
    pub async fn for_each<F>(&mut self, f: F) -> Result<u64>
    where
        F: Fn(&RecordRef<'_, T>, &mut Vec<T>) -> Result<()> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let mut total = 0;

        loop {
            let (window_len, is_complete) = match self.read().await {
                Ok(read) => read,
                Err(err) => return self.fail(err).await,
            };

            let window = self.source.buffer();

            let (consumed, first) = match self.producer.prepare(window, is_complete)? {
                Prepared::Skip(bom) => {
                    self.source.advance(bom, bom);
                    continue;
                }
                Prepared::NeedMore => {
                    self.source.advance(0, window_len);
                    continue;
                }
                Prepared::Window { consumed, first } => (consumed, first),
            };

            let detached = Arc::new(self.producer.read_ahead.detach(window));
            let failure = Arc::new(Failure::default());

            for start in (first..detached.len()).step_by(CHUNK_LEN) {
                let end = (start + CHUNK_LEN).min(detached.len());
                let operation = self.operations.enter();
                let detached = Arc::clone(&detached);
                let failure = Arc::clone(&failure);
                let pool = Arc::clone(&self.pool);
                let f = Arc::clone(&f);

                rayon::spawn(move || {
                    let _operation = operation;
                    let mut scratch = pool.rent(SCRATCH_CAPACITY);

                    for record in (start..end).filter_map(|i| detached.record(i)) {
                        if failure.has_failed() {
                            return;
                        }

                        if let Err(err) = f(&record, &mut *scratch) {
                            failure.set(err);
                            return;
                        }
                    }
                });
            }

            let waited = wait_idle(&self.operations, self.cancellation.as_ref(), &failure).await;

            if let Err(err) = waited {
                return self.fail(err).await;
            }

            if let Some(err) = failure.take() {
                return Err(err);
            }

            total += (detached.len() - first) as u64;

            self.source.advance(consumed, window_len);

            if is_complete {
                break;
            }
        }

        Ok(total)
    }

    async fn fail<R>(&mut self, err: Error) -> Result<R> {
        if matches!(err.kind(), ErrorKind::Cancelled) {
            log::debug!("parallel CSV reading cancelled, disposing source");
            self.source.dispose().await?;
        }

        Err(err)
    }
}

fn summary<T>(result: ReadResult<'_, T>) -> (usize, bool) {
    (result.buffer.len(), result.is_complete)
}

/// Waits for the tasks of a window, telling them to stop on cancellation.
async fn wait_idle(
    operations: &ActiveOperations,
    cancellation: Option<&Cancellation>,
    failure: &Failure,
) -> Result<()> {
    let Some(cancellation) = cancellation else {
        operations.wait_idle_async().await;
        return Ok(());
    };

    tokio::select! {
        biased;
        _ = cancellation.cancelled() => {
            failure.stop();
            Err(Error::new(ErrorKind::Cancelled))
        }
        _ = operations.wait_idle_async() => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    use crate::async_source::AsyncReaderSource;
    use crate::source::{ReaderSource, SegmentedSource, SliceSource};

    fn sample(records: usize) -> Vec<u8> {
        let mut data = b"id,text\n".to_vec();

        for i in 0..records {
            data.extend_from_slice(format!("{},\"line \"\"{}\"\"\nnext\"\n", i, i).as_bytes());
        }

        data
    }

    #[test]
    fn test_active_operations() {
        let operations = Arc::new(ActiveOperations::new());

        let first = operations.enter();
        let second = operations.enter();
        assert_eq!(operations.count(), 2);

        drop(first);
        assert!(!operations.is_idle());

        drop(second);
        assert!(operations.is_idle());

        operations.wait_idle();
    }

    #[tokio::test]
    async fn test_wait_idle_async() {
        let operations = Arc::new(ActiveOperations::new());
        let operation = operations.enter();

        let waiter = {
            let operations = Arc::clone(&operations);
            tokio::spawn(async move { operations.wait_idle_async().await })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!waiter.is_finished());

        drop(operation);
        waiter.await.unwrap();
    }

    #[test]
    fn test_for_each() -> Result<()> {
        let data = sample(3000);
        let sum = AtomicU64::new(0);

        let mut reader = ReaderBuilder::new()
            .newline(b"\n")
            .parallel(ReaderSource::with_capacity(1024, data.as_slice()))?;

        let count = reader.for_each(|record, scratch| {
            let id = record.get(0, scratch)?.unwrap_or_default();
            let id: u64 = std::str::from_utf8(id).unwrap().parse().unwrap();
            sum.fetch_add(id, Ordering::Relaxed);

            let text = record.get(1, scratch)?.unwrap_or_default();
            assert_eq!(text, format!("line \"{}\"\nnext", id).as_bytes());

            Ok(())
        })?;

        assert_eq!(count, 3000);
        assert_eq!(sum.load(Ordering::Relaxed), (0..3000).sum::<u64>());
        assert_eq!(reader.headers().unwrap().names(), &["id", "text"]);
        assert!(reader.operations().is_idle());

        Ok(())
    }

    #[test]
    fn test_map_keeps_order() -> Result<()> {
        let data = sample(2000);

        for newline in [b"\n".as_slice(), b"".as_slice()] {
            let mut reader = ReaderBuilder::new()
                .newline(newline)
                .parallel(ReaderSource::with_capacity(512, data.as_slice()))?;

            let lines = reader.map(|record, _| Ok(record.line()))?;
            let expected: Vec<u64> = (0..2000).map(|i| 2 + 2 * i).collect();

            assert_eq!(lines, expected);
        }

        Ok(())
    }

    #[test]
    fn test_first_error_is_returned() {
        let data = sample(1000);

        let mut reader = ReaderBuilder::new()
            .parallel(SliceSource::new(data.as_slice()))
            .unwrap();

        let err = reader
            .for_each(|record, _| {
                if record.line() == 102 {
                    return Err(Error::new(ErrorKind::NoCurrentRecord));
                }
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err.kind(), ErrorKind::NoCurrentRecord));
    }

    #[test]
    fn test_bom_and_segments() -> Result<()> {
        let data = b"\xef\xbb\xbfa,b\n1,2\n3,4";
        let source = SegmentedSource::new(vec![&data[..2], &data[2..7], &data[7..]]);

        let mut reader = ReaderBuilder::new().parallel(source)?;
        let records = reader.map(|record, scratch| record.to_owned_record(scratch))?;

        assert_eq!(records, vec![rec!["1", "2"], rec!["3", "4"]]);
        assert_eq!(reader.headers().unwrap().names(), &["a", "b"]);

        Ok(())
    }

    #[tokio::test]
    async fn test_async_for_each() -> Result<()> {
        let data = sample(1500);
        let count = Arc::new(AtomicU64::new(0));

        let mut reader = ReaderBuilder::new()
            .parallel_async(AsyncReaderSource::with_capacity(256, data.as_slice()))?;

        let total = {
            let count = Arc::clone(&count);
            reader
                .for_each(move |record, scratch| {
                    assert_eq!(record.len(), 2);
                    assert!(record.get(1, scratch)?.unwrap_or_default().ends_with(b"next"));
                    count.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                })
                .await?
        };

        assert_eq!(total, 1500);
        assert_eq!(count.load(Ordering::Relaxed), 1500);

        Ok(())
    }

    #[tokio::test]
    async fn test_async_cancellation() -> Result<()> {
        let (client, mut server) = tokio::io::duplex(64);
        let cancellation = Cancellation::new();

        let mut reader = ReaderBuilder::new()
            .cancellation(cancellation.clone())
            .parallel_async(AsyncReaderSource::new(client))?;

        server.write_all(b"a,b\n1,2\n").await.unwrap();

        let pending = tokio::spawn(async move {
            reader
                .for_each(|_, _| Ok(()))
                .await
                .map_err(|err| err.into_kind())
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancellation.cancel();

        assert!(matches!(pending.await.unwrap(), Err(ErrorKind::Cancelled)));

        Ok(())
    }
}
