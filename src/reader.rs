use std::io::Read;
use std::sync::Arc;

use crate::async_source::Cancellation;
use crate::core::{CoreConfig, OnError, ReaderCore, RecordInfo, SkipRecord, State, Step, Version};
use crate::dialect::Dialect;
use crate::error::{Error, ErrorKind, Result};
use crate::header::{Header, HeaderMatch};
use crate::pool::BufferPool;
use crate::records::OwnedRecord;
use crate::source::{BufferSource, ReaderSource, SegmentedSource, SliceSource, DEFAULT_CAPACITY};
use crate::token::Token;

/// Builds readers with a given configuration.
///
/// The dialect is validated by every terminal constructor, before any input
/// is read.
#[derive(Clone)]
pub struct ReaderBuilder<T: Token> {
    pub(crate) dialect: Dialect<T>,
    pub(crate) has_headers: bool,
    flexible: bool,
    pub(crate) header_match: HeaderMatch,
    pub(crate) buffer_capacity: usize,
    pub(crate) expose_content: bool,
    skip_record: Option<SkipRecord<T>>,
    on_error: Option<OnError<T>>,
    pool: Option<Arc<BufferPool<T>>>,
    pub(crate) cancellation: Option<Cancellation>,
}

impl<T: Token> Default for ReaderBuilder<T> {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            has_headers: true,
            flexible: false,
            header_match: HeaderMatch::Exact,
            buffer_capacity: DEFAULT_CAPACITY,
            expose_content: false,
            skip_record: None,
            on_error: None,
            pool: None,
            cancellation: None,
        }
    }
}

impl<T: Token> ReaderBuilder<T> {
    /// Create a new [`ReaderBuilder`] with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new [`ReaderBuilder`] with provided `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut builder = Self::default();
        builder.buffer_capacity(capacity);
        builder
    }

    /// Replace the whole dialect at once.
    pub fn dialect(&mut self, dialect: Dialect<T>) -> &mut Self {
        self.dialect = dialect;
        self
    }

    /// Set the field delimiter.
    ///
    /// Will default to a comma.
    pub fn delimiter(&mut self, delimiter: T) -> &mut Self {
        self.dialect.delimiter = delimiter;
        self
    }

    /// Set the quote token.
    ///
    /// Will default to a double quote.
    pub fn quote(&mut self, quote: T) -> &mut Self {
        self.dialect.quote = quote;
        self
    }

    /// Set an escape token, switching the reader to escape mode.
    ///
    /// Will default to `None`, i.e. quote mode.
    pub fn escape(&mut self, escape: Option<T>) -> &mut Self {
        self.dialect.escape = escape;
        self
    }

    /// Set the record terminator, one or two tokens long. An empty slice
    /// accepts `\r\n`, `\n` and `\r`.
    pub fn newline(&mut self, newline: &[T]) -> &mut Self {
        self.dialect.newline = newline.to_vec();
        self
    }

    /// Set the tokens trimmed from both ends of every field.
    pub fn whitespace(&mut self, whitespace: &[T]) -> &mut Self {
        self.dialect.whitespace = whitespace.to_vec();
        self
    }

    /// Indicate whether first record must be understood as a header.
    ///
    /// Will default to `true`.
    pub fn has_headers(&mut self, yes: bool) -> &mut Self {
        self.has_headers = yes;
        self
    }

    /// Indicate whether the created reader should be "flexible",
    /// i.e. whether it should allow reading records having different number of
    /// fields than the first one.
    ///
    /// Will default to `false`.
    pub fn flexible(&mut self, yes: bool) -> &mut Self {
        self.flexible = yes;
        self
    }

    /// Set how header names are compared by name lookups.
    pub fn header_match(&mut self, header_match: HeaderMatch) -> &mut Self {
        self.header_match = header_match;
        self
    }

    /// Set the initial capacity of stream buffers.
    pub fn buffer_capacity(&mut self, capacity: usize) -> &mut Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Allow raw record content in error messages. When `false`, only the
    /// structure of the offending record is rendered.
    ///
    /// Will default to `false`.
    pub fn expose_content(&mut self, yes: bool) -> &mut Self {
        self.expose_content = yes;
        self
    }

    /// Skip every data record for which `predicate` returns `true`.
    pub fn skip_record<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn(&RecordInfo<'_, T>) -> bool + Send + Sync + 'static,
    {
        self.skip_record = Some(Arc::new(predicate));
        self
    }

    /// Consult `handler` on format errors raised while advancing. Returning
    /// `true` skips the offending record instead of failing.
    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&Error, &RecordInfo<'_, T>) -> bool + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Rent scratch and stream buffers from `pool` instead of a private one.
    pub fn pool(&mut self, pool: Arc<BufferPool<T>>) -> &mut Self {
        self.pool = Some(pool);
        self
    }

    /// Make async reads fail with [`ErrorKind::Cancelled`] once
    /// `cancellation` fires.
    pub fn cancellation(&mut self, cancellation: Cancellation) -> &mut Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub(crate) fn resolve_pool(&self) -> Arc<BufferPool<T>> {
        match &self.pool {
            Some(pool) => Arc::clone(pool),
            None => BufferPool::shared(),
        }
    }

    pub(crate) fn build_core(&self, pool: Arc<BufferPool<T>>) -> Result<ReaderCore<T>> {
        self.dialect.validate()?;

        Ok(ReaderCore::new(CoreConfig {
            dialect: self.dialect.clone(),
            has_headers: self.has_headers,
            flexible: self.flexible,
            header_match: self.header_match,
            expose_content: self.expose_content,
            skip_record: self.skip_record.clone(),
            on_error: self.on_error.clone(),
            pool,
        }))
    }

    /// Create a [`Reader`] over any [`BufferSource`].
    pub fn from_source<S: BufferSource<T>>(&self, source: S) -> Result<Reader<T, S>> {
        let core = self.build_core(self.resolve_pool())?;

        Ok(Reader::new(core, source))
    }

    /// Create a [`Reader`] over contiguous in-memory data.
    pub fn from_slice<'a>(&self, data: &'a [T]) -> Result<Reader<T, SliceSource<'a, T>>> {
        self.from_source(SliceSource::new(data))
    }

    /// Create a [`Reader`] over in-memory data split into several segments.
    pub fn from_segments<'a>(
        &self,
        segments: Vec<&'a [T]>,
    ) -> Result<Reader<T, SegmentedSource<'a, T>>> {
        let pool = self.resolve_pool();
        let core = self.build_core(Arc::clone(&pool))?;

        Ok(Reader::new(core, SegmentedSource::with_pool(segments, pool)))
    }
}

impl ReaderBuilder<u8> {
    /// Create a [`Reader`] using the provided reader implementing
    /// [`std::io::Read`].
    pub fn from_reader<R: Read>(&self, reader: R) -> Result<Reader<u8, ReaderSource<R>>> {
        let pool = self.resolve_pool();
        let core = self.build_core(Arc::clone(&pool))?;
        let source = ReaderSource::with_pool(self.buffer_capacity, reader, pool);

        Ok(Reader::new(core, source))
    }
}

/// A streaming CSV reader, generic over its token width and its source.
///
/// Records are exposed as zero-copy [`Record`] views borrowing the reader,
/// so a view cannot outlive the next call to [`Reader::advance`].
pub struct Reader<T: Token, S> {
    core: ReaderCore<T>,
    source: S,
    has_read: bool,
    is_complete: bool,
}

impl<'a, T: Token> Reader<T, SliceSource<'a, T>> {
    /// Read in-memory data with the default configuration.
    pub fn from_slice(data: &'a [T]) -> Result<Self> {
        ReaderBuilder::new().from_slice(data)
    }
}

impl<R: Read> Reader<u8, ReaderSource<R>> {
    /// Read a [`std::io::Read`] with the default configuration.
    pub fn from_reader(reader: R) -> Result<Self> {
        ReaderBuilder::new().from_reader(reader)
    }
}

impl<T: Token, S: BufferSource<T>> Reader<T, S> {
    pub(crate) fn new(core: ReaderCore<T>, source: S) -> Self {
        Self {
            core,
            source,
            has_read: false,
            is_complete: false,
        }
    }

    /// Steps the core until it settles on a record, the header, or the end.
    fn drive(&mut self) -> Result<Step> {
        loop {
            if !self.has_read {
                self.is_complete = self.source.read()?.is_complete;
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
    pub fn advance(&mut self) -> Result<bool> {
        if !self.core.begin()? {
            return Ok(false);
        }

        Ok(self.drive()? == Step::Record)
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

    /// Advances and returns a view of the next record, if any.
    pub fn read_record(&mut self) -> Result<Option<Record<'_, T>>> {
        if !self.advance()? {
            return Ok(None);
        }

        self.record().map(Some)
    }

    /// Header of the stream, reading it first if needed.
    pub fn headers(&mut self) -> Result<&Header> {
        if self.core.request_header()? {
            self.drive()?;
        }

        self.core.header()
    }

    /// Handle identifying the current record, for the version-checked
    /// accessors.
    pub fn version(&self) -> Version {
        self.core.version()
    }

    fn current_range(&self, version: Version) -> Result<(usize, usize)> {
        self.core.ensure_version(version)?;

        self.core
            .record_range()
            .ok_or_else(|| Error::new(ErrorKind::NoCurrentRecord))
    }

    /// Field `index` of the record identified by `version`.
    pub fn field(&mut self, version: Version, index: usize) -> Result<Option<&[T]>> {
        let (start, end) = self.current_range(version)?;

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
        let (start, end) = self.current_range(version)?;

        self.core.field_count(&self.source.buffer()[start..end])
    }

    /// 1-based physical line of the current record.
    pub fn line(&self) -> Option<u64> {
        self.core.line()
    }

    /// Token offset of the current record from the start of the stream.
    pub fn position(&self) -> Option<u64> {
        self.core.position()
    }

    pub fn state(&self) -> State {
        self.core.state()
    }

    pub fn dialect(&self) -> &Dialect<T> {
        self.core.dialect()
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    /// Releases every pooled buffer held by the reader and its source.
    /// Further accesses fail with [`ErrorKind::Disposed`].
    pub fn dispose(&mut self) -> Result<()> {
        self.core.dispose();
        self.source.dispose()
    }

    /// Iterates over owned copies of the remaining records.
    pub fn records(&mut self) -> RecordsIter<'_, T, S> {
        RecordsIter { reader: self }
    }

    pub fn into_records(self) -> RecordsIntoIter<T, S> {
        RecordsIntoIter { reader: self }
    }

    fn next_owned(&mut self) -> Option<Result<OwnedRecord<T>>> {
        match self.read_record() {
            Ok(Some(mut record)) => Some(record.to_owned_record()),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

/// A zero-copy view of the record a reader is positioned on.
///
/// Fields are split lazily: asking for field `i` only splits the record up
/// to `i`.
pub struct Record<'r, T: Token> {
    pub(crate) core: &'r mut ReaderCore<T>,
    pub(crate) data: &'r [T],
}

impl<'r, T: Token> Record<'r, T> {
    /// Field at `index`, unescaped.
    #[inline]
    pub fn get(&mut self, index: usize) -> Result<Option<&[T]>> {
        self.core.field(self.data, index)
    }

    /// Field named `name`, looked up through the header.
    pub fn get_by_name(&mut self, name: &str) -> Result<Option<&[T]>> {
        match self.core.index_of(name)? {
            Some(index) => self.get(index),
            None => Ok(None),
        }
    }

    /// Number of fields, splitting the whole record.
    pub fn len(&mut self) -> Result<usize> {
        self.core.field_count(self.data)
    }

    /// Raw tokens of the record, newline excluded.
    #[inline]
    pub fn as_slice(&self) -> &'r [T] {
        self.data
    }

    pub fn version(&self) -> Version {
        self.core.version()
    }

    pub fn line(&self) -> Option<u64> {
        self.core.line()
    }

    /// Every field of the record at once.
    pub fn fields(&mut self) -> Result<Fields<'_, T>> {
        self.core.field_count(self.data)?;

        let core: &ReaderCore<T> = self.core;

        Ok(Fields {
            values: core.split_fields(self.data),
            core,
        })
    }

    /// Copies the record out of the reader.
    pub fn to_owned_record(&mut self) -> Result<OwnedRecord<T>> {
        let fields = self.fields()?;
        Ok(fields.iter().collect())
    }
}

/// All the fields of a record, borrowed from the reader.
pub struct Fields<'a, T: Token> {
    core: &'a ReaderCore<T>,
    values: Vec<&'a [T]>,
}

impl<'a, T: Token> Fields<'a, T> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&'a [T]> {
        self.values.get(index).copied()
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<&'a [T]>> {
        Ok(self.core.index_of(name)?.and_then(|index| self.get(index)))
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &'a [T]> + ExactSizeIterator + '_ {
        self.values.iter().copied()
    }

    pub fn decode(&self) -> Vec<String> {
        self.values.iter().map(|value| T::decode(value)).collect()
    }
}

pub struct RecordsIter<'r, T: Token, S> {
    reader: &'r mut Reader<T, S>,
}

impl<T: Token, S: BufferSource<T>> Iterator for RecordsIter<'_, T, S> {
    type Item = Result<OwnedRecord<T>>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_owned()
    }
}

pub struct RecordsIntoIter<T: Token, S> {
    reader: Reader<T, S>,
}

impl<T: Token, S: BufferSource<T>> Iterator for RecordsIntoIter<T, S> {
    type Item = Result<OwnedRecord<T>>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{self, Cursor};

    use bstr::ByteSlice;

    struct Trickle<'a> {
        data: &'a [u8],
        chunk: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn collect<S: BufferSource<u8>>(reader: Reader<u8, S>) -> Result<Vec<OwnedRecord<u8>>> {
        reader.into_records().collect()
    }

    #[test]
    fn test_header_mode() -> Result<()> {
        let mut reader = ReaderBuilder::new().from_slice(b"a,b\n1,2\n1,2\n")?;

        assert_eq!(reader.headers()?.names(), &["a", "b"]);

        let mut count = 0;

        while let Some(mut record) = reader.read_record()? {
            assert_eq!(record.get_by_name("a")?, Some::<&[u8]>(b"1"));
            assert_eq!(record.get(1)?, Some::<&[u8]>(b"2"));
            assert_eq!(record.get(2)?, None);
            count += 1;
        }

        assert_eq!(count, 2);
        assert_eq!(reader.state(), State::Exhausted);

        Ok(())
    }

    #[test]
    fn test_headers_after_first_record() -> Result<()> {
        let mut reader = Reader::from_slice(b"name,age\njohn,34\n".as_slice())?;

        assert!(reader.advance()?);
        assert_eq!(reader.headers()?.index_of("age"), Some(1));
        assert_eq!(reader.record()?.get(0)?, Some::<&[u8]>(b"john"));

        Ok(())
    }

    #[test]
    fn test_duplicate_header() {
        let mut reader = Reader::from_slice(b"a,a\n1,2\n".as_slice()).unwrap();

        let err = reader.advance().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DuplicateHeader { .. }));
        assert_eq!(err.position().map(|p| p.line), Some(1));
    }

    #[test]
    fn test_stale_version() -> Result<()> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .from_slice(b"a,b\nc,d\n")?;

        reader.advance()?;
        let version = reader.version();
        assert_eq!(reader.field(version, 1)?, Some::<&[u8]>(b"b"));
        assert_eq!(reader.field_count(version)?, 2);

        reader.advance()?;
        let err = reader.field(version, 0).unwrap_err();
        assert!(err.is_usage_error());
        assert!(matches!(err.kind(), ErrorKind::StaleRecord { .. }));

        let current = reader.version();
        assert_eq!(reader.field(current, 0)?, Some::<&[u8]>(b"c"));

        reader.dispose()?;
        assert!(matches!(
            reader.field(current, 0).unwrap_err().kind(),
            ErrorKind::Disposed
        ));
        assert!(reader.advance().is_err());

        Ok(())
    }

    #[test]
    fn test_field_by_name() -> Result<()> {
        let mut reader = ReaderBuilder::new()
            .header_match(HeaderMatch::AsciiCaseInsensitive)
            .from_slice(b"Name,Age
john,34
")?;

        assert!(reader.advance()?);
        let version = reader.version();

        assert_eq!(reader.field_by_name(version, "age")?, Some::<&[u8]>(b"34"));
        assert_eq!(reader.field_by_name(version, "city")?, None);

        assert!(!reader.advance()?);
        assert!(matches!(
            reader.field_by_name(version, "name").unwrap_err().kind(),
            ErrorKind::StaleRecord { .. }
        ));

        Ok(())
    }

    #[test]
    fn test_no_header() -> Result<()> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .from_slice(b"a,b\n")?;

        let mut record = reader.read_record()?.unwrap();
        assert!(matches!(
            record.get_by_name("a").unwrap_err().kind(),
            ErrorKind::NoHeader
        ));

        Ok(())
    }

    #[test]
    fn test_invalid_dialect_fails_before_reading() {
        let err = ReaderBuilder::<u8>::new()
            .delimiter(b'"')
            .from_reader(Cursor::new(Vec::new()))
            .err()
            .unwrap();

        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_quoting_and_escaping() -> Result<()> {
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .from_slice(b"\"a\"\"b\",c\n")?;

        assert_eq!(collect(reader)?, vec![rec!["a\"b", "c"]]);

        let reader = ReaderBuilder::new()
            .has_headers(false)
            .escape(Some(b'\\'))
            .from_slice(b"a\\,b,c\n")?;

        assert_eq!(collect(reader)?, vec![rec!["a,b", "c"]]);

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .from_slice(b"a,\"b,c\n")?;

        assert!(reader.advance().unwrap_err().is_format_error());

        Ok(())
    }

    #[test]
    fn test_streaming_matches_slice() -> Result<()> {
        let data = b"name,text\r\njohn,\"hello\r\nworld\"\r\n\r\nlucy,\"\"\"quoted\"\"\"\r\nmike,end";
        let expected = collect(ReaderBuilder::new().from_slice(data)?)?;

        assert_eq!(expected.len(), 3);

        for chunk in 1..data.len() {
            let reader = ReaderBuilder::new()
                .buffer_capacity(16)
                .from_reader(Trickle { data, chunk })?;

            assert_eq!(collect(reader)?, expected, "chunk size {}", chunk);
        }

        Ok(())
    }

    #[test]
    fn test_split_record_across_segments() -> Result<()> {
        let whole = collect(
            ReaderBuilder::new()
                .has_headers(false)
                .from_slice(b"x,\"multi\nline, field\",y\n")?,
        )?;

        let segments: Vec<&[u8]> = vec![b"x,\"mul", b"ti\nline,", b" field\",y\n"];
        let split = collect(ReaderBuilder::new().has_headers(false).from_segments(segments)?)?;

        assert_eq!(whole, split);
        assert_eq!(
            split[0][1].to_str_lossy(),
            "multi\nline, field",
            "{:?}",
            split[0]
        );

        Ok(())
    }

    #[test]
    fn test_lazy_field_errors_propagate_on_access() -> Result<()> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_slice(b"a,b\"c\",d\n")?;

        let mut record = reader.read_record()?.unwrap();
        assert_eq!(record.get(0)?, Some::<&[u8]>(b"a"));
        assert!(matches!(
            record.get(1).unwrap_err().kind(),
            ErrorKind::InvalidQuotedField { .. }
        ));

        Ok(())
    }

    #[test]
    fn test_lazy_field_errors_are_sticky() -> Result<()> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_slice(b"a,b\"c\",d\n")?;

        let mut record = reader.read_record()?.unwrap();

        for _ in 0..2 {
            let err = record.get(1).unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::InvalidQuotedField { quotes: 2 }));
            assert_eq!(err.position().map(|p| p.line), Some(1));
        }

        assert!(matches!(
            record.len().unwrap_err().kind(),
            ErrorKind::InvalidQuotedField { .. }
        ));
        assert!(matches!(
            record.get(2).unwrap_err().kind(),
            ErrorKind::InvalidQuotedField { .. }
        ));
        assert_eq!(record.get(0)?, Some::<&[u8]>(b"a"));

        let version = reader.version();
        assert!(reader.field(version, 1).is_err());
        assert!(reader.field_count(version).is_err());

        assert!(!reader.advance()?);

        Ok(())
    }

    #[test]
    fn test_utf16_reader() -> Result<()> {
        let data = u16::encode("nom;ville\r\nÉlise;Zürich\r\n");
        let mut reader = ReaderBuilder::<u16>::new()
            .delimiter(u16::from_ascii(b';'))
            .from_slice(&data)?;

        let mut record = reader.read_record()?.unwrap();
        let fields = record.fields()?;

        assert_eq!(fields.decode(), vec!["Élise", "Zürich"]);
        assert_eq!(fields.get_by_name("ville")?.map(u16::decode).as_deref(), Some("Zürich"));

        Ok(())
    }
}
