use std::sync::Arc;

use crate::debug;
use crate::dialect::{Dialect, Newline};
use crate::error::{Error, ErrorKind, Position, Result};
use crate::field::{finish_field, FieldCursor, FieldSpan};
use crate::header::{Header, HeaderMatch};
use crate::pool::{BufferPool, PooledBuffer};
use crate::tokenizer::{RecordMeta, Tokenizer};
use crate::token::Token;
use crate::utils::{may_hold_partial_bom, trim_bom};

const DISPOSED_VERSION: u64 = u64::MAX;

/// Where a reader stands in its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing was read yet.
    Uninitialized,
    /// The next record will be consumed as the header.
    NeedsHeader,
    /// Positioned on a data record.
    HasRecord,
    /// No more records.
    Exhausted,
    /// The reader was disposed. Every access fails.
    Disposed,
}

/// Identifies the record a reader was positioned on.
///
/// Obtained from [`Reader::version`](crate::Reader::version) and checked by
/// every version-taking accessor: once the reader advances, the handle is
/// stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version(pub(crate) u64);

impl Version {
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// A raw record offered to the skip predicate and the error handler.
#[derive(Debug, Clone, Copy)]
pub struct RecordInfo<'a, T> {
    /// Record tokens, newline excluded.
    pub tokens: &'a [T],
    /// 1-based physical line of the record.
    pub line: u64,
    /// Token offset of the record from the start of the stream.
    pub position: u64,
    /// Whether a header was read before this record.
    pub has_header: bool,
}

pub(crate) type SkipRecord<T> = Arc<dyn Fn(&RecordInfo<'_, T>) -> bool + Send + Sync>;
pub(crate) type OnError<T> = Arc<dyn Fn(&Error, &RecordInfo<'_, T>) -> bool + Send + Sync>;

/// Settings of the enumeration, resolved by the builder.
#[derive(Clone)]
pub(crate) struct CoreConfig<T> {
    pub dialect: Dialect<T>,
    pub has_headers: bool,
    pub flexible: bool,
    pub header_match: HeaderMatch,
    pub expose_content: bool,
    pub skip_record: Option<SkipRecord<T>>,
    pub on_error: Option<OnError<T>>,
    pub pool: Arc<BufferPool<T>>,
}

/// Outcome of a [`ReaderCore::step`] over the current view of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// A record is available through [`ReaderCore::record_range`].
    Record,
    /// The header was just read, as asked by [`ReaderCore::request_header`].
    Header,
    /// The view holds no complete record. The driver must advance its source
    /// by these amounts, read again and step again.
    NeedMore { consumed: usize, examined: usize },
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
struct Current {
    start: usize,
    end: usize,
    line: u64,
    position: u64,
}

/// Enumeration state machine shared by every front end.
///
/// The core never owns input: it is handed the current view of a source on
/// each [`step`](Self::step) and records where, in that view, the current
/// record lies. Drivers must not advance their source between a
/// [`Step::Record`] and the next call to [`begin`](Self::begin).
pub(crate) struct ReaderCore<T: Token> {
    config: CoreConfig<T>,
    tokenizer: Tokenizer<T>,
    newline: Newline<T>,
    state: State,
    version: u64,
    header: Option<Header>,
    expected_len: Option<usize>,
    stop_at_header: bool,

    // Stream bookkeeping
    bom_checked: bool,
    view_offset: u64,
    consumed: usize,
    next_line: u64,

    // Current record
    current: Option<Current>,
    cursor: FieldCursor,
    fields: Vec<FieldSpan>,
    scratch: Option<PooledBuffer<T>>,
}

impl<T: Token> ReaderCore<T> {
    /// Expects an already validated dialect.
    pub(crate) fn new(config: CoreConfig<T>) -> Self {
        let tokenizer = Tokenizer::from_valid(&config.dialect);

        log::debug!(
            "creating CSV reader in {} mode",
            if tokenizer.is_escape_mode() {
                "escape"
            } else {
                "quote"
            }
        );

        Self {
            newline: config.dialect.newline(),
            tokenizer,
            config,
            state: State::Uninitialized,
            version: 0,
            header: None,
            expected_len: None,
            stop_at_header: false,
            bom_checked: false,
            view_offset: 0,
            consumed: 0,
            next_line: 1,
            current: None,
            cursor: FieldCursor::default(),
            fields: Vec::new(),
            scratch: None,
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> State {
        self.state
    }

    #[inline]
    pub(crate) fn dialect(&self) -> &Dialect<T> {
        &self.config.dialect
    }

    #[inline]
    pub(crate) fn version(&self) -> Version {
        Version(self.version)
    }

    #[inline]
    fn is_eager(&self) -> bool {
        !self.config.flexible || self.config.on_error.is_some()
    }

    /// Leaves the current record, invalidating every view of it. Returns
    /// whether stepping may produce another record.
    pub(crate) fn begin(&mut self) -> Result<bool> {
        match self.state {
            State::Disposed => Err(Error::new(ErrorKind::Disposed)),
            State::Exhausted => Ok(false),
            _ => {
                if self.current.take().is_some() {
                    self.version += 1;
                }

                if self.state == State::Uninitialized && self.config.has_headers {
                    self.state = State::NeedsHeader;
                }

                self.fields.clear();

                if let Some(scratch) = self.scratch.as_mut() {
                    scratch.clear();
                }

                Ok(true)
            }
        }
    }

    /// Makes the next steps stop right after the header. Returns whether the
    /// header still has to be read.
    pub(crate) fn request_header(&mut self) -> Result<bool> {
        match self.state {
            State::Disposed => Err(Error::new(ErrorKind::Disposed)),
            State::Uninitialized | State::NeedsHeader if self.config.has_headers => {
                self.state = State::NeedsHeader;
                self.stop_at_header = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn info<'a>(&self, tokens: &'a [T], line: u64, position: u64) -> RecordInfo<'a, T> {
        RecordInfo {
            tokens,
            line,
            position,
            has_header: self.header.is_some(),
        }
    }

    /// Attaches position and a rendering of the record to an error.
    fn locate(&self, err: Error, tokens: &[T], line: u64, position: u64) -> Error {
        err.at(Position {
            line,
            offset: position,
        })
        .with_record(debug::render(
            tokens,
            &self.config.dialect,
            self.config.expose_content,
        ))
    }

    /// Returns the located error when it must be propagated, `None` when the
    /// error handler chose to skip the record.
    fn handle(&self, err: Error, tokens: &[T], line: u64, position: u64) -> Option<Error> {
        let err = self.locate(err, tokens, line, position);

        if let Some(on_error) = &self.config.on_error {
            if on_error(&err, &self.info(tokens, line, position)) {
                log::warn!("Skipping invalid CSV record {}: {}", line, err);
                return None;
            }
        }

        Some(err)
    }

    #[inline]
    fn scratch_slice(&self) -> &[T] {
        self.scratch.as_deref().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Splits one more field of `record` into the field table.
    ///
    /// On error the cursor and the scratch buffer are rewound, so that
    /// retrying fails on the same field again.
    fn split_next(&mut self, record: &[T]) -> Result<bool> {
        let cursor = self.cursor;
        let scratch_len = self.scratch.as_ref().map_or(0, |scratch| scratch.len());

        match self.try_split_next(record) {
            Err(err) => {
                self.cursor = cursor;

                if let Some(scratch) = self.scratch.as_mut() {
                    scratch.truncate(scratch_len);
                }

                Err(err)
            }
            result => result,
        }
    }

    fn try_split_next(&mut self, record: &[T]) -> Result<bool> {
        let Some(raw) = self.cursor.next_raw(record, &self.config.dialect)? else {
            return Ok(false);
        };

        let pool = &self.config.pool;
        let scratch = self.scratch.get_or_insert_with(|| pool.rent(64));
        let span = finish_field(record, raw, &self.config.dialect, scratch)?;

        self.fields.push(span);

        Ok(true)
    }

    fn split_all(&mut self, record: &[T]) -> Result<usize> {
        while self.split_next(record)? {}
        Ok(self.fields.len())
    }

    fn read_header(&mut self, record: &[T]) -> Result<()> {
        self.split_all(record)?;

        let scratch = self.scratch_slice();
        let names = self
            .fields
            .iter()
            .map(|span| T::decode(span.resolve(record, scratch)))
            .collect();

        let header = Header::new(names, self.config.header_match)?;

        if !self.config.flexible {
            self.expected_len = Some(header.len());
        }

        self.header = Some(header);

        Ok(())
    }

    fn check_len(&mut self, len: usize) -> Result<()> {
        if self.config.flexible {
            return Ok(());
        }

        match self.expected_len {
            None => {
                self.expected_len = Some(len);
                Ok(())
            }
            Some(expected_len) if expected_len != len => {
                Err(Error::new(ErrorKind::UnequalLengths { expected_len, len }))
            }
            Some(_) => Ok(()),
        }
    }

    fn reset_record(&mut self, meta: RecordMeta) {
        self.cursor = FieldCursor::new(meta);
        self.fields.clear();

        if let Some(scratch) = self.scratch.as_mut() {
            scratch.clear();
        }
    }

    /// Looks for the next record in `view`, the whole current view of the
    /// driver's source. `is_final` tells whether the source is complete.
    pub(crate) fn step(&mut self, view: &[T], is_final: bool) -> Result<Step> {
        if self.state == State::Disposed {
            return Err(Error::new(ErrorKind::Disposed));
        }

        if !self.bom_checked {
            if may_hold_partial_bom(view) && !is_final {
                return Ok(self.need_more(view));
            }

            self.consumed += trim_bom(view);
            self.bom_checked = true;
        }

        loop {
            let start = self.consumed;
            let data = &view[start..];
            let line = self.next_line;
            let position = self.view_offset + start as u64;

            let span = match self.tokenizer.next_span(data, is_final) {
                Ok(Some(span)) => span,
                Ok(None) if is_final => {
                    self.state = State::Exhausted;
                    return Ok(Step::Exhausted);
                }
                Ok(None) => return Ok(self.need_more(view)),
                Err(err) => {
                    self.tokenizer.reset();
                    self.consumed = view.len();
                    self.next_line += 1 + self.newline.count_in(data);

                    match self.handle(err, data, line, position) {
                        Some(err) => return Err(err),
                        None => continue,
                    }
                }
            };

            let end = start + span.len;
            let tokens = &view[start..end];

            self.consumed += span.consumed;
            self.next_line += 1;

            if span.meta.needs_unescape() {
                self.next_line += self.newline.count_in(tokens);
            }

            // Empty lines
            if span.len == 0 {
                continue;
            }

            self.reset_record(span.meta);

            if self.state == State::NeedsHeader {
                match self.read_header(tokens) {
                    Ok(()) => {
                        self.state = State::HasRecord;

                        if std::mem::take(&mut self.stop_at_header) {
                            return Ok(Step::Header);
                        }
                    }
                    Err(err) => {
                        if let Some(err) = self.handle(err, tokens, line, position) {
                            return Err(err);
                        }
                    }
                }

                continue;
            }

            if let Some(skip_record) = &self.config.skip_record {
                if skip_record(&self.info(tokens, line, position)) {
                    continue;
                }
            }

            if self.is_eager() {
                let checked = self.split_all(tokens).and_then(|len| self.check_len(len));

                if let Err(err) = checked {
                    match self.handle(err, tokens, line, position) {
                        Some(err) => return Err(err),
                        None => continue,
                    }
                }
            }

            self.state = State::HasRecord;
            self.current = Some(Current {
                start,
                end,
                line,
                position,
            });

            return Ok(Step::Record);
        }
    }

    fn need_more(&mut self, view: &[T]) -> Step {
        let consumed = self.consumed;

        self.view_offset += consumed as u64;
        self.consumed = 0;

        Step::NeedMore {
            consumed,
            examined: view.len(),
        }
    }

    /// Range of the current record in the view last given to `step`.
    #[inline]
    pub(crate) fn record_range(&self) -> Option<(usize, usize)> {
        self.current.map(|c| (c.start, c.end))
    }

    /// Fails unless positioned on a record.
    pub(crate) fn ensure_record(&self) -> Result<()> {
        match self.state {
            State::Disposed => Err(Error::new(ErrorKind::Disposed)),
            _ if self.current.is_none() => Err(Error::new(ErrorKind::NoCurrentRecord)),
            _ => Ok(()),
        }
    }

    /// The central version check behind every detached accessor.
    pub(crate) fn ensure_version(&self, version: Version) -> Result<()> {
        if self.state == State::Disposed {
            return Err(Error::new(ErrorKind::Disposed));
        }

        if version.0 != self.version {
            return Err(Error::new(ErrorKind::StaleRecord {
                expected: version.0,
                actual: self.version,
            }));
        }

        self.ensure_record()
    }

    pub(crate) fn line(&self) -> Option<u64> {
        self.current.map(|c| c.line)
    }

    pub(crate) fn position(&self) -> Option<u64> {
        self.current.map(|c| c.position)
    }

    pub(crate) fn header(&self) -> Result<&Header> {
        if self.state == State::Disposed {
            return Err(Error::new(ErrorKind::Disposed));
        }

        if !self.config.has_headers {
            return Err(Error::new(ErrorKind::NoHeader));
        }

        self.header
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::HeaderNotRead))
    }

    pub(crate) fn index_of(&self, name: &str) -> Result<Option<usize>> {
        Ok(self.header()?.index_of(name))
    }

    fn locate_current(&self, err: Error, record: &[T]) -> Error {
        match self.current {
            Some(c) => self.locate(err, record, c.line, c.position),
            None => err,
        }
    }

    /// Field `index` of the current record, splitting lazily up to it.
    /// `record` must be the current record's tokens.
    pub(crate) fn field<'a>(&'a mut self, record: &'a [T], index: usize) -> Result<Option<&'a [T]>> {
        self.ensure_record()?;

        while self.fields.len() <= index && !self.cursor.is_done() {
            if let Err(err) = self.split_next(record) {
                return Err(self.locate_current(err, record));
            }
        }

        let scratch = self.scratch_slice();

        Ok(self.fields.get(index).map(|span| span.resolve(record, scratch)))
    }

    pub(crate) fn field_count(&mut self, record: &[T]) -> Result<usize> {
        self.ensure_record()?;

        match self.split_all(record) {
            Ok(len) => Ok(len),
            Err(err) => Err(self.locate_current(err, record)),
        }
    }

    /// Fields of the current record split so far.
    pub(crate) fn split_fields<'a>(&'a self, record: &'a [T]) -> Vec<&'a [T]> {
        let scratch = self.scratch_slice();

        self.fields
            .iter()
            .map(|span| span.resolve(record, scratch))
            .collect()
    }

    /// Releases scratch buffers and invalidates every handle for good.
    pub(crate) fn dispose(&mut self) {
        if self.state != State::Disposed {
            log::debug!("disposing CSV reader at line {}", self.next_line);
        }

        self.state = State::Disposed;
        self.version = DISPOSED_VERSION;
        self.current = None;
        self.fields = Vec::new();
        self.scratch = None;
        self.tokenizer.reset();
    }
}
