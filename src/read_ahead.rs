use std::borrow::Cow;
use std::sync::Arc;

use crate::debug;
use crate::dialect::{Dialect, Newline};
use crate::error::{Error, ErrorKind, Position, Result};
use crate::field::{finish_field, FieldCursor, FieldSpan, RawField};
use crate::records::OwnedRecord;
use crate::searcher::Search;
use crate::token::Token;
use crate::tokenizer::Tokenizer;

/// Bounds of a record inside a window, and of its fields inside the field
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordBound {
    start: usize,
    end: usize,
    fields: (usize, usize),
    line: u64,
    position: u64,
}

/// Index of every complete record in a window of tokens, built in one pass.
///
/// Each call to [`fill`](ReadAheadBuffer::fill) indexes the records found in
/// a window and reports how many tokens they span. The next window must start
/// right after them, as the trailing partial record is scanned again once more
/// data is available.
///
/// Quote mode dialects with a single token newline are indexed with an
/// amortized three needle search. Every other dialect goes through the
/// tokenizer, field by field. Both produce the same table.
#[derive(Debug, Clone)]
pub struct ReadAheadBuffer<T: Token> {
    dialect: Arc<Dialect<T>>,
    newline: Newline<T>,
    tokenizer: Tokenizer<T>,
    searcher: Option<T::Searcher>,
    expose_content: bool,
    records: Vec<RecordBound>,
    fields: Vec<RawField>,
    next_line: u64,
    offset: u64,
}

impl<T: Token> ReadAheadBuffer<T> {
    pub fn new(dialect: &Dialect<T>) -> Result<Self> {
        dialect.validate()?;

        Ok(Self::from_valid(dialect))
    }

    pub(crate) fn from_valid(dialect: &Dialect<T>) -> Self {
        let newline = dialect.newline();

        let searcher = match (dialect.escape, newline) {
            (None, Newline::One(token)) => {
                Some(T::searcher(dialect.delimiter, dialect.quote, token))
            }
            _ => None,
        };

        Self {
            dialect: Arc::new(dialect.clone()),
            newline,
            tokenizer: Tokenizer::from_valid(dialect),
            searcher,
            expose_content: false,
            records: Vec::new(),
            fields: Vec::new(),
            next_line: 1,
            offset: 0,
        }
    }

    pub(crate) fn set_expose_content(&mut self, expose_content: bool) {
        self.expose_content = expose_content;
    }

    /// Whether windows are indexed with the amortized searcher.
    pub fn is_accelerated(&self) -> bool {
        self.searcher.is_some()
    }

    /// Forces the tokenizer pass, even for dialects the searcher handles.
    pub fn disable_acceleration(&mut self) {
        self.searcher = None;
    }

    pub fn dialect(&self) -> &Dialect<T> {
        &self.dialect
    }

    /// Accounts for tokens skipped before the next window, such as a BOM.
    pub(crate) fn skip(&mut self, tokens: usize) {
        self.offset += tokens as u64;
    }

    /// Forgets the indexed records and any partially scanned one.
    pub fn reset(&mut self) {
        self.records.clear();
        self.fields.clear();
        self.tokenizer.reset();
        self.next_line = 1;
        self.offset = 0;
    }

    /// Indexes every complete record of `window` and returns the number of
    /// tokens they span, trailing newline included.
    ///
    /// When `is_final` is set the whole window is consumed, and trailing
    /// tokens without a newline form the last record. Empty records are not
    /// indexed.
    pub fn fill(&mut self, window: &[T], is_final: bool) -> Result<usize> {
        self.records.clear();
        self.fields.clear();

        let consumed = if self.searcher.is_some() {
            self.fill_accelerated(window, is_final)?
        } else {
            self.fill_tokenized(window, is_final)?
        };

        self.offset += consumed as u64;

        Ok(consumed)
    }

    fn locate(&self, err: Error, tokens: &[T], line: u64, start: usize) -> Error {
        err.at(Position {
            line,
            offset: self.offset + start as u64,
        })
        .with_record(debug::render(tokens, &self.dialect, self.expose_content))
    }

    fn fill_tokenized(&mut self, window: &[T], is_final: bool) -> Result<usize> {
        let mut consumed = 0;

        loop {
            let data = &window[consumed..];
            let line = self.next_line;

            let span = match self.tokenizer.next_span(data, is_final) {
                Ok(Some(span)) => span,
                Ok(None) => break,
                Err(err) => {
                    self.tokenizer.reset();
                    return Err(self.locate(err, data, line, consumed));
                }
            };

            let tokens = &data[..span.len];

            self.next_line += 1;

            if span.meta.needs_unescape() {
                self.next_line += self.newline.count_in(tokens);
            }

            if span.len > 0 {
                let first = self.fields.len();
                let mut cursor = FieldCursor::new(span.meta);

                loop {
                    match cursor.next_raw(tokens, &self.dialect) {
                        Ok(Some(raw)) => self.fields.push(raw),
                        Ok(None) => break,
                        Err(err) => return Err(self.locate(err, tokens, line, consumed)),
                    }
                }

                self.records.push(RecordBound {
                    start: consumed,
                    end: consumed + span.len,
                    fields: (first, self.fields.len()),
                    line,
                    position: self.offset + consumed as u64,
                });
            }

            consumed += span.consumed;

            if consumed == window.len() && !is_final {
                break;
            }
        }

        Ok(consumed)
    }

    fn fill_accelerated(&mut self, window: &[T], is_final: bool) -> Result<usize> {
        let Some(searcher) = &self.searcher else {
            return Ok(0);
        };

        let delimiter = self.dialect.delimiter;
        let quote = self.dialect.quote;
        let len = window.len();

        let mut pos = 0;
        let mut quoted = false;
        let mut record_start = 0;
        let mut field_start = 0;
        let mut first_field = 0;
        let mut field_quotes = 0u32;
        let mut record_quotes = 0u32;

        while pos < len {
            if quoted {
                // Only the closing quote matters inside a quoted section
                match T::find(quote, &window[pos..]) {
                    Some(offset) => {
                        pos += offset + 1;
                        field_quotes += 1;
                        record_quotes += 1;
                        quoted = false;
                        continue;
                    }
                    None => break,
                }
            }

            let mut next = None;

            for offset in searcher.search(&window[pos..]) {
                let i = pos + offset;
                let token = window[i];

                next = Some(i + 1);

                if token == delimiter {
                    self.fields.push(RawField {
                        start: field_start - record_start,
                        end: i - record_start,
                        quotes: field_quotes,
                        escapes: 0,
                    });

                    field_start = i + 1;
                    field_quotes = 0;
                    continue;
                }

                if token == quote {
                    field_quotes += 1;
                    record_quotes += 1;
                    quoted = true;
                    break;
                }

                // Newline
                if i > record_start {
                    self.fields.push(RawField {
                        start: field_start - record_start,
                        end: i - record_start,
                        quotes: field_quotes,
                        escapes: 0,
                    });

                    self.records.push(RecordBound {
                        start: record_start,
                        end: i,
                        fields: (first_field, self.fields.len()),
                        line: self.next_line,
                        position: self.offset + record_start as u64,
                    });
                }

                self.next_line += 1;

                if record_quotes > 0 {
                    self.next_line += self.newline.count_in(&window[record_start..i]);
                }

                record_start = i + 1;
                field_start = i + 1;
                first_field = self.fields.len();
                field_quotes = 0;
                record_quotes = 0;
            }

            match next {
                Some(next) => pos = next,
                None => break,
            }
        }

        if record_start == len {
            return Ok(len);
        }

        if !is_final {
            self.fields.truncate(first_field);
            return Ok(record_start);
        }

        let line = self.next_line;

        if quoted {
            let err = Error::new(ErrorKind::OddQuoteCount {
                quotes: record_quotes,
            });

            return Err(self.locate(err, &window[record_start..], line, record_start));
        }

        self.fields.push(RawField {
            start: field_start - record_start,
            end: len - record_start,
            quotes: field_quotes,
            escapes: 0,
        });

        self.records.push(RecordBound {
            start: record_start,
            end: len,
            fields: (first_field, self.fields.len()),
            line,
            position: self.offset + record_start as u64,
        });

        self.next_line += 1;

        if record_quotes > 0 {
            self.next_line += self.newline.count_in(&window[record_start..]);
        }

        Ok(len)
    }

    /// Number of records indexed by the last fill.
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record `index` of the last fill. `window` must be the window given to
    /// [`fill`](ReadAheadBuffer::fill).
    pub fn record<'a>(&'a self, window: &'a [T], index: usize) -> Option<RecordRef<'a, T>> {
        let bound = self.records.get(index)?;

        Some(RecordRef::new(bound, window, &self.fields, &self.dialect))
    }

    pub fn records<'a>(&'a self, window: &'a [T]) -> impl Iterator<Item = RecordRef<'a, T>> + 'a {
        (0..self.len()).filter_map(move |i| self.record(window, i))
    }

    /// Copy of the last fill, independent of the window's storage.
    pub(crate) fn detach(&self, window: &[T]) -> DetachedWindow<T> {
        let end = self.records.last().map(|r| r.end).unwrap_or(0);

        DetachedWindow {
            tokens: window[..end].to_vec(),
            records: self.records.clone(),
            fields: self.fields.clone(),
            dialect: Arc::clone(&self.dialect),
        }
    }
}

/// Indexed records owning a copy of their tokens, to be shared with worker
/// tasks outliving the window they were read from.
#[derive(Debug)]
pub(crate) struct DetachedWindow<T> {
    tokens: Vec<T>,
    records: Vec<RecordBound>,
    fields: Vec<RawField>,
    dialect: Arc<Dialect<T>>,
}

impl<T: Token> DetachedWindow<T> {
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn record(&self, index: usize) -> Option<RecordRef<'_, T>> {
        let bound = self.records.get(index)?;

        Some(RecordRef::new(bound, &self.tokens, &self.fields, &self.dialect))
    }
}

/// A record indexed by a [`ReadAheadBuffer`].
///
/// Field bounds are already known: accessing a field only trims, unquotes and
/// unescapes it.
#[derive(Debug, Clone, Copy)]
pub struct RecordRef<'a, T> {
    tokens: &'a [T],
    fields: &'a [RawField],
    dialect: &'a Dialect<T>,
    line: u64,
    position: u64,
}

impl<'a, T: Token> RecordRef<'a, T> {
    fn new(
        bound: &RecordBound,
        window: &'a [T],
        fields: &'a [RawField],
        dialect: &'a Dialect<T>,
    ) -> Self {
        Self {
            tokens: &window[bound.start..bound.end],
            fields: &fields[bound.fields.0..bound.fields.1],
            dialect,
            line: bound.line,
            position: bound.position,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 1-based line of the record's first token.
    #[inline]
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Offset of the record's first token from the start of the stream.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The record's tokens, without its newline.
    #[inline]
    pub fn as_slice(&self) -> &'a [T] {
        self.tokens
    }

    /// Field `index` as it appears in the record, quotes and escapes included.
    pub fn raw(&self, index: usize) -> Option<&'a [T]> {
        self.fields
            .get(index)
            .map(|field| &self.tokens[field.start..field.end])
    }

    fn locate(&self, err: Error) -> Error {
        err.at(Position {
            line: self.line,
            offset: self.position,
        })
    }

    /// Logical value of field `index`. Values needing unescaping are written
    /// to `scratch`, which is cleared first.
    pub fn get<'s>(&'s self, index: usize, scratch: &'s mut Vec<T>) -> Result<Option<&'s [T]>> {
        let Some(&raw) = self.fields.get(index) else {
            return Ok(None);
        };

        scratch.clear();

        let span = finish_field(self.tokens, raw, self.dialect, scratch)
            .map_err(|err| self.locate(err))?;

        Ok(Some(span.resolve(self.tokens, scratch)))
    }

    /// Logical value of field `index`, borrowed from the record when no
    /// unescaping is needed.
    pub fn unescape(&self, index: usize) -> Result<Option<Cow<'a, [T]>>> {
        let Some(&raw) = self.fields.get(index) else {
            return Ok(None);
        };

        let mut scratch = Vec::new();

        let value = match finish_field(self.tokens, raw, self.dialect, &mut scratch)
            .map_err(|err| self.locate(err))?
        {
            FieldSpan::Raw(start, end) => Cow::Borrowed(&self.tokens[start..end]),
            FieldSpan::Scratch(start, end) => {
                scratch.truncate(end);
                scratch.drain(..start);
                Cow::Owned(scratch)
            }
        };

        Ok(Some(value))
    }

    /// Unescaped copy of every field, using `scratch` as working space.
    pub fn to_owned_record(&self, scratch: &mut Vec<T>) -> Result<OwnedRecord<T>> {
        let mut record = OwnedRecord::with_capacity(self.tokens.len(), self.fields.len());

        for index in 0..self.len() {
            if let Some(value) = self.get(index, scratch)? {
                record.push_field(value);
            }
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lf_dialect() -> Dialect<u8> {
        Dialect {
            newline: b"\n".to_vec(),
            ..Dialect::default()
        }
    }

    fn collect(
        buffer: &mut ReadAheadBuffer<u8>,
        data: &[u8],
        window: usize,
    ) -> Result<Vec<(u64, Vec<String>)>> {
        let mut output = Vec::new();
        let mut start = 0;
        let mut end = window.min(data.len());
        let mut scratch = Vec::new();

        loop {
            let is_final = end == data.len();
            let consumed = buffer.fill(&data[start..end], is_final)?;

            for record in buffer.records(&data[start..end]) {
                let owned = record.to_owned_record(&mut scratch)?;
                output.push((record.line(), owned.decode()));
            }

            start += consumed;

            if is_final {
                break;
            }

            end = (end + window).min(data.len()).max(start);
        }

        Ok(output)
    }

    #[test]
    fn test_fill() -> Result<()> {
        let mut buffer = ReadAheadBuffer::new(&lf_dialect())?;
        assert!(buffer.is_accelerated());

        let data = b"a,b\n\"x\"\"y\",\"1\n2\"\n\nlast,";

        assert_eq!(buffer.fill(data, false)?, 18);
        assert_eq!(buffer.len(), 2);

        let second = buffer.record(data, 1).unwrap();
        assert_eq!(second.raw(0), Some::<&[u8]>(b"\"x\"\"y\""));
        assert_eq!(second.unescape(0)?.as_deref(), Some::<&[u8]>(b"x\"y"));
        assert_eq!(second.unescape(1)?.as_deref(), Some::<&[u8]>(b"1\n2"));
        assert_eq!(second.unescape(2)?, None);

        let rest = &data[18..];
        assert_eq!(buffer.fill(rest, true)?, rest.len());
        assert_eq!(buffer.len(), 1);

        let last = buffer.record(rest, 0).unwrap();
        assert_eq!(last.line(), 5);
        assert_eq!(last.position(), 18);
        assert_eq!(last.len(), 2);

        Ok(())
    }

    #[test]
    fn test_passes_agree() -> Result<()> {
        let data = b"name,\"bio\"\njohn,\"says \"\"hi\"\"\nthen leaves\"\n\n\"\",x\n\"a\",\"b\"\"\",\nz";

        for window in 1..=data.len() {
            let mut accelerated = ReadAheadBuffer::new(&lf_dialect())?;
            let mut tokenized = ReadAheadBuffer::new(&lf_dialect())?;
            tokenized.disable_acceleration();

            assert_eq!(
                collect(&mut accelerated, data, window)?,
                collect(&mut tokenized, data, window)?,
                "window of {}",
                window
            );
        }

        let mut buffer = ReadAheadBuffer::new(&lf_dialect())?;
        let records = collect(&mut buffer, data, data.len())?;

        assert_eq!(records.len(), 5);
        assert_eq!(
            records[1],
            (
                2,
                vec!["john".to_string(), "says \"hi\"\nthen leaves".to_string()]
            )
        );
        assert_eq!(records[2].0, 5);

        Ok(())
    }

    #[test]
    fn test_escape_mode_and_auto_newline() -> Result<()> {
        let dialect = Dialect {
            escape: Some(b'\\'),
            ..Dialect::default()
        };

        let mut buffer = ReadAheadBuffer::new(&dialect)?;
        assert!(!buffer.is_accelerated());

        let records = collect(&mut buffer, b"a\\,b,c\r\n\"d\\\"e\"\r\n", 4)?;

        assert_eq!(
            records,
            vec![
                (1, vec!["a,b".to_string(), "c".to_string()]),
                (2, vec!["d\"e".to_string()]),
            ]
        );

        Ok(())
    }

    #[test]
    fn test_odd_quote_count() {
        for accelerate in [true, false] {
            let mut buffer = ReadAheadBuffer::new(&lf_dialect()).unwrap();

            if !accelerate {
                buffer.disable_acceleration();
            }

            let err = buffer.fill(b"a,b\n\"c,d\n", true).unwrap_err();

            assert!(err.is_format_error());
            assert!(matches!(err.kind(), ErrorKind::OddQuoteCount { quotes: 1 }));
            assert_eq!(err.position().map(|p| p.line), Some(2));
        }
    }

    #[test]
    fn test_invalid_field_reported_on_access() -> Result<()> {
        let mut buffer = ReadAheadBuffer::new(&lf_dialect())?;
        let data = b"a\"b\"c,d\n";

        buffer.fill(data, true)?;

        let record = buffer.record(data, 0).unwrap();
        let mut scratch = Vec::new();

        assert!(record.get(0, &mut scratch).unwrap_err().is_format_error());
        assert_eq!(record.get(1, &mut scratch)?, Some::<&[u8]>(b"d"));

        Ok(())
    }

    #[test]
    fn test_utf16() -> Result<()> {
        let dialect = Dialect {
            newline: u16::encode("\n"),
            ..Dialect::default()
        };

        let data = u16::encode("é,\"ü\"\nx\n");
        let mut buffer = ReadAheadBuffer::new(&dialect)?;

        assert!(buffer.is_accelerated());
        assert_eq!(buffer.fill(&data, true)?, data.len());

        let first = buffer.record(&data, 0).unwrap();
        assert_eq!(first.unescape(1)?.map(|v| u16::decode(&v)), Some("ü".to_string()));

        Ok(())
    }
}
