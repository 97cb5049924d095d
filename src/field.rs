use std::borrow::Cow;

use crate::dialect::Dialect;
use crate::error::{Error, ErrorKind, Result};
use crate::token::Token;
use crate::tokenizer::RecordMeta;
use crate::unescape::{unescape_escaped, unescape_quoted};
use crate::utils::trim_bounds;

/// A field located in a record, before trimming and unescaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawField {
    pub start: usize,
    pub end: usize,
    pub quotes: u32,
    pub escapes: u32,
}

/// Where the logical value of a field lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldSpan {
    /// A sub-slice of the record.
    Raw(usize, usize),
    /// A slice of the unescape scratch buffer.
    Scratch(usize, usize),
}

impl FieldSpan {
    #[inline]
    pub(crate) fn resolve<'a, T>(&self, record: &'a [T], scratch: &'a [T]) -> &'a [T] {
        match *self {
            Self::Raw(start, end) => &record[start..end],
            Self::Scratch(start, end) => &scratch[start..end],
        }
    }
}

/// Resumable position of a field reader inside one record.
///
/// The cursor sits on the delimiter ending the last returned field.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FieldCursor {
    pos: usize,
    quotes_left: u32,
    escapes_left: u32,
    started: bool,
    done: bool,
}

impl FieldCursor {
    pub(crate) fn new(meta: RecordMeta) -> Self {
        Self {
            quotes_left: meta.quote_count,
            escapes_left: meta.escape_count,
            ..Self::default()
        }
    }

    #[inline]
    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    /// Locates the next field of `record`.
    pub(crate) fn next_raw<T: Token>(
        &mut self,
        record: &[T],
        dialect: &Dialect<T>,
    ) -> Result<Option<RawField>> {
        if self.done {
            return Ok(None);
        }

        let len = record.len();
        let delimiter = dialect.delimiter;
        let quote = dialect.quote;

        let mut pos = self.pos;

        if self.started {
            debug_assert!(record[pos] == delimiter);
            pos += 1;
        }

        self.started = true;

        let start = pos;
        let mut quotes = 0u32;
        let mut escapes = 0u32;

        loop {
            let haystack = &record[pos..];

            // No structural token left in the record but delimiters
            let found = if self.quotes_left == 0 && self.escapes_left == 0 && quotes % 2 == 0 {
                T::find(delimiter, haystack)
            } else {
                match dialect.escape {
                    None if quotes % 2 == 1 => T::find(quote, haystack),
                    None => T::find2(delimiter, quote, haystack),
                    Some(escape) if quotes % 2 == 1 => T::find2(quote, escape, haystack),
                    Some(escape) => T::find3(delimiter, quote, escape, haystack),
                }
            };

            let Some(offset) = found else {
                if quotes % 2 == 1 {
                    self.done = true;
                    return Err(Error::new(ErrorKind::UnterminatedQuote));
                }

                self.pos = len;
                self.done = true;

                return Ok(Some(RawField {
                    start,
                    end: len,
                    quotes,
                    escapes,
                }));
            };

            let i = pos + offset;
            let token = record[i];

            if token == delimiter {
                self.pos = i;

                return Ok(Some(RawField {
                    start,
                    end: i,
                    quotes,
                    escapes,
                }));
            }

            if token == quote {
                quotes += 1;
                self.quotes_left = self.quotes_left.saturating_sub(1);
                pos = i + 1;
            } else {
                escapes += 1;
                self.escapes_left = self.escapes_left.saturating_sub(1);

                if i + 1 >= len {
                    self.done = true;
                    return Err(Error::new(ErrorKind::DanglingEscape));
                }

                pos = i + 2;
            }
        }
    }
}

/// Trims and unquotes a located field, unescaping it into `scratch` when it
/// cannot be represented as a sub-slice of the record.
pub(crate) fn finish_field<T: Token>(
    record: &[T],
    raw: RawField,
    dialect: &Dialect<T>,
    scratch: &mut Vec<T>,
) -> Result<FieldSpan> {
    let (mut start, mut end) = trim_bounds(
        record,
        raw.start,
        raw.end,
        &dialect.whitespace,
        dialect.escape,
    );

    if raw.quotes == 0 && raw.escapes == 0 {
        return Ok(FieldSpan::Raw(start, end));
    }

    if raw.quotes > 0 {
        let wrapped =
            end - start >= 2 && record[start] == dialect.quote && record[end - 1] == dialect.quote;

        if !wrapped || (dialect.escape.is_some() && raw.quotes != 2) {
            return Err(Error::new(ErrorKind::InvalidQuotedField { quotes: raw.quotes }));
        }

        start += 1;
        end -= 1;
    }

    let offset = scratch.len();

    match dialect.escape {
        None if raw.quotes == 2 => return Ok(FieldSpan::Raw(start, end)),
        None => unescape_quoted(&record[start..end], dialect.quote, scratch)?,
        Some(_) if raw.escapes == 0 => return Ok(FieldSpan::Raw(start, end)),
        Some(escape) => unescape_escaped(&record[start..end], escape, scratch)?,
    }

    Ok(FieldSpan::Scratch(offset, scratch.len()))
}

/// Iterates over the logical fields of a single record.
///
/// Values that need unescaping are returned as [`Cow::Owned`].
pub struct FieldReader<'a, T> {
    record: &'a [T],
    dialect: &'a Dialect<T>,
    cursor: FieldCursor,
    scratch: Vec<T>,
}

impl<'a, T: Token> FieldReader<'a, T> {
    /// `meta` must be the one the tokenizer reported for `record`.
    pub fn new(record: &'a [T], meta: RecordMeta, dialect: &'a Dialect<T>) -> Self {
        Self {
            record,
            dialect,
            cursor: FieldCursor::new(meta),
            scratch: Vec::new(),
        }
    }

    pub fn next_field(&mut self) -> Result<Option<Cow<'a, [T]>>> {
        let Some(raw) = self.cursor.next_raw(self.record, self.dialect)? else {
            return Ok(None);
        };

        self.scratch.clear();

        Ok(Some(
            match finish_field(self.record, raw, self.dialect, &mut self.scratch)? {
                FieldSpan::Raw(start, end) => Cow::Borrowed(&self.record[start..end]),
                FieldSpan::Scratch(start, end) => Cow::Owned(self.scratch[start..end].to_vec()),
            },
        ))
    }
}

impl<'a, T: Token> Iterator for FieldReader<'a, T> {
    type Item = Result<Cow<'a, [T]>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_field().transpose()
    }
}
