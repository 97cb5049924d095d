use crate::dialect::{Dialect, Newline, NewlineMatch, NewlineNeedles};
use crate::error::{Error, ErrorKind, Result};
use crate::token::Token;

/// Structural token counts gathered while locating a record, so its fields
/// can later be split without scanning from the start again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordMeta {
    pub quote_count: u32,
    pub escape_count: u32,
}

impl RecordMeta {
    /// Whether some field of the record may need unescaping.
    #[inline]
    pub fn needs_unescape(&self) -> bool {
        self.quote_count > 0 || self.escape_count > 0
    }
}

/// One record, newline excluded, borrowed from the tokenized buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord<'a, T> {
    pub tokens: &'a [T],
    pub meta: RecordMeta,
}

/// Location of a record at the front of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordSpan {
    /// Length of the record, newline excluded.
    pub len: usize,
    /// Length of the record, newline included.
    pub consumed: usize,
    pub meta: RecordMeta,
}

/// Progress kept between two calls on a buffer whose tail holds an
/// incomplete record.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ScanState {
    examined: usize,
    quotes: u32,
    escapes: u32,
    pending_escape: bool,
}

impl ScanState {
    #[inline]
    fn finish(&mut self, len: usize, consumed: usize) -> RecordSpan {
        let span = RecordSpan {
            len,
            consumed,
            meta: RecordMeta {
                quote_count: self.quotes,
                escape_count: self.escapes,
            },
        };

        *self = Self::default();

        span
    }
}

/// A record boundary scanning algorithm.
pub(crate) trait Tokenize<T: Token> {
    /// Finds the first record of `data`, resuming from what `state` already
    /// examined. `data` must start at the same token on every call until a
    /// record is returned.
    fn scan(&self, state: &mut ScanState, data: &[T], is_final: bool)
        -> Result<Option<RecordSpan>>;
}

/// RFC 4180 scanning: quotes alone protect delimiters and newlines.
#[derive(Debug, Clone)]
pub(crate) struct QuoteMode<T> {
    quote: T,
    newline: Newline<T>,
}

impl<T: Token> QuoteMode<T> {
    pub(crate) fn new(dialect: &Dialect<T>) -> Self {
        Self {
            quote: dialect.quote,
            newline: dialect.newline(),
        }
    }
}

impl<T: Token> Tokenize<T> for QuoteMode<T> {
    fn scan(
        &self,
        state: &mut ScanState,
        data: &[T],
        is_final: bool,
    ) -> Result<Option<RecordSpan>> {
        let len = data.len();
        let mut pos = state.examined;

        while pos < len {
            let haystack = &data[pos..];

            if state.quotes % 2 == 1 {
                match T::find(self.quote, haystack) {
                    Some(offset) => {
                        state.quotes += 1;
                        pos += offset + 1;
                        continue;
                    }
                    None => {
                        pos = len;
                        break;
                    }
                }
            }

            let found = match self.newline.needles() {
                NewlineNeedles::One(n) => T::find2(self.quote, n, haystack),
                NewlineNeedles::Two(n1, n2) => T::find3(self.quote, n1, n2, haystack),
            };

            let Some(offset) = found else {
                pos = len;
                break;
            };

            let i = pos + offset;

            if data[i] == self.quote {
                state.quotes += 1;
                pos = i + 1;
                continue;
            }

            match self.newline.match_at(data, i, is_final) {
                NewlineMatch::Found(n) => return Ok(Some(state.finish(i, i + n))),
                NewlineMatch::NotNewline => pos = i + 1,
                NewlineMatch::NeedMore => {
                    pos = i;
                    break;
                }
            }
        }

        state.examined = pos;

        if !is_final || len == 0 {
            return Ok(None);
        }

        if state.quotes % 2 == 1 {
            let quotes = state.quotes;
            *state = ScanState::default();
            return Err(Error::new(ErrorKind::OddQuoteCount { quotes }));
        }

        Ok(Some(state.finish(len, len)))
    }
}

/// Escape scanning: the escape token makes the next token literal.
#[derive(Debug, Clone)]
pub(crate) struct EscapeMode<T> {
    quote: T,
    escape: T,
    newline: Newline<T>,
    needles: Vec<T>,
}

impl<T: Token> EscapeMode<T> {
    pub(crate) fn new(dialect: &Dialect<T>, escape: T) -> Self {
        let newline = dialect.newline();
        let mut needles = vec![dialect.quote, escape];

        match newline.needles() {
            NewlineNeedles::One(n) => needles.push(n),
            NewlineNeedles::Two(n1, n2) => needles.extend([n1, n2]),
        }

        Self {
            quote: dialect.quote,
            escape,
            newline,
            needles,
        }
    }
}

impl<T: Token> Tokenize<T> for EscapeMode<T> {
    fn scan(
        &self,
        state: &mut ScanState,
        data: &[T],
        is_final: bool,
    ) -> Result<Option<RecordSpan>> {
        let len = data.len();
        let mut pos = state.examined;

        if state.pending_escape && pos < len {
            state.pending_escape = false;
            pos += 1;
        }

        while pos < len {
            let haystack = &data[pos..];

            let found = if state.quotes % 2 == 1 {
                T::find2(self.quote, self.escape, haystack)
            } else {
                T::find_any(&self.needles, haystack)
            };

            let Some(offset) = found else {
                pos = len;
                break;
            };

            let i = pos + offset;
            let token = data[i];

            if token == self.escape {
                state.escapes += 1;

                if i + 1 < len {
                    pos = i + 2;
                } else {
                    state.pending_escape = true;
                    pos = len;
                }

                continue;
            }

            if token == self.quote {
                state.quotes += 1;
                pos = i + 1;
                continue;
            }

            match self.newline.match_at(data, i, is_final) {
                NewlineMatch::Found(n) => return Ok(Some(state.finish(i, i + n))),
                NewlineMatch::NotNewline => pos = i + 1,
                NewlineMatch::NeedMore => {
                    pos = i;
                    break;
                }
            }
        }

        state.examined = pos;

        if !is_final || len == 0 {
            return Ok(None);
        }

        let error = if state.pending_escape {
            Some(ErrorKind::DanglingEscape)
        } else if state.quotes % 2 == 1 {
            Some(ErrorKind::OddQuoteCount {
                quotes: state.quotes,
            })
        } else {
            None
        };

        if let Some(kind) = error {
            *state = ScanState::default();
            return Err(Error::new(kind));
        }

        Ok(Some(state.finish(len, len)))
    }
}

#[derive(Debug, Clone)]
enum Mode<T> {
    Quote(QuoteMode<T>),
    Escape(EscapeMode<T>),
}

/// Incremental record tokenizer.
///
/// The scanning algorithm is chosen once from the dialect: escape mode when an
/// escape token is configured, quote mode otherwise.
#[derive(Debug, Clone)]
pub struct Tokenizer<T> {
    mode: Mode<T>,
    state: ScanState,
}

impl<T: Token> Tokenizer<T> {
    /// Creates a tokenizer for a dialect, validating it first.
    pub fn new(dialect: &Dialect<T>) -> Result<Self> {
        dialect.validate()?;

        Ok(Self::from_valid(dialect))
    }

    pub(crate) fn from_valid(dialect: &Dialect<T>) -> Self {
        let mode = match dialect.escape {
            Some(escape) => Mode::Escape(EscapeMode::new(dialect, escape)),
            None => Mode::Quote(QuoteMode::new(dialect)),
        };

        Self {
            mode,
            state: ScanState::default(),
        }
    }

    pub fn is_escape_mode(&self) -> bool {
        matches!(self.mode, Mode::Escape(_))
    }

    /// Forgets any partially scanned record.
    pub fn reset(&mut self) {
        self.state = ScanState::default();
    }

    #[inline]
    pub(crate) fn next_span(&mut self, data: &[T], is_final: bool) -> Result<Option<RecordSpan>> {
        match &self.mode {
            Mode::Quote(mode) => mode.scan(&mut self.state, data, is_final),
            Mode::Escape(mode) => mode.scan(&mut self.state, data, is_final),
        }
    }

    /// Attempts to read the next record from the front of `view`.
    ///
    /// On success the record and its newline are consumed from `view`. When
    /// `view` holds no complete record, `None` is returned and `view` is left
    /// untouched: call again with more data appended to the same view. When
    /// `is_final` is set, remaining data without a trailing newline forms the
    /// last record, and an empty `view` means there are no more records.
    ///
    /// A format error consumes the whole view.
    pub fn try_get_record<'a>(
        &mut self,
        view: &mut &'a [T],
        is_final: bool,
    ) -> Result<Option<RawRecord<'a, T>>> {
        let data: &'a [T] = *view;

        match self.next_span(data, is_final) {
            Ok(Some(span)) => {
                *view = &data[span.consumed..];

                Ok(Some(RawRecord {
                    tokens: &data[..span.len],
                    meta: span.meta,
                }))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                *view = &data[data.len()..];
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escape_dialect() -> Dialect<u8> {
        Dialect {
            escape: Some(b'\\'),
            ..Dialect::default()
        }
    }

    fn records(dialect: &Dialect<u8>, data: &[u8]) -> Result<Vec<(String, RecordMeta)>> {
        let mut tokenizer = Tokenizer::new(dialect)?;
        let mut view = data;
        let mut output = Vec::new();

        while let Some(record) = tokenizer.try_get_record(&mut view, true)? {
            output.push((u8::decode(record.tokens), record.meta));
        }

        Ok(output)
    }

    fn chunked(dialect: &Dialect<u8>, data: &[u8], chunk: usize) -> Result<Vec<(String, RecordMeta)>> {
        let mut tokenizer = Tokenizer::new(dialect)?;
        let mut output = Vec::new();
        let mut start = 0;
        let mut end = 0;

        loop {
            let is_final = end == data.len();
            let mut view = &data[start..end];

            match tokenizer.try_get_record(&mut view, is_final)? {
                Some(record) => {
                    output.push((u8::decode(record.tokens), record.meta));
                    start = end - view.len();
                }
                None if is_final => break,
                None => end = (end + chunk).min(data.len()),
            }
        }

        Ok(output)
    }

    fn names(records: Vec<(String, RecordMeta)>) -> Vec<String> {
        records.into_iter().map(|(r, _)| r).collect()
    }

    #[test]
    fn test_quote_mode() -> Result<()> {
        let dialect = Dialect::default();
        let data = b"a,b\n\"c\nd\",\"e\"\"f\"\r\ng\rh";

        let output = records(&dialect, data)?;

        assert_eq!(
            names(output.clone()),
            vec!["a,b", "\"c\nd\",\"e\"\"f\"", "g", "h"]
        );
        assert_eq!(output[0].1, RecordMeta::default());
        assert_eq!(output[1].1.quote_count, 6);

        Ok(())
    }

    #[test]
    fn test_not_final_waits_for_newline() -> Result<()> {
        let mut tokenizer = Tokenizer::new(&Dialect::<u8>::default())?;

        let mut view: &[u8] = b"a,\"b\nc";
        assert_eq!(tokenizer.try_get_record(&mut view, false)?, None);
        assert_eq!(view.len(), 6);

        let mut view: &[u8] = b"a,\"b\nc\"\nrest";
        let record = tokenizer.try_get_record(&mut view, false)?.unwrap();
        assert_eq!(record.tokens, b"a,\"b\nc\"");
        assert_eq!(record.meta.quote_count, 2);
        assert_eq!(view, b"rest");

        assert_eq!(tokenizer.try_get_record(&mut view, false)?, None);
        let record = tokenizer.try_get_record(&mut view, true)?.unwrap();
        assert_eq!(record.tokens, b"rest");
        assert!(view.is_empty());
        assert_eq!(tokenizer.try_get_record(&mut view, true)?, None);

        Ok(())
    }

    #[test]
    fn test_trailing_cr_needs_more_data() -> Result<()> {
        let mut tokenizer = Tokenizer::new(&Dialect::<u8>::default())?;

        let mut view: &[u8] = b"a\r";
        assert_eq!(tokenizer.try_get_record(&mut view, false)?, None);

        let mut view: &[u8] = b"a\r\nb";
        let record = tokenizer.try_get_record(&mut view, false)?.unwrap();
        assert_eq!(record.tokens, b"a");
        assert_eq!(view, b"b");

        Ok(())
    }

    #[test]
    fn test_odd_quote_count() {
        let err = records(&Dialect::default(), b"a,\"b,c\n").unwrap_err();

        assert!(matches!(err.kind(), ErrorKind::OddQuoteCount { quotes: 1 }));

        let mut tokenizer = Tokenizer::new(&Dialect::<u8>::default()).unwrap();
        let mut view: &[u8] = b"x\n\"y";
        assert!(tokenizer.try_get_record(&mut view, true).unwrap().is_some());
        assert!(tokenizer.try_get_record(&mut view, true).is_err());
        assert!(view.is_empty());
    }

    #[test]
    fn test_escape_mode() -> Result<()> {
        let output = records(&escape_dialect(), b"a\\,b,c\nd\\\ne,\"f\\\"g\"\n")?;

        assert_eq!(
            names(output.clone()),
            vec!["a\\,b,c", "d\\\ne,\"f\\\"g\""]
        );
        assert_eq!(
            output[1].1,
            RecordMeta {
                quote_count: 2,
                escape_count: 2
            }
        );

        Ok(())
    }

    #[test]
    fn test_escape_mode_errors() {
        let err = records(&escape_dialect(), b"a,b\\").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DanglingEscape));

        let err = records(&escape_dialect(), b"a,\"b\n").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::OddQuoteCount { .. }));

        let err = records(&escape_dialect(), b"a,\"\"b\"\n").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::OddQuoteCount { quotes: 3 }));
    }

    #[test]
    fn test_two_token_newline() -> Result<()> {
        let dialect = Dialect {
            newline: b"|\n".to_vec(),
            ..Dialect::default()
        };

        assert_eq!(
            names(records(&dialect, b"a|b|\nc\n|\nd")?),
            vec!["a|b", "c\n", "d"]
        );

        Ok(())
    }

    #[test]
    fn test_chunk_boundary_independence() -> Result<()> {
        let data = b"name,bio\r\n\"john\",\"says \"\"hi\"\"\r\nthen leaves\"\r\n\nlucy,\"\"\rmax,x";

        for dialect in [Dialect::default(), escape_dialect()] {
            let expected = records(&dialect, data)?;

            for chunk in 1..data.len() {
                assert_eq!(chunked(&dialect, data, chunk)?, expected, "chunk={}", chunk);
            }
        }

        let data = b"a\\\nb,\"c\\\"\nd\"\\\\\ne";
        let expected = records(&escape_dialect(), data)?;
        assert_eq!(expected.len(), 2);

        for chunk in 1..data.len() {
            assert_eq!(chunked(&escape_dialect(), data, chunk)?, expected);
        }

        Ok(())
    }

    #[test]
    fn test_utf16() -> Result<()> {
        let dialect = Dialect::<u16>::default();
        let data = u16::encode("é,\"à\nù\"\n𝄞");
        let mut tokenizer = Tokenizer::new(&dialect)?;
        let mut view = data.as_slice();
        let mut output = Vec::new();

        while let Some(record) = tokenizer.try_get_record(&mut view, true)? {
            output.push(u16::decode(record.tokens));
        }

        assert_eq!(output, vec!["é,\"à\nù\"", "𝄞"]);

        Ok(())
    }
}
