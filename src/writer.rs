use std::io::{BufWriter, Write};

use memchr::memchr_iter;

use crate::dialect::{Dialect, Newline};
use crate::error::{Error, ErrorKind, Position, Result};
use crate::records::OwnedRecord;
use crate::searcher::{Search, Searcher};
use crate::source::DEFAULT_CAPACITY;

/// Builds CSV writers with a given configuration.
#[derive(Debug, Clone)]
pub struct WriterBuilder {
    dialect: Dialect<u8>,
    buffer_capacity: usize,
    flexible: bool,
}

impl Default for WriterBuilder {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            buffer_capacity: DEFAULT_CAPACITY,
            flexible: false,
        }
    }
}

impl WriterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dialect(&mut self, dialect: Dialect<u8>) -> &mut Self {
        self.dialect = dialect;
        self
    }

    pub fn delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.dialect.delimiter = delimiter;
        self
    }

    pub fn quote(&mut self, quote: u8) -> &mut Self {
        self.dialect.quote = quote;
        self
    }

    /// Set an escape token. Quotes and escapes inside fields are then
    /// preceded by it instead of being doubled.
    pub fn escape(&mut self, escape: Option<u8>) -> &mut Self {
        self.dialect.escape = escape;
        self
    }

    /// Set the record terminator. An empty slice writes `\r\n`.
    pub fn newline(&mut self, newline: &[u8]) -> &mut Self {
        self.dialect.newline = newline.to_vec();
        self
    }

    /// Set the tokens a reader would trim. Fields starting or ending with one
    /// of them are quoted so they survive a round trip.
    pub fn whitespace(&mut self, whitespace: &[u8]) -> &mut Self {
        self.dialect.whitespace = whitespace.to_vec();
        self
    }

    pub fn buffer_capacity(&mut self, capacity: usize) -> &mut Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Allow records with a different number of fields than the first one.
    ///
    /// Will default to `false`.
    pub fn flexible(&mut self, yes: bool) -> &mut Self {
        self.flexible = yes;
        self
    }

    pub fn from_writer<W: Write>(&self, writer: W) -> Result<Writer<W>> {
        self.dialect.validate()?;

        Ok(Writer::new(
            self.dialect.clone(),
            BufWriter::with_capacity(self.buffer_capacity, writer),
            self.flexible,
        ))
    }
}

/// A buffered CSV writer.
pub struct Writer<W: Write> {
    dialect: Dialect<u8>,
    newline: Vec<u8>,
    specials: Vec<u8>,
    searcher: Option<Searcher>,
    buffer: BufWriter<W>,
    scratch: Vec<u8>,
    flexible: bool,
    expected_len: Option<usize>,
    records: u64,
}

impl<W: Write> Writer<W> {
    /// Write with the default dialect.
    pub fn from_writer(writer: W) -> Self {
        Self::new(
            Dialect::default(),
            BufWriter::with_capacity(DEFAULT_CAPACITY, writer),
            false,
        )
    }

    fn new(dialect: Dialect<u8>, buffer: BufWriter<W>, flexible: bool) -> Self {
        let newline = match dialect.newline() {
            Newline::Auto => b"\r\n".to_vec(),
            newline => newline.to_tokens(),
        };

        let mut specials = vec![dialect.delimiter, dialect.quote];
        specials.extend(dialect.escape);

        match dialect.newline() {
            Newline::Auto => specials.extend_from_slice(b"\r\n"),
            newline => specials.extend(newline.to_tokens()),
        }

        let searcher = match specials[..] {
            [n1, n2, n3] => Some(Searcher::new(n1, n2, n3)),
            _ => None,
        };

        Self {
            dialect,
            newline,
            specials,
            searcher,
            buffer,
            scratch: Vec::new(),
            flexible,
            expected_len: None,
            records: 0,
        }
    }

    pub fn dialect(&self) -> &Dialect<u8> {
        &self.dialect
    }

    pub fn flush(&mut self) -> Result<()> {
        self.buffer.flush()?;
        Ok(())
    }

    fn check_len(&mut self, len: usize) -> Result<()> {
        if self.flexible {
            return Ok(());
        }

        match self.expected_len {
            None => {
                self.expected_len = Some(len);
                Ok(())
            }
            Some(expected_len) if expected_len == len => Ok(()),
            Some(expected_len) => Err(Error::new(ErrorKind::UnequalLengths { expected_len, len })
                .at(Position {
                    line: self.records + 1,
                    offset: 0,
                })),
        }
    }

    fn must_quote(&self, cell: &[u8]) -> bool {
        let (Some(&first), Some(&last)) = (cell.first(), cell.last()) else {
            return false;
        };

        if self.dialect.is_whitespace(first) || self.dialect.is_whitespace(last) {
            return true;
        }

        match &self.searcher {
            Some(searcher) => searcher.search(cell).next().is_some(),
            None => cell.iter().any(|byte| self.specials.contains(byte)),
        }
    }

    /// Quotes `cell` into the scratch buffer.
    fn quote(&mut self, cell: &[u8]) {
        let quote = self.dialect.quote;

        self.scratch.clear();
        self.scratch.push(quote);

        match self.dialect.escape {
            None => {
                let mut last = 0;

                for offset in memchr_iter(quote, cell) {
                    self.scratch.extend_from_slice(&cell[last..=offset]);
                    self.scratch.push(quote);
                    last = offset + 1;
                }

                self.scratch.extend_from_slice(&cell[last..]);
            }
            Some(escape) => {
                for &byte in cell {
                    if byte == quote || byte == escape {
                        self.scratch.push(escape);
                    }

                    self.scratch.push(byte);
                }
            }
        }

        self.scratch.push(quote);
    }

    fn write_cell(&mut self, cell: &[u8], force_quotes: bool) -> Result<()> {
        if force_quotes || self.must_quote(cell) {
            self.quote(cell);
            self.buffer.write_all(&self.scratch)?;
        } else {
            self.buffer.write_all(cell)?;
        }

        Ok(())
    }

    /// Writes a record, quoting fields when needed.
    ///
    /// A record made of a single empty field is written as an empty quoted
    /// field, so that readers do not take it for an empty line.
    pub fn write_record<I, F>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = F>,
        F: AsRef<[u8]>,
    {
        let mut fields = fields.into_iter().peekable();
        let mut len = 0;

        while let Some(field) = fields.next() {
            let cell = field.as_ref();

            if len > 0 {
                self.buffer.write_all(&[self.dialect.delimiter])?;
            }

            let lone_empty = len == 0 && cell.is_empty() && fields.peek().is_none();
            self.write_cell(cell, lone_empty)?;

            len += 1;
        }

        self.buffer.write_all(&self.newline)?;
        self.check_len(len)?;
        self.records += 1;

        Ok(())
    }

    pub fn write_owned_record(&mut self, record: &OwnedRecord<u8>) -> Result<()> {
        self.write_record(record.iter())
    }

    /// Writes fields as they are, without checking whether they need quoting.
    pub fn write_record_no_quoting<I, F>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = F>,
        F: AsRef<[u8]>,
    {
        let mut len = 0;

        for field in fields {
            if len > 0 {
                self.buffer.write_all(&[self.dialect.delimiter])?;
            }

            self.buffer.write_all(field.as_ref())?;
            len += 1;
        }

        self.buffer.write_all(&self.newline)?;
        self.check_len(len)?;
        self.records += 1;

        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        self.buffer.get_ref()
    }

    pub fn into_inner(self) -> Result<W> {
        self.buffer
            .into_inner()
            .map_err(|err| Error::from(err.into_error()))
    }
}
