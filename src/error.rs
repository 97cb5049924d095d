use std::{error, fmt, io, result};

/// Location of a record in the token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// 1-based physical line number of the record's first token.
    pub line: u64,
    /// Token offset of the record's first token, from the start of the stream.
    pub offset: u64,
}

/// The specific type of an error.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Wrap a [std::io::Error].
    Io(io::Error),

    /// The operation was interrupted by a [`Cancellation`](crate::Cancellation).
    Cancelled,

    /// The dialect is invalid. Every violation found is listed.
    InvalidDialect(Vec<String>),

    /// A record contains an odd number of structural quotes.
    OddQuoteCount {
        /// Number of quotes counted in the record.
        quotes: u32,
    },

    /// An escape token has no token following it.
    DanglingEscape,

    /// A field opens a quote that is never closed.
    UnterminatedQuote,

    /// A field contains quotes but is not properly wrapped by them, or contains
    /// an undoubled quote inside its wrapping quotes.
    InvalidQuotedField {
        /// Number of quotes found in the field.
        quotes: u32,
    },

    /// The header contains the same name twice, under the configured
    /// [`HeaderMatch`](crate::HeaderMatch).
    DuplicateHeader {
        /// Offending name.
        name: String,
        /// Index of the first occurrence.
        first: usize,
        /// Index of the second occurrence.
        second: usize,
    },

    /// The header record has no usable field.
    EmptyHeader,

    /// Indicate that a non-flexible reader attempted to read a record having an
    /// incorrect number of fields.
    UnequalLengths {
        /// Expected number of fields
        expected_len: usize,
        /// Actual and incorrect number of fields observed
        len: usize,
    },

    /// A version handle was used after the reader moved to another record.
    StaleRecord {
        /// Version carried by the handle.
        expected: u64,
        /// Current version of the reader.
        actual: u64,
    },

    /// A field was looked up by name but the reader has no header.
    NoHeader,

    /// A field was looked up by name before the header was read.
    HeaderNotRead,

    /// Field access happened while the reader is not positioned on a record.
    NoCurrentRecord,

    /// The reader or source was disposed.
    Disposed,
}

/// An error occurring when reading/writing CSV data.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    pos: Option<Position>,
    record: Option<String>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            pos: None,
            record: None,
        }
    }

    pub(crate) fn at(mut self, pos: Position) -> Self {
        if self.pos.is_none() {
            self.pos = Some(pos);
        }
        self
    }

    pub(crate) fn with_record(mut self, rendered: String) -> Self {
        if self.record.is_none() {
            self.record = Some(rendered);
        }
        self
    }

    /// Return whether the wrapped error is a [`std::io::Error`].
    pub fn is_io_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Io(_))
    }

    /// Return whether the error stems from an invalid configuration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self.kind, ErrorKind::InvalidDialect(_))
    }

    /// Return whether the error stems from malformed CSV data.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::OddQuoteCount { .. }
                | ErrorKind::DanglingEscape
                | ErrorKind::UnterminatedQuote
                | ErrorKind::InvalidQuotedField { .. }
                | ErrorKind::DuplicateHeader { .. }
                | ErrorKind::EmptyHeader
                | ErrorKind::UnequalLengths { .. }
        )
    }

    /// Return whether the error is a caller bug, such as using a stale
    /// version handle or accessing a disposed reader.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::StaleRecord { .. }
                | ErrorKind::NoHeader
                | ErrorKind::HeaderNotRead
                | ErrorKind::NoCurrentRecord
                | ErrorKind::Disposed
        )
    }

    /// Return a reference to the underlying [`ErrorKind`].
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Position of the offending record, if known.
    pub fn position(&self) -> Option<Position> {
        self.pos
    }

    /// Rendering of the offending record. Raw content only appears here when
    /// the reader was built with `expose_content(true)`.
    pub fn record(&self) -> Option<&str> {
        self.record.as_deref()
    }

    /// Unwraps the error into its underlying [`ErrorKind`].
    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::new(ErrorKind::Io(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err.kind {
            ErrorKind::Io(inner) => inner,
            _ => Self::new(io::ErrorKind::InvalidData, err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.kind {
            ErrorKind::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => err.fmt(f),
            Self::Cancelled => write!(f, "operation was cancelled"),
            Self::InvalidDialect(errors) => {
                write!(f, "invalid dialect: {}", errors.join(" "))
            }
            Self::OddQuoteCount { quotes } => {
                write!(f, "record contains an odd number of quotes ({})", quotes)
            }
            Self::DanglingEscape => write!(f, "escape token is not followed by any token"),
            Self::UnterminatedQuote => write!(f, "quoted field is never closed"),
            Self::InvalidQuotedField { quotes } => write!(
                f,
                "field with {} quotes is not a properly quoted field",
                quotes
            ),
            Self::DuplicateHeader {
                name,
                first,
                second,
            } => write!(
                f,
                "duplicate header name {:?} at indices {} and {}",
                name, first, second
            ),
            Self::EmptyHeader => write!(f, "header record is empty"),
            Self::UnequalLengths { expected_len, len } => write!(
                f,
                "found record with {} fields, but the previous record has {} fields",
                len, expected_len
            ),
            Self::StaleRecord { expected, actual } => write!(
                f,
                "record view from version {} used after the reader moved to version {}",
                expected, actual
            ),
            Self::NoHeader => write!(f, "cannot access a field by name without a header"),
            Self::HeaderNotRead => write!(f, "cannot access a field by name before the header is read"),
            Self::NoCurrentRecord => write!(f, "reader is not positioned on a record"),
            Self::Disposed => write!(f, "reader was disposed"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let ErrorKind::Io(ref err) = self.kind {
            return err.fmt(f);
        }

        if self.is_configuration_error() || self.is_usage_error() {
            return write!(f, "CSV error: {}", self.kind);
        }

        match self.pos {
            Some(pos) => write!(
                f,
                "CSV error: record {} (position: {}): {}",
                pos.line, pos.offset, self.kind
            )?,
            None => write!(f, "CSV error: {}", self.kind)?,
        }

        if let Some(record) = &self.record {
            write!(f, ": {}", record)?;
        }

        Ok(())
    }
}

/// A type alias for `Result<T, flux_csv::Error>`.
pub type Result<T> = result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = Error::new(ErrorKind::InvalidDialect(vec!["a".into()]));
        assert!(err.is_configuration_error());
        assert!(!err.is_format_error());

        let err = Error::new(ErrorKind::OddQuoteCount { quotes: 3 });
        assert!(err.is_format_error());
        assert!(!err.is_usage_error());

        let err = Error::new(ErrorKind::StaleRecord {
            expected: 1,
            actual: 2,
        });
        assert!(err.is_usage_error());

        let err: Error = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(err.is_io_error());
    }

    #[test]
    fn test_display() {
        let err = Error::new(ErrorKind::UnequalLengths {
            expected_len: 2,
            len: 3,
        })
        .at(Position { line: 4, offset: 12 })
        .with_record("x,x,x".to_string());

        assert_eq!(
            err.to_string(),
            "CSV error: record 4 (position: 12): found record with 3 fields, but the previous record has 2 fields: x,x,x"
        );

        let err = Error::new(ErrorKind::Disposed).at(Position::default());
        assert_eq!(err.to_string(), "CSV error: reader was disposed");
    }
}
