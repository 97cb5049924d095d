/*!
The `flux-csv` crate provides a CSV tokenizing engine working over 8-bit
(UTF-8 bytes) or 16-bit (UTF-16 code units) tokens, with blocking, async and
parallel front ends sharing the same core.

Records are exposed as zero-copy views over the reader's buffer. Fields are
only split, trimmed and unescaped when asked for, and unescaping writes into a
pooled scratch buffer instead of allocating.

# Examples

*Reading a CSV file*

```no_run
use std::fs::File;
use flux_csv::Reader;

let mut reader = Reader::from_reader(File::open("data.csv")?)?;

while let Some(mut record) = reader.read_record()? {
    dbg!(record.get(0)?);
}
# Ok::<(), flux_csv::Error>(())
```

*Using a builder to configure your reader*

```no_run
use std::fs::File;
use flux_csv::ReaderBuilder;

let mut reader = ReaderBuilder::new()
    .delimiter(b'\t')
    .escape(Some(b'\\'))
    .buffer_capacity(16 * (1 << 10))
    .from_reader(File::open("data.tsv")?)?;

let name_column = reader.headers()?.index_of("name");
# Ok::<(), flux_csv::Error>(())
```

*Reading UTF-16 text*

```
use flux_csv::ReaderBuilder;

let data: Vec<u16> = "name\nlucy\n".encode_utf16().collect();
let mut reader = ReaderBuilder::<u16>::new().from_slice(&data)?;
assert_eq!(reader.headers()?.names(), &["name"]);
# Ok::<(), flux_csv::Error>(())
```

*Processing records on the rayon thread pool*

```no_run
use std::fs::File;
use flux_csv::{ReaderBuilder, ReaderSource};

let mut reader = ReaderBuilder::new()
    .parallel(ReaderSource::with_capacity(1 << 20, File::open("data.csv")?))?;

let lengths = reader.map(|record, _| Ok(record.as_slice().len()))?;
# Ok::<(), flux_csv::Error>(())
```

# Readers

- [`Reader`], [`ReaderBuilder`]: a streaming zero-copy reader over any
  [`BufferSource`]: contiguous memory ([`SliceSource`]), a list of segments
  ([`SegmentedSource`]) or a [`std::io::Read`] ([`ReaderSource`]).
- [`AsyncReader`]: the same reader over an [`AsyncBufferSource`], such as
  [`AsyncReaderSource`] wrapping a [`tokio::io::AsyncRead`]. Reads can be
  interrupted by a [`Cancellation`].
- [`ParallelReader`], [`AsyncParallelReader`]: readers indexing whole windows
  of records with a [`ReadAheadBuffer`] before handing them to the rayon thread
  pool.

Lower level building blocks are also exposed: the [`Tokenizer`], finding
record boundaries, the [`FieldReader`], splitting a single record, and the
unescaping routines.

# Writers

- [`Writer`], [`WriterBuilder`]: a typical CSV writer over bytes.

# Dialects

A [`Dialect`] gathers the structural tokens: delimiter, quote, optional
escape, newline and trimmed whitespace. Setting an escape switches the
tokenizer from quote mode, where quotes are doubled inside quoted fields as in
RFC 4180, to escape mode, where the escape token makes the next token literal.

An empty newline selects automatic detection of `\r\n`, `\n` and lone `\r`.
Dialects are validated by every constructor, and all violations are reported
at once in [`ErrorKind::InvalidDialect`].

# Design notes

## Hybrid design

The tokenizer follows a hybrid approach where a small state machine is kept,
but structural tokens are found with vectorized searches like the ones of the
[`memchr`](https://docs.rs/memchr/latest/memchr/) crate. Branching happens on
each structural token rather than on each token.

Quoted sections are scanned for their closing quote only. Records holding no
quote nor escape at all are never unescaped: their fields are sub-slices of
the input.

## Versions

Readers move forward only. Every move invalidates the current record, and a
[`Version`] handle taken on a record makes any later access through it fail
with [`ErrorKind::StaleRecord`] instead of silently reading another record.

## Errors

Error messages never contain record content unless the reader was built with
`expose_content(true)`. By default only the structure of the offending record
is rendered, each token being replaced by its role in the dialect.
*/
#[allow(unused_macros)]
macro_rules! rec {
    () => {{
        $crate::records::OwnedRecord::<u8>::new()
    }};

    ($($x: expr),*) => {{
        let mut r = $crate::records::OwnedRecord::<u8>::new();

        $(
            r.push_field($x.as_bytes());
        )*

        r
    }};
}

mod async_reader;
mod async_source;
mod core;
pub mod debug;
mod dialect;
mod error;
mod field;
mod header;
mod parallel;
mod pool;
mod read_ahead;
mod reader;
mod reconcile;
mod records;
mod searcher;
mod source;
mod token;
mod tokenizer;
mod unescape;
mod utils;
mod writer;

pub use async_reader::AsyncReader;
pub use async_source::{AsyncBufferSource, AsyncReaderSource, Cancellation};
pub use crate::core::{RecordInfo, State, Version};
pub use dialect::{Dialect, Newline};
pub use error::{Error, ErrorKind, Position, Result};
pub use field::FieldReader;
pub use header::{Header, HeaderMatch};
pub use parallel::{ActiveOperations, AsyncParallelReader, Operation, ParallelReader};
pub use pool::{BufferPool, PoolStats, PooledBuffer};
pub use read_ahead::{ReadAheadBuffer, RecordRef};
pub use reader::{Fields, Reader, ReaderBuilder, Record, RecordsIntoIter, RecordsIter};
pub use reconcile::Reconciler;
pub use records::{OwnedRecord, OwnedRecordIter};
pub use searcher::{searcher_simd_instructions, ScalarSearcher, Search, Searcher};
pub use source::{BufferSource, ReadResult, ReaderSource, SegmentedSource, SliceSource};
pub use token::Token;
pub use tokenizer::{RawRecord, RecordMeta, Tokenizer};
pub use unescape::{unescape_escaped, unescape_escaped_scalar, unescape_quoted, unescape_quoted_scalar};
pub use utils::trim_bom;
pub use writer::{Writer, WriterBuilder};
