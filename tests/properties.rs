use std::io::{self, Read};
use std::mem::{discriminant, Discriminant};

use proptest::collection::vec;
use proptest::prelude::*;

use flux_csv::{
    unescape_escaped, unescape_escaped_scalar, unescape_quoted, unescape_quoted_scalar, Dialect,
    ErrorKind, ReadAheadBuffer, ReaderBuilder, Result, WriterBuilder,
};

struct Trickle<'a> {
    data: &'a [u8],
    step: usize,
}

impl Read for Trickle<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.step.min(buf.len()).min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data = &self.data[n..];
        Ok(n)
    }
}

type Outcome = std::result::Result<Vec<Vec<String>>, Discriminant<ErrorKind>>;

fn outcome<I>(records: Result<I>) -> Outcome
where
    I: IntoIterator<Item = Result<flux_csv::OwnedRecord<u8>>>,
{
    let records = records.map_err(|err| discriminant(err.kind()))?;

    records
        .into_iter()
        .map(|record| {
            record
                .map(|record| record.decode())
                .map_err(|err| discriminant(err.kind()))
        })
        .collect()
}

fn reader_builder(dialect: &Dialect<u8>) -> ReaderBuilder<u8> {
    let mut builder = ReaderBuilder::new();
    builder
        .dialect(dialect.clone())
        .has_headers(false)
        .flexible(true);
    builder
}

/// Splits `data` at the given points, which are taken modulo its length.
fn split<'a>(data: &'a [u8], points: &[usize]) -> Vec<&'a [u8]> {
    let mut cuts: Vec<usize> = points
        .iter()
        .map(|point| point % (data.len() + 1))
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut segments = Vec::new();
    let mut last = 0;

    for cut in cuts {
        segments.push(&data[last..cut]);
        last = cut;
    }

    segments.push(&data[last..]);
    segments
}

fn structural_token() -> impl Strategy<Value = u8> {
    prop::sample::select(b",;\t|\"'\\\r\n #a".to_vec())
}

fn arbitrary_dialect() -> impl Strategy<Value = Dialect<u8>> {
    (
        structural_token(),
        structural_token(),
        prop::option::of(structural_token()),
        vec(structural_token(), 0..3),
        vec(structural_token(), 0..2),
    )
        .prop_map(|(delimiter, quote, escape, newline, whitespace)| Dialect {
            delimiter,
            quote,
            escape,
            newline,
            whitespace,
        })
}

fn reading_dialect() -> impl Strategy<Value = Dialect<u8>> {
    prop_oneof![
        Just(Dialect::default()),
        Just(Dialect {
            newline: b"\n".to_vec(),
            ..Dialect::default()
        }),
        Just(Dialect {
            newline: b"\r\n".to_vec(),
            ..Dialect::default()
        }),
        Just(Dialect {
            escape: Some(b'\\'),
            ..Dialect::default()
        }),
        Just(Dialect {
            newline: b"\n".to_vec(),
            whitespace: b" ".to_vec(),
            ..Dialect::default()
        }),
    ]
}

fn csv_text() -> impl Strategy<Value = Vec<u8>> {
    vec(prop::sample::select(b"ab ,\"\\\r\n".to_vec()), 0..48)
}

fn cell() -> impl Strategy<Value = String> {
    "[ab ,\"\\\\\r\né]{0,6}"
}

fn table() -> impl Strategy<Value = Vec<Vec<String>>> {
    vec(vec(cell(), 1..4), 1..6).prop_filter("a lone empty field", |rows| {
        rows.iter().all(|row| !(row.len() == 1 && row[0].is_empty()))
    })
}

proptest! {
    #[test]
    fn valid_dialects_have_disjoint_tokens(dialect in arbitrary_dialect()) {
        if dialect.validate().is_ok() {
            let newline = if dialect.newline.is_empty() {
                b"\r\n".to_vec()
            } else {
                dialect.newline.clone()
            };

            let mut structural = vec![dialect.delimiter, dialect.quote];
            structural.extend(dialect.escape);

            for (i, a) in structural.iter().enumerate() {
                prop_assert!(!structural[i + 1..].contains(a));
                prop_assert!(!newline.contains(a));
                prop_assert!(!dialect.whitespace.contains(a));
            }

            for token in &newline {
                prop_assert!(!dialect.whitespace.contains(token));
            }
        } else {
            prop_assert!(dialect.validate().unwrap_err().is_configuration_error());
        }
    }

    #[test]
    fn csv_crate_output_round_trips(rows in table()) {
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());

        for row in &rows {
            writer.write_record(row).unwrap();
        }

        let data = writer.into_inner().unwrap();
        let read = outcome(reader_builder(&Dialect::default()).from_slice(&data).map(|mut r| {
            r.records().collect::<Vec<_>>()
        }));

        prop_assert_eq!(read, Ok(rows));
    }

    #[test]
    fn writer_output_round_trips(rows in table(), escape in any::<bool>()) {
        let mut dialect = Dialect::default();

        if escape {
            dialect.escape = Some(b'\\');
        }

        let mut builder = WriterBuilder::new();
        builder.dialect(dialect.clone()).flexible(true);

        let mut writer = builder.from_writer(Vec::new()).unwrap();

        for row in &rows {
            writer.write_record(row).unwrap();
        }

        let data = writer.into_inner().unwrap();
        let read = outcome(reader_builder(&dialect).from_slice(&data).map(|mut r| {
            r.records().collect::<Vec<_>>()
        }));

        prop_assert_eq!(read, Ok(rows));
    }

    #[test]
    fn chunking_does_not_change_records(
        data in csv_text(),
        dialect in reading_dialect(),
        points in vec(any::<usize>(), 0..6),
        step in 1usize..5,
    ) {
        let builder = reader_builder(&dialect);

        let contiguous = outcome(builder.from_slice(&data).map(|mut r| {
            r.records().collect::<Vec<_>>()
        }));

        let segmented = outcome(builder.from_segments(split(&data, &points)).map(|mut r| {
            r.records().collect::<Vec<_>>()
        }));

        let trickled = outcome(
            builder
                .clone()
                .buffer_capacity(step)
                .from_reader(Trickle { data: &data, step })
                .map(|r| r.into_records().collect::<Vec<_>>()),
        );

        prop_assert_eq!(&contiguous, &segmented);
        prop_assert_eq!(&contiguous, &trickled);
    }

    #[test]
    fn read_ahead_passes_agree(data in csv_text(), single_newline in any::<bool>()) {
        let dialect = Dialect {
            newline: if single_newline { b"\n".to_vec() } else { b"\r".to_vec() },
            ..Dialect::default()
        };

        let mut accelerated = ReadAheadBuffer::new(&dialect).unwrap();
        let mut tokenized = accelerated.clone();
        tokenized.disable_acceleration();

        prop_assert!(accelerated.is_accelerated());
        prop_assert!(!tokenized.is_accelerated());

        let fast = accelerated.fill(&data, true);
        let slow = tokenized.fill(&data, true);

        prop_assert_eq!(fast.is_ok(), slow.is_ok());

        if fast.is_ok() {
            prop_assert_eq!(accelerated.len(), tokenized.len());

            let mut scratch = Vec::new();

            for (a, b) in accelerated.records(&data).zip(tokenized.records(&data)) {
                prop_assert_eq!(a.line(), b.line());
                prop_assert_eq!(a.position(), b.position());
                prop_assert_eq!(a.as_slice(), b.as_slice());
                prop_assert_eq!(a.len(), b.len());

                for i in 0..a.len() {
                    let left = a.get(i, &mut scratch).map(|f| f.map(<[u8]>::to_vec)).ok();
                    let right = b.get(i, &mut scratch).map(|f| f.map(<[u8]>::to_vec)).ok();
                    prop_assert_eq!(left, right);
                }
            }
        }
    }

    #[test]
    fn unescape_variants_agree(inner in vec(prop::sample::select(b"a\"\\,".to_vec()), 0..24)) {
        let mut fast = Vec::new();
        let mut scalar = Vec::new();

        let a = unescape_quoted(&inner, b'"', &mut fast).map(|_| fast.clone());
        let b = unescape_quoted_scalar(&inner, b'"', &mut scalar).map(|_| scalar.clone());
        prop_assert_eq!(a.ok(), b.ok());

        fast.clear();
        scalar.clear();

        let a = unescape_escaped(&inner, b'\\', &mut fast).map(|_| fast.clone());
        let b = unescape_escaped_scalar(&inner, b'\\', &mut scalar).map(|_| scalar.clone());
        prop_assert_eq!(a.ok(), b.ok());
    }
}

#[test]
fn test_lone_cr_and_crlf_under_auto() -> Result<()> {
    let data = b"a\rb\r\nc\n\rd";
    let records = outcome(
        reader_builder(&Dialect::default())
            .from_slice(data)
            .map(|mut r| r.records().collect::<Vec<_>>()),
    );

    assert_eq!(
        records,
        Ok(vec![
            vec!["a".to_string()],
            vec!["b".to_string()],
            vec!["c".to_string()],
            vec!["d".to_string()],
        ])
    );

    Ok(())
}

#[test]
fn test_errors_hide_content_by_default() {
    let data = b"name\n\"secret,\n";

    let err = ReaderBuilder::<u8>::new()
        .from_slice(data)
        .unwrap()
        .records()
        .find_map(|record| record.err())
        .unwrap();

    assert!(err.is_format_error());
    assert!(!err.to_string().contains("secret"));

    let err = ReaderBuilder::<u8>::new()
        .expose_content(true)
        .from_slice(data)
        .unwrap()
        .records()
        .find_map(|record| record.err())
        .unwrap();

    assert!(err.to_string().contains("secret"));
}
