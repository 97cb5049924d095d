#![no_main]

use libfuzzer_sys::fuzz_target;

use flux_csv::{Dialect, ReadAheadBuffer};

fn index(buffer: &mut ReadAheadBuffer<u8>, data: &[u8]) -> Option<Vec<(u64, Vec<u8>)>> {
    buffer.fill(data, true).ok()?;

    Some(
        buffer
            .records(data)
            .map(|record| (record.line(), record.as_slice().to_vec()))
            .collect(),
    )
}

fuzz_target!(|data: &[u8]| {
    let dialect = Dialect {
        newline: b"\n".to_vec(),
        ..Dialect::default()
    };

    let mut accelerated = ReadAheadBuffer::new(&dialect).unwrap();
    let mut tokenized = ReadAheadBuffer::new(&dialect).unwrap();
    tokenized.disable_acceleration();

    assert_eq!(index(&mut accelerated, data), index(&mut tokenized, data));
});
