#![no_main]

use libfuzzer_sys::fuzz_target;

use flux_csv::{ReaderBuilder, WriterBuilder};

fuzz_target!(|data: &[u8]| {
    // A leading BOM is dropped by readers
    if data.starts_with(b"\xef\xbb\xbf") {
        return;
    }

    let mut writer = WriterBuilder::new().flexible(true).from_writer(Vec::new()).unwrap();
    writer.write_record([data]).unwrap();

    let output = writer.into_inner().unwrap();

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .from_slice(&output)
        .unwrap();

    let record = reader.records().next().unwrap().unwrap();
    assert_eq!(record.get(0), Some(data));
});
