#![no_main]

use libfuzzer_sys::fuzz_target;

use flux_csv::ReaderBuilder;

fuzz_target!(|data: &[u8]| {
    for escape in [None, Some(b'\\')] {
        let mut reader = ReaderBuilder::new()
            .escape(escape)
            .has_headers(false)
            .flexible(true)
            .buffer_capacity(16)
            .from_reader(data)
            .unwrap();

        // Format errors are expected, panics are not
        while let Ok(Some(mut record)) = reader.read_record() {
            let _ = record.to_owned_record();
        }
    }
});
