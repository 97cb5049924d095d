use std::fs::File;

use clap::Parser;

#[derive(Parser, Debug)]
struct Args {
    /// Path to target CSV file
    path: String,

    /// Whether to read the file with flux-csv instead of the csv crate
    #[arg(long)]
    flux: bool,
}

impl Args {
    fn delimiter(&self) -> u8 {
        if self.path.ends_with(".tsv") {
            b'\t'
        } else {
            b','
        }
    }
}

const BUFFER_CAPACITY: usize = 1024 * (1 << 10);

/// Writes every record back with the csv crate, so that outputs of both
/// readers can be diffed.
fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let file = File::open(&args.path)?;
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(std::io::stdout());

    if args.flux {
        let mut reader = flux_csv::ReaderBuilder::with_capacity(BUFFER_CAPACITY)
            .delimiter(args.delimiter())
            .has_headers(false)
            .flexible(true)
            .from_reader(file)?;

        while let Some(mut record) = reader.read_record()? {
            writer.write_record(record.fields()?.iter())?;
        }
    } else {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(args.delimiter())
            .has_headers(false)
            .flexible(true)
            .from_reader(file);
        let mut record = csv::ByteRecord::new();

        while reader.read_byte_record(&mut record)? {
            writer.write_record(record.iter())?;
        }
    }

    writer.flush()?;

    Ok(())
}
