use std::fs::File;

use clap::Parser;

#[derive(Parser, Debug)]
struct Args {
    /// Path to target CSV file
    path: String,

    /// Escape token, switching both reader and writer to escape mode
    #[arg(long)]
    escape: Option<char>,
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

const DEFAULT_CAPACITY: usize = 1024 * (1 << 10);

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let escape = args.escape.map(|c| c as u8);

    let mut reader = flux_csv::ReaderBuilder::with_capacity(DEFAULT_CAPACITY)
        .delimiter(args.delimiter())
        .escape(escape)
        .has_headers(false)
        .flexible(true)
        .from_reader(File::open(&args.path)?)?;

    let mut writer = flux_csv::WriterBuilder::new()
        .dialect(reader.dialect().clone())
        .buffer_capacity(DEFAULT_CAPACITY)
        .flexible(true)
        .from_writer(std::io::stdout())?;

    while let Some(mut record) = reader.read_record()? {
        writer.write_record(record.fields()?.iter())?;
    }

    writer.flush()?;

    Ok(())
}
