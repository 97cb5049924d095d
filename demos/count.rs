use std::fs::File;
use std::sync::atomic::{AtomicU64, Ordering};

use clap::Parser;
use csv::{ByteRecord, ReaderBuilder};
use memmap2::Mmap;

#[derive(Parser, Debug)]
struct Args {
    /// Path to target CSV file
    path: String,

    /// Whether to use flux-csv instead of the csv crate
    #[arg(long)]
    flux: bool,

    /// Whether to read a memory map of the file instead of streaming it
    #[arg(long)]
    mmap: bool,

    /// Whether to count records on the rayon thread pool
    #[arg(long)]
    parallel: bool,
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

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if !args.flux {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .delimiter(args.delimiter())
            .from_path(&args.path)?;

        let mut count: u64 = 0;
        let mut record = ByteRecord::new();

        while reader.read_byte_record(&mut record)? {
            count += 1;
        }

        println!("{}", count);
        return Ok(());
    }

    let file = File::open(&args.path)?;
    let mut builder = flux_csv::ReaderBuilder::with_capacity(BUFFER_CAPACITY);
    builder.has_headers(false).delimiter(args.delimiter());

    let count = if args.parallel {
        let fields = AtomicU64::new(0);

        let count = if args.mmap {
            let map = unsafe { Mmap::map(&file)? };
            let mut reader = builder.parallel(flux_csv::SliceSource::new(&map[..]))?;

            reader.for_each(|record, _| {
                fields.fetch_add(record.len() as u64, Ordering::Relaxed);
                Ok(())
            })?
        } else {
            let source = flux_csv::ReaderSource::with_capacity(BUFFER_CAPACITY, file);
            let mut reader = builder.parallel(source)?;

            reader.for_each(|record, _| {
                fields.fetch_add(record.len() as u64, Ordering::Relaxed);
                Ok(())
            })?
        };

        eprintln!("{} fields", fields.load(Ordering::Relaxed));
        count
    } else if args.mmap {
        let map = unsafe { Mmap::map(&file)? };
        let mut reader = builder.from_slice(&map[..])?;
        let mut count: u64 = 0;

        while reader.advance()? {
            count += 1;
        }

        count
    } else {
        let mut reader = builder.from_reader(file)?;
        let mut count: u64 = 0;

        while reader.advance()? {
            count += 1;
        }

        count
    };

    println!("{}", count);

    Ok(())
}
