//! Writes a file of pseudorandom records, for exercising the sort engine in
//! benches, tests, and ad hoc local runs. Not part of the library's public API.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use clap::Parser;
use rand::Rng;

use xsort::record::{encode, Record};

/// Generate a binary record file with pseudorandom keys and payloads.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output file path.
    output: PathBuf,

    /// Number of records to generate.
    #[arg(short = 'n', long, default_value_t = 1_000_000)]
    count: u64,

    /// Minimum payload length in bytes.
    #[arg(long, default_value_t = 8)]
    min_payload: usize,

    /// Maximum payload length in bytes.
    #[arg(long, default_value_t = 128)]
    max_payload: usize,
}

fn main() -> anyhow::Result<()> {
    simple_logger::SimpleLogger::new().init().expect("logger already initialized");
    let cli = Cli::parse();
    assert!(cli.min_payload <= cli.max_payload, "--min-payload must not exceed --max-payload");

    let file = File::create(&cli.output)?;
    let mut writer = BufWriter::new(file);
    let mut rng = rand::thread_rng();

    for _ in 0..cli.count {
        let key: u64 = rng.gen();
        let len = rng.gen_range(cli.min_payload..=cli.max_payload);
        let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        encode(&Record::new(key, payload), &mut writer)?;
    }

    log::info!("gen-records: wrote {} records to {}", cli.count, cli.output.display());
    Ok(())
}
