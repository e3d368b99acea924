//! Command-line entry point: parse the engine's flags, build a [`Config`]-backed
//! [`Sort`], and run it to completion.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::error;

use xsort::config::{MergeStrategy, RunGeneratorStrategy};
use xsort::sort::Sort;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RunGeneratorArg {
    ChunkedSort,
    SnowPlow,
}

impl fmt::Display for RunGeneratorArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunGeneratorArg::ChunkedSort => write!(f, "chunked-sort"),
            RunGeneratorArg::SnowPlow => write!(f, "snow-plow"),
        }
    }
}

impl From<RunGeneratorArg> for RunGeneratorStrategy {
    fn from(arg: RunGeneratorArg) -> RunGeneratorStrategy {
        match arg {
            RunGeneratorArg::ChunkedSort => RunGeneratorStrategy::ChunkedSort,
            RunGeneratorArg::SnowPlow => RunGeneratorStrategy::SnowPlow,
        }
    }
}

/// Sort a binary record file keyed by an unsigned 64-bit integer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input file path.
    input: PathBuf,

    /// Output file path.
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// Worker count. Defaults to the host's logical-core count.
    #[arg(short = 't', long, default_value_t = 0)]
    tasks: usize,

    /// Memory budget in bytes.
    #[arg(short = 'm', long, default_value_t = 8 << 30)]
    memory: u64,

    /// Prefer a single k-way merge over the multi-level binary merge.
    #[arg(short = 'k', long, default_value_t = false)]
    kway: bool,

    /// Temporary directory for intermediate files.
    #[arg(short = 'p', long, default_value = "/tmp")]
    tmp_dir: PathBuf,

    /// Which run-generation technique produces sorted runs.
    #[arg(long, value_enum, default_value_t = RunGeneratorArg::ChunkedSort)]
    run_generator: RunGeneratorArg,
}

fn run(cli: &Cli) -> Result<(), xsort::error::SortError> {
    let mut sort = Sort::new(cli.input.clone(), cli.output.clone());
    sort.with_tasks(cli.tasks);
    sort.with_memory_budget(cli.memory);
    sort.with_tmp_dir(cli.tmp_dir.clone());
    sort.with_merge_strategy(if cli.kway { MergeStrategy::KWay } else { MergeStrategy::Binary });
    sort.with_run_generator(cli.run_generator.into());
    sort.sort()
}

fn main() -> ExitCode {
    simple_logger::SimpleLogger::new().init().expect("logger already initialized");
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("xsort: {e}");
            ExitCode::FAILURE
        }
    }
}
