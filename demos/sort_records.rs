use std::path::{Path, PathBuf};

use anyhow::Error;
use rand::Rng;

use xsort::config::{MergeStrategy, RunGeneratorStrategy};
use xsort::record::{encode, Record};
use xsort::sort::Sort;

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn write_random_records(path: &Path, count: u64) -> Result<(), Error> {
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    let mut rng = rand::thread_rng();
    for _ in 0..count {
        let key: u64 = rng.gen();
        let len = rng.gen_range(8..128);
        let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        encode(&Record::new(key, payload), &mut writer)?;
    }
    Ok(())
}

fn sort_with_defaults(input_path: &Path, output_path: &Path) -> Result<(), Error> {
    let sort = Sort::new(input_path.to_path_buf(), output_path.to_path_buf());
    sort.sort()?;
    Ok(())
}

fn sort_with_snow_plow_and_kway_merge(input_path: &Path, output_path: &Path) -> Result<(), Error> {
    let mut sort = Sort::new(input_path.to_path_buf(), output_path.to_path_buf());
    sort.with_run_generator(RunGeneratorStrategy::SnowPlow);
    sort.with_merge_strategy(MergeStrategy::KWay);
    sort.sort()?;
    Ok(())
}

fn sort_distributed_across_workers(input_path: &Path, output_path: &Path) -> Result<(), Error> {
    let sort = Sort::new(input_path.to_path_buf(), output_path.to_path_buf());
    sort.sort_distributed(4)?;
    Ok(())
}

// cargo run -r --bin gen-records -- ./target/random-100000.dat -n 100000
// then run this file's logic by hand, or wire it into your own binary.
pub fn main() -> Result<(), Error> {
    let input_path = PathBuf::from("./target/random-100000.dat");
    let defaults_path = PathBuf::from("./target/sorted-defaults.dat");
    let snow_plow_path = PathBuf::from("./target/sorted-snow-plow.dat");
    let distributed_path = PathBuf::from("./target/sorted-distributed.dat");

    std::fs::create_dir_all("./target")?;
    write_random_records(&input_path, 100_000)?;

    sort_with_defaults(&input_path, &defaults_path)?;
    sort_with_snow_plow_and_kway_merge(&input_path, &snow_plow_path)?;
    sort_distributed_across_workers(&input_path, &distributed_path)?;

    Ok(())
}
