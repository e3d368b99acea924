use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use xsort::record::{decode_opt, encode, Record};

/// Write `records` to a fresh file named `name` under `dir`, in on-disk record encoding.
#[allow(dead_code)]
pub fn write_records(dir: &Path, name: &str, records: &[Record]) -> PathBuf {
    let path = dir.join(name);
    let mut file = File::create(&path).unwrap();
    for record in records {
        encode(record, &mut file).unwrap();
    }
    file.flush().unwrap();
    path
}

/// Read every record from `path` in on-disk order.
#[allow(dead_code)]
pub fn read_records(path: &Path) -> Vec<Record> {
    let mut file = File::open(path).unwrap();
    let mut out = Vec::new();
    while let Some(record) = decode_opt(&mut file, 1 << 30).unwrap() {
        out.push(record);
    }
    out
}

#[allow(dead_code)]
pub fn read_keys(path: &Path) -> Vec<u64> {
    read_records(path).iter().map(Record::key).collect()
}

/// Intermediate-file names left over in `dir` matching either known prefix.
#[allow(dead_code)]
pub fn leftover_intermediate_files(dir: &TempDir, run_prefix: &str, merge_prefix: &str) -> Vec<String> {
    std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with(run_prefix) || n.starts_with(merge_prefix))
        .collect()
}
