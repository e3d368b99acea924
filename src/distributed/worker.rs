//! One worker's side of the distributed protocol: receive a shard of records
//! from the coordinator, sort it locally (spilling to run files under memory
//! pressure, then merging them), and stream the sorted shard back.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;

use crate::config::Config;
use crate::distributed::transport::Transport;
use crate::error::SortError;
use crate::io::append_records;
use crate::merger;
use crate::record::{self, Record};

/// Drive one worker to completion: receive until end-of-stream, sort, and
/// stream the result back through `link`. Returns the number of records the
/// worker received.
pub fn run_worker(link: &impl Transport, config: &Config) -> Result<u64, SortError> {
    let usable = config.memory_budget_bytes() * 9 / 10;
    let mut buffer: Vec<Record> = Vec::new();
    let mut buffer_bytes = 0u64;
    let mut runs: Vec<PathBuf> = Vec::new();
    let mut received = 0u64;

    loop {
        let frame = link.recv_frame()?;
        if frame.is_empty() {
            break;
        }
        let mut cursor = Cursor::new(frame);
        while let Some(record) = record::decode_opt(&mut cursor, config.max_record_len())? {
            buffer_bytes += record.byte_size() as u64;
            buffer.push(record);
            received += 1;
            if buffer_bytes >= usable {
                runs.push(spill(&mut buffer, config)?);
                buffer_bytes = 0;
            }
        }
    }
    if !buffer.is_empty() {
        runs.push(spill(&mut buffer, config)?);
    }

    let shard_path = config.new_shard_path();
    if runs.is_empty() {
        File::create(&shard_path).map_err(|e| SortError::io_at("worker: create empty shard", &shard_path, e))?;
    } else {
        merger::merge(&runs, &shard_path, config.memory_budget_bytes(), config.max_record_len())?;
        for run in &runs {
            let _ = std::fs::remove_file(run);
        }
    }

    stream_shard_back(link, &shard_path, config)?;
    let _ = std::fs::remove_file(&shard_path);
    Ok(received)
}

fn spill(buffer: &mut Vec<Record>, config: &Config) -> Result<PathBuf, SortError> {
    buffer.sort();
    let path = config.new_run_path();
    let mut file = File::create(&path).map_err(|e| SortError::io_at("worker: create run", &path, e))?;
    append_records(&mut file, std::mem::take(buffer))?;
    Ok(path)
}

/// Stream the shard back in chunks that ignore record boundaries: the
/// coordinator treats the shard as an opaque byte run, so there is nothing to
/// align to.
fn stream_shard_back(link: &impl Transport, shard_path: &PathBuf, config: &Config) -> Result<(), SortError> {
    let chunk_bytes = (config.memory_budget_bytes() / config.worker_count().max(1) as u64).max(4096) as usize;
    let mut file = File::open(shard_path).map_err(|e| SortError::io_at("worker: open shard for streaming", shard_path, e))?;
    loop {
        let mut buf = vec![0u8; chunk_bytes];
        let n = file.read(&mut buf).map_err(|e| SortError::io_at("worker: read shard", shard_path, e))?;
        if n == 0 {
            break;
        }
        buf.truncate(n);
        link.send_frame(buf)?;
    }
    link.send_frame(Vec::new())
}
