//! The coordinator's side of the distributed protocol: read the input once,
//! shard it round-robin across workers, then concurrently drain each
//! worker's sorted-shard stream to disk and merge the shards into the final
//! output.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::thread;

use crate::config::Config;
use crate::distributed::transport::Transport;
use crate::error::SortError;
use crate::merger;
use crate::record;

/// Run the coordinator side to completion. `links[i]` is the bidirectional
/// link to worker `i`; every worker must already be draining its end (see
/// [`crate::distributed::worker::run_worker`]) or sends below will pile up
/// unread in the channel rather than deadlock, since the in-process transport
/// is unbounded.
pub fn run_coordinator<T>(input_path: &Path, output_path: &Path, config: &Config, links: Vec<T>) -> Result<(), SortError>
where
    T: Transport + Send + 'static,
{
    let worker_count = links.len();
    assert!(worker_count >= 1, "distributed sort needs at least one worker");

    distribute_input(input_path, config, &links, worker_count)?;

    let shard_paths = receive_shards(config, links)?;

    let staged = config.new_merge_path();
    merger::merge(&shard_paths, &staged, config.memory_budget_bytes(), config.max_record_len())?;
    for path in &shard_paths {
        let _ = std::fs::remove_file(path);
    }
    std::fs::rename(&staged, output_path)
        .map_err(|e| SortError::io_at("coordinator: rename final output into place", output_path, e))?;
    Ok(())
}

fn distribute_input<T: Transport>(
    input_path: &Path,
    config: &Config,
    links: &[T],
    worker_count: usize,
) -> Result<(), SortError> {
    let file = File::open(input_path).map_err(|e| SortError::io_at("coordinator: open input", input_path, e))?;
    let mut reader = BufReader::new(file);
    let flush_threshold = (config.memory_budget_bytes() / 4).max(1);

    let mut buffers: Vec<Vec<u8>> = (0..worker_count).map(|_| Vec::new()).collect();
    let mut ordinal: u64 = 0;

    while let Some(rec) = record::decode_opt(&mut reader, config.max_record_len())? {
        let worker = (ordinal % worker_count as u64) as usize;
        ordinal += 1;
        record::encode(&rec, &mut buffers[worker])?;
        if buffers[worker].len() as u64 >= flush_threshold {
            links[worker].send_frame(std::mem::take(&mut buffers[worker]))?;
        }
    }

    for (worker, buffer) in buffers.into_iter().enumerate() {
        if !buffer.is_empty() {
            links[worker].send_frame(buffer)?;
        }
        links[worker].send_frame(Vec::new())?;
    }

    Ok(())
}

fn receive_shards<T>(config: &Config, links: Vec<T>) -> Result<Vec<PathBuf>, SortError>
where
    T: Transport + Send + 'static,
{
    let handles: Vec<_> = links
        .into_iter()
        .map(|link| {
            let shard_path = config.new_shard_path();
            thread::spawn(move || -> Result<PathBuf, SortError> {
                let mut file =
                    File::create(&shard_path).map_err(|e| SortError::io_at("coordinator: create shard", &shard_path, e))?;
                loop {
                    let frame = link.recv_frame()?;
                    if frame.is_empty() {
                        break;
                    }
                    file.write_all(&frame)
                        .map_err(|e| SortError::io_at("coordinator: write shard", &shard_path, e))?;
                }
                Ok(shard_path)
            })
        })
        .collect();

    let mut shard_paths = Vec::with_capacity(handles.len());
    for handle in handles {
        let shard_path = handle
            .join()
            .map_err(|_| SortError::InvariantViolation("a shard-receiving thread panicked".to_string()))??;
        shard_paths.push(shard_path);
    }
    Ok(shard_paths)
}
