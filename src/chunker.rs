//! Splits an input file into record-aligned byte ranges for parallel run generation.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::SortError;
use crate::record;

/// A `[start, end)` byte range, aligned to record boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Walk `path` at record granularity, accumulating bytes into the current chunk
/// until it reaches `ceil(file_size / target_chunks)`, then starting a new one.
/// The union of returned ranges exactly covers `[0, file_size)` with no overlap,
/// and every boundary lands immediately after a complete record.
///
/// `target_chunks` must be at least 1. `max_record_len` bounds any single record
/// accepted while walking (fails with `LengthExceedsBudget` otherwise, mirroring
/// the run generator's own guard).
pub fn chunk(
    path: &Path,
    target_chunks: usize,
    max_record_len: usize,
) -> Result<Vec<ChunkRange>, SortError> {
    assert!(target_chunks >= 1, "target_chunks must be at least 1");

    let file = File::open(path).map_err(|e| SortError::io_at("chunk: open", path, e))?;
    let file_size = file
        .metadata()
        .map_err(|e| SortError::io_at("chunk: metadata", path, e))?
        .len();

    if file_size == 0 {
        return Ok(Vec::new());
    }

    let target_chunks = target_chunks as u64;
    let target_chunk_bytes = ((file_size + target_chunks - 1) / target_chunks).max(1);

    let mut reader = BufReader::new(file);
    let mut ranges = Vec::new();
    let mut chunk_start = 0u64;
    let mut pos = 0u64;
    let mut chunk_bytes = 0u64;

    loop {
        let record_start = pos;
        match record::decode_opt(&mut reader, max_record_len)? {
            None => break,
            Some(record) => {
                let size = record.byte_size() as u64;
                pos = record_start + size;
                chunk_bytes += size;
                if chunk_bytes >= target_chunk_bytes {
                    ranges.push(ChunkRange {
                        start: chunk_start,
                        end: pos,
                    });
                    chunk_start = pos;
                    chunk_bytes = 0;
                }
            }
        }
    }

    if chunk_start != pos {
        ranges.push(ChunkRange {
            start: chunk_start,
            end: pos,
        });
    }

    if pos != file_size {
        return Err(SortError::Truncated {
            context: format!(
                "file {}: walked {} of {} bytes",
                path.display(),
                pos,
                file_size
            ),
        });
    }

    Ok(ranges)
}
