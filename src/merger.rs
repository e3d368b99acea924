//! K-way merge of already-sorted run files into one sorted output.
//!
//! Memory is partitioned once: a third for the output buffer, the rest split
//! evenly across input streams (floored at one page per stream). Each stream
//! keeps a small in-memory queue refilled from its file as it drains; a
//! min-heap over the queues' fronts picks the next record to emit. Ties
//! between equal keys break on stream index, ascending, so the merge is
//! deterministic regardless of heap internals.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::SortError;
use crate::io::read_records_buffered;
use crate::record::Record;

const PAGE_BYTES: u64 = 4096;

/// One input run: an open buffered reader plus a small refillable queue of the
/// records already pulled from it.
struct Stream {
    reader: BufReader<File>,
    queue: VecDeque<Record>,
    exhausted: bool,
    refill_budget: u64,
}

impl Stream {
    fn open(path: &Path, refill_budget: u64) -> Result<Stream, SortError> {
        let file = File::open(path).map_err(|e| SortError::io_at("merger: open stream", path, e))?;
        Ok(Stream {
            reader: BufReader::new(file),
            queue: VecDeque::new(),
            exhausted: false,
            refill_budget,
        })
    }

    fn refill(&mut self, max_record_len: usize) -> Result<(), SortError> {
        if self.exhausted || !self.queue.is_empty() {
            return Ok(());
        }
        let consumed = read_records_buffered(&mut self.reader, self.refill_budget, max_record_len, &mut self.queue)?;
        if consumed == 0 {
            self.exhausted = true;
        }
        Ok(())
    }

    fn front(&self) -> Option<&Record> {
        self.queue.front()
    }
}

/// `(record, stream_index)` ordered so that [`BinaryHeap`] wrapped in
/// [`Reverse`] yields the smallest key first, breaking ties by ascending
/// stream index.
struct HeapEntry {
    record: Record,
    stream_index: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.record.key() == other.record.key() && self.stream_index == other.stream_index
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.record
            .key()
            .cmp(&other.record.key())
            .then(self.stream_index.cmp(&other.stream_index))
    }
}

/// Merge `inputs` (each already sorted ascending by key) into `output_path`,
/// overwriting it. `memory_budget_bytes` bounds total buffering; the streams
/// share two thirds of it evenly, floored at one page each.
pub fn merge(
    inputs: &[PathBuf],
    output_path: &Path,
    memory_budget_bytes: u64,
    max_record_len: usize,
) -> Result<u64, SortError> {
    if inputs.is_empty() {
        File::create(output_path).map_err(|e| SortError::io_at("merge: create empty output", output_path, e))?;
        return Ok(0);
    }

    let output_budget = memory_budget_bytes / 3;
    let stream_budget_total = memory_budget_bytes - output_budget;
    let per_stream_budget = (stream_budget_total / inputs.len() as u64).max(PAGE_BYTES);

    let mut streams: Vec<Stream> = inputs
        .iter()
        .map(|path| Stream::open(path, per_stream_budget))
        .collect::<Result<_, _>>()?;

    for stream in &mut streams {
        stream.refill(max_record_len)?;
    }

    let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::new();
    for (index, stream) in streams.iter().enumerate() {
        if let Some(record) = stream.front() {
            heap.push(Reverse(HeapEntry {
                record: record.clone(),
                stream_index: index,
            }));
        }
    }

    let output_file =
        File::create(output_path).map_err(|e| SortError::io_at("merge: create output", output_path, e))?;
    let mut writer = BufWriter::with_capacity(output_budget.max(PAGE_BYTES) as usize, output_file);
    let mut total_written = 0u64;
    let mut last_key: Option<u64> = None;

    while let Some(Reverse(entry)) = heap.pop() {
        let stream = &mut streams[entry.stream_index];
        let popped = stream
            .queue
            .pop_front()
            .expect("heap entry implies a record at the front of its stream's queue");

        if let Some(previous) = last_key {
            if popped.key() < previous {
                return Err(SortError::InvariantViolation(format!(
                    "merge produced a non-monotonic sequence: {} after {}",
                    popped.key(),
                    previous
                )));
            }
        }
        last_key = Some(popped.key());

        crate::record::encode(&popped, &mut writer)?;
        total_written += popped.byte_size() as u64;

        stream.refill(max_record_len)?;
        if let Some(next) = stream.front() {
            heap.push(Reverse(HeapEntry {
                record: next.clone(),
                stream_index: entry.stream_index,
            }));
        }
    }

    writer.flush().map_err(|e| SortError::io_at("merge: flush", output_path, e))?;
    Ok(total_written)
}
