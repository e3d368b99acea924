//! Bounded reads from a byte-range of the input, and appends to an open output file.
//!
//! Two I/O strategies exist side by side: a buffered read/write loop (the primary
//! path, used everywhere by default) and, behind the `mmap` feature, a
//! memory-mapped window. Both produce byte-identical records.

use std::collections::{BinaryHeap, VecDeque};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::SortError;
use crate::record::{self, Record};

/// A polymorphic destination for decoded records. No caller branches on the
/// concrete sink type beyond choosing which one to construct.
pub trait RecordSink {
    fn push(&mut self, record: Record);
}

impl RecordSink for Vec<Record> {
    fn push(&mut self, record: Record) {
        Vec::push(self, record);
    }
}

impl RecordSink for VecDeque<Record> {
    fn push(&mut self, record: Record) {
        VecDeque::push_back(self, record);
    }
}

/// Min-heap ordered by key: wrap in `Reverse` since [`BinaryHeap`] is a max-heap.
impl RecordSink for BinaryHeap<std::cmp::Reverse<Record>> {
    fn push(&mut self, record: Record) {
        BinaryHeap::push(self, std::cmp::Reverse(record));
    }
}

/// Read records starting at `start_offset` until either the next record would
/// push total consumed bytes past `max_bytes`, or a clean EOF lands on a record
/// boundary. Returns the number of input bytes consumed (always a whole number
/// of records). Never pushes a partially-decoded record into `sink`.
pub fn read_records(
    source: &mut File,
    start_offset: u64,
    max_bytes: u64,
    max_record_len: usize,
    sink: &mut impl RecordSink,
) -> Result<u64, SortError> {
    source
        .seek(SeekFrom::Start(start_offset))
        .map_err(|e| SortError::io("read_records: seek", e))?;
    let mut reader = std::io::BufReader::new(source);
    read_records_buffered(&mut reader, max_bytes, max_record_len, sink)
}

/// Same contract as [`read_records`] but operating on any buffered reader already
/// positioned at the start of the range — used by the merger, which keeps one
/// open reader per input stream rather than reopening the file per refill.
pub fn read_records_buffered(
    reader: &mut impl Read,
    max_bytes: u64,
    max_record_len: usize,
    sink: &mut impl RecordSink,
) -> Result<u64, SortError> {
    let mut consumed: u64 = 0;
    loop {
        let mut peek = [0u8; record::HEADER_SIZE];
        let mut filled = 0usize;
        while filled < peek.len() {
            let n = reader
                .read(&mut peek[filled..])
                .map_err(|e| SortError::io("read_records: read header", e))?;
            if n == 0 {
                if filled == 0 {
                    return Ok(consumed);
                }
                return Err(SortError::Truncated {
                    context: "header".to_string(),
                });
            }
            filled += n;
        }
        let len = u32::from_le_bytes(peek[8..12].try_into().unwrap()) as usize;
        if len > max_record_len {
            return Err(SortError::LengthExceedsBudget {
                declared: len,
                budget: max_record_len,
            });
        }
        let record_size = (record::HEADER_SIZE + len) as u64;
        if consumed + record_size > max_bytes {
            // This record would overrun the budget: it belongs to the next chunk.
            // The header bytes we just peeked are not yet consumed from any
            // container, so simply stop without pushing anything.
            return Ok(consumed);
        }

        let key = u64::from_le_bytes(peek[0..8].try_into().unwrap());
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SortError::Truncated {
                    context: "payload".to_string(),
                }
            } else {
                SortError::io("read_records: read payload", e)
            }
        })?;
        sink.push(Record::new(key, payload));
        consumed += record_size;
    }
}

/// Consumed by value and drained into the destination: sequences in forward
/// order, the min-heap in ascending-key order.
pub trait Drain {
    fn drain_into(self, writer: &mut impl Write) -> Result<u64, SortError>;
}

impl Drain for Vec<Record> {
    fn drain_into(self, writer: &mut impl Write) -> Result<u64, SortError> {
        let mut bytes = 0u64;
        for record in self {
            bytes += record.byte_size() as u64;
            record::encode(&record, writer)?;
        }
        Ok(bytes)
    }
}

impl Drain for VecDeque<Record> {
    fn drain_into(self, writer: &mut impl Write) -> Result<u64, SortError> {
        let mut bytes = 0u64;
        for record in self {
            bytes += record.byte_size() as u64;
            record::encode(&record, writer)?;
        }
        Ok(bytes)
    }
}

impl Drain for BinaryHeap<std::cmp::Reverse<Record>> {
    fn drain_into(mut self, writer: &mut impl Write) -> Result<u64, SortError> {
        let mut bytes = 0u64;
        while let Some(std::cmp::Reverse(record)) = self.pop() {
            bytes += record.byte_size() as u64;
            record::encode(&record, writer)?;
        }
        Ok(bytes)
    }
}

/// Append a drained sequence of records to an already-open file, extending it as
/// needed. Returns the number of bytes written. On failure the destination's
/// length is unspecified; treat the file as poisoned.
pub fn append_records(dest: &mut File, source: impl Drain) -> Result<u64, SortError> {
    let mut writer = std::io::BufWriter::new(dest);
    let written = source.drain_into(&mut writer)?;
    writer
        .flush()
        .map_err(|e| SortError::io("append_records: flush", e))?;
    Ok(written)
}

#[cfg(feature = "mmap")]
pub mod mmap_io {
    //! Opt-in memory-mapped variants of the read and append paths, aligned to the
    //! page containing the start/end-of-file.
    use super::*;
    use memmap2::{MmapMut, MmapOptions};

    fn page_size() -> u64 {
        4096
    }

    /// Read records from a page-aligned mmap window covering `[start_offset,
    /// start_offset + max_bytes]`, skipping into the mapping by the intra-page
    /// offset. Produces identical records to [`super::read_records`].
    pub fn read_records_mmap(
        source: &File,
        start_offset: u64,
        max_bytes: u64,
        max_record_len: usize,
        sink: &mut impl RecordSink,
    ) -> Result<u64, SortError> {
        let file_len = source
            .metadata()
            .map_err(|e| SortError::io("read_records_mmap: metadata", e))?
            .len();
        if start_offset >= file_len {
            return Ok(0);
        }
        let page = page_size();
        let aligned_start = (start_offset / page) * page;
        let intra_offset = (start_offset - aligned_start) as usize;
        let window_len = std::cmp::min(max_bytes + intra_offset as u64, file_len - aligned_start);
        let mmap = unsafe {
            MmapOptions::new()
                .offset(aligned_start)
                .len(window_len as usize)
                .map(source)
                .map_err(|e| SortError::io("read_records_mmap: map", e))?
        };
        let mut cursor = &mmap[intra_offset..];
        read_records_buffered(&mut cursor, max_bytes, max_record_len, sink)
    }

    /// Grow `dest` to fit `source`, map a window aligned to the page containing
    /// the current end-of-file, write contiguously, and flush before unmapping.
    pub fn append_records_mmap(dest: &mut File, source: impl Drain) -> Result<u64, SortError> {
        let mut encoded = Vec::new();
        let written = source.drain_into(&mut encoded)?;

        let current_len = dest
            .metadata()
            .map_err(|e| SortError::io("append_records_mmap: metadata", e))?
            .len();
        let page = page_size();
        let aligned_start = (current_len / page) * page;
        let intra_offset = current_len - aligned_start;
        let new_len = current_len + encoded.len() as u64;
        dest.set_len(new_len)
            .map_err(|e| SortError::io("append_records_mmap: set_len", e))?;

        let map_len = (intra_offset + encoded.len() as u64) as usize;
        let mut mmap = unsafe {
            MmapOptions::new()
                .offset(aligned_start)
                .len(map_len)
                .map_mut(&*dest)
                .map_err(|e| SortError::io("append_records_mmap: map", e))?
        };
        let start = intra_offset as usize;
        mmap[start..start + encoded.len()].copy_from_slice(&encoded);
        mmap.flush()
            .map_err(|e| SortError::io("append_records_mmap: flush", e))?;
        drop(mmap);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Cursor;

    fn sample_bytes() -> Vec<u8> {
        let records = vec![
            Record::new(1, vec![0xAA]),
            Record::new(2, vec![0xBB, 0xCC]),
            Record::new(3, vec![]),
        ];
        let mut buf = Vec::new();
        for r in &records {
            record::encode(r, &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn reads_all_records_when_budget_is_generous() {
        let bytes = sample_bytes();
        let total = bytes.len() as u64;
        let mut cursor = Cursor::new(bytes);
        let mut sink: Vec<Record> = Vec::new();
        let consumed = read_records_buffered(&mut cursor, total, 1024, &mut sink).unwrap();
        assert_eq!(consumed, total);
        assert_eq!(sink.len(), 3);
        assert_eq!(sink[0].key(), 1);
        assert_eq!(sink[2].payload(), &[] as &[u8]);
    }

    #[test]
    fn stops_before_overrunning_the_byte_budget() {
        let bytes = sample_bytes();
        let mut cursor = Cursor::new(bytes.clone());
        let mut sink: Vec<Record> = Vec::new();
        let first_record_size = (record::HEADER_SIZE + 1) as u64;
        let consumed = read_records_buffered(&mut cursor, first_record_size, 1024, &mut sink).unwrap();
        assert_eq!(consumed, first_record_size);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn never_pushes_a_torn_record() {
        let mut bytes = sample_bytes();
        bytes.truncate(bytes.len() - 1);
        let total = bytes.len() as u64;
        let mut cursor = Cursor::new(bytes);
        let mut sink: Vec<Record> = Vec::new();
        let err = read_records_buffered(&mut cursor, total + 100, 1024, &mut sink).unwrap_err();
        assert!(matches!(err, SortError::Truncated { .. }));
        assert_eq!(sink.len(), 2, "the two complete records were pushed, the torn one was not");
    }

    #[test]
    fn heap_sink_drains_in_ascending_key_order() {
        let mut heap: BinaryHeap<std::cmp::Reverse<Record>> = BinaryHeap::new();
        heap.push(std::cmp::Reverse(Record::new(5, vec![])));
        heap.push(std::cmp::Reverse(Record::new(1, vec![])));
        heap.push(std::cmp::Reverse(Record::new(3, vec![])));
        let mut out = Vec::new();
        heap.drain_into(&mut out).unwrap();
        let mut cursor = Cursor::new(out);
        let a = record::decode(&mut cursor, 1024).unwrap();
        let b = record::decode(&mut cursor, 1024).unwrap();
        let c = record::decode(&mut cursor, 1024).unwrap();
        assert_eq!((a.key(), b.key(), c.key()), (1, 3, 5));
    }

    #[test]
    fn deque_sink_preserves_push_order() {
        let mut deque: VecDeque<Record> = VecDeque::new();
        deque.push(Record::new(9, vec![]));
        deque.push(Record::new(4, vec![]));
        let mut out = Vec::new();
        deque.drain_into(&mut out).unwrap();
        let mut cursor = Cursor::new(out);
        let a = record::decode(&mut cursor, 1024).unwrap();
        let b = record::decode(&mut cursor, 1024).unwrap();
        assert_eq!((a.key(), b.key()), (9, 4));
    }
}

#[cfg(all(test, feature = "mmap"))]
mod mmap_equivalence_tests {
    use super::mmap_io::{append_records_mmap, read_records_mmap};
    use super::*;
    use tempfile::TempDir;

    fn sample_records() -> Vec<Record> {
        (0..250u64).map(|k| Record::new(k, vec![(k % 251) as u8; (k % 37) as usize])).collect()
    }

    /// `Record`'s `PartialEq` compares only the key, which isn't enough here:
    /// the whole point is to prove the payload bytes match too.
    fn key_and_payload(records: &[Record]) -> Vec<(u64, &[u8])> {
        records.iter().map(|r| (r.key(), r.payload())).collect()
    }

    #[test]
    fn mmap_and_buffered_reads_see_the_same_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.dat");
        let records = sample_records();
        {
            let mut file = File::create(&path).unwrap();
            for r in &records {
                record::encode(r, &mut file).unwrap();
            }
        }
        let total = path.metadata().unwrap().len();

        let mut buffered_file = File::open(&path).unwrap();
        let mut buffered_sink: Vec<Record> = Vec::new();
        read_records(&mut buffered_file, 0, total, 1 << 16, &mut buffered_sink).unwrap();

        let mmap_file = File::open(&path).unwrap();
        let mut mmap_sink: Vec<Record> = Vec::new();
        read_records_mmap(&mmap_file, 0, total, 1 << 16, &mut mmap_sink).unwrap();

        assert_eq!(buffered_sink.len(), records.len());
        assert_eq!(key_and_payload(&buffered_sink), key_and_payload(&mmap_sink));
    }

    #[test]
    fn mmap_and_buffered_appends_produce_identical_files() {
        let dir = TempDir::new().unwrap();
        let records = sample_records();

        let buffered_path = dir.path().join("buffered.dat");
        let mut buffered_file = File::create(&buffered_path).unwrap();
        append_records(&mut buffered_file, records.clone()).unwrap();

        let mmap_path = dir.path().join("mmap.dat");
        let mut mmap_file = File::create(&mmap_path).unwrap();
        append_records_mmap(&mut mmap_file, records).unwrap();

        assert_eq!(std::fs::read(&buffered_path).unwrap(), std::fs::read(&mmap_path).unwrap());
    }

    #[test]
    fn mmap_read_honors_a_mid_file_offset_and_budget() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.dat");
        let records = sample_records();
        let mut offsets = Vec::with_capacity(records.len());
        {
            let mut file = File::create(&path).unwrap();
            let mut at = 0u64;
            for r in &records {
                offsets.push(at);
                record::encode(r, &mut file).unwrap();
                at += r.byte_size() as u64;
            }
        }
        let total = path.metadata().unwrap().len();

        // Start partway through the file, at a record boundary that does not
        // fall on a page boundary, and read only a modest budget.
        let start = offsets[100];
        let end = offsets[150];

        let mut buffered_file = File::open(&path).unwrap();
        let mut buffered_sink: Vec<Record> = Vec::new();
        read_records(&mut buffered_file, start, end - start, 1 << 16, &mut buffered_sink).unwrap();

        let mmap_file = File::open(&path).unwrap();
        let mut mmap_sink: Vec<Record> = Vec::new();
        read_records_mmap(&mmap_file, start, end - start, 1 << 16, &mut mmap_sink).unwrap();

        assert_eq!(key_and_payload(&buffered_sink), key_and_payload(&mmap_sink));
        assert_eq!(buffered_sink.len(), 50);
    }
}
