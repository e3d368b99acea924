//! External merge sort for binary record files keyed by an unsigned 64-bit
//! integer.
//!
//! A record file is a flat sequence of fixed-header, variable-payload records
//! (see [`record`]) with no delimiters between them. This crate sorts such a
//! file by record key, using bounded memory regardless of file size: records
//! are read in chunks, sorted into runs on disk, and merged back together in
//! passes whose working set stays within a configured budget.
//!
//! Two deployment shapes are provided: a local sort that fans run generation
//! and merging out across a thread pool on one machine ([`sort::Sort::sort`]),
//! and a distributed sort that shards records across independent workers
//! communicating over a narrow transport abstraction
//! ([`sort::Sort::sort_distributed`], see [`distributed`]).
//!
//! # Examples
//! ```no_run
//! use std::path::PathBuf;
//! use xsort::sort::Sort;
//!
//! // optimized for use with Jemalloc
//! use tikv_jemallocator::Jemalloc;
//! #[global_allocator]
//! static GLOBAL: Jemalloc = Jemalloc;
//!
//! fn sort_records(input: PathBuf, output: PathBuf, tmp: PathBuf) -> Result<(), xsort::error::SortError> {
//!     let mut sort = Sort::new(input, output);
//!     sort.with_tasks(2);
//!     sort.with_tmp_dir(tmp);
//!     sort.sort()
//! }
//! ```

pub(crate) mod arena;
pub(crate) mod chunker;
pub(crate) mod merger;
pub(crate) mod orchestrator;
pub(crate) mod run_generator;

pub mod config;
pub mod distributed;
pub mod error;
pub mod io;
pub mod record;
pub mod sort;
