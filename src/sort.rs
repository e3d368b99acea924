use std::path::PathBuf;

use crate::config::{Config, MergeStrategy, RunGeneratorStrategy};
use crate::distributed;
use crate::error::SortError;
use crate::orchestrator;

/// Sort a binary record file keyed by an unsigned 64-bit integer.
///
/// # Examples
/// ```no_run
/// use std::path::PathBuf;
/// use xsort::sort::Sort;
///
/// fn sort_records(input: PathBuf, output: PathBuf, tmp: PathBuf) -> Result<(), xsort::error::SortError> {
///     let mut sort = Sort::new(input, output);
///     // set number of worker threads the sort will attempt to use. When given the number that
///     // exceeds the number of available CPU cores the work will be split among available cores
///     // with somewhat degraded performance. The default is to use all available cores.
///     sort.with_tasks(2);
///     // set the directory for intermediate results. The default is the system temp dir -
///     // std::env::temp_dir(), however, for large files it is recommended to provide a dedicated
///     // directory for intermediate files, preferably on the same file system as the output result.
///     sort.with_tmp_dir(tmp);
///     sort.sort()
/// }
/// ```
pub struct Sort {
    input: PathBuf,
    output: PathBuf,
    tmp: PathBuf,
    tasks: usize,
    memory_budget_bytes: u64,
    merge_strategy: MergeStrategy,
    run_generator: RunGeneratorStrategy,
}

impl Sort {
    /// Create a default sort definition.
    ///
    /// The default temp directory is `std::env::temp_dir()`, the default task
    /// count is zero (meaning "use all available cores"), the default memory
    /// budget is 256 MiB, the default merge strategy is [`MergeStrategy::KWay`],
    /// and the default run generator is [`RunGeneratorStrategy::ChunkedSort`].
    pub fn new(input: PathBuf, output: PathBuf) -> Sort {
        Sort {
            input,
            output,
            tmp: std::env::temp_dir(),
            tasks: 0,
            memory_budget_bytes: 256 << 20,
            merge_strategy: MergeStrategy::KWay,
            run_generator: RunGeneratorStrategy::ChunkedSort,
        }
    }

    /// Set directory for intermediate files. By default uses `std::env::temp_dir()`.
    /// It is recommended for large files to create a dedicated directory for
    /// intermediate files on the same file system as the output target.
    pub fn with_tmp_dir(&mut self, tmp: PathBuf) {
        self.tmp = tmp;
    }

    /// Set the number of worker tasks. The default is zero, which uses all
    /// available cores.
    pub fn with_tasks(&mut self, tasks: usize) {
        self.tasks = tasks;
    }

    /// Set the memory budget, in bytes, governing run generation and merge
    /// buffering. Must be at least 1 MiB.
    pub fn with_memory_budget(&mut self, memory_budget_bytes: u64) {
        self.memory_budget_bytes = memory_budget_bytes;
    }

    /// Set how the local orchestrator composes its final merge.
    pub fn with_merge_strategy(&mut self, merge_strategy: MergeStrategy) {
        self.merge_strategy = merge_strategy;
    }

    /// Set which run-generation technique produces sorted runs.
    pub fn with_run_generator(&mut self, run_generator: RunGeneratorStrategy) {
        self.run_generator = run_generator;
    }

    /// Sort the input file into the output path, using a local thread pool.
    pub fn sort(&self) -> Result<(), SortError> {
        let tasks = if self.tasks == 0 { num_cpus::get() } else { self.tasks };
        let config = Config::new(self.tmp.clone(), tasks, self.memory_budget_bytes, self.merge_strategy, self.run_generator)?;
        orchestrator::sort(&self.input, &self.output, &config)
    }

    /// Sort the input file using `worker_count` in-process distributed
    /// workers rather than a local thread pool. Each worker runs on its own
    /// OS thread and communicates with the coordinator over an in-process
    /// channel transport; see [`crate::distributed`].
    pub fn sort_distributed(&self, worker_count: usize) -> Result<(), SortError> {
        assert!(worker_count >= 1, "distributed sort needs at least one worker");
        let config = Config::new(self.tmp.clone(), worker_count, self.memory_budget_bytes, self.merge_strategy, self.run_generator)?;

        let mut coordinator_links = Vec::with_capacity(worker_count);
        let mut worker_handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let (coordinator_end, worker_end) = distributed::channel_pair();
            coordinator_links.push(coordinator_end);
            let worker_config = config.clone();
            worker_handles.push(std::thread::spawn(move || distributed::run_worker(&worker_end, &worker_config)));
        }

        let coordinator_result = distributed::run_coordinator(&self.input, &self.output, &config, coordinator_links);

        let mut first_worker_error = None;
        for handle in worker_handles {
            match handle.join() {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => first_worker_error.get_or_insert(e),
                Err(_) => first_worker_error.get_or_insert(SortError::InvariantViolation("a worker thread panicked".to_string())),
            };
        }

        coordinator_result?;
        if let Some(e) = first_worker_error {
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{decode_opt, encode, Record};
    use std::fs::File;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn write_input(dir: &TempDir, keys: &[u64]) -> PathBuf {
        let path = dir.path().join("input.dat");
        let mut file = File::create(&path).unwrap();
        for &k in keys {
            encode(&Record::new(k, vec![0u8; 8]), &mut file).unwrap();
        }
        file.flush().unwrap();
        path
    }

    fn read_keys(path: &std::path::Path) -> Vec<u64> {
        let mut file = File::open(path).unwrap();
        let mut keys = Vec::new();
        while let Some(r) = decode_opt(&mut file, 1 << 20).unwrap() {
            keys.push(r.key());
        }
        keys
    }

    #[test]
    fn builder_sorts_locally_with_defaults_overridden() {
        let dir = TempDir::new().unwrap();
        let keys: Vec<u64> = (0..1000u64).rev().collect();
        let input = write_input(&dir, &keys);
        let output = dir.path().join("out");

        let mut sort = Sort::new(input, output.clone());
        sort.with_tasks(2);
        sort.with_tmp_dir(dir.path().to_path_buf());
        sort.with_memory_budget(1 << 20);
        sort.sort().unwrap();

        let mut expected = keys;
        expected.sort();
        assert_eq!(read_keys(&output), expected);
    }

    #[test]
    fn builder_sorts_via_the_distributed_path() {
        let dir = TempDir::new().unwrap();
        let keys: Vec<u64> = (0..600u64).rev().collect();
        let input = write_input(&dir, &keys);
        let output = dir.path().join("out");

        let mut sort = Sort::new(input, output.clone());
        sort.with_tmp_dir(dir.path().to_path_buf());
        sort.with_memory_budget(1 << 20);
        sort.sort_distributed(3).unwrap();

        let mut expected = keys;
        expected.sort();
        assert_eq!(read_keys(&output), expected);
    }
}
