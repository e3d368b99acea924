//! Explicit configuration, constructed once and threaded through every
//! component, rather than global mutables set up through argument parsing.

use std::path::PathBuf;

use crate::error::SortError;

/// Which run-generation technique [`crate::run_generator`] uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunGeneratorStrategy {
    /// Read memory-sized chunks, sort in place, write one run per chunk.
    ChunkedSort,
    /// Replacement selection / snow plow: runs average twice the heap size.
    SnowPlow,
}

/// How the local orchestrator composes the final merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Always perform one k-way merge across the whole pool.
    KWay,
    /// Multi-level: merge in `worker_count` groups, then merge the groups.
    Binary,
}

#[derive(Clone, Debug)]
pub struct Config {
    tmp: PathBuf,
    run_prefix: String,
    merge_prefix: String,
    shard_prefix: String,
    worker_count: usize,
    queue_size: usize,
    memory_budget_bytes: u64,
    merge_strategy: MergeStrategy,
    run_generator: RunGeneratorStrategy,
    max_record_len: usize,
}

impl Config {
    pub fn new(
        tmp: PathBuf,
        worker_count: usize,
        memory_budget_bytes: u64,
        merge_strategy: MergeStrategy,
        run_generator: RunGeneratorStrategy,
    ) -> Result<Config, SortError> {
        if worker_count == 0 {
            return Err(SortError::ConfigError("worker_count must be positive".to_string()));
        }
        const MIN_MEMORY_BUDGET: u64 = 1 << 20; // 1 MiB
        if memory_budget_bytes < MIN_MEMORY_BUDGET {
            return Err(SortError::ConfigError(format!(
                "memory_budget_bytes must be at least {MIN_MEMORY_BUDGET}, got {memory_budget_bytes}"
            )));
        }
        if !tmp.is_dir() {
            return Err(SortError::ConfigError(format!(
                "tmp_dir {} does not exist or is not a directory",
                tmp.display()
            )));
        }

        // A record whose header claims to exceed the whole memory budget is
        // fatal: this is the budget the codec enforces while reading any
        // single range.
        let max_record_len = memory_budget_bytes as usize;

        Ok(Config {
            tmp,
            run_prefix: "run#".to_string(),
            merge_prefix: "merge#".to_string(),
            shard_prefix: "shard#".to_string(),
            worker_count,
            queue_size: 4096,
            memory_budget_bytes,
            merge_strategy,
            run_generator,
            max_record_len,
        })
    }

    pub fn tmp(&self) -> &PathBuf {
        &self.tmp
    }

    pub fn run_prefix(&self) -> &str {
        &self.run_prefix
    }

    pub fn merge_prefix(&self) -> &str {
        &self.merge_prefix
    }

    pub fn shard_prefix(&self) -> &str {
        &self.shard_prefix
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub fn memory_budget_bytes(&self) -> u64 {
        self.memory_budget_bytes
    }

    pub fn merge_strategy(&self) -> MergeStrategy {
        self.merge_strategy
    }

    pub fn run_generator(&self) -> RunGeneratorStrategy {
        self.run_generator
    }

    pub fn max_record_len(&self) -> usize {
        self.max_record_len
    }

    /// A fresh path under the temp dir named `run#<uuid>`.
    pub fn new_run_path(&self) -> PathBuf {
        self.tmp.join(format!("{}{}", self.run_prefix, random_suffix()))
    }

    /// A fresh path under the temp dir named `merge#<uuid>`.
    pub fn new_merge_path(&self) -> PathBuf {
        self.tmp.join(format!("{}{}", self.merge_prefix, random_suffix()))
    }

    /// A fresh path under the temp dir named `shard#<uuid>`, for per-worker
    /// shard files received or staged by the distributed orchestrator.
    pub fn new_shard_path(&self) -> PathBuf {
        self.tmp.join(format!("{}{}", self.shard_prefix, random_suffix()))
    }
}

/// Hex-encoded random suffix for intermediate file names.
fn random_suffix() -> String {
    data_encoding::HEXLOWER.encode(&rand::random::<[u8; 16]>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_workers() {
        let err = Config::new(
            std::env::temp_dir(),
            0,
            1 << 20,
            MergeStrategy::KWay,
            RunGeneratorStrategy::ChunkedSort,
        )
        .unwrap_err();
        assert!(matches!(err, SortError::ConfigError(_)));
    }

    #[test]
    fn rejects_undersized_memory_budget() {
        let err = Config::new(
            std::env::temp_dir(),
            1,
            1024,
            MergeStrategy::KWay,
            RunGeneratorStrategy::ChunkedSort,
        )
        .unwrap_err();
        assert!(matches!(err, SortError::ConfigError(_)));
    }

    #[test]
    fn rejects_a_missing_tmp_dir() {
        let err = Config::new(
            PathBuf::from("/definitely/not/a/real/path"),
            1,
            1 << 20,
            MergeStrategy::KWay,
            RunGeneratorStrategy::ChunkedSort,
        )
        .unwrap_err();
        assert!(matches!(err, SortError::ConfigError(_)));
    }

    #[test]
    fn generated_names_carry_the_expected_prefix() {
        let config = Config::new(
            std::env::temp_dir(),
            1,
            1 << 20,
            MergeStrategy::KWay,
            RunGeneratorStrategy::ChunkedSort,
        )
        .unwrap();
        assert!(config.new_run_path().file_name().unwrap().to_str().unwrap().starts_with("run#"));
        assert!(config.new_merge_path().file_name().unwrap().to_str().unwrap().starts_with("merge#"));
        assert!(config.new_shard_path().file_name().unwrap().to_str().unwrap().starts_with("shard#"));
    }
}
