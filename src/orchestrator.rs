//! Drives one local sort end to end: splits the input into chunks, fans out
//! run generation across a thread pool, merges the resulting runs into the
//! final output, and sweeps intermediate files behind it.
//!
//! Progress moves through an explicit state machine, logged at each
//! transition, so a stuck or crashed sort is diagnosable from the log alone
//! rather than from stack inspection.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use command_executor::command::Command;
use command_executor::shutdown_mode::ShutdownMode;
use command_executor::thread_pool::ThreadPool;
use command_executor::thread_pool_builder::ThreadPoolBuilder;
use rlimit::{getrlimit, setrlimit, Resource};

use crate::chunker;
use crate::config::{Config, MergeStrategy};
use crate::error::SortError;
use crate::merger;
use crate::run_generator;

thread_local! {
    static TL_CONFIG: RefCell<Option<Config>> = RefCell::new(None);
    static TL_INPUT: RefCell<Option<PathBuf>> = RefCell::new(None);
    static RUN_FILES: RefCell<Vec<PathBuf>> = RefCell::new(Vec::new());
    static MERGED_FILES: RefCell<Vec<PathBuf>> = RefCell::new(Vec::new());
}

fn get_tl_config() -> Config {
    TL_CONFIG.with(|c| c.borrow().as_ref().expect("thread-local config set before any task runs").clone())
}

fn get_tl_input() -> PathBuf {
    TL_INPUT.with(|p| p.borrow().as_ref().expect("thread-local input set before any task runs").clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadingInput,
    DistributingSorts,
    WaitingForSorts,
    DistributingMerges,
    WaitingForMerges,
    FinalMerge,
    Done,
    Failed,
}

fn transition(state: &mut State, next: State) {
    log::info!("orchestrator: {:?} -> {:?}", state, next);
    *state = next;
}

struct RunGenCommand {
    range: chunker::ChunkRange,
}

impl Command for RunGenCommand {
    fn execute(&self) -> Result<(), anyhow::Error> {
        let config = get_tl_config();
        let input = get_tl_input();
        let runs = run_generator::generate_runs(&input, self.range.start, self.range.len(), &config)
            .map_err(anyhow::Error::from)?;
        RUN_FILES.with(|f| f.borrow_mut().extend(runs));
        Ok(())
    }
}

struct MergeCommand {
    inputs: Vec<PathBuf>,
    output: PathBuf,
}

impl Command for MergeCommand {
    fn execute(&self) -> Result<(), anyhow::Error> {
        let config = get_tl_config();
        merger::merge(&self.inputs, &self.output, config.memory_budget_bytes(), config.max_record_len())
            .map_err(anyhow::Error::from)?;
        for input in &self.inputs {
            let _ = std::fs::remove_file(input);
        }
        MERGED_FILES.with(|f| f.borrow_mut().push(self.output.clone()));
        Ok(())
    }
}

fn get_rlimits() -> Result<(u64, u64), SortError> {
    getrlimit(Resource::NOFILE).map_err(|e| SortError::io("orchestrator: getrlimit", e))
}

fn set_rlimits(soft: u64, hard: u64) -> Result<(), SortError> {
    setrlimit(Resource::NOFILE, soft, hard).map_err(|e| SortError::io("orchestrator: setrlimit", e))
}

/// Sort `input_path` into `output_path` using `config`. On success `output_path`
/// holds the fully sorted records and no intermediate files remain in
/// `config.tmp()`. On failure, the orchestrator deletes every intermediate
/// file it had created up to that point before propagating the error —
/// `config.tmp()` is left clean either way, per the state machine's `FAILED`
/// transition.
pub fn sort(input_path: &Path, output_path: &Path, config: &Config) -> Result<(), SortError> {
    let mut state = State::ReadingInput;
    log::info!("orchestrator: state {:?}", state);

    let (soft, hard) = get_rlimits()?;
    let headroom = (config.worker_count() as u64 * 4 + 256).max(soft);
    log::info!("orchestrator: raising NOFILE soft limit from {} to {}", soft, headroom);
    set_rlimits(headroom, hard)?;

    let mut known_files: Vec<PathBuf> = Vec::new();
    let result = run(input_path, output_path, config, &mut state, &mut known_files);

    log::info!("orchestrator: restoring NOFILE soft limit to {}", soft);
    set_rlimits(soft, hard)?;

    if result.is_err() {
        transition(&mut state, State::Failed);
        sweep_known_files(&known_files);
    }
    result
}

/// Delete every intermediate file the orchestrator knows it created. Safe to
/// call with paths already removed by a successful merge step: a missing file
/// is not an error here, only a failure to remove an existing one is logged.
fn sweep_known_files(files: &[PathBuf]) {
    for file in files {
        match std::fs::remove_file(file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("orchestrator: failed to remove intermediate file {}: {e}", file.display()),
        }
    }
}

fn run(
    input_path: &Path,
    output_path: &Path,
    config: &Config,
    state: &mut State,
    known_files: &mut Vec<PathBuf>,
) -> Result<(), SortError> {
    let ranges = chunker::chunk(input_path, config.worker_count() * 4, config.max_record_len())?;
    transition(state, State::DistributingSorts);

    if ranges.is_empty() {
        std::fs::File::create(output_path).map_err(|e| SortError::io_at("orchestrator: create empty output", output_path, e))?;
        transition(state, State::Done);
        return Ok(());
    }

    let mut run_pool = build_pool("run-generation", config)?;
    run_pool.set_thread_local(&TL_CONFIG, Some(config.clone()));
    run_pool.set_thread_local(&TL_INPUT, Some(input_path.to_path_buf()));

    for range in ranges {
        run_pool.submit(Box::new(RunGenCommand { range }));
    }

    transition(state, State::WaitingForSorts);
    let run_files = collect_thread_local(&mut run_pool, &RUN_FILES);
    known_files.extend(run_files.iter().cloned());
    run_pool.shutdown();
    run_pool.join().map_err(|e| SortError::InvariantViolation(format!("run-generation pool: {e}")))?;
    log::info!("orchestrator: {} runs generated", run_files.len());

    transition(state, State::DistributingMerges);
    let merged_files = match config.merge_strategy() {
        MergeStrategy::KWay => run_files,
        MergeStrategy::Binary => merge_in_groups(run_files, config, state, known_files)?,
    };

    transition(state, State::FinalMerge);
    log::info!("orchestrator: final merge of {} file(s)", merged_files.len());
    let staged = config.new_merge_path();
    known_files.push(staged.clone());
    merger::merge(&merged_files, &staged, config.memory_budget_bytes(), config.max_record_len())?;
    for file in &merged_files {
        let _ = std::fs::remove_file(file);
    }
    std::fs::rename(&staged, output_path)
        .map_err(|e| SortError::io_at("orchestrator: rename final output into place", output_path, e))?;

    transition(state, State::Done);
    Ok(())
}

/// Merge runs in `worker_count` groups ahead of the final merge, trading one
/// extra pass for a final merge with far fewer input streams.
fn merge_in_groups(
    run_files: Vec<PathBuf>,
    config: &Config,
    state: &mut State,
    known_files: &mut Vec<PathBuf>,
) -> Result<Vec<PathBuf>, SortError> {
    if run_files.len() <= config.worker_count() {
        return Ok(run_files);
    }

    let groups = partition(run_files, config.worker_count());
    let mut merge_pool = build_pool("intermediate-merge", config)?;
    merge_pool.set_thread_local(&TL_CONFIG, Some(config.clone()));

    for group in groups {
        if group.is_empty() {
            continue;
        }
        let output = config.new_merge_path();
        known_files.push(output.clone());
        merge_pool.submit(Box::new(MergeCommand { inputs: group, output }));
    }

    transition(state, State::WaitingForMerges);
    let merged = collect_thread_local(&mut merge_pool, &MERGED_FILES);
    merge_pool.shutdown();
    merge_pool
        .join()
        .map_err(|e| SortError::InvariantViolation(format!("intermediate-merge pool: {e}")))?;
    Ok(merged)
}

fn partition(items: Vec<PathBuf>, groups: usize) -> Vec<Vec<PathBuf>> {
    let mut out: Vec<Vec<PathBuf>> = (0..groups).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        out[i % groups].push(item);
    }
    out
}

fn build_pool(name: &str, config: &Config) -> Result<ThreadPool, SortError> {
    ThreadPoolBuilder::new()
        .with_name(name.to_string())
        .with_tasks(config.worker_count())
        .with_queue_size(config.queue_size())
        .with_shutdown_mode(ShutdownMode::CompletePending)
        .build()
        .map_err(|e| SortError::InvariantViolation(format!("failed to build thread pool {name}: {e}")))
}

fn collect_thread_local(
    pool: &mut ThreadPool,
    cell: &'static std::thread::LocalKey<RefCell<Vec<PathBuf>>>,
) -> Vec<PathBuf> {
    let result: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));
    let result_clone = result.clone();
    pool.in_all_threads_mut(Arc::new(Mutex::new(move || {
        cell.with(|local| {
            log::debug!("collecting intermediate files, thread: {}", thread::current().name().unwrap_or("unnamed"));
            let mut taken = std::mem::take(&mut *local.borrow_mut());
            result_clone.lock().unwrap().append(&mut taken);
        });
    })));
    let mut guard = result.lock().unwrap();
    std::mem::take(guard.as_mut())
}
