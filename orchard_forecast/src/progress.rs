//! Run progress reporting
//!
//! Pipeline calls receive a [`ProgressContext`] carrying a run identifier and
//! a [`ProgressSink`]. The process-wide [`ProgressRegistry`] keeps one entry
//! per run so that a caller can poll its state while it executes.
//!
//! Sub-step counters only advance on [`ProgressContext::substep`];
//! informational lines go through [`ProgressContext::note`]. A run stays in
//! the registry while it executes and for a TTL after it completes.

use crate::error::Result;
use chrono::Local;
use log::{info, warn};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of messages retained per run
pub const MESSAGE_HISTORY: usize = 50;

/// How long a completed run stays pollable before `start_run` evicts it
pub const COMPLETED_RUN_TTL: Duration = Duration::from_secs(60 * 60);

/// Receiver of ordered progress messages
pub trait ProgressSink: Send + Sync {
    /// Enter `step` with a headline message; resets sub-step counters
    fn update(&self, step: usize, message: &str);
    /// Record a sub-step of the current step, optionally setting the total
    fn substep(&self, message: &str, total: Option<usize>);
    /// Record a message without advancing the sub-step counter
    fn note(&self, message: &str);
    /// Mark the run as finished
    fn complete(&self, failed: bool);
}

/// Sink that discards everything
#[derive(Debug, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn update(&self, _step: usize, _message: &str) {}
    fn substep(&self, _message: &str, _total: Option<usize>) {}
    fn note(&self, _message: &str) {}
    fn complete(&self, _failed: bool) {}
}

/// Run identifier plus sink, handed to every pipeline call
#[derive(Clone)]
pub struct ProgressContext {
    run_id: String,
    sink: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for ProgressContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressContext")
            .field("run_id", &self.run_id)
            .finish()
    }
}

impl ProgressContext {
    pub fn new(run_id: impl Into<String>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            run_id: run_id.into(),
            sink,
        }
    }

    /// Context that only logs
    pub fn detached(run_id: impl Into<String>) -> Self {
        Self::new(run_id, Arc::new(NullSink))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn update(&self, step: usize, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("[{}] step {}: {}", self.run_id, step, message);
        self.sink.update(step, message);
    }

    pub fn substep(&self, message: impl AsRef<str>, total: Option<usize>) {
        let message = message.as_ref();
        info!("[{}]   {}", self.run_id, message);
        self.sink.substep(message, total);
    }

    pub fn note(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("[{}]   {}", self.run_id, message);
        self.sink.note(message);
    }

    pub fn complete(&self, failed: bool) {
        info!(
            "[{}] run {}",
            self.run_id,
            if failed { "failed" } else { "completed" }
        );
        self.sink.complete(failed);
    }
}

/// Message with its wall-clock time (`HH:MM:SS`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedMessage {
    pub timestamp: String,
    pub message: String,
}

/// Serializable view of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub run_id: String,
    pub current_step: usize,
    pub total_steps: usize,
    pub current_message: String,
    pub current_substep: usize,
    pub total_substeps: usize,
    pub messages: Vec<TimedMessage>,
    pub is_complete: bool,
    pub failed: bool,
    pub elapsed_secs: f64,
}

#[derive(Debug)]
struct RunState {
    current_step: usize,
    total_steps: usize,
    current_message: String,
    current_substep: usize,
    total_substeps: usize,
    messages: VecDeque<TimedMessage>,
    is_complete: bool,
    failed: bool,
    started: Instant,
    finished: Option<Instant>,
}

impl RunState {
    fn push(&mut self, message: &str) {
        self.messages.push_back(TimedMessage {
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            message: message.to_string(),
        });
        while self.messages.len() > MESSAGE_HISTORY {
            self.messages.pop_front();
        }
    }
}

/// Progress of one run, shared between the worker and pollers
#[derive(Debug)]
pub struct RunProgress {
    run_id: String,
    state: Mutex<RunState>,
}

impl RunProgress {
    fn new(run_id: String, total_steps: usize) -> Self {
        let now = Instant::now();
        let mut state = RunState {
            current_step: 0,
            total_steps,
            current_message: format!("Starting {}...", run_id),
            current_substep: 0,
            total_substeps: 0,
            messages: VecDeque::with_capacity(MESSAGE_HISTORY),
            is_complete: false,
            failed: false,
            started: now,
            finished: None,
        };
        let first = state.current_message.clone();
        state.push(&first);
        Self {
            run_id,
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock();
        let end = state.finished.unwrap_or_else(Instant::now);
        ProgressSnapshot {
            run_id: self.run_id.clone(),
            current_step: state.current_step,
            total_steps: state.total_steps,
            current_message: state.current_message.clone(),
            current_substep: state.current_substep,
            total_substeps: state.total_substeps,
            messages: state.messages.iter().cloned().collect(),
            is_complete: state.is_complete,
            failed: state.failed,
            elapsed_secs: end.duration_since(state.started).as_secs_f64(),
        }
    }

    /// Time since completion; `None` while the run is in flight
    fn completed_for(&self) -> Option<Duration> {
        self.state.lock().finished.map(|at| at.elapsed())
    }
}

impl ProgressSink for RunProgress {
    fn update(&self, step: usize, message: &str) {
        let mut state = self.state.lock();
        state.current_step = step;
        state.current_message = message.to_string();
        state.current_substep = 0;
        state.total_substeps = 0;
        state.push(message);
    }

    fn substep(&self, message: &str, total: Option<usize>) {
        let mut state = self.state.lock();
        state.current_substep += 1;
        if let Some(total) = total.filter(|t| *t > 0) {
            state.total_substeps = total;
        }
        state.push(message);
    }

    fn note(&self, message: &str) {
        self.state.lock().push(message);
    }

    fn complete(&self, failed: bool) {
        let mut state = self.state.lock();
        state.is_complete = true;
        state.failed = failed;
        if state.finished.is_none() {
            state.finished = Some(Instant::now());
        }
    }
}

/// Sink that forwards to a [`RunProgress`] and mirrors every change to
/// `<dir>/<run_id>.json`, so other processes can poll the run
#[derive(Debug)]
pub struct SnapshotFileSink {
    run: Arc<RunProgress>,
    path: PathBuf,
}

impl SnapshotFileSink {
    pub fn new(run: Arc<RunProgress>, dir: &Path) -> Self {
        let path = snapshot_path(dir, &run.run_id);
        let sink = Self { run, path };
        sink.persist();
        sink
    }

    fn persist(&self) {
        if let Err(e) = write_snapshot(&self.path, &self.run.snapshot()) {
            warn!("Cannot write progress snapshot {}: {}", self.path.display(), e);
        }
    }
}

impl ProgressSink for SnapshotFileSink {
    fn update(&self, step: usize, message: &str) {
        self.run.update(step, message);
        self.persist();
    }

    fn substep(&self, message: &str, total: Option<usize>) {
        self.run.substep(message, total);
        self.persist();
    }

    fn note(&self, message: &str) {
        self.run.note(message);
        self.persist();
    }

    fn complete(&self, failed: bool) {
        self.run.complete(failed);
        self.persist();
    }
}

fn snapshot_path(dir: &Path, run_id: &str) -> PathBuf {
    dir.join(format!("{}.json", run_id))
}

fn write_snapshot(path: &Path, snapshot: &ProgressSnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    serde_json::to_writer(File::create(&tmp)?, snapshot)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read the snapshot mirrored for `run_id` under `dir`
pub fn read_snapshot(dir: &Path, run_id: &str) -> Result<ProgressSnapshot> {
    let file = File::open(snapshot_path(dir, run_id))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Map from run identifier to its progress
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    runs: RwLock<HashMap<String, Arc<RunProgress>>>,
}

static GLOBAL: Lazy<ProgressRegistry> = Lazy::new(ProgressRegistry::new);

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> &'static ProgressRegistry {
        &GLOBAL
    }

    /// Register a run, replacing any previous run with the same id.
    ///
    /// Runs completed more than [`COMPLETED_RUN_TTL`] ago are evicted first.
    pub fn start_run(&self, run_id: impl Into<String>, total_steps: usize) -> ProgressContext {
        let run_id = run_id.into();
        let run = self.register(&run_id, total_steps);
        ProgressContext::new(run_id, run)
    }

    /// Like [`ProgressRegistry::start_run`], also mirroring snapshots into `dir`
    pub fn start_mirrored_run(
        &self,
        run_id: impl Into<String>,
        total_steps: usize,
        dir: &Path,
    ) -> ProgressContext {
        let run_id = run_id.into();
        let run = self.register(&run_id, total_steps);
        ProgressContext::new(run_id, Arc::new(SnapshotFileSink::new(run, dir)))
    }

    fn register(&self, run_id: &str, total_steps: usize) -> Arc<RunProgress> {
        self.evict_expired(COMPLETED_RUN_TTL);
        let run = Arc::new(RunProgress::new(run_id.to_string(), total_steps));
        self.runs.write().insert(run_id.to_string(), Arc::clone(&run));
        run
    }

    pub fn snapshot(&self, run_id: &str) -> Option<ProgressSnapshot> {
        self.runs.read().get(run_id).map(|run| run.snapshot())
    }

    pub fn remove(&self, run_id: &str) -> Option<ProgressSnapshot> {
        self.runs.write().remove(run_id).map(|run| run.snapshot())
    }

    pub fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop runs that completed more than `ttl` ago; returns how many.
    /// Runs still in flight are never evicted.
    pub fn evict_expired(&self, ttl: Duration) -> usize {
        let mut runs = self.runs.write();
        let before = runs.len();
        runs.retain(|_, run| run.completed_for().map_or(true, |age| age <= ttl));
        before - runs.len()
    }
}
