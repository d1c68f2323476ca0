//! In-memory stand-ins for the external collaborators

use crate::input::{CountError, RecordCounter};
use crate::job::{BatchQueue, QueueError, SubmitRequest};
use crate::merge::{ReduceError, Reducer};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Record counter answering from a fixed table; unknown files are not files
#[derive(Debug, Default, Clone)]
pub struct StaticRecordCounter {
    counts: HashMap<String, u64>,
}

impl StaticRecordCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count(mut self, file: &str, records: u64) -> Self {
        self.counts.insert(file.to_string(), records);
        self
    }
}

#[async_trait]
impl RecordCounter for StaticRecordCounter {
    async fn count(&self, file: &str) -> Result<u64, CountError> {
        match self.counts.get(file) {
            None => Err(CountError::NotAFile),
            Some(0) => Err(CountError::NoRecordsFound),
            Some(&n) => Ok(n),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    attempts: u32,
    failures_left: u32,
    accepted: Vec<SubmitRequest>,
    ever_accepted: HashSet<String>,
    known: HashSet<String>,
}

/// Scriptable batch queue.
///
/// With [`MockBatchQueue::completing_jobs`] every accepted job immediately
/// writes its output artifact, read from the first argument after the binary.
#[derive(Debug, Default)]
pub struct MockBatchQueue {
    state: Mutex<QueueState>,
    fail_resubmissions: bool,
    artifact_size: Option<u64>,
}

impl MockBatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` submissions
    pub fn fail_submissions(self, n: u32) -> Self {
        lock(&self.state).failures_left = n;
        self
    }

    /// Reject every submission of a job name that was accepted before
    pub fn fail_resubmissions(mut self) -> Self {
        self.fail_resubmissions = true;
        self
    }

    /// Accepted jobs write an output artifact of `size` bytes
    pub fn completing_jobs(mut self, size: u64) -> Self {
        self.artifact_size = Some(size);
        self
    }

    /// Make the queue lose track of a job
    pub fn forget(&self, job_name: &str) {
        lock(&self.state).known.remove(job_name);
    }

    /// Accepted submissions in order
    pub fn submissions(&self) -> Vec<SubmitRequest> {
        lock(&self.state).accepted.clone()
    }

    /// Every submit call, accepted or not
    pub fn submit_attempts(&self) -> u32 {
        lock(&self.state).attempts
    }

    fn write_artifact(&self, request: &SubmitRequest) -> Result<(), QueueError> {
        let (Some(size), Some(output)) = (self.artifact_size, request.command.get(1)) else {
            return Ok(());
        };
        let output = Path::new(output);
        let written = output
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::write(output, vec![0u8; size as usize]));
        written.map_err(|e| QueueError::Rejected {
            job_name: request.job_name.clone(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl BatchQueue for MockBatchQueue {
    async fn submit(&self, request: &SubmitRequest) -> Result<(), QueueError> {
        {
            let mut state = lock(&self.state);
            state.attempts += 1;
            let rejected = if state.failures_left > 0 {
                state.failures_left -= 1;
                true
            } else {
                self.fail_resubmissions && state.ever_accepted.contains(&request.job_name)
            };
            if rejected {
                return Err(QueueError::Rejected {
                    job_name: request.job_name.clone(),
                    message: "queue unavailable".to_string(),
                });
            }
            state.accepted.push(request.clone());
            state.ever_accepted.insert(request.job_name.clone());
            state.known.insert(request.job_name.clone());
        }
        self.write_artifact(request)
    }

    async fn is_known(&self, job_name: &str) -> Result<bool, QueueError> {
        Ok(lock(&self.state).known.contains(job_name))
    }
}

/// Reducer that writes a target of fixed size and counts its calls
#[derive(Debug)]
pub struct RecordingReducer {
    output_size: u64,
    calls: AtomicUsize,
    inputs: Mutex<Vec<Vec<PathBuf>>>,
}

impl RecordingReducer {
    pub fn new(output_size: u64) -> Self {
        Self {
            output_size,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Inputs of every call, in call order
    pub fn inputs(&self) -> Vec<Vec<PathBuf>> {
        lock(&self.inputs).clone()
    }
}

#[async_trait]
impl Reducer for RecordingReducer {
    async fn reduce(&self, target: &Path, inputs: &[PathBuf], _log: &Path) -> Result<(), ReduceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.inputs).push(inputs.to_vec());
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ReduceError::Process(e.into()))?;
        }
        tokio::fs::write(target, vec![0u8; self.output_size as usize])
            .await
            .map_err(|e| ReduceError::Process(e.into()))
    }
}
