//! Executing one chunk: the job command line plus local and queued runners

pub mod local;
pub mod queue;
pub mod remote;

pub use local::LocalJobRunner;
pub use queue::{BatchQueue, CommandBatchQueue, QueueError, SubmitRequest};
pub use remote::RemoteJobRunner;

use crate::config::{InputStyle, RunConfig};
use crate::types::{Chunk, ChunkKey};
use std::path::{Path, PathBuf};

/// Builds `<binary> <output> [key=value]* <inputs>` for a chunk
#[derive(Debug, Clone)]
pub struct JobTemplate {
    binary: PathBuf,
    options: Vec<(String, String)>,
    input_style: InputStyle,
    full_list_option: Option<String>,
}

impl JobTemplate {
    pub fn from_config(config: &RunConfig) -> Self {
        let mut options: Vec<(String, String)> = config
            .job
            .options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(n) = config.quick.filter(|n| *n > 1) {
            options.push(("quickTest".to_string(), n.to_string()));
        }

        Self {
            binary: config.job.binary.clone(),
            options,
            input_style: config.job.input_style,
            full_list_option: config.job.full_list_option.clone(),
        }
    }

    pub fn binary(&self) -> String {
        self.binary.to_string_lossy().into_owned()
    }

    /// Arguments after the binary
    pub fn args(&self, chunk: &Chunk, source_list: &Path) -> Vec<String> {
        let mut args = vec![chunk.output.to_string_lossy().into_owned()];

        for (key, value) in &self.options {
            args.push(format!("{}={}", key, value));
        }
        if let Some(option) = &self.full_list_option {
            args.push(format!("{}={}", option, source_list.display()));
        }

        match (&self.input_style, &chunk.list_file) {
            (InputStyle::ListFile, Some(list)) => args.push(list.to_string_lossy().into_owned()),
            _ => args.extend(chunk.files().map(str::to_string)),
        }
        args
    }

    /// Full command line, binary first
    pub fn command_line(&self, chunk: &Chunk, source_list: &Path) -> Vec<String> {
        let mut line = vec![self.binary()];
        line.extend(self.args(chunk, source_list));
        line
    }
}

/// Queue-wide unique job name for a chunk
pub fn job_name(run_stamp: &str, key: &ChunkKey) -> String {
    format!("{}_{}_{}", run_stamp, key.dataset, key.index)
}
