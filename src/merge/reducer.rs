//! Reduction of N chunk artifacts into one

use crate::artifact::append_with_retry;
use crate::error::RunError;
use crate::retry::RetryPolicy;
use crate::subprocess::{ProcessCommandBuilder, ProcessError, SubprocessManager};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("reducer exited with {}", .0.map(|c| c.to_string()).unwrap_or_else(|| "a signal".to_string()))]
    Exited(Option<i32>),

    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The reducer log could not be written; aborts the run
    #[error(transparent)]
    Log(RunError),
}

/// Merges homogeneous artifacts into `target`, overwriting it
#[async_trait]
pub trait Reducer: Send + Sync {
    async fn reduce(&self, target: &Path, inputs: &[PathBuf], log: &Path) -> Result<(), ReduceError>;
}

/// Runs `<program> [args] <target> <inputs...>` (`hadd -f -v` by default)
pub struct CommandReducer {
    subprocess: SubprocessManager,
    command: Vec<String>,
    disk_policy: RetryPolicy,
}

impl CommandReducer {
    pub fn new(subprocess: SubprocessManager, command: Vec<String>, disk_policy: RetryPolicy) -> Self {
        Self {
            subprocess,
            command,
            disk_policy,
        }
    }
}

#[async_trait]
impl Reducer for CommandReducer {
    async fn reduce(&self, target: &Path, inputs: &[PathBuf], log: &Path) -> Result<(), ReduceError> {
        let Some(builder) = ProcessCommandBuilder::from_line(&self.command) else {
            return Err(ReduceError::Exited(None));
        };

        let command = builder
            .path_arg(target)
            .args(inputs.iter().map(|p| p.to_string_lossy()))
            .build();
        let output = self.subprocess.run(command).await?;

        let mut text = output.stdout;
        text.push_str(&output.stderr);
        if !text.is_empty() {
            append_with_retry(log, text.as_bytes(), &self.disk_policy)
                .await
                .map_err(ReduceError::Log)?;
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(ReduceError::Exited(output.status.code()))
        }
    }
}
