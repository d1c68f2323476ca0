//! Batch queue seam
//!
//! The scheduler only needs two things from a queue: submit a named job and
//! ask whether a name is still known. [`CommandBatchQueue`] speaks to an
//! LSF-style queue through its command-line tools.

use crate::config::RemoteConfig;
use crate::subprocess::{ProcessCommandBuilder, ProcessError, SubprocessManager};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue rejected {job_name}: {message}")]
    Rejected { job_name: String, message: String },

    #[error("Status query for {job_name} failed: {message}")]
    Status { job_name: String, message: String },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// A named job to place on the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub job_name: String,
    /// Destination of the job's combined output
    pub log: PathBuf,
    pub command: Vec<String>,
}

#[async_trait]
pub trait BatchQueue: Send + Sync {
    /// Place a job on the queue; returns once the queue accepted it
    async fn submit(&self, request: &SubmitRequest) -> Result<(), QueueError>;

    /// Whether the queue currently knows a job by this name
    async fn is_known(&self, job_name: &str) -> Result<bool, QueueError>;
}

/// Queue driven by submit/status commands (`bsub`/`bjobs` by default)
pub struct CommandBatchQueue {
    subprocess: SubprocessManager,
    queue: String,
    submit_program: String,
    status_program: String,
    not_found_marker: String,
    wrapper: Vec<String>,
}

impl CommandBatchQueue {
    pub fn new(subprocess: SubprocessManager, remote: &RemoteConfig) -> Self {
        Self {
            subprocess,
            queue: remote.queue.clone(),
            submit_program: remote.submit_program.clone(),
            status_program: remote.status_program.clone(),
            not_found_marker: remote.not_found_marker.clone(),
            wrapper: remote.wrapper.clone(),
        }
    }

    fn submit_args(&self, request: &SubmitRequest) -> Vec<String> {
        let mut args = vec![
            "-q".to_string(),
            self.queue.clone(),
            "-J".to_string(),
            request.job_name.clone(),
            "-oo".to_string(),
            request.log.to_string_lossy().into_owned(),
        ];
        args.extend(self.wrapper.iter().cloned());
        args.extend(request.command.iter().cloned());
        args
    }
}

#[async_trait]
impl BatchQueue for CommandBatchQueue {
    async fn submit(&self, request: &SubmitRequest) -> Result<(), QueueError> {
        let command = ProcessCommandBuilder::new(&self.submit_program)
            .args(self.submit_args(request))
            .build();
        let output = self.subprocess.run(command).await?;

        if output.status.success() {
            debug!(job_name = %request.job_name, "{}", output.stdout.trim());
            Ok(())
        } else {
            Err(QueueError::Rejected {
                job_name: request.job_name.clone(),
                message: output.stderr.trim().to_string(),
            })
        }
    }

    async fn is_known(&self, job_name: &str) -> Result<bool, QueueError> {
        let command = ProcessCommandBuilder::new(&self.status_program)
            .args(["-J", job_name])
            .build();
        let output = self.subprocess.run(command).await?;

        if output.stdout.contains(&self.not_found_marker)
            || output.stderr.contains(&self.not_found_marker)
        {
            return Ok(false);
        }
        if output.status.success() {
            Ok(true)
        } else {
            Err(QueueError::Status {
                job_name: job_name.to_string(),
                message: output.stderr.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> (CommandBatchQueue, crate::subprocess::MockProcessRunner) {
        let (subprocess, mock) = SubprocessManager::mock();
        let remote = RemoteConfig {
            wrapper: vec!["-L".to_string(), "/bin/bash".to_string()],
            ..RemoteConfig::default()
        };
        (CommandBatchQueue::new(subprocess, &remote), mock)
    }

    fn request() -> SubmitRequest {
        SubmitRequest {
            job_name: "stamp_QCD_1".to_string(),
            log: PathBuf::from("log/QCD_1.log"),
            command: vec!["./Analyzer".to_string(), "out.root".to_string()],
        }
    }

    #[tokio::test]
    async fn test_submit_builds_queue_command() {
        let (queue, mock) = queue();
        mock.expect_command("bsub")
            .with_args(|args| {
                args == [
                    "-q", "1nh", "-J", "stamp_QCD_1", "-oo", "log/QCD_1.log", "-L", "/bin/bash",
                    "./Analyzer", "out.root",
                ]
            })
            .returns_stdout("Job <123> is submitted to queue <1nh>.\n")
            .finish();

        queue.submit(&request()).await.unwrap();
        assert!(mock.verify_called("bsub", 1));
    }

    #[tokio::test]
    async fn test_rejected_submission() {
        let (queue, mock) = queue();
        mock.expect_command("bsub")
            .returns_exit_code(255)
            .returns_stderr("Request aborted by esub")
            .finish();

        let err = queue.submit(&request()).await.unwrap_err();
        assert!(matches!(err, QueueError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_unknown_job_detected_from_marker() {
        let (queue, mock) = queue();
        mock.expect_command("bjobs")
            .returns_exit_code(255)
            .returns_stderr("Job <stamp_QCD_1> is not found\n")
            .finish();

        assert!(!queue.is_known("stamp_QCD_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_known_job() {
        let (queue, mock) = queue();
        mock.expect_command("bjobs")
            .returns_stdout("JOBID USER STAT\n123 me RUN\n")
            .finish();

        assert!(queue.is_known("stamp_QCD_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_status_failure_without_marker_is_error() {
        let (queue, mock) = queue();
        mock.expect_command("bjobs")
            .returns_exit_code(1)
            .returns_stderr("LSF is down")
            .finish();

        assert!(matches!(
            queue.is_known("stamp_QCD_1").await,
            Err(QueueError::Status { .. })
        ));
    }
}
