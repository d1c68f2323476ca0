use super::JobTemplate;
use crate::artifact::append_with_retry;
use crate::error::{RunError, RunResult};
use crate::retry::RetryPolicy;
use crate::subprocess::{ProcessCommandBuilder, SubprocessManager};
use crate::types::Chunk;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Runs a chunk as a local subprocess and waits for it.
///
/// Output of every attempt is appended to the chunk log. A non-zero exit is
/// retried under the execution policy; running out of attempts yields
/// [`RunError::Execution`], which the scheduler records as a Missing chunk.
pub struct LocalJobRunner {
    subprocess: SubprocessManager,
    template: JobTemplate,
    use_nice: bool,
    timeout: Option<Duration>,
    execution_policy: RetryPolicy,
    disk_policy: RetryPolicy,
}

impl LocalJobRunner {
    pub fn new(
        subprocess: SubprocessManager,
        template: JobTemplate,
        execution_policy: RetryPolicy,
        disk_policy: RetryPolicy,
    ) -> Self {
        Self {
            subprocess,
            template,
            use_nice: false,
            timeout: None,
            execution_policy,
            disk_policy,
        }
    }

    pub fn with_nice(mut self, use_nice: bool) -> Self {
        self.use_nice = use_nice;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command_line(&self, chunk: &Chunk, source_list: &Path) -> Vec<String> {
        let mut line = Vec::new();
        if self.use_nice {
            line.push("nice".to_string());
        }
        line.extend(self.template.command_line(chunk, source_list));
        line
    }

    pub async fn run(&self, chunk: &Chunk, source_list: &Path) -> RunResult<()> {
        let line = self.command_line(chunk, source_list);
        let Some((program, args)) = line.split_first() else {
            return Err(RunError::Execution {
                chunk: chunk.key.clone(),
                attempts: 0,
                exit_code: None,
            });
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let command = ProcessCommandBuilder::new(program)
                .args(args)
                .timeout(self.timeout)
                .build();
            debug!(chunk = %chunk.key, attempt, "Running {}", command.display_line());

            let (exit_code, log_text) = match self.subprocess.run(command).await {
                Ok(output) if output.status.success() => {
                    self.append_log(chunk, &output.stdout, &output.stderr).await?;
                    return Ok(());
                }
                Ok(output) => (
                    output.status.code(),
                    format!("{}{}", output.stdout, output.stderr),
                ),
                Err(e) => (None, format!("{}\n", e)),
            };
            self.append_log(chunk, &log_text, "").await?;

            if !self.execution_policy.allows_retry(attempt) {
                warn!(chunk = %chunk.key, attempt, "Giving up on chunk");
                return Err(RunError::Execution {
                    chunk: chunk.key.clone(),
                    attempts: attempt,
                    exit_code,
                });
            }

            let delay = self.execution_policy.delay_for_attempt(attempt);
            warn!(
                chunk = %chunk.key,
                attempt,
                "Job failed with {:?}, retrying in {:?}",
                exit_code,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn append_log(&self, chunk: &Chunk, stdout: &str, stderr: &str) -> RunResult<()> {
        if stdout.is_empty() && stderr.is_empty() {
            return Ok(());
        }
        let mut text = String::with_capacity(stdout.len() + stderr.len());
        text.push_str(stdout);
        text.push_str(stderr);
        append_with_retry(&chunk.log, text.as_bytes(), &self.disk_policy).await
    }
}
