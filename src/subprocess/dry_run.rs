use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::error::ProcessError;
use super::runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner};

/// Runner that only reports what it would execute
#[derive(Default)]
pub struct DryRunProcessRunner {
    counter: AtomicUsize,
}

impl DryRunProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands_seen(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessRunner for DryRunProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        tracing::info!("[dry {}] {}", n, command.display_line());
        Ok(ProcessOutput {
            status: ExitStatus::Success,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
        })
    }
}
