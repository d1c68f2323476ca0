//! Record counting for input files

use crate::subprocess::{ProcessCommandBuilder, SubprocessManager};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CountError {
    #[error("bad file")]
    NotAFile,

    #[error("0 entry")]
    NoRecordsFound,

    #[error("record probe failed: {0}")]
    Probe(String),
}

/// Reports how many records an input file holds
#[async_trait]
pub trait RecordCounter: Send + Sync {
    async fn count(&self, file: &str) -> Result<u64, CountError>;
}

/// Counts records by running an external probe `<program> [args] <file>`
/// that prints the count on its last line of output
pub struct CommandRecordCounter {
    subprocess: SubprocessManager,
    probe: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandRecordCounter {
    pub fn new(subprocess: SubprocessManager, probe: Vec<String>) -> Self {
        Self {
            subprocess,
            probe,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl RecordCounter for CommandRecordCounter {
    async fn count(&self, file: &str) -> Result<u64, CountError> {
        let Some((program, fixed_args)) = self.probe.split_first() else {
            return Err(CountError::Probe("no probe program configured".to_string()));
        };

        let command = ProcessCommandBuilder::new(program)
            .args(fixed_args)
            .arg(file)
            .timeout(self.timeout)
            .build();

        let output = self
            .subprocess
            .run(command)
            .await
            .map_err(|e| CountError::Probe(e.to_string()))?;

        if !output.status.success() {
            trace!("Probe rejected {}: {}", file, output.stderr.trim());
            return Err(CountError::NotAFile);
        }

        let count = parse_count(&output.stdout)?;
        if count == 0 {
            return Err(CountError::NoRecordsFound);
        }
        Ok(count)
    }
}

fn parse_count(stdout: &str) -> Result<u64, CountError> {
    let last = stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .ok_or_else(|| CountError::Probe("probe printed nothing".to_string()))?;
    last.parse::<u64>()
        .map_err(|_| CountError::Probe(format!("unexpected probe output {:?}", last)))
}
