//! Testing utilities and fixtures
//!
//! Fakes for the external collaborators (record probe, batch queue,
//! reducer) plus a scratch workspace holding dataset lists and a
//! configuration rooted in a temporary directory.

pub mod mocks;

pub use mocks::{MockBatchQueue, RecordingReducer, StaticRecordCounter};

use crate::config::RunConfig;
use crate::retry::RetryPolicy;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temporary directory with dataset lists and a matching configuration
pub struct TestWorkspace {
    pub temp_dir: TempDir,
    lists: Vec<PathBuf>,
}

impl TestWorkspace {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
            lists: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write `<root>/lists/<dataset>.txt` with one file per line
    pub fn add_dataset(&mut self, dataset: &str, files: &[&str]) -> std::io::Result<PathBuf> {
        let dir = self.path().join("lists");
        std::fs::create_dir_all(&dir)?;
        let list = dir.join(format!("{dataset}.txt"));
        let mut content = files.join("\n");
        content.push('\n');
        std::fs::write(&list, content)?;
        self.lists.push(list.clone());
        Ok(list)
    }

    /// Lists added so far, as command line inputs
    pub fn inputs(&self) -> Vec<String> {
        self.lists
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    /// Configuration writing under `<root>/out` with retries that never sleep
    pub fn config(&self) -> RunConfig {
        let mut config = RunConfig {
            output_dir: self.path().join("out"),
            run_stamp: Some("test".to_string()),
            ..RunConfig::default()
        };
        config.retry.dispatch = RetryPolicy::immediate(3);
        config.retry.execution = RetryPolicy::immediate(3);
        config.retry.disk = RetryPolicy::immediate(3);
        config.retry.merge = RetryPolicy::immediate(3);
        config
    }
}
