//! End-of-run summary

use crate::artifact::write_with_retry;
use crate::error::{RunError, RunResult};
use crate::input::BadItem;
use crate::merge::{MergeFailure, MergeReport};
use crate::retry::RetryPolicy;
use crate::scheduler::{ChunkTable, Progress};
use crate::types::{ChunkKey, DatasetId};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// What happened to every chunk, input and dataset of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_chunks: usize,
    pub completed: usize,
    pub missing: Vec<ChunkKey>,
    pub bad_items: Vec<BadItem>,
    pub merged: Vec<DatasetId>,
    pub merge_failures: Vec<MergeFailure>,
    pub skipped_existing: Vec<DatasetId>,
    pub progress: Progress,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn new(table: &ChunkTable, merges: MergeReport, bad_items: Vec<BadItem>, dry_run: bool) -> Self {
        let progress = table.progress();
        Self {
            total_chunks: progress.total,
            completed: progress.completed,
            missing: table.missing(),
            bad_items,
            merged: merges.merged,
            merge_failures: merges.failures,
            skipped_existing: merges.skipped_existing,
            progress,
            dry_run,
        }
    }

    /// No chunk ended Missing and no merge failed. Bad inputs do not count.
    pub fn success(&self) -> bool {
        self.missing.is_empty() && self.merge_failures.is_empty()
    }

    /// Write as pretty JSON, retrying per the disk policy
    pub async fn write(&self, path: &Path, policy: &RetryPolicy) -> RunResult<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| RunError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        })?;
        write_with_retry(path, &json, policy).await
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Chunks completed: {}/{}", self.completed, self.total_chunks)?;
        if self.dry_run {
            writeln!(f, "Dry run: no job was executed")?;
        }
        if !self.missing.is_empty() {
            writeln!(f, "Missing chunks ({}):", self.missing.len())?;
            for key in &self.missing {
                writeln!(f, "  {key}")?;
            }
        }
        if !self.bad_items.is_empty() {
            writeln!(f, "Excluded inputs ({}):", self.bad_items.len())?;
            for bad in &self.bad_items {
                writeln!(f, "  {} {} ({})", bad.dataset, bad.file, bad.reason)?;
            }
        }
        if !self.merged.is_empty() {
            let names: Vec<&str> = self.merged.iter().map(DatasetId::as_str).collect();
            writeln!(f, "Merged: {}", names.join(", "))?;
        }
        if !self.skipped_existing.is_empty() {
            let names: Vec<&str> = self.skipped_existing.iter().map(DatasetId::as_str).collect();
            writeln!(f, "Already merged: {}", names.join(", "))?;
        }
        for failure in &self.merge_failures {
            writeln!(f, "Merge of {} failed: {}", failure.dataset, failure.message)?;
        }
        Ok(())
    }
}
