//! Error taxonomy for a chunked run
//!
//! Only [`RunError::DiskWrite`] (and problems detected before the run starts,
//! such as bad configuration or unreadable file lists) may terminate a run.
//! Everything else is absorbed into chunk state and the final summary.

use crate::types::{ChunkKey, ChunkState, DatasetId};
use std::path::PathBuf;
use thiserror::Error;

pub type RunResult<T> = Result<T, RunError>;

/// Top-level error for partitioning, scheduling and merging
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Input {file} excluded: {reason}")]
    InputDiscovery { file: String, reason: String },

    #[error("Submission of {job_name} failed after {attempts} attempt(s): {message}")]
    Dispatch {
        job_name: String,
        attempts: u32,
        message: String,
    },

    #[error("Chunk {chunk} failed after {attempts} attempt(s){}", .exit_code.map(|c| format!(" (exit code {c})")).unwrap_or_default())]
    Execution {
        chunk: ChunkKey,
        attempts: u32,
        exit_code: Option<i32>,
    },

    #[error("Merge of {dataset} attempted with unfinished chunks {pending:?}")]
    MergeIncomplete {
        dataset: DatasetId,
        pending: Vec<u32>,
    },

    #[error("Reduction of {dataset} failed after {attempts} attempt(s): {message}")]
    MergeFailed {
        dataset: DatasetId,
        attempts: u32,
        message: String,
    },

    #[error("Could not write {} after {attempts} attempt(s)", .path.display())]
    DiskWrite {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot reuse chunk lists of {dataset}: {message}")]
    StalePartition { dataset: DatasetId, message: String },

    #[error("Could not read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl RunError {
    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunError::DiskWrite { .. }
                | RunError::StalePartition { .. }
                | RunError::Io { .. }
                | RunError::Config(_)
                | RunError::Transition(_)
        )
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RunError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Illegal chunk state change requested from the state table
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Chunk {chunk} cannot move from {from} to {to}")]
    Invalid {
        chunk: ChunkKey,
        from: ChunkState,
        to: ChunkState,
    },

    #[error("Unknown chunk {0}")]
    UnknownChunk(ChunkKey),
}
